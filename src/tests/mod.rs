//! Property-based tests spanning several modules.

mod proptest_signatures;
