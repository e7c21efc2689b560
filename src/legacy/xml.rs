//! Flat `<xml>` document encoding used by the legacy protocol.
//!
//! Every field is a direct child of the `<xml>` root. Values containing
//! markup characters are wrapped in CDATA on output instead of being
//! entity-escaped; input accepts both forms.

use quick_xml::{Reader, events::Event};
use serde_json::{Map, Value};

use crate::{
    error::{PayError, Result},
    formatter,
};

const ROOT: &str = "xml";

fn needs_cdata(text: &str) -> bool {
    text.contains(['<', '>', '&', '\'', '"'])
}

fn push_cdata(out: &mut String, text: &str) {
    out.push_str("<![CDATA[");
    // a literal "]]>" has to be split across two sections
    out.push_str(&text.replace("]]>", "]]]]><![CDATA[>"));
    out.push_str("]]>");
}

/// Whether `key` can be written as an element name.
fn is_element_name(key: &str) -> bool {
    let mut chars = key.chars();
    chars.next().is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Encodes a flat mapping as `<xml><key>value</key>...</xml>`.
///
/// Null and empty values are written as empty elements. Nested arrays and
/// objects are written as their compact JSON text.
///
/// # Errors
///
/// Returns [`PayError::PayloadType`] when a key is not a valid element name.
pub fn to_xml(fields: &Map<String, Value>) -> Result<String> {
    let mut out = String::with_capacity(fields.len() * 32 + 11);
    out.push_str("<xml>");
    for (key, value) in fields {
        if !is_element_name(key) {
            return Err(PayError::PayloadType(format!("field name {key:?} is not an XML element name")));
        }
        let text = formatter::field_text(value).unwrap_or_default();
        out.push('<');
        out.push_str(key);
        out.push('>');
        if needs_cdata(&text) {
            push_cdata(&mut out, &text);
        } else {
            out.push_str(&text);
        }
        out.push_str("</");
        out.push_str(key);
        out.push('>');
    }
    out.push_str("</xml>");
    Ok(out)
}

/// Decodes a legacy document into a flat mapping of strings.
///
/// An empty or whitespace-only document decodes to an empty mapping.
/// Elements nested below the first level are ignored.
///
/// # Errors
///
/// Returns [`PayError::Format`] for malformed XML or a root other than `<xml>`.
pub fn from_xml(document: &str) -> Result<Map<String, Value>> {
    let mut fields = Map::new();
    if document.trim().is_empty() {
        return Ok(fields);
    }

    let mut reader = Reader::from_str(document);
    reader.config_mut().trim_text(false);

    let mut depth = 0usize;
    let mut key = String::new();
    let mut text = String::new();

    loop {
        match reader.read_event().map_err(|e| PayError::Format(format!("xml: {e}")))? {
            Event::Start(element) => {
                depth += 1;
                let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                if depth == 1 && name != ROOT {
                    return Err(PayError::Format(format!("xml: unexpected root <{name}>")));
                }
                if depth == 2 {
                    key = name;
                    text.clear();
                }
            }
            Event::Empty(element) if depth == 1 => {
                let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                fields.insert(name, Value::String(String::new()));
            }
            Event::Empty(element) if depth == 0 => {
                if element.name().as_ref() != ROOT.as_bytes() {
                    return Err(PayError::Format("xml: unexpected empty root".to_owned()));
                }
            }
            Event::Text(chunk) if depth == 2 => {
                let chunk = chunk.unescape().map_err(|e| PayError::Format(format!("xml: {e}")))?;
                text.push_str(&chunk);
            }
            Event::CData(chunk) if depth == 2 => {
                text.push_str(&String::from_utf8_lossy(&chunk.into_inner()));
            }
            Event::End(_) => {
                if depth == 2 {
                    fields.insert(std::mem::take(&mut key), Value::String(std::mem::take(&mut text)));
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth != 0 {
        return Err(PayError::Format("xml: unexpected end of document".to_owned()));
    }
    Ok(fields)
}
