use super::iter::Value;
use super::Document;

/// Renders a document (or, when `is_array`, the array-bracket form) as a
/// human-readable string. Dates render as `ISODate(...)`, object ids as
/// `ObjectId(...)`, 64-bit ints as `NumberLong(n)`, matching SPEC_FULL.md
/// §4.1. Regex has no canonical form in the original; this crate renders it
/// as `Regex("pattern","options")` (an open question resolved in DESIGN.md).
pub(super) fn render_document(doc: &Document, is_array: bool) -> String {
    let mut out = String::new();
    out.push_str(if is_array { "[ " } else { "{ " });

    let mut iter = doc.iter();
    let mut first = true;
    while iter.next() {
        if !first {
            out.push_str(", ");
        }
        first = false;
        if !is_array {
            out.push('"');
            out.push_str(&iter.key().unwrap_or_default().replace('"', "\\\""));
            out.push_str("\": ");
        }
        if let Some(value) = iter.value() {
            out.push_str(&render_value(&value));
        }
    }

    out.push_str(if is_array { " ]" } else { " }" });
    out
}

fn render_value(value: &Value<'_>) -> String {
    match value {
        Value::Double(d) => d.to_string(),
        Value::String(s) => format!("\"{}\"", s.replace('"', "\\\"")),
        Value::Document(bytes) => match Document::from_bytes(bytes.to_vec()) {
            Some(doc) => render_document(&doc, false),
            None => "{ <invalid> }".to_string(),
        },
        Value::Array(bytes) => match Document::from_bytes(bytes.to_vec()) {
            Some(doc) => render_document(&doc, true),
            None => "[ <invalid> ]".to_string(),
        },
        Value::Undefined => "undefined".to_string(),
        Value::ObjectId(oid) => format!("ObjectId(\"{}\")", oid.to_hex()),
        Value::Boolean(b) => b.to_string(),
        Value::DateTime(millis) => match chrono::DateTime::from_timestamp_millis(*millis) {
            Some(dt) => format!("ISODate(\"{}\")", dt.to_rfc3339()),
            None => format!("ISODate(<invalid:{millis}>)"),
        },
        Value::Null => "null".to_string(),
        Value::Regex(pattern, options) => format!("Regex(\"{pattern}\",\"{options}\")"),
        Value::Int32(n) => n.to_string(),
        Value::Int64(n) => format!("NumberLong({n})"),
    }
}
