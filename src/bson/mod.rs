//! A small, dependency-free BSON document codec.
//!
//! `Document` owns a length-prefixed byte buffer and is built by a series
//! of in-place `append_*` mutations, mirroring how the wire client actually
//! assembles command documents: start empty, append fields, send. Reading
//! is handled by [`DocumentIter`] in the sibling `iter` module.

mod iter;
mod render;
pub mod object_id;

pub use iter::{DocumentIter, Value};
pub use object_id::{ObjectId, ObjectIdGenerator};

use crate::error::{MongoError, Result};

/// BSON element type tags (subset this crate supports; see SPEC_FULL.md §3).
pub mod tag {
    pub const DOUBLE: u8 = 0x01;
    pub const STRING: u8 = 0x02;
    pub const DOCUMENT: u8 = 0x03;
    pub const ARRAY: u8 = 0x04;
    pub const UNDEFINED: u8 = 0x06;
    pub const OBJECT_ID: u8 = 0x07;
    pub const BOOLEAN: u8 = 0x08;
    pub const DATE_TIME: u8 = 0x09;
    pub const NULL: u8 = 0x0A;
    pub const REGEX: u8 = 0x0B;
    pub const INT32: u8 = 0x10;
    pub const INT64: u8 = 0x12;
}

const EMPTY_DOCUMENT: [u8; 5] = [5, 0, 0, 0, 0];

/// An owned, length-prefixed BSON document.
#[derive(Clone, PartialEq, Eq)]
pub struct Document(Vec<u8>);

impl Document {
    /// The canonical 5-byte empty document.
    pub fn empty() -> Self {
        Document(EMPTY_DOCUMENT.to_vec())
    }

    /// An empty document with a single generated `_id` field, matching the
    /// original's `mongo_bson_new()` default-constructor convenience.
    pub fn with_object_id(generator: &ObjectIdGenerator) -> Self {
        let mut doc = Document::empty();
        doc.append_object_id("_id", generator.generate());
        doc
    }

    /// Builds a document from an existing byte buffer, validating that the
    /// leading little-endian i32 length exactly matches the buffer length.
    pub fn from_bytes(buf: impl Into<Vec<u8>>) -> Option<Self> {
        let buf = buf.into();
        if buf.len() < 5 {
            return None;
        }
        let declared = i32::from_le_bytes(buf[0..4].try_into().unwrap());
        if declared < 0 || declared as usize != buf.len() {
            return None;
        }
        Some(Document(buf))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.len() == 5
    }

    pub fn iter(&self) -> DocumentIter<'_> {
        DocumentIter::new(&self.0)
    }

    /// Concatenates the elements of `other` into `self`. A no-op if `other`
    /// is empty.
    pub fn join(&mut self, other: &Document) {
        if other.len() > 5 {
            self.0.pop(); // drop receiver's trailing NUL
            self.0.extend_from_slice(&other.0[4..]); // skip other's length prefix
        }
        self.rewrite_length();
    }

    fn rewrite_length(&mut self) {
        let len = self.0.len() as i32;
        self.0[0..4].copy_from_slice(&len.to_le_bytes());
    }

    /// Overwrites the trailing NUL with `tag`, appends the cstring key, the
    /// payload sections, a fresh trailing NUL, then rewrites the length.
    fn append_raw(&mut self, tag: u8, key: &str, parts: &[&[u8]]) {
        debug_assert!(!key.as_bytes().contains(&0), "BSON keys may not contain NUL");
        let last = self.0.len() - 1;
        self.0[last] = tag;
        self.0.extend_from_slice(key.as_bytes());
        self.0.push(0);
        for part in parts {
            self.0.extend_from_slice(part);
        }
        self.0.push(0);
        self.rewrite_length();
    }

    pub fn append_double(&mut self, key: &str, value: f64) {
        self.append_raw(tag::DOUBLE, key, &[&value.to_le_bytes()]);
    }

    /// Appends a NULL element instead of a string when `value` is `None`,
    /// matching the original's `mongo_bson_append_string` null-forwarding.
    pub fn append_string(&mut self, key: &str, value: Option<&str>) {
        match value {
            None => self.append_null(key),
            Some(value) => {
                let len = (value.len() + 1) as i32;
                self.append_raw(
                    tag::STRING,
                    key,
                    &[&len.to_le_bytes(), value.as_bytes(), &[0]],
                );
            }
        }
    }

    pub fn append_document(&mut self, key: &str, value: &Document) {
        self.append_raw(tag::DOCUMENT, key, &[&value.0]);
    }

    /// Appends `value` as a BSON array, whose keys must already be the
    /// decimal-index convention ("0", "1", …) the caller built into it.
    pub fn append_array(&mut self, key: &str, value: &Document) {
        self.append_raw(tag::ARRAY, key, &[&value.0]);
    }

    pub fn append_undefined(&mut self, key: &str) {
        self.append_raw(tag::UNDEFINED, key, &[]);
    }

    pub fn append_object_id(&mut self, key: &str, value: ObjectId) {
        self.append_raw(tag::OBJECT_ID, key, &[value.as_bytes()]);
    }

    pub fn append_bool(&mut self, key: &str, value: bool) {
        self.append_raw(tag::BOOLEAN, key, &[&[value as u8]]);
    }

    /// Milliseconds since the Unix epoch.
    pub fn append_date_time(&mut self, key: &str, millis: i64) {
        self.append_raw(tag::DATE_TIME, key, &[&millis.to_le_bytes()]);
    }

    pub fn append_null(&mut self, key: &str) {
        self.append_raw(tag::NULL, key, &[]);
    }

    pub fn append_regex(&mut self, key: &str, pattern: &str, options: &str) {
        self.append_raw(
            tag::REGEX,
            key,
            &[pattern.as_bytes(), &[0], options.as_bytes(), &[0]],
        );
    }

    pub fn append_i32(&mut self, key: &str, value: i32) {
        self.append_raw(tag::INT32, key, &[&value.to_le_bytes()]);
    }

    pub fn append_i64(&mut self, key: &str, value: i64) {
        self.append_raw(tag::INT64, key, &[&value.to_le_bytes()]);
    }

    /// Renders the document as `{ "k": v, … }`, matching §4.1's
    /// human-readable convention.
    pub fn render(&self) -> String {
        render::render_document(self, false)
    }

    /// Looks up `key`'s value as a boolean, coercing leniently across
    /// boolean, int32 (non-zero), int64 (non-zero), and double (== 1.0), as
    /// the original's accessor does. Returns an error for any other type or
    /// a missing key.
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        let mut iter = self.iter();
        if !iter.find(key) {
            return Err(MongoError::InvalidReply(format!("missing field {key:?}")));
        }
        match iter.value() {
            Some(Value::Boolean(b)) => Ok(b),
            Some(Value::Int32(n)) => Ok(n != 0),
            Some(Value::Int64(n)) => Ok(n != 0),
            Some(Value::Double(d)) => Ok(d == 1.0),
            other => Err(MongoError::InvalidReply(format!(
                "field {key:?} cannot be coerced to boolean, found {other:?}"
            ))),
        }
    }

    /// Looks up `key`'s value strictly as a BSON double, with no coercion.
    /// Used by `Cursor::count`, which the original requires be a literal
    /// double `n` field.
    pub fn get_f64_strict(&self, key: &str) -> Result<f64> {
        let mut iter = self.iter();
        if !iter.find(key) {
            return Err(MongoError::InvalidReply(format!("missing field {key:?}")));
        }
        match iter.value() {
            Some(Value::Double(d)) => Ok(d),
            other => Err(MongoError::InvalidReply(format!(
                "field {key:?} must be a double, found {other:?}"
            ))),
        }
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        let mut iter = self.iter();
        if !iter.find(key) {
            return None;
        }
        match iter.value() {
            Some(Value::String(s)) => Some(s.into_owned()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

impl Default for Document {
    fn default() -> Self {
        Document::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_bytes() {
        assert_eq!(Document::empty().as_bytes(), &[5, 0, 0, 0, 0]);
    }

    #[test]
    fn from_bytes_rejects_length_mismatch() {
        assert!(Document::from_bytes(vec![5, 0, 0, 0]).is_none());
        assert!(Document::from_bytes(vec![6, 0, 0, 0, 0]).is_none());
        assert!(Document::from_bytes(vec![5, 0, 0, 0, 0]).is_some());
    }

    #[test]
    fn append_and_iterate_round_trip() {
        let mut doc = Document::empty();
        doc.append_i32("n", 42);
        doc.append_string("name", Some("hi"));
        doc.append_bool("flag", true);

        let mut it = doc.iter();
        assert!(it.next());
        assert_eq!(it.key(), Some("n"));
        assert_eq!(it.value(), Some(Value::Int32(42)));

        assert!(it.next());
        assert_eq!(it.key(), Some("name"));
        assert_eq!(it.value(), Some(Value::String("hi".into())));

        assert!(it.next());
        assert_eq!(it.key(), Some("flag"));
        assert_eq!(it.value(), Some(Value::Boolean(true)));

        assert!(!it.next());
    }

    #[test]
    fn join_appends_fields() {
        let mut a = Document::empty();
        a.append_i32("a", 1);
        let mut b = Document::empty();
        b.append_i32("b", 2);
        a.join(&b);

        let mut it = a.iter();
        assert!(it.next());
        assert_eq!(it.key(), Some("a"));
        assert!(it.next());
        assert_eq!(it.key(), Some("b"));
        assert!(!it.next());
    }

    #[test]
    fn join_with_empty_is_noop() {
        let mut a = Document::empty();
        a.append_i32("a", 1);
        let before = a.as_bytes().to_vec();
        a.join(&Document::empty());
        assert_eq!(a.as_bytes(), before.as_slice());
    }

    #[test]
    fn lenient_boolean_coercion() {
        let mut doc = Document::empty();
        doc.append_i32("ok", 1);
        assert!(doc.get_bool("ok").unwrap());

        let mut doc = Document::empty();
        doc.append_double("ok", 1.0);
        assert!(doc.get_bool("ok").unwrap());

        let mut doc = Document::empty();
        doc.append_double("ok", 0.5);
        assert!(!doc.get_bool("ok").unwrap());
    }

    #[test]
    fn strict_double_rejects_coercion() {
        let mut doc = Document::empty();
        doc.append_i32("n", 3);
        assert!(doc.get_f64_strict("n").is_err());

        let mut doc = Document::empty();
        doc.append_double("n", 3.0);
        assert_eq!(doc.get_f64_strict("n").unwrap(), 3.0);
    }
}
