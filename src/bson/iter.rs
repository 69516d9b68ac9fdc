use std::borrow::Cow;

use super::{object_id::ObjectId, tag};

/// A decoded BSON element value, borrowed from the document it came from
/// wherever possible.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    Double(f64),
    String(Cow<'a, str>),
    /// Raw bytes of an embedded document, including its own length prefix.
    Document(&'a [u8]),
    /// Raw bytes of an embedded array, including its own length prefix.
    Array(&'a [u8]),
    Undefined,
    ObjectId(ObjectId),
    Boolean(bool),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
    Null,
    Regex(Cow<'a, str>, Cow<'a, str>),
    Int32(i32),
    Int64(i64),
}

/// A small, no-heap cursor over a document's elements.
///
/// `next()` advances to the following element, returning `false` once the
/// terminating NUL is reached or a framing error makes further iteration
/// unsafe. Framing errors (a key or length that runs past the buffer) stop
/// iteration; an invalid-UTF-8 *string value* does not — the iterator
/// truncates the value at the first invalid byte and continues (see
/// SPEC_FULL.md §9 for why this is copy-on-truncate rather than in-place
/// mutation in this crate).
pub struct DocumentIter<'a> {
    buf: &'a [u8],
    offset: usize,
    key: Option<&'a str>,
    value: Option<Value<'a>>,
    done: bool,
}

impl<'a> DocumentIter<'a> {
    pub(super) fn new(buf: &'a [u8]) -> Self {
        DocumentIter {
            buf,
            offset: 4,
            key: None,
            value: None,
            done: false,
        }
    }

    pub fn key(&self) -> Option<&'a str> {
        self.key
    }

    pub fn value(&self) -> Option<Value<'a>> {
        self.value.clone()
    }

    /// Advances to the next element. Returns `false` (and leaves the
    /// iterator exhausted) at end of document or on a framing error.
    pub fn next(&mut self) -> bool {
        if self.done {
            return false;
        }
        if self.offset >= self.buf.len().saturating_sub(1) {
            return self.fail();
        }

        let type_tag = self.buf[self.offset];
        if type_tag == 0 {
            return self.fail();
        }
        self.offset += 1;

        let key = match self.read_cstring_key() {
            Some(k) => k,
            None => return self.fail(),
        };

        let value = match self.read_value(type_tag) {
            Some(v) => v,
            None => return self.fail(),
        };

        self.key = Some(key);
        self.value = Some(value);
        true
    }

    fn fail(&mut self) -> bool {
        self.done = true;
        self.key = None;
        self.value = None;
        false
    }

    fn read_cstring_key(&mut self) -> Option<&'a str> {
        let start = self.offset;
        let nul = self.buf[start..].iter().position(|&b| b == 0)?;
        let end = start + nul;
        if end >= self.buf.len() {
            return None;
        }
        let key = std::str::from_utf8(&self.buf[start..end]).ok()?;
        self.offset = end + 1;
        Some(key)
    }

    fn read_value(&mut self, type_tag: u8) -> Option<Value<'a>> {
        match type_tag {
            tag::DOUBLE => {
                let bytes = self.take(8)?;
                Some(Value::Double(f64::from_le_bytes(bytes.try_into().unwrap())))
            }
            tag::STRING => {
                let len_bytes = self.take(4)?;
                let len = i32::from_le_bytes(len_bytes.try_into().unwrap());
                if len < 1 {
                    return None;
                }
                let raw = self.take(len as usize)?;
                // raw includes the trailing NUL; strip it before validating.
                let body = &raw[..raw.len() - 1];
                Some(Value::String(tolerant_utf8(body)))
            }
            tag::DOCUMENT => {
                let inner = self.peek_length_prefixed()?;
                Some(Value::Document(inner))
            }
            tag::ARRAY => {
                let inner = self.peek_length_prefixed()?;
                Some(Value::Array(inner))
            }
            tag::UNDEFINED => Some(Value::Undefined),
            tag::OBJECT_ID => {
                let raw = self.take(12)?;
                let mut bytes = [0u8; 12];
                bytes.copy_from_slice(raw);
                Some(Value::ObjectId(ObjectId::from_bytes(bytes)))
            }
            tag::BOOLEAN => {
                let raw = self.take(1)?;
                Some(Value::Boolean(raw[0] != 0))
            }
            tag::DATE_TIME => {
                let raw = self.take(8)?;
                Some(Value::DateTime(i64::from_le_bytes(raw.try_into().unwrap())))
            }
            tag::NULL => Some(Value::Null),
            tag::REGEX => {
                let pattern = self.read_cstring_value()?;
                let options = self.read_cstring_value()?;
                Some(Value::Regex(pattern, options))
            }
            tag::INT32 => {
                let raw = self.take(4)?;
                Some(Value::Int32(i32::from_le_bytes(raw.try_into().unwrap())))
            }
            tag::INT64 => {
                let raw = self.take(8)?;
                Some(Value::Int64(i64::from_le_bytes(raw.try_into().unwrap())))
            }
            _ => None,
        }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.offset.checked_add(n)?;
        if end > self.buf.len() {
            return None;
        }
        let slice = &self.buf[self.offset..end];
        self.offset = end;
        Some(slice)
    }

    /// Reads a document/array payload without consuming more than its
    /// self-declared length, validated against the remaining buffer.
    fn peek_length_prefixed(&mut self) -> Option<&'a [u8]> {
        if self.offset + 4 > self.buf.len() {
            return None;
        }
        let len = i32::from_le_bytes(self.buf[self.offset..self.offset + 4].try_into().unwrap());
        if len < 5 {
            return None;
        }
        self.take(len as usize)
    }

    fn read_cstring_value(&mut self) -> Option<Cow<'a, str>> {
        let start = self.offset;
        let nul = self.buf[start..].iter().position(|&b| b == 0)?;
        let end = start + nul;
        self.offset = end + 1;
        Some(tolerant_utf8(&self.buf[start..end]))
    }

    /// Finds `key`, driving `next()` until it matches or the document ends.
    pub fn find(&mut self, key: &str) -> bool {
        while self.next() {
            if self.key == Some(key) {
                return true;
            }
        }
        false
    }

    /// Initialises `child` over the embedded document/array the iterator is
    /// currently positioned on. Returns `false` if the current element is
    /// not document- or array-shaped.
    pub fn recurse(&self, child: &mut DocumentIter<'a>) -> bool {
        match self.value {
            Some(Value::Document(inner)) | Some(Value::Array(inner)) => {
                *child = DocumentIter::new(inner);
                true
            }
            _ => false,
        }
    }
}

/// Validates `body` as UTF-8; if invalid, returns the longest valid prefix
/// rather than failing the whole iteration (SPEC_FULL.md §4.1/§9(3)).
fn tolerant_utf8(body: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(body) {
        Ok(s) => Cow::Borrowed(s),
        Err(e) => {
            let valid_up_to = e.valid_up_to();
            // Safety: [0..valid_up_to) was just confirmed valid by from_utf8.
            let s = std::str::from_utf8(&body[..valid_up_to]).unwrap();
            Cow::Owned(s.to_string())
        }
    }
}
