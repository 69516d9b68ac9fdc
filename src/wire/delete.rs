use crate::bson::Document;
use crate::error::{MongoError, Result};

use super::{read_cstring, read_document, write_cstring, DeleteFlags, OpCode};

/// `OP_DELETE` (2006): `{ zero32; cstring collection; i32 flags; BSON selector }`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpDelete {
    pub full_collection_name: String,
    pub flags: DeleteFlags,
    pub selector: Document,
}

impl OpDelete {
    pub(crate) fn parse_body(body: &[u8]) -> Result<Self> {
        if body.len() < 4 {
            return Err(MongoError::MessageInvalid("OP_DELETE body too short".into()));
        }
        let (full_collection_name, offset) = read_cstring(body, 4)?;
        if offset + 4 > body.len() {
            return Err(MongoError::MessageInvalid("OP_DELETE missing flags".into()));
        }
        let flags = DeleteFlags::from_bits_truncate(i32::from_le_bytes(
            body[offset..offset + 4].try_into().unwrap(),
        ));
        let (selector, offset) = read_document(body, offset + 4)?;
        if offset != body.len() {
            return Err(MongoError::MessageInvalid(
                "OP_DELETE has trailing bytes".into(),
            ));
        }
        Ok(OpDelete {
            full_collection_name,
            flags,
            selector,
        })
    }

    pub(crate) fn serialize(&self, request_id: i32, response_to: i32) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&0i32.to_le_bytes());
        write_cstring(&mut body, &self.full_collection_name);
        body.extend_from_slice(&self.flags.bits().to_le_bytes());
        body.extend_from_slice(self.selector.as_bytes());
        super::query::frame(OpCode::Delete, request_id, response_to, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::HEADER_LEN;

    #[test]
    fn round_trips() {
        let mut selector = Document::empty();
        selector.append_i32("_id", 1);
        let op = OpDelete {
            full_collection_name: "db.c".to_string(),
            flags: DeleteFlags::SINGLE_REMOVE,
            selector,
        };
        let bytes = op.serialize(3, 0);
        let parsed = OpDelete::parse_body(&bytes[HEADER_LEN..]).unwrap();
        assert_eq!(parsed, op);
    }
}
