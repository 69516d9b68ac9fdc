use crate::bson::Document;
use crate::error::{MongoError, Result};

use super::{read_cstring, read_document, write_cstring, OpCode, UpdateFlags};

/// `OP_UPDATE` (2001): `{ zero32; cstring collection; i32 flags; BSON selector; BSON update }`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpUpdate {
    pub full_collection_name: String,
    pub flags: UpdateFlags,
    pub selector: Document,
    pub update: Document,
}

impl OpUpdate {
    pub(crate) fn parse_body(body: &[u8]) -> Result<Self> {
        if body.len() < 4 {
            return Err(MongoError::MessageInvalid("OP_UPDATE body too short".into()));
        }
        let (full_collection_name, offset) = read_cstring(body, 4)?;
        if offset + 4 > body.len() {
            return Err(MongoError::MessageInvalid("OP_UPDATE missing flags".into()));
        }
        let flags = UpdateFlags::from_bits_truncate(i32::from_le_bytes(
            body[offset..offset + 4].try_into().unwrap(),
        ));
        let (selector, offset) = read_document(body, offset + 4)?;
        let (update, offset) = read_document(body, offset)?;
        if offset != body.len() {
            return Err(MongoError::MessageInvalid(
                "OP_UPDATE has trailing bytes".into(),
            ));
        }
        Ok(OpUpdate {
            full_collection_name,
            flags,
            selector,
            update,
        })
    }

    pub(crate) fn serialize(&self, request_id: i32, response_to: i32) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&0i32.to_le_bytes());
        write_cstring(&mut body, &self.full_collection_name);
        body.extend_from_slice(&self.flags.bits().to_le_bytes());
        body.extend_from_slice(self.selector.as_bytes());
        body.extend_from_slice(self.update.as_bytes());
        super::query::frame(OpCode::Update, request_id, response_to, &body)
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
        let mut update = Document::empty();
        update.append_string("$set", Some("v"));
        let op = OpUpdate {
            full_collection_name: "db.c".to_string(),
            flags: UpdateFlags::UPSERT | UpdateFlags::MULTI_UPDATE,
            selector,
            update,
        };
        let bytes = op.serialize(5, 0);
        let parsed = OpUpdate::parse_body(&bytes[HEADER_LEN..]).unwrap();
        assert_eq!(parsed, op);
    }
}
