use crate::bson::Document;
use crate::error::{MongoError, Result};

use super::{read_cstring, read_document, write_cstring, InsertFlags, OpCode};

/// `OP_INSERT` (2002): `{ i32 flags; cstring collection; BSON+ documents }`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpInsert {
    pub flags: InsertFlags,
    pub full_collection_name: String,
    pub documents: Vec<Document>,
}

impl OpInsert {
    pub(crate) fn parse_body(body: &[u8]) -> Result<Self> {
        if body.len() < 4 {
            return Err(MongoError::MessageInvalid("OP_INSERT body too short".into()));
        }
        let flags = InsertFlags::from_bits_truncate(i32::from_le_bytes(body[0..4].try_into().unwrap()));
        let (full_collection_name, mut offset) = read_cstring(body, 4)?;
        if offset >= body.len() {
            return Err(MongoError::MessageInvalid(
                "OP_INSERT must carry at least one document".into(),
            ));
        }
        let mut documents = Vec::new();
        while offset < body.len() {
            let (doc, next) = read_document(body, offset)?;
            documents.push(doc);
            offset = next;
        }
        Ok(OpInsert {
            flags,
            full_collection_name,
            documents,
        })
    }

    pub(crate) fn serialize(&self, request_id: i32, response_to: i32) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.flags.bits().to_le_bytes());
        write_cstring(&mut body, &self.full_collection_name);
        for doc in &self.documents {
            body.extend_from_slice(doc.as_bytes());
        }
        super::query::frame(OpCode::Insert, request_id, response_to, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::HEADER_LEN;

    #[test]
    fn round_trips_multiple_documents() {
        let mut a = Document::empty();
        a.append_i32("_id", 1);
        let mut b = Document::empty();
        b.append_i32("_id", 2);
        let op = OpInsert {
            flags: InsertFlags::CONTINUE_ON_ERROR,
            full_collection_name: "db.c".to_string(),
            documents: vec![a, b],
        };
        let bytes = op.serialize(9, 0);
        let parsed = OpInsert::parse_body(&bytes[HEADER_LEN..]).unwrap();
        assert_eq!(parsed, op);
    }
}
