use crate::bson::Document;
use crate::error::{MongoError, Result};

use super::{read_document, Header, OpCode, ReplyFlags};

/// `OP_REPLY` (1): `{ i32 flags; i64 cursor_id; i32 starting_from; i32 number_returned; BSON[number_returned] }`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpReply {
    pub flags: ReplyFlags,
    pub cursor_id: i64,
    pub starting_from: i32,
    pub documents: Vec<Document>,
}

impl OpReply {
    pub(crate) fn parse_body(body: &[u8]) -> Result<Self> {
        if body.len() < 20 {
            return Err(MongoError::MessageInvalid("OP_REPLY header too short".into()));
        }
        let flags = ReplyFlags::from_bits_truncate(i32::from_le_bytes(body[0..4].try_into().unwrap()));
        let cursor_id = i64::from_le_bytes(body[4..12].try_into().unwrap());
        let starting_from = i32::from_le_bytes(body[12..16].try_into().unwrap());
        let number_returned = i32::from_le_bytes(body[16..20].try_into().unwrap());
        if number_returned < 0 {
            return Err(MongoError::MessageInvalid(
                "OP_REPLY declared a negative document count".into(),
            ));
        }

        let mut offset = 20;
        let mut documents = Vec::with_capacity(number_returned as usize);
        for _ in 0..number_returned {
            let (doc, next) = read_document(body, offset)?;
            documents.push(doc);
            offset = next;
        }
        if offset != body.len() {
            return Err(MongoError::MessageInvalid(
                "OP_REPLY documents did not exactly tile the body".into(),
            ));
        }

        Ok(OpReply {
            flags,
            cursor_id,
            starting_from,
            documents,
        })
    }

    pub(crate) fn serialize(&self, request_id: i32, response_to: i32) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.flags.bits().to_le_bytes());
        body.extend_from_slice(&self.cursor_id.to_le_bytes());
        body.extend_from_slice(&self.starting_from.to_le_bytes());
        body.extend_from_slice(&(self.documents.len() as i32).to_le_bytes());
        for doc in &self.documents {
            body.extend_from_slice(doc.as_bytes());
        }
        super::query::frame(OpCode::Reply, request_id, response_to, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::HEADER_LEN;

    #[test]
    fn round_trips() {
        let mut doc = Document::empty();
        doc.append_i32("n", 1);
        let reply = OpReply {
            flags: ReplyFlags::AWAIT_CAPABLE,
            cursor_id: 42,
            starting_from: 0,
            documents: vec![doc],
        };
        let bytes = reply.serialize(1, 7);
        let header = Header::parse(&bytes).unwrap();
        assert_eq!(header.op_code, OpCode::Reply);
        assert_eq!(header.response_to, 7);
        assert_eq!(header.total_length as usize, bytes.len());
        let parsed = OpReply::parse_body(&bytes[HEADER_LEN..]).unwrap();
        assert_eq!(parsed, reply);
    }

    #[test]
    fn rejects_document_count_mismatch() {
        let mut body = Vec::new();
        body.extend_from_slice(&0i32.to_le_bytes());
        body.extend_from_slice(&0i64.to_le_bytes());
        body.extend_from_slice(&0i32.to_le_bytes());
        body.extend_from_slice(&2i32.to_le_bytes()); // claims 2 documents
        body.extend_from_slice(Document::empty().as_bytes()); // only 1 present
        assert!(OpReply::parse_body(&body).is_err());
    }
}
