use crate::error::{MongoError, Result};

use super::{read_cstring, write_cstring, OpCode};

/// `OP_GET_MORE` (2005): `{ zero32; cstring collection; i32 limit; i64 cursor_id }`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpGetMore {
    pub full_collection_name: String,
    pub number_to_return: i32,
    pub cursor_id: i64,
}

impl OpGetMore {
    pub(crate) fn parse_body(body: &[u8]) -> Result<Self> {
        if body.len() < 4 {
            return Err(MongoError::MessageInvalid("OP_GET_MORE body too short".into()));
        }
        let (full_collection_name, offset) = read_cstring(body, 4)?;
        if offset + 12 != body.len() {
            return Err(MongoError::MessageInvalid(
                "OP_GET_MORE has wrong remaining length".into(),
            ));
        }
        let number_to_return = i32::from_le_bytes(body[offset..offset + 4].try_into().unwrap());
        let cursor_id = i64::from_le_bytes(body[offset + 4..offset + 12].try_into().unwrap());
        Ok(OpGetMore {
            full_collection_name,
            number_to_return,
            cursor_id,
        })
    }

    pub(crate) fn serialize(&self, request_id: i32, response_to: i32) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&0i32.to_le_bytes());
        write_cstring(&mut body, &self.full_collection_name);
        body.extend_from_slice(&self.number_to_return.to_le_bytes());
        body.extend_from_slice(&self.cursor_id.to_le_bytes());
        super::query::frame(OpCode::GetMore, request_id, response_to, &body)
    }
}
