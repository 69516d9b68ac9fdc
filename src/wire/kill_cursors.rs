use crate::error::{MongoError, Result};

use super::OpCode;

/// `OP_KILL_CURSORS` (2007): `{ zero32; i32 count; i64[count] cursor_ids }`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpKillCursors {
    pub cursor_ids: Vec<i64>,
}

impl OpKillCursors {
    pub(crate) fn parse_body(body: &[u8]) -> Result<Self> {
        if body.len() < 8 {
            return Err(MongoError::MessageInvalid(
                "OP_KILL_CURSORS body too short".into(),
            ));
        }
        let count = i32::from_le_bytes(body[4..8].try_into().unwrap());
        if count < 0 {
            return Err(MongoError::MessageInvalid(
                "OP_KILL_CURSORS declared a negative count".into(),
            ));
        }
        let expected_len = 8 + count as usize * 8;
        if body.len() != expected_len {
            return Err(MongoError::MessageInvalid(
                "OP_KILL_CURSORS count does not match body length".into(),
            ));
        }
        let mut cursor_ids = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            let start = 8 + i * 8;
            cursor_ids.push(i64::from_le_bytes(body[start..start + 8].try_into().unwrap()));
        }
        Ok(OpKillCursors { cursor_ids })
    }

    pub(crate) fn serialize(&self, request_id: i32, response_to: i32) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&0i32.to_le_bytes());
        body.extend_from_slice(&(self.cursor_ids.len() as i32).to_le_bytes());
        for id in &self.cursor_ids {
            body.extend_from_slice(&id.to_le_bytes());
        }
        super::query::frame(OpCode::KillCursors, request_id, response_to, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::HEADER_LEN;

    #[test]
    fn round_trips_and_matches_abort_scenario() {
        let op = OpKillCursors {
            cursor_ids: vec![42],
        };
        let bytes = op.serialize(1, 0);
        let parsed = OpKillCursors::parse_body(&bytes[HEADER_LEN..]).unwrap();
        assert_eq!(parsed, op);
        assert_eq!(parsed.cursor_ids.len(), 1);
        assert_eq!(parsed.cursor_ids[0], 42);
    }
}
