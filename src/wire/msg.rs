use crate::error::Result;

use super::{read_cstring, write_cstring, OpCode};

/// `OP_MSG` (1000, legacy): `{ cstring message }`. A free-form ad-hoc
/// notice; not to be confused with the modern `OP_MSG` (2013), which this
/// crate does not implement.
#[derive(Debug, Clone, PartialEq)]
pub struct OpMsg {
    pub message: String,
}

impl OpMsg {
    pub(crate) fn parse_body(body: &[u8]) -> Result<Self> {
        let (message, _) = read_cstring(body, 0)?;
        Ok(OpMsg { message })
    }

    pub(crate) fn serialize(&self, request_id: i32, response_to: i32) -> Vec<u8> {
        let mut body = Vec::new();
        write_cstring(&mut body, &self.message);
        super::query::frame(OpCode::Msg, request_id, response_to, &body)
    }
}
