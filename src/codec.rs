use std::io::Cursor;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::reply::Reply;
use crate::value::{Limits, ParseError, ProtocolError, Value};
use crate::Error;

/// Frames a byte stream into [`Value`]s and [`Reply`]s into bytes.
#[derive(Debug, Clone, Default)]
pub struct ValueCodec {
    limits: Limits,
}

impl ValueCodec {
    pub fn new(limits: Limits) -> ValueCodec {
        ValueCodec { limits }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }
}

impl Decoder for ValueCodec {
    type Item = Value;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Validate first so a partial value costs no allocation, however often it is retried.
        let mut cursor = Cursor::new(&src[..]);
        match Value::check(&mut cursor, &self.limits) {
            Ok(()) => {}
            Err(ParseError::Incomplete) => return Ok(None), // Not enough data to parse a value.
            Err(ParseError::Protocol(err)) => return Err(err.into()),
        }

        // Remove the checked value from the buffer. Bulk payloads keep pointing into it.
        let position = cursor.position() as usize;
        let frame = src.split_to(position).freeze();

        Ok(Some(Value::from_checked(&frame)?))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(value) => Ok(Some(value)),
            None if src.is_empty() => Ok(None),
            // The peer went away after sending only part of a value.
            None => Err(ProtocolError::Truncated.into()),
        }
    }
}

impl Encoder<Reply> for ValueCodec {
    type Error = Error;

    fn encode(&mut self, reply: Reply, dst: &mut BytesMut) -> Result<(), Self::Error> {
        reply.write_to(dst);
        Ok(())
    }
}
