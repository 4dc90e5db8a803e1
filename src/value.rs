// https://redis.io/docs/reference/protocol-spec

use std::fmt;
use std::io::Cursor;
use std::str;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

/// Malformed input on the wire. Always fatal for the connection that produced it.
#[derive(Debug, ThisError, PartialEq)]
pub enum ProtocolError {
    #[error("protocol error; invalid type byte {0:#04x}")]
    InvalidDataType(u8),
    #[error("protocol error; empty line")]
    EmptyLine,
    #[error("protocol error; line longer than {limit} bytes")]
    LineTooLong { limit: usize },
    #[error("protocol error; invalid integer {0:?}")]
    InvalidInteger(String),
    #[error("protocol error; invalid bulk length {0}")]
    InvalidLength(i64),
    #[error("protocol error; bulk string not terminated by CRLF")]
    MissingTerminator,
    #[error("protocol error; invalid UTF-8 string")]
    InvalidUtf8,
    #[error("protocol error; arrays nested deeper than {limit} levels")]
    TooDeep { limit: usize },
    #[error("protocol error; stream ended in the middle of a frame")]
    Truncated,
}

#[derive(Debug, ThisError, PartialEq)]
pub enum ParseError {
    #[error("not enough data is available to parse an entire value")]
    Incomplete,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// One decoded RESP2 value.
///
/// `Null` is the null bulk string (`$-1`) and `NullArray` the null array (`*-1`). They are kept
/// apart so that a decoded value can be written back with the exact framing it arrived with.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    NullArray,
    Array(Vec<Value>),
}

/// Bounds applied while decoding untrusted input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    /// Longest accepted line, type byte included, CRLF excluded.
    pub max_line_length: usize,
    /// Deepest accepted nesting of arrays. A top-level array is at depth one.
    pub max_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_line_length: crate::config::DEFAULT_MAX_LINE_LENGTH,
            max_depth: crate::config::DEFAULT_MAX_DEPTH,
        }
    }
}

impl Value {
    /// Checks that `src` starts with one complete, well-formed value, leaving the cursor right
    /// after it. Nothing is allocated.
    ///
    /// Returns `ParseError::Incomplete` when `src` ends before the value does; the caller is
    /// expected to retry once more bytes are buffered. Bulk payloads are not lines and are not
    /// subject to `max_line_length`.
    pub fn check(src: &mut Cursor<&[u8]>, limits: &Limits) -> Result<(), ParseError> {
        check_at(src, limits, 0)
    }

    /// Parses one complete value from `src`, leaving the cursor right after it.
    pub fn parse(src: &mut Cursor<&[u8]>, limits: &Limits) -> Result<Value, ParseError> {
        let start = src.position() as usize;
        let mut end = src.clone();
        Value::check(&mut end, limits)?;
        let end = end.position() as usize;

        let frame = Bytes::copy_from_slice(&src.get_ref()[start..end]);
        let value = Value::from_checked(&frame)?;
        src.set_position(end as u64);

        Ok(value)
    }

    /// Builds the value held in `frame`, which [`Value::check`] has already accepted in full.
    ///
    /// Bulk payloads are slices of `frame`, not copies.
    pub fn from_checked(frame: &Bytes) -> Result<Value, ProtocolError> {
        let mut src = Cursor::new(&frame[..]);
        build(&mut src, frame).map_err(|err| match err {
            ParseError::Incomplete => ProtocolError::Truncated,
            ParseError::Protocol(err) => err,
        })
    }

    /// Appends the wire representation of the value to `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) {
        match self {
            Value::Simple(s) => write_line(dst, b'+', s.as_bytes()),
            Value::Error(s) => write_line(dst, b'-', s.as_bytes()),
            Value::Integer(i) => write_line(dst, b':', i.to_string().as_bytes()),
            Value::Bulk(data) => write_bulk(dst, data),
            Value::Null => dst.put_slice(b"$-1\r\n"),
            Value::NullArray => dst.put_slice(b"*-1\r\n"),
            Value::Array(values) => {
                write_line(dst, b'*', values.len().to_string().as_bytes());
                for value in values {
                    value.write_to(dst);
                }
            }
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut dst = BytesMut::new();
        self.write_to(&mut dst);
        dst.to_vec()
    }

    /// The payload of a string-like value: a simple status or a non-null bulk string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Simple(s) => Some(s.as_bytes()),
            Value::Bulk(data) => Some(data),
            _ => None,
        }
    }
}

impl From<Value> for Vec<u8> {
    fn from(value: Value) -> Self {
        value.serialize()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Simple(s) => write!(f, "+{}", s),
            Value::Error(s) => write!(f, "-{}", s),
            Value::Integer(i) => write!(f, ":{}", i),
            Value::Bulk(bytes) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Value::Null => write!(f, "$-1"),
            Value::NullArray => write!(f, "*-1"),
            Value::Array(values) => {
                write!(f, "*{}", values.len())?;
                for value in values {
                    write!(f, " {}", value)?;
                }
                Ok(())
            }
        }
    }
}

pub(crate) fn write_line(dst: &mut BytesMut, data_type: u8, line: &[u8]) {
    dst.reserve(1 + line.len() + CRLF.len());
    dst.put_u8(data_type);
    dst.put_slice(line);
    dst.put_slice(CRLF);
}

pub(crate) fn write_bulk(dst: &mut BytesMut, data: &[u8]) {
    write_line(dst, b'$', data.len().to_string().as_bytes());
    dst.reserve(data.len() + CRLF.len());
    dst.put_slice(data);
    dst.put_slice(CRLF);
}

/// Reads up to the next CRLF and returns the line without it.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>, limit: usize) -> Result<&'a [u8], ParseError> {
    let start = src.position() as usize;
    let inner: &'a [u8] = *src.get_ref();
    let buffered = &inner[start..];

    match buffered.windows(2).position(|window| window == CRLF) {
        Some(length) if length > limit => Err(ProtocolError::LineTooLong { limit }.into()),
        Some(length) => {
            src.set_position((start + length + CRLF.len()) as u64);
            Ok(&buffered[..length])
        }
        // A trailing '\r' may still be completed by the next read.
        None if buffered.len() > limit.saturating_add(1) => Err(ProtocolError::LineTooLong { limit }.into()),
        None => Err(ParseError::Incomplete),
    }
}

fn check_at(src: &mut Cursor<&[u8]>, limits: &Limits, depth: usize) -> Result<(), ParseError> {
    let line = get_line(src, limits.max_line_length)?;
    let (&data_type, rest) = line.split_first().ok_or(ProtocolError::EmptyLine)?;

    match data_type {
        b'+' | b'-' => {
            str::from_utf8(rest).map_err(|_| ProtocolError::InvalidUtf8)?;
            Ok(())
        }
        b':' => {
            get_decimal(rest)?;
            Ok(())
        }
        // $<length>\r\n<data>\r\n
        b'$' => {
            if let Some(length) = get_bulk_length(rest)? {
                skip_bulk(src, length)?;
            }
            Ok(())
        }
        // *<number-of-elements>\r\n<element-1>...<element-n>
        b'*' => {
            let length = get_decimal(rest)?;
            if length < 0 {
                return Ok(());
            }
            if depth >= limits.max_depth {
                return Err(ProtocolError::TooDeep {
                    limit: limits.max_depth,
                }
                .into());
            }

            for _ in 0..length {
                check_at(src, limits, depth + 1)?;
            }
            Ok(())
        }
        data_type => Err(ProtocolError::InvalidDataType(data_type).into()),
    }
}

/// Recursion here is bounded by the depth `check_at` already enforced.
fn build(src: &mut Cursor<&[u8]>, frame: &Bytes) -> Result<Value, ParseError> {
    let line = get_line(src, usize::MAX)?;
    let (&data_type, rest) = line.split_first().ok_or(ProtocolError::EmptyLine)?;

    match data_type {
        b'+' => Ok(Value::Simple(to_string(rest)?)),
        b'-' => Ok(Value::Error(to_string(rest)?)),
        b':' => Ok(Value::Integer(get_decimal(rest)?)),
        b'$' => match get_bulk_length(rest)? {
            Some(length) => {
                let start = skip_bulk(src, length)?;
                Ok(Value::Bulk(frame.slice(start..start + length)))
            }
            None => Ok(Value::Null),
        },
        b'*' => {
            let length = get_decimal(rest)?;
            if length < 0 {
                return Ok(Value::NullArray);
            }

            // Every element takes at least three bytes, so never reserve more than what is
            // buffered.
            let capacity = (length as u64).min(src.remaining() as u64) as usize;
            let mut values = Vec::with_capacity(capacity);
            for _ in 0..length {
                values.push(build(src, frame)?);
            }

            Ok(Value::Array(values))
        }
        data_type => Err(ProtocolError::InvalidDataType(data_type).into()),
    }
}

/// `None` for the null bulk string.
fn get_bulk_length(line: &[u8]) -> Result<Option<usize>, ProtocolError> {
    let length = get_decimal(line)?;
    if length == -1 {
        return Ok(None);
    }
    usize::try_from(length)
        .map(Some)
        .map_err(|_| ProtocolError::InvalidLength(length))
}

/// Skips a bulk payload and its CRLF, returning the offset the payload starts at.
fn skip_bulk(src: &mut Cursor<&[u8]>, length: usize) -> Result<usize, ParseError> {
    let start = src.position() as usize;
    if src.remaining() < length {
        return Err(ParseError::Incomplete);
    }
    src.advance(length);

    // Reject a bad terminator as soon as its first byte is visible.
    let tail = &src.chunk()[..src.remaining().min(CRLF.len())];
    if tail != &CRLF[..tail.len()] {
        return Err(ProtocolError::MissingTerminator.into());
    }
    if tail.len() < CRLF.len() {
        return Err(ParseError::Incomplete);
    }
    src.advance(CRLF.len());

    Ok(start)
}

fn get_decimal(line: &[u8]) -> Result<i64, ProtocolError> {
    str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ProtocolError::InvalidInteger(String::from_utf8_lossy(line).into_owned()))
}

fn to_string(line: &[u8]) -> Result<String, ProtocolError> {
    String::from_utf8(line.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}
