use std::str;

use thiserror::Error as ThisError;

use crate::value::Value;

/// A well-formed value that does not have the shape of a request.
#[derive(Debug, ThisError, PartialEq)]
pub enum RequestError {
    #[error("bad request; expected array, got {0}")]
    NotAnArray(Value),
    #[error("bad request; empty array")]
    Empty,
    #[error("bad request; expected simple or bulk string method name, got {0}")]
    InvalidMethod(Value),
    #[error("bad request; invalid UTF-8 method name")]
    InvalidUtf8(#[from] str::Utf8Error),
}

/// A decoded request: a lowercased method name followed by its arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub method: String,
    pub args: Vec<Value>,
}

impl TryFrom<Value> for Request {
    type Error = RequestError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        // Clients send requests as RESP arrays.
        let values = match value {
            Value::Array(values) => values,
            value => return Err(RequestError::NotAnArray(value)),
        };

        let mut parts = values.into_iter();
        let method = match parts.next().ok_or(RequestError::Empty)? {
            Value::Simple(s) => s.to_lowercase(),
            Value::Bulk(bytes) => str::from_utf8(&bytes[..])?.to_lowercase(),
            value => return Err(RequestError::InvalidMethod(value)),
        };

        Ok(Request {
            method,
            args: parts.collect(),
        })
    }
}
