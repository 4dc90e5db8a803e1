use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::value::{write_bulk, write_line, Value};

/// Significant digits used when a float is written as a bulk string.
pub const FLOAT_PRECISION: usize = 10;

/// A payload for a bulk string reply.
///
/// Every payload is coerced to bytes the same way no matter which handler produced it: text and
/// raw bytes verbatim, integers in decimal, floats with [`FLOAT_PRECISION`] significant digits,
/// booleans as `1`/`0`, and anything else through its `Display` output.
#[derive(Clone, Debug, PartialEq)]
pub enum BulkValue {
    Null,
    Text(String),
    Bytes(Bytes),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Bool(bool),
    Other(String),
}

impl BulkValue {
    /// Wraps any other payload by rendering it with `Display`.
    pub fn display(value: impl fmt::Display) -> BulkValue {
        BulkValue::Other(value.to_string())
    }

    pub fn write_to(&self, dst: &mut BytesMut) {
        match self {
            BulkValue::Null => dst.put_slice(b"$-1\r\n"),
            BulkValue::Text(s) | BulkValue::Other(s) => write_bulk(dst, s.as_bytes()),
            BulkValue::Bytes(b) => write_bulk(dst, b),
            BulkValue::Integer(i) => write_bulk(dst, i.to_string().as_bytes()),
            BulkValue::Unsigned(u) => write_bulk(dst, u.to_string().as_bytes()),
            BulkValue::Float(f) => write_bulk(dst, format_float(*f).as_bytes()),
            BulkValue::Bool(true) => write_bulk(dst, b"1"),
            BulkValue::Bool(false) => write_bulk(dst, b"0"),
        }
    }
}

macro_rules! bulk_from {
    ($variant:ident as $target:ty: $($source:ty),*) => {
        $(
            impl From<$source> for BulkValue {
                fn from(value: $source) -> Self {
                    BulkValue::$variant(value as $target)
                }
            }
        )*
    };
}

bulk_from!(Integer as i64: i8, i16, i32, i64, isize);
bulk_from!(Unsigned as u64: u8, u16, u32, u64, usize);
bulk_from!(Float as f64: f32, f64);

impl From<bool> for BulkValue {
    fn from(value: bool) -> Self {
        BulkValue::Bool(value)
    }
}

impl From<&str> for BulkValue {
    fn from(value: &str) -> Self {
        BulkValue::Text(value.to_string())
    }
}

impl From<String> for BulkValue {
    fn from(value: String) -> Self {
        BulkValue::Text(value)
    }
}

impl From<&[u8]> for BulkValue {
    fn from(value: &[u8]) -> Self {
        BulkValue::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<Vec<u8>> for BulkValue {
    fn from(value: Vec<u8>) -> Self {
        BulkValue::Bytes(Bytes::from(value))
    }
}

impl From<Bytes> for BulkValue {
    fn from(value: Bytes) -> Self {
        BulkValue::Bytes(value)
    }
}

impl<T: Into<BulkValue>> From<Option<T>> for BulkValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(BulkValue::Null, Into::into)
    }
}

/// Decoded values passed back as bulk payloads, e.g. when echoing request arguments.
impl From<Value> for BulkValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Simple(s) | Value::Error(s) => BulkValue::Text(s),
            Value::Integer(i) => BulkValue::Integer(i),
            Value::Bulk(b) => BulkValue::Bytes(b),
            Value::Null | Value::NullArray => BulkValue::Null,
            array @ Value::Array(_) => BulkValue::display(array),
        }
    }
}

/// One logical frame written back to a client.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Status(String),
    Error(String),
    Integer(i64),
    Bulk(BulkValue),
    /// An array whose elements are each framed as bulk strings.
    Array(Vec<BulkValue>),
    /// Any decoded value, framed exactly as it would have been read.
    Value(Value),
}

impl Reply {
    pub fn write_to(&self, dst: &mut BytesMut) {
        match self {
            // The text is written as is; callers must keep CR and LF out of it.
            Reply::Status(s) => write_line(dst, b'+', s.as_bytes()),
            Reply::Error(s) => write_line(dst, b'-', s.as_bytes()),
            Reply::Integer(i) => write_line(dst, b':', i.to_string().as_bytes()),
            Reply::Bulk(bulk) => bulk.write_to(dst),
            Reply::Array(items) => {
                write_line(dst, b'*', items.len().to_string().as_bytes());
                for item in items {
                    item.write_to(dst);
                }
            }
            Reply::Value(value) => value.write_to(dst),
        }
    }
}

/// Formats `value` with [`FLOAT_PRECISION`] significant digits and no trailing zeros, switching
/// to exponent notation for very small or very large magnitudes (`1e-05`, `1.5e+20`).
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        let inf = if value > 0.0 { "+Inf" } else { "-Inf" };
        return inf.to_string();
    }

    // Rounding to the target precision first gives the exponent after any carry.
    let scientific = format!("{:.*e}", FLOAT_PRECISION - 1, value);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i32>().unwrap_or(0)),
        None => return scientific,
    };

    if exponent < -4 || exponent >= FLOAT_PRECISION as i32 {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exponent.abs())
    } else {
        let decimals = (FLOAT_PRECISION as i32 - 1 - exponent) as usize;
        trim_fraction(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}
