use std::fmt;
use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use uuid::Uuid;

use crate::codec::ValueCodec;
use crate::reply::{BulkValue, Reply};
use crate::request::Request;
use crate::value::Value;
use crate::Result;

type Reader = FramedRead<Box<dyn AsyncRead + Send + Unpin>, ValueCodec>;
type Writer = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, ValueCodec>;

/// A client connection speaking RESP.
///
/// Reads and writes go through two independent locks, so a read never waits on a write and vice
/// versa. Every write call frames one whole reply, flushes it, and only then releases the write
/// lock, so replies from concurrent writers never interleave.
///
/// Dropping the last handle closes the underlying stream.
pub struct Connection {
    pub id: Uuid,
    client_address: Option<SocketAddr>,
    // Data is read from the stream into the codec's buffer. When a value is parsed, the
    // corresponding bytes are removed from it.
    reader: Mutex<Reader>,
    writer: Mutex<Writer>,
}

impl Connection {
    pub fn new<S>(stream: S, codec: ValueCodec) -> Connection
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let read_half: Box<dyn AsyncRead + Send + Unpin> = Box::new(read_half);
        let write_half: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write_half);

        Connection {
            id: Uuid::new_v4(),
            client_address: None,
            reader: Mutex::new(FramedRead::new(read_half, codec.clone())),
            writer: Mutex::new(FramedWrite::new(write_half, codec)),
        }
    }

    pub fn with_client_address(mut self, client_address: SocketAddr) -> Connection {
        self.client_address = Some(client_address);
        self
    }

    pub fn client_address(&self) -> Option<SocketAddr> {
        self.client_address
    }

    /// Reads the next value from the stream.
    ///
    /// Returns `None` when the peer closed the stream on a value boundary. A stream that ends in
    /// the middle of a value is a protocol error.
    pub async fn read_value(&self) -> Result<Option<Value>> {
        let mut reader = self.reader.lock().await;
        reader.next().await.transpose()
    }

    /// Reads the next value and interprets it as a request.
    pub async fn read_request(&self) -> Result<Option<Request>> {
        match self.read_value().await? {
            Some(value) => Ok(Some(Request::try_from(value)?)),
            None => Ok(None),
        }
    }

    pub async fn write_status(&self, status: &str) -> Result<()> {
        self.write(Reply::Status(status.to_string())).await
    }

    pub async fn write_integer(&self, integer: i64) -> Result<()> {
        self.write(Reply::Integer(integer)).await
    }

    pub async fn write_error(&self, message: impl fmt::Display) -> Result<()> {
        let reply = Reply::Error(message.to_string());
        self.write(reply).await
    }

    pub async fn write_bulk(&self, payload: impl Into<BulkValue>) -> Result<()> {
        let reply = Reply::Bulk(payload.into());
        self.write(reply).await
    }

    pub async fn write_null(&self) -> Result<()> {
        self.write(Reply::Bulk(BulkValue::Null)).await
    }

    /// Writes an array whose elements are each coerced to a bulk string.
    pub async fn write_array<I>(&self, items: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<BulkValue>,
    {
        let reply = Reply::Array(items.into_iter().map(Into::into).collect());
        self.write(reply).await
    }

    /// Writes a decoded value back with its exact framing.
    pub async fn write_value(&self, value: Value) -> Result<()> {
        self.write(Reply::Value(value)).await
    }

    /// Writes one reply and flushes the transport before releasing the write lock.
    pub async fn write(&self, reply: Reply) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.send(reply).await
    }

    /// Flushes anything pending and shuts down the write side of the stream.
    pub async fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        SinkExt::<Reply>::close(&mut *writer).await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("client_address", &self.client_address)
            .finish()
    }
}
