pub mod codec;
pub mod config;
pub mod connection;
pub mod reply;
pub mod request;
pub mod server;
pub mod value;

use thiserror::Error as ThisError;

/// Every way a connection, a registration or a handler can fail.
///
/// Apart from `DuplicateHandler`, which is only surfaced at startup, each of these is terminal
/// for the connection it happens on.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] value::ProtocolError),
    #[error(transparent)]
    Request(#[from] request::RequestError),
    #[error("unsupported method:{0}")]
    UnsupportedMethod(String),
    #[error("resp server: handler already set for method: {0}")]
    DuplicateHandler(String),
    #[error("handler failed: {0}")]
    Handler(Box<dyn std::error::Error + Send + Sync>),
}

impl From<&str> for Error {
    fn from(src: &str) -> Error {
        Error::Handler(src.into())
    }
}

impl From<String> for Error {
    fn from(src: String) -> Error {
        Error::Handler(src.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub use connection::Connection;
pub use reply::{BulkValue, Reply};
pub use request::Request;
pub use server::{Handler, Server};
pub use value::Value;
