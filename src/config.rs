use crate::value::Limits;

/// Longest accepted protocol line, in bytes, unless configured otherwise.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

/// Deepest nesting of arrays a connection accepts, unless configured otherwise.
pub const DEFAULT_MAX_DEPTH: usize = 512;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1:6379";

/// Startup settings for a [`Server`](crate::Server).
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address the accept loop binds to.
    pub address: String,
    /// Longest protocol line, type byte included, a connection accepts before treating the
    /// input as malformed. Bulk payloads are not subject to it.
    pub max_line_length: usize,
    /// Deepest nesting of arrays a connection accepts. Anything deeper is malformed input and
    /// closes that connection before the value is built.
    pub max_depth: usize,
}

impl ServerConfig {
    pub fn limits(&self) -> Limits {
        Limits {
            max_line_length: self.max_line_length,
            max_depth: self.max_depth,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}
