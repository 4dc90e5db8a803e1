use std::any::Any;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{stream, FutureExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, field, info, instrument, warn};

use crate::codec::ValueCodec;
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::request::Request;
use crate::{Error, Result};

/// Pause after a failed accept, so a persistent failure such as running out of file descriptors
/// does not spin the loop.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Callback invoked for every request whose method it was registered under.
///
/// The handler writes its own replies through the connection, zero or more of them, and must leave
/// the stream on a frame boundary. Returning an error closes the connection.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, conn: Arc<Connection>, request: Request) -> BoxFuture<'static, Result<()>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Arc<Connection>, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn call(&self, conn: Arc<Connection>, request: Request) -> BoxFuture<'static, Result<()>> {
        Box::pin(self(conn, request))
    }
}

/// Routes requests to handlers by method name.
///
/// Handlers are registered through `&mut self` before the server is shared with the accept loop,
/// so lookups during dispatch never race with registration.
pub struct Server {
    config: ServerConfig,
    handlers: HashMap<String, Box<dyn Handler>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Server {
        Server {
            config,
            handlers: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Registers `handler` for `method`.
    ///
    /// Incoming method names are lowercased before lookup, so only lowercase registrations are
    /// reachable. Registering a method twice fails and keeps the first handler.
    pub fn add_handler(&mut self, method: impl Into<String>, handler: impl Handler) -> Result<()> {
        match self.handlers.entry(method.into()) {
            Entry::Occupied(entry) => Err(Error::DuplicateHandler(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(Box::new(handler));
                Ok(())
            }
        }
    }

    pub fn has_handler(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Binds the configured address and runs the accept loop.
    pub async fn listen_and_serve(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.address).await?;
        self.serve(listener).await
    }

    /// Accepts connections forever, each one served on its own task.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!("RESP server listening on {}", listener.local_addr()?);

        let incoming = stream::unfold(listener, |listener| async move {
            let accepted = listener
                .accept()
                .await
                .map(|(socket, client_address)| (socket, Some(client_address)));
            Some((accepted, listener))
        });

        self.serve_incoming(Box::pin(incoming)).await
    }

    /// Serves every connection `incoming` yields, each one on its own task, until it ends.
    ///
    /// A failed accept is logged and followed by [`ACCEPT_BACKOFF`]; it never stops the loop.
    pub async fn serve_incoming<I, S>(self: Arc<Self>, mut incoming: I) -> Result<()>
    where
        I: Stream<Item = io::Result<(S, Option<SocketAddr>)>> + Unpin,
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        while let Some(accepted) = incoming.next().await {
            let (socket, client_address) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            info!("Accepted connection from {:?}", client_address);

            let server = self.clone();
            tokio::spawn(async move {
                server.handle(socket, client_address).await;
            });
        }

        Ok(())
    }

    /// Serves one connection until the peer goes away or an error makes it unusable, then closes
    /// the stream.
    #[instrument(name = "connection", skip_all, fields(connection_id, client_address))]
    pub async fn handle<S>(&self, stream: S, client_address: Option<SocketAddr>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mut conn = Connection::new(stream, ValueCodec::new(self.config.limits()));
        if let Some(client_address) = client_address {
            conn = conn.with_client_address(client_address);
        }
        let conn = Arc::new(conn);

        let span = tracing::Span::current();
        span.record("connection_id", field::display(conn.id));
        if let Some(client_address) = client_address {
            span.record("client_address", field::display(client_address));
        }

        match self.process(&conn).await {
            Ok(()) => info!("Connection closed by peer"),
            Err(e) => warn!("Closing connection: {}", e),
        }

        if let Err(e) = conn.close().await {
            debug!("Failed to shut down connection: {}", e);
        }
    }

    async fn process(&self, conn: &Arc<Connection>) -> Result<()> {
        while let Some(request) = conn.read_request().await? {
            debug!(method = %request.method, args = request.args.len(), "Received request");

            let handler = match self.handlers.get(&request.method) {
                Some(handler) => handler,
                None => {
                    let err = Error::UnsupportedMethod(request.method);
                    // The connection is closed whether or not the reply makes it out.
                    if let Err(e) = conn.write_error(&err).await {
                        debug!("Failed to send error reply: {}", e);
                    }
                    return Err(err);
                }
            };

            // A panicking handler takes down its own connection only.
            let invocation = AssertUnwindSafe(handler.call(conn.clone(), request));
            match invocation.catch_unwind().await {
                Ok(result) => result?,
                Err(panic) => return Err(Error::Handler(panic_message(panic).into())),
            }
        }

        Ok(())
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", message)
    } else {
        "handler panicked".to_string()
    }
}
