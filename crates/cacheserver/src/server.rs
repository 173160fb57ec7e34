//! TCP front end
//!
//! Accepts client connections, registers each one with the
//! [`ConnectionStateMachine`] and runs every request line through it before
//! touching the region store.

use crate::codec::{Request, Response};
use crate::error::Result;
use crate::store::RegionStore;
use connstate::{
    ConnectionHandle, ConnectionStateError, ConnectionStateMachine, Credentials, SecurityMode,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Longest request line accepted, excluding the newline
pub const MAX_REQUEST_LINE: usize = 64 * 1024;

/// Runtime settings of a [`Server`]
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub security_mode: SecurityMode,
    /// Failed credential submissions tolerated per connection (0 = unlimited)
    pub max_auth_failures: u32,
    pub auth_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 40404)),
            security_mode: SecurityMode::Disabled,
            max_auth_failures: 3,
            auth_timeout: Duration::from_secs(10),
        }
    }
}

/// When to give up on a client that keeps failing authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthFailurePolicy {
    max_failures: u32,
}

impl AuthFailurePolicy {
    pub fn new(max_failures: u32) -> Self {
        Self { max_failures }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn should_disconnect(&self, failures: u32) -> bool {
        self.max_failures > 0 && failures >= self.max_failures
    }
}

#[derive(Debug)]
struct Shared {
    machine: ConnectionStateMachine,
    store: RegionStore,
    policy: AuthFailurePolicy,
    auth_timeout: Duration,
}

/// Bound cache server, ready to [`run`](Server::run)
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    shared: Arc<Shared>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        info!(
            "Listening on {} (security {})",
            listener.local_addr()?,
            if config.security_mode.is_enabled() {
                "enabled"
            } else {
                "disabled"
            }
        );
        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                machine: ConnectionStateMachine::new(config.security_mode),
                store: RegionStore::new(),
                policy: AuthFailurePolicy::new(config.max_auth_failures),
                auth_timeout: config.auth_timeout,
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Number of connections currently registered
    pub async fn connection_count(&self) -> usize {
        self.shared.machine.connection_count().await
    }

    /// Accept connections until `shutdown` flips to `true`
    ///
    /// Open connections are told to stop and awaited before returning.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let shared = self.shared.clone();
                            let shutdown = shutdown.clone();
                            connections.spawn(async move {
                                serve_connection(shared, stream, peer_addr, shutdown).await
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!("Connection task failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, stopping accept loop");
                        break;
                    }
                }
            }
        }

        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                error!("Connection task failed: {}", e);
            }
        }
        info!("Server shut down complete");
        Ok(())
    }
}

async fn serve_connection(
    shared: Arc<Shared>,
    stream: TcpStream,
    peer_addr: SocketAddr,
    shutdown: watch::Receiver<bool>,
) {
    let handle = shared.machine.accept(peer_addr).await;
    let id = handle.id();

    if let Err(e) = session(&shared, &handle, stream, shutdown).await {
        debug!("{}: connection error: {}", id, e);
    }

    if let Err(e) = shared.machine.close(id).await {
        warn!("{}: {}", id, e);
    }
}

async fn session(
    shared: &Shared,
    handle: &ConnectionHandle,
    stream: TcpStream,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut auth_failures = 0u32;

    loop {
        buf.clear();
        let line = tokio::select! {
            line = read_request_line(&mut reader, &mut buf) => line?,
            _ = shutdown.changed() => {
                debug!("{}: closing for shutdown", handle.id());
                return Ok(());
            }
        };
        let line = match line {
            RequestLine::Line(line) => line,
            RequestLine::Eof => {
                debug!("{}: peer closed", handle.id());
                return Ok(());
            }
            RequestLine::TooLong => {
                warn!(
                    "{}: request line exceeds {} bytes, closing",
                    handle.id(),
                    MAX_REQUEST_LINE
                );
                let response: Response =
                    ConnectionStateError::unknown_operation("request line too long").into();
                writer.write_all(response.encode().as_bytes()).await?;
                writer.shutdown().await?;
                return Ok(());
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = process(shared, handle, &line).await;
        writer.write_all(response.encode().as_bytes()).await?;

        // Once authenticated no further INVALID_CREDENTIALS can occur, so
        // the count never needs resetting.
        if response.is_authentication_failure() {
            auth_failures += 1;
            if shared.policy.should_disconnect(auth_failures) {
                warn!(
                    "{}: closing after {} failed authentication attempt(s)",
                    handle.id(),
                    auth_failures
                );
                writer.shutdown().await?;
                return Ok(());
            }
        }
    }
}

enum RequestLine {
    Line(String),
    Eof,
    TooLong,
}

/// Read one newline-terminated line of at most [`MAX_REQUEST_LINE`] bytes
async fn read_request_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<RequestLine>
where
    R: AsyncBufRead + Unpin,
{
    let limit = MAX_REQUEST_LINE as u64 + 1;
    let n = reader.take(limit).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(RequestLine::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() > MAX_REQUEST_LINE {
        return Ok(RequestLine::TooLong);
    }
    Ok(RequestLine::Line(String::from_utf8_lossy(buf).into_owned()))
}

/// Run one request line through the state machine and, if allowed, the store
async fn process(shared: &Shared, handle: &ConnectionHandle, line: &str) -> Response {
    let request = match Request::parse(line) {
        Ok(request) => request,
        Err(e) => return e.into(),
    };

    match request {
        Request::Handshake => match handle.begin_handshake().await {
            Ok(()) => Response::ok(),
            Err(e) => e.into(),
        },
        Request::Authenticate(credentials) => authenticate(shared, handle, &credentials).await,
        request => {
            let result = match request.descriptor() {
                Ok(operation) => handle.dispatch(&operation).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => execute(shared, handle, request).await,
                Err(e) => e.into(),
            }
        }
    }
}

async fn authenticate(
    shared: &Shared,
    handle: &ConnectionHandle,
    credentials: &Credentials,
) -> Response {
    match tokio::time::timeout(shared.auth_timeout, handle.complete_handshake(credentials)).await {
        Ok(Ok(())) => Response::ok_with(credentials.principal.clone()),
        Ok(Err(e)) => e.into(),
        Err(_) => {
            warn!(
                "{}: credential check for {} timed out after {:?}",
                handle.id(),
                credentials.principal,
                shared.auth_timeout
            );
            ConnectionStateError::invalid_credentials("credential check timed out").into()
        }
    }
}

async fn execute(shared: &Shared, handle: &ConnectionHandle, request: Request) -> Response {
    let store = &shared.store;
    match request {
        Request::GetServer => {
            let principal = handle.principal().await;
            Response::ok_with(format!(
                "state={} principal={}",
                handle.state().await,
                principal.as_deref().unwrap_or("-")
            ))
        }
        Request::GetRegionNames => Response::ok_with(store.region_names().join(" ")),
        Request::Get { region, key } => match store.get(&region, &key) {
            Some(value) => Response::ok_with(String::from_utf8_lossy(&value).into_owned()),
            None => Response::ok(),
        },
        Request::Put { region, key, value } => {
            store.put(&region, &key, value);
            Response::ok()
        }
        Request::Remove { region, key } => match store.remove(&region, &key) {
            Some(value) => Response::ok_with(String::from_utf8_lossy(&value).into_owned()),
            None => Response::ok(),
        },
        Request::GetSize { region } => Response::ok_with(store.size(&region).to_string()),
        Request::KeySet { region } => Response::ok_with(store.keys(&region).join(" ")),
        Request::Clear { region } => Response::ok_with(store.clear(&region).to_string()),
        Request::Handshake | Request::Authenticate(_) => {
            ConnectionStateError::unknown_operation("handshake requests are not executable").into()
        }
    }
}
