//! Cache server front end
//!
//! A small line-protocol cache server that puts every client request
//! through [`connstate::ConnectionStateMachine`] before it reaches the
//! region store.
//!
//! # Example
//!
//! ```no_run
//! use cacheserver::{Server, ServerConfig};
//! use tokio::sync::watch;
//!
//! # #[tokio::main]
//! # async fn main() -> cacheserver::Result<()> {
//! let server = Server::bind(ServerConfig::default()).await?;
//! let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//! server.run(shutdown_rx).await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod options;
pub mod server;
pub mod store;

pub use codec::{Request, Response};
pub use error::{Result, ServerError};
pub use options::{ServerOptions, SERVER_SECTIONS};
pub use server::{AuthFailurePolicy, Server, ServerConfig, MAX_REQUEST_LINE};
pub use store::RegionStore;
