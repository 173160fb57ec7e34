//! Connection security state machine for a cache server wire protocol
//!
//! Every request on a client connection is checked against how far that
//! connection has progressed through the authentication handshake before
//! any business logic runs. Out-of-order requests are refused with a
//! [`ConnectionStateError`] carrying one [`ErrorCode`] that the codec layer
//! serializes back to the client.
//!
//! # Features
//!
//! - Security-disabled and security-enabled modes behind one contract
//! - Two-step handshake (start, then submit credentials)
//! - Per-operation authorization once authenticated
//! - Injected credential verifier and authorizer, plus a keyring backend
//!
//! # Example
//!
//! ```rust
//! use connstate::{
//!     ConnectionState, ConnectionStateMachine, Credentials, Keyring, OperationDescriptor,
//!     Resource, SecurityBackend, SecurityMode,
//! };
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), connstate::Error> {
//! let mut keyring = Keyring::new();
//! keyring.add("alice", "wonderland");
//! keyring.grant("alice", Resource::Data, "allow rw")?;
//! let machine = ConnectionStateMachine::new(SecurityMode::Enabled(
//!     SecurityBackend::from_shared(Arc::new(keyring)),
//! ));
//!
//! let conn = machine.accept("127.0.0.1:50000".parse().unwrap()).await;
//! conn.begin_handshake().await?;
//! conn.complete_handshake(&Credentials::new("alice", "wonderland")).await?;
//! assert_eq!(conn.state().await, ConnectionState::Authenticated);
//!
//! let put = OperationDescriptor::data_write("PutRequest", "orders", Some("1"));
//! conn.dispatch(&put).await?;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod error;
pub mod keyring;
pub mod machine;
pub mod operation;
pub mod security;
pub mod state;

pub use context::{ConnectionContext, ConnectionId};
pub use error::*;
pub use keyring::{Caps, Keyring};
pub use machine::{ConnectionHandle, ConnectionStateMachine};
pub use operation::*;
pub use security::*;
pub use state::{ConnectionState, StateProcessor};
