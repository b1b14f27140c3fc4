//! `serverquery` - Async client engine for the ServerQuery administration protocol.
//!
//! ServerQuery is a line-oriented text protocol: every command answers with
//! zero or more body lines closed by an `error id=.. msg=..` status line, and
//! the server may interleave unsolicited `notify*` lines at any time. There
//! are no correlation ids, so this crate keeps exactly one command in flight
//! and pairs responses by order.
//!
//! It provides:
//! - a query engine that owns the link: single writer, single reader, idle
//!   keep-alive probes whose replies are absorbed before anyone sees them
//! - a response classifier that rebuilds response groups and splits off
//!   notifications
//! - a generic decoder for the `key=value` / `a|b` wire format, with typed
//!   views through serde
//! - per-call timeout and cooperative cancellation
//!
//! ## Quick start
//!
//! ```no_run
//! use serverquery::{Client, Endpoint};
//! # async fn demo() -> serverquery::Result<()> {
//! let client = Client::builder()
//!     .login("serveradmin", "secret")
//!     .virtual_server(1)
//!     .connect(Endpoint::tcp("127.0.0.1", serverquery::DEFAULT_PORT))
//!     .await?;
//!
//! let mut events = client.notifications();
//! client.command("servernotifyregister event=server").await?.check()?;
//!
//! let whoami = client.command("whoami").await?.check()?;
//! println!("{:?}", whoami.first());
//!
//! if let Ok(ev) = events.recv().await {
//!     println!("event: {}", ev.event());
//! }
//!
//! client.close().await?;
//! # Ok(()) }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod classifier;
mod client;
mod engine;
mod event_stream;
mod resync;

pub mod decode;
pub mod error;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use cancel::CancelToken;
pub use classifier::BANNER;
pub use client::{
    CallOptions, Client, ClientBuilder, ConnectOptions, Credentials, DEFAULT_PORT, Endpoint,
};
pub use engine::{KeepAlive, MIN_KEEP_ALIVE_INTERVAL};
pub use error::{Error, ErrorKind, Result};
pub use event_stream::NotifyStream;
pub use transport::Transport;
pub use types::{Message, Notify, QueryError, Record, Response, Value};
