//! IPC with the indexing service.
//!
//! The service registers a window under a well-known class name and answers
//! binary queries delivered as window messages. [`locator`] finds it,
//! [`codec`] encodes requests and decodes replies, [`transport`] moves bytes,
//! and [`Connection`] ties them together one exchange at a time.

pub mod client;
pub mod codec;
pub mod connection;
pub mod locator;
pub mod mock;
pub mod protocol;
pub mod transport;

pub use protocol::*;

pub use client::IpcClient;
pub use connection::{Connection, ConnectionState};
pub use locator::{Endpoint, EndpointCache, EndpointLocator, WindowLocator};
pub use transport::{ReplyQueue, Transport, WindowTransport};
