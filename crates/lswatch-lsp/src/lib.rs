//! Stdio JSON-RPC plumbing for lswatch.
//!
//! This crate launches backend language servers and other stdio tools and
//! speaks JSON-RPC to them.
//!
//! # Architecture
//!
//! - `codec`: `Content-Length` message framing
//! - `RpcConnection`: request/response matching and server notifications
//! - `StdioTransport`: process spawning, stderr forwarded to the log
//! - `LspClient`: initialize/shutdown handshake for a set of workspace folders
//! - `StdioProxyFactory`: plugs the above into `lswatch_core` as backend proxies

pub mod client;
pub mod codec;
pub mod proxy;
pub mod rpc;
pub mod transport;
pub mod types;

pub use client::LspClient;
pub use proxy::{StdioLanguageServerProxy, StdioProxyFactory};
pub use rpc::{Notification, RpcConnection};
pub use transport::StdioTransport;
pub use types::{path_to_uri, LspError, LspServerConfig};
