//! Core of a web terminal sharing server: PTY sessions, service dispatch,
//! the per-client handshake, admission control, and the client registry.
//! No HTTP/WebSocket transport lives here; see the `server` crate for that.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod pty;
pub mod registry;
pub mod server;
pub mod service;

pub use error::{CloseReason, CoreError};
pub use server::{Server, SharedServer};
