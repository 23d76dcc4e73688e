//! HTTP + WebSocket transport for sharing a terminal over the web. The
//! session/PTY/service logic itself lives in `webtty_core`; this crate only
//! wires it to axum.

mod web_server;
mod ws;

pub use web_server::run_server;
