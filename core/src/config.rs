//! Process-wide policy. Assembled once by an external collaborator (CLI
//! parsing and the on-disk configuration file are out of scope for this
//! crate) and handed in as a plain owned value — never reached through a
//! process-global from the rest of the core.

use crate::service::Service;

/// Default WebSocket path. A server instance runs exactly one such path,
/// shared by every published service's `?q=config` response.
pub const DEFAULT_WS_PATH: &str = "/ws";

/// Default terminal type reported to the spawned child via `TERM`.
pub const DEFAULT_TERMINAL_TYPE: &str = "xterm-256color";

/// SIGHUP, the default signal sent to a child on session teardown.
pub const DEFAULT_EXIT_SIGNAL_CODE: i32 = 1;
pub const DEFAULT_EXIT_SIGNAL_NAME: &str = "SIGHUP";

/// Default reconnect delay advertised to the client (seconds). `0` disables
/// client-side auto-reconnect.
pub const DEFAULT_RECONNECT_SECS: u32 = 10;

/// Cap on the per-connection inbound fragment-accumulation buffer. The
/// original has no such cap; this is this expansion's defense against an
/// unbounded allocation from a malicious peer (see spec section 9).
pub const MAX_INBOUND_BYTES: usize = 16 * 1024 * 1024;

/// Server-wide policy: everything needed to admit, authenticate, and drive a
/// client session, short of the registries themselves (see [`crate::server::Server`]).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Pre-encoded base64 of `user:pass`. `None` disables credential checks
    /// entirely (both HTTP Basic and the in-band AuthToken).
    pub credential: Option<String>,
    pub terminal_type: String,
    pub exit_signal_code: i32,
    pub exit_signal_name: String,
    /// Seconds advertised to the client for auto-reconnect; `0` disables it.
    pub reconnect_secs: u32,
    pub readonly: bool,
    pub check_origin: bool,
    /// Admit exactly one client for the lifetime of the process, then exit.
    pub once: bool,
    /// `0` means unlimited.
    pub max_clients: usize,
    /// Path to a custom index.html on disk. `None` falls back to an
    /// embedded page (the page's content itself is out of scope here).
    pub index_path: Option<std::path::PathBuf>,
    /// Forwarded verbatim to the client as SET_PREFERENCES.
    pub preferences: serde_json::Value,
    /// Fixed WebSocket path; every published service shares it.
    pub ws_path: String,
    pub services: Vec<Service>,
}

impl ServerConfig {
    /// Construct policy with this spec's defaults and the given services.
    /// Validation of the service table (unique, non-empty paths; non-empty
    /// argv templates) happens when the [`crate::server::Server`] is built.
    pub fn new(services: Vec<Service>) -> Self {
        Self {
            credential: None,
            terminal_type: DEFAULT_TERMINAL_TYPE.to_string(),
            exit_signal_code: DEFAULT_EXIT_SIGNAL_CODE,
            exit_signal_name: DEFAULT_EXIT_SIGNAL_NAME.to_string(),
            reconnect_secs: DEFAULT_RECONNECT_SECS,
            readonly: false,
            check_origin: false,
            once: false,
            max_clients: 0,
            index_path: None,
            preferences: serde_json::Value::Object(Default::default()),
            ws_path: DEFAULT_WS_PATH.to_string(),
            services,
        }
    }

    pub fn with_credential(mut self, user_pass_b64: impl Into<String>) -> Self {
        self.credential = Some(user_pass_b64.into());
        self
    }
}
