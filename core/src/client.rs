//! Per-connection session state (spec section 3): the lifecycle phase a
//! single client moves through, and the scratch state accumulated along the
//! way. The transport crate owns the actual socket; this module only holds
//! the data and transitions a reviewer can reason about without it.

use crate::pty::WinSize;

/// Named explicitly by this expansion; the original has no equivalent enum,
/// only scattered boolean/pointer checks (`client->authenticated`,
/// `client->pid`, `client->argv`). See `SPEC_FULL.md` section 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Upgrade accepted, admission control passed; nothing read yet.
    Established,
    /// At least one frame read, but the service has not yet been resolved.
    Initializing,
    /// A credential is configured and this client has not yet presented a
    /// valid AuthToken. Entered and exited inside JSON_DATA handling — see
    /// the note on ordering in `SPEC_FULL.md` section 3.
    AuthWait,
    /// PTY spawned, initial messages sent, bridging live output and input.
    Ready,
    Closed,
}

/// Accumulated per-connection state that exists before a PTY is spawned.
#[derive(Debug, Clone)]
pub struct PendingSession {
    pub phase: SessionPhase,
    pub authenticated: bool,
    /// Set by an early RESIZE_TERMINAL and applied as the PTY's initial size
    /// once it spawns (section 4.1, 4.7; mirrors the original storing
    /// `client->size` even while `client->pty == 0`).
    pub pending_size: Option<WinSize>,
}

impl PendingSession {
    pub fn new(credential_configured: bool) -> Self {
        Self {
            phase: SessionPhase::Established,
            authenticated: !credential_configured,
            pending_size: None,
        }
    }
}

impl Default for PendingSession {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_authenticated_when_no_credential_configured() {
        let s = PendingSession::new(false);
        assert!(s.authenticated);
        assert_eq!(s.phase, SessionPhase::Established);
    }

    #[test]
    fn starts_unauthenticated_when_credential_configured() {
        let s = PendingSession::new(true);
        assert!(!s.authenticated);
    }
}
