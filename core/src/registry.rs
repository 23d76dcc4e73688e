//! Client registry: who's currently connected, for `max-clients` admission
//! and for `--once` teardown bookkeeping. Section 4.5 calls for "a single
//! insertion-ordered list guarded by one process-wide mutex" precisely so
//! that admission and registration can be serialized as one critical
//! section; a lock-free map (this module's earlier shape) leaves a
//! check-then-insert race between concurrently admitted clients, so the
//! list and its mutex live here together rather than behind `dashmap`.

use std::sync::Mutex;

use uuid::Uuid;

/// Identifies one live WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// What's worth knowing about a connected client without reaching into its task.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub peer_addr: std::net::SocketAddr,
    pub peer_hostname: Option<String>,
    pub path: String,
}

/// Insertion-ordered list of currently-connected clients, guarded by one
/// mutex (section 4.5). `try_admit` is the only way to add an entry: it
/// holds the lock across both the admission decision and the insert, so
/// `client_count` stays the admission-control source of truth even under
/// concurrent connection attempts (section 8's invariant).
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<Vec<(ClientId, ClientInfo)>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove(&self, id: &ClientId) {
        let mut guard = self.clients.lock().unwrap();
        guard.retain(|(existing, _)| existing != id);
    }

    pub fn len(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().unwrap().is_empty()
    }

    /// Run `decide` with the count observed under the lock; insert `info`
    /// under that same lock acquisition iff `decide` returns `Ok`. This is
    /// the atomic check-and-insert section 4.5/4.7 require: two concurrent
    /// callers can never both observe the pre-insert count and both be
    /// admitted.
    pub fn try_admit<E>(
        &self,
        id: ClientId,
        info: ClientInfo,
        decide: impl FnOnce(usize) -> Result<(), E>,
    ) -> Result<(), E> {
        let mut guard = self.clients.lock().unwrap();
        decide(guard.len())?;
        guard.push((id, info));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> ClientInfo {
        ClientInfo {
            peer_addr: "127.0.0.1:1234".parse().unwrap(),
            peer_hostname: None,
            path: "/ws".to_string(),
        }
    }

    #[test]
    fn tracks_admit_and_remove() {
        let reg = ClientRegistry::new();
        assert!(reg.is_empty());
        let id = ClientId::new();
        reg.try_admit(id, info(), |_count| Ok::<(), ()>(())).unwrap();
        assert_eq!(reg.len(), 1);
        reg.remove(&id);
        assert!(reg.is_empty());
    }

    #[test]
    fn rejected_admission_does_not_insert() {
        let reg = ClientRegistry::new();
        let id = ClientId::new();
        let result = reg.try_admit(id, info(), |_count| Err::<(), _>("full"));
        assert_eq!(result, Err("full"));
        assert!(reg.is_empty());
    }

    #[test]
    fn decide_observes_the_count_before_this_insert() {
        let reg = ClientRegistry::new();
        reg.try_admit(ClientId::new(), info(), |count| {
            assert_eq!(count, 0);
            Ok::<(), ()>(())
        })
        .unwrap();
        reg.try_admit(ClientId::new(), info(), |count| {
            assert_eq!(count, 1);
            Ok::<(), ()>(())
        })
        .unwrap();
        assert_eq!(reg.len(), 2);
    }
}
