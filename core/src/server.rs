//! Top-level server handle: owned config plus the two registries a running
//! instance needs. Grounded in the teacher's `AppState`, trimmed to this
//! spec's scope (no job/project/tunnel bookkeeping).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::auth::{self, AdmissionContext};
use crate::config::ServerConfig;
use crate::error::{AdmissionError, CoreError};
use crate::registry::{ClientId, ClientInfo, ClientRegistry};
use crate::service::ServiceRegistry;

/// Shared, reference-counted handle every connection task clones.
pub type SharedServer = Arc<Server>;

pub struct Server {
    pub config: ServerConfig,
    pub services: ServiceRegistry,
    pub clients: ClientRegistry,
    /// Set once shutdown has begun: stop admitting new clients, let the
    /// existing ones drain (section 4.7's two-signal teardown sequence).
    draining: AtomicBool,
}

impl Server {
    /// Validates the service table (unique, non-empty paths; non-empty argv
    /// templates) before returning a usable server.
    pub fn new(config: ServerConfig) -> Result<SharedServer, CoreError> {
        let services = ServiceRegistry::new(config.services.clone())?;
        if services.is_empty() {
            return Err(CoreError::Service("no services configured".into()));
        }
        Ok(Arc::new(Self {
            config,
            services,
            clients: ClientRegistry::new(),
            draining: AtomicBool::new(false),
        }))
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    /// Atomic FILTER-stage admission (section 4.5/4.7): the client count
    /// `check_filter` decides against is observed under the same lock
    /// acquisition that inserts the new client, so two concurrent upgrades
    /// can never both be admitted past `--once`/`--max-clients`.
    pub fn try_admit(
        &self,
        request_path: &str,
        origin_matches_host: Option<bool>,
        id: ClientId,
        info: ClientInfo,
    ) -> Result<(), AdmissionError> {
        self.clients.try_admit(id, info, |count| {
            let ctx = AdmissionContext {
                config: &self.config,
                current_client_count: count,
                request_path,
                origin_matches_host,
            };
            auth::check_filter(&ctx)
        })
    }
}

/// The machine's own hostname, as reported to `SET_WINDOW_TITLE` (section
/// 4.3). This names the host the server runs on, not the connecting client —
/// matching the original's use of `gethostname(2)` in `send_initial_message`.
pub fn local_hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Service;

    #[test]
    fn rejects_empty_service_table() {
        let config = ServerConfig::new(vec![]);
        assert!(Server::new(config).is_err());
    }

    #[test]
    fn rejects_duplicate_service_paths() {
        let config = ServerConfig::new(vec![
            Service::new("/", vec!["sh".into()]).unwrap(),
            Service::new("/", vec!["bash".into()]).unwrap(),
        ]);
        assert!(Server::new(config).is_err());
    }

    #[test]
    fn builds_with_valid_services() {
        let config = ServerConfig::new(vec![Service::new("/", vec!["sh".into()]).unwrap()]);
        let server = Server::new(config).unwrap();
        assert!(!server.is_draining());
        server.begin_drain();
        assert!(server.is_draining());
    }
}
