//! Admission control and credential checks (spec section 4.4 / C5).
//!
//! Two distinct gates exist: the FILTER stage runs before the WebSocket
//! upgrade completes and can only refuse outright (no close handshake yet);
//! the credential gate runs per-message once a connection is established and
//! produces a close reason when it fails.

use crate::config::ServerConfig;
use crate::error::AdmissionError;

/// Admission state needed to evaluate the FILTER stage; kept separate from
/// [`ServerConfig`] so callers don't need a whole `Server` to unit test this.
pub struct AdmissionContext<'a> {
    pub config: &'a ServerConfig,
    pub current_client_count: usize,
    pub request_path: &'a str,
    /// `Some(true)` if the Origin header's host matches the Host header;
    /// `None` when there is no Origin header at all.
    pub origin_matches_host: Option<bool>,
}

/// FILTER_PROTOCOL_CONNECTION equivalent: evaluated in this exact order —
/// once-mode exhaustion, max-clients, path match, then origin/host check.
pub fn check_filter(ctx: &AdmissionContext<'_>) -> Result<(), AdmissionError> {
    if ctx.config.once && ctx.current_client_count > 0 {
        return Err(AdmissionError::OnceExhausted);
    }
    if ctx.config.max_clients > 0 && ctx.current_client_count >= ctx.config.max_clients {
        return Err(AdmissionError::MaxClients);
    }
    if ctx.request_path != ctx.config.ws_path {
        return Err(AdmissionError::PathMismatch);
    }
    if ctx.config.check_origin {
        match ctx.origin_matches_host {
            Some(true) => {}
            _ => return Err(AdmissionError::OriginMismatch),
        }
    }
    Ok(())
}

/// HTTP Basic auth check for non-WebSocket requests (section 4.4). Returns
/// `true` when no credential is configured, or the presented base64 matches
/// exactly. `authorization_header` is the raw `Authorization:` header value,
/// e.g. `"Basic dXNlcjpwYXNz"`.
pub fn check_basic_auth(config: &ServerConfig, authorization_header: Option<&str>) -> bool {
    let Some(credential) = &config.credential else {
        return true;
    };
    let Some(header) = authorization_header else {
        return false;
    };
    let presented = header.split_whitespace().nth(1);
    presented == Some(credential.as_str())
}

/// The realm ttyd historically reports; clients may key off this literal
/// value, so it stays fixed regardless of how this server renames itself.
pub const BASIC_AUTH_REALM: &str = "Basic realm=\"ttyd\"";

/// In-band WS AuthToken check (JSON_DATA handling, section 4.3/4.4).
pub fn check_ws_token(config: &ServerConfig, presented_token: Option<&str>) -> bool {
    let Some(credential) = &config.credential else {
        return true;
    };
    presented_token == Some(credential.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Service;

    fn config() -> ServerConfig {
        ServerConfig::new(vec![Service::new("/", vec!["sh".into()]).unwrap()])
    }

    fn ctx(config: &ServerConfig) -> AdmissionContext<'_> {
        AdmissionContext {
            config,
            current_client_count: 0,
            request_path: "/ws",
            origin_matches_host: None,
        }
    }

    #[test]
    fn admits_by_default() {
        let config = config();
        assert!(check_filter(&ctx(&config)).is_ok());
    }

    #[test]
    fn once_mode_rejects_after_first_client() {
        let mut config = config();
        config.once = true;
        let mut c = ctx(&config);
        c.current_client_count = 1;
        assert_eq!(check_filter(&c), Err(AdmissionError::OnceExhausted));
    }

    #[test]
    fn max_clients_rejects_at_limit() {
        let mut config = config();
        config.max_clients = 2;
        let mut c = ctx(&config);
        c.current_client_count = 2;
        assert_eq!(check_filter(&c), Err(AdmissionError::MaxClients));
    }

    #[test]
    fn path_mismatch_is_rejected() {
        let config = config();
        let mut c = ctx(&config);
        c.request_path = "/other";
        assert_eq!(check_filter(&c), Err(AdmissionError::PathMismatch));
    }

    #[test]
    fn origin_check_requires_explicit_match() {
        let mut config = config();
        config.check_origin = true;
        let mut c = ctx(&config);
        c.origin_matches_host = None;
        assert_eq!(check_filter(&c), Err(AdmissionError::OriginMismatch));
        c.origin_matches_host = Some(false);
        assert_eq!(check_filter(&c), Err(AdmissionError::OriginMismatch));
        c.origin_matches_host = Some(true);
        assert!(check_filter(&c).is_ok());
    }

    #[test]
    fn order_is_once_then_max_clients_then_path_then_origin() {
        let mut config = config();
        config.once = true;
        config.max_clients = 1;
        let mut c = ctx(&config);
        c.current_client_count = 1;
        c.request_path = "/wrong";
        assert_eq!(check_filter(&c), Err(AdmissionError::OnceExhausted));
    }

    #[test]
    fn basic_auth_passes_without_credential() {
        let config = config();
        assert!(check_basic_auth(&config, None));
    }

    #[test]
    fn basic_auth_requires_exact_match() {
        let config = config().with_credential("dXNlcjpwYXNz".to_string());
        assert!(!check_basic_auth(&config, None));
        assert!(!check_basic_auth(&config, Some("Basic wrong")));
        assert!(check_basic_auth(&config, Some("Basic dXNlcjpwYXNz")));
    }

    #[test]
    fn ws_token_requires_exact_match_when_configured() {
        let config = config().with_credential("secret".to_string());
        assert!(!check_ws_token(&config, None));
        assert!(!check_ws_token(&config, Some("wrong")));
        assert!(check_ws_token(&config, Some("secret")));
    }

    #[test]
    fn ws_token_passes_without_credential() {
        let config = config();
        assert!(check_ws_token(&config, Some("anything")));
        assert!(check_ws_token(&config, None));
    }
}
