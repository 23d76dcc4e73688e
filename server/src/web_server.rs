//! Axum HTTP + WebSocket wiring: the FILTER admission stage, HTTP Basic auth
//! gate, `auth_token.js`, `?q=config`, the index page, and the fixed `/ws`
//! upgrade. Grounded in the teacher's `web_server.rs` router shape, trimmed
//! to this spec's endpoints.

use std::net::{IpAddr, SocketAddr};

use axum::{
    body::Body,
    extract::{ws::WebSocketUpgrade, ConnectInfo, Query, Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use webtty_core::auth;
use webtty_core::config::MAX_INBOUND_BYTES;
use webtty_core::protocol;
use webtty_core::registry::{ClientId, ClientInfo};
use webtty_core::server::SharedServer;

use crate::ws::handle_connection;

pub async fn run_server(server: SharedServer, addr: SocketAddr) -> anyhow::Result<()> {
    let mut app = Router::new().route(&server.config.ws_path.clone(), get(ws_handler));

    // One index/config route per published service, plus one auth_token.js
    // route per distinct service directory (section 4.6). Routes are static
    // per the config this server was built with, so registering them in a
    // loop at startup is fine even though axum's router itself is static.
    let mut auth_token_dirs: Vec<String> = Vec::new();
    for service in server.services.iter() {
        app = app.route(&service.path, get(index_handler));
        let dir = service.dir().to_string();
        if !auth_token_dirs.contains(&dir) {
            let auth_token_path = format!("{dir}auth_token.js");
            app = app.route(&auth_token_path, get(auth_token_js_handler));
            auth_token_dirs.push(dir);
        }
    }

    let shutdown_server = server.clone();
    let app = app
        .layer(middleware::from_fn(reject_non_get))
        .layer(TraceLayer::new_for_http())
        .with_state(server);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown_server))
    .await?;
    Ok(())
}

/// SIGINT/SIGTERM handling (section 4.7): the first delivery of either signal
/// marks the server draining and lets `axum::serve` finish in-flight
/// connections; a second delivery forces an immediate exit rather than
/// waiting on whatever is still bridging a PTY.
async fn shutdown_signal(server: SharedServer) {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    info!("shutdown signal received, draining");
    server.begin_drain();

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        warn!("second shutdown signal received, forcing immediate exit");
        std::process::exit(0);
    });
}

/// Only GET is accepted (section 4.6): every other method gets a flat 400
/// rather than the framework's default 405.
async fn reject_non_get(req: Request, next: Next) -> Response {
    if req.method() != Method::GET {
        return StatusCode::BAD_REQUEST.into_response();
    }
    next.run(req).await
}

/// Matches `?q=config`; any other query string falls through to the index
/// page, mirroring the original's loop over URI args.
#[derive(serde::Deserialize, Default)]
struct IndexQuery {
    q: Option<String>,
}

async fn index_handler(
    State(server): State<SharedServer>,
    headers: HeaderMap,
    uri: axum::http::Uri,
    Query(query): Query<IndexQuery>,
) -> Response {
    if let Some(resp) = basic_auth_challenge(&server, &headers) {
        return resp;
    }

    if query.q.as_deref() == Some("config") {
        let service_path = uri.path();
        let socket_path = relative_socket_path(service_path, &server.config.ws_path);
        let body = serde_json::json!({
            "socketPath": socket_path,
            "service": service_path,
        });
        return (
            StatusCode::OK,
            [("Content-Type", "application/json")],
            body.to_string(),
        )
            .into_response();
    }

    match &server.config.index_path {
        Some(path) => match tokio::fs::read(path).await {
            Ok(bytes) => (
                StatusCode::OK,
                [("Content-Type", "text/html")],
                Body::from(bytes),
            )
                .into_response(),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to read index: {e}"),
            )
                .into_response(),
        },
        None => (
            StatusCode::OK,
            [("Content-Type", "text/html")],
            Body::from(DEFAULT_INDEX_HTML),
        )
            .into_response(),
    }
}

const DEFAULT_INDEX_HTML: &str = "<!DOCTYPE html><html><head><title>webtty</title></head>\
<body><div id=\"terminal\"></div><script src=\"auth_token.js\"></script></body></html>";

/// One `../` per intermediate `/` in `service_path`, then the fixed WS path
/// (section 4.6). The leading `/` itself is not an "intermediate" slash, so
/// `/` maps to zero `../` prefixes.
fn relative_socket_path(service_path: &str, ws_path: &str) -> String {
    let intermediate = service_path.matches('/').count().saturating_sub(1);
    let relative_ws = ws_path.trim_start_matches('/');
    format!("{}{relative_ws}", "../".repeat(intermediate))
}

/// `var tty_auth_token = '<credential>';` — empty body when no credential is
/// configured, matching the original's zero-length response in that case.
async fn auth_token_js_handler(State(server): State<SharedServer>, headers: HeaderMap) -> Response {
    if let Some(resp) = basic_auth_challenge(&server, &headers) {
        return resp;
    }
    let body = match &server.config.credential {
        Some(credential) => format!("var tty_auth_token = '{credential}';"),
        None => String::new(),
    };
    (
        StatusCode::OK,
        [("Content-Type", "application/javascript")],
        body,
    )
        .into_response()
}

async fn ws_handler(
    State(server): State<SharedServer>,
    headers: HeaderMap,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    uri: axum::http::Uri,
    ws: WebSocketUpgrade,
) -> Response {
    if server.is_draining() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }

    // Template fragments live on the upgrade URL's query string, not on the
    // JSON_DATA ServicePath (section 3): mirrors the original capturing
    // WSI_TOKEN_HTTP_URI_ARGS at the FILTER stage, before JSON_DATA arrives.
    let fragments = uri
        .query()
        .map(protocol::parse_query_fragments)
        .unwrap_or_default();

    let origin_matches_host = origin_matches_host(&headers);
    let peer_hostname = resolve_peer_hostname(peer_addr.ip()).await;
    let client_id = ClientId::new();
    let info = ClientInfo {
        peer_addr,
        peer_hostname,
        path: server.config.ws_path.clone(),
    };

    // Count-check-and-insert happens under one lock (section 4.5/4.7): two
    // concurrent upgrades can never both observe the pre-admission count.
    if let Err(e) = server.try_admit(
        server.config.ws_path.as_str(),
        origin_matches_host,
        client_id,
        info,
    ) {
        info!(error = %e, "refusing websocket upgrade");
        return (StatusCode::FORBIDDEN, e.to_string()).into_response();
    }

    ws.max_message_size(MAX_INBOUND_BYTES)
        .on_upgrade(move |socket| handle_connection(socket, server, client_id, fragments))
}

/// Reverse DNS lookup for the connecting peer (section 3's `peer_hostname`),
/// matching the original's `lws_get_peer_addresses`. Runs on a blocking
/// thread since resolver calls are synchronous; failures just leave the
/// field `None`, same as the original falling back to the numeric address.
async fn resolve_peer_hostname(ip: IpAddr) -> Option<String> {
    tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip).ok())
        .await
        .ok()
        .flatten()
}

/// `None` means the request passed (or no credential is configured); `Some`
/// carries the 401 response to return as-is.
fn basic_auth_challenge(server: &SharedServer, headers: &HeaderMap) -> Option<Response> {
    let authorization = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if auth::check_basic_auth(&server.config, authorization) {
        return None;
    }
    Some(
        (
            StatusCode::UNAUTHORIZED,
            [(axum::http::header::WWW_AUTHENTICATE, auth::BASIC_AUTH_REALM)],
            "",
        )
            .into_response(),
    )
}

fn origin_matches_host(headers: &HeaderMap) -> Option<bool> {
    let origin = headers.get("origin")?.to_str().ok()?;
    let host = headers.get("host")?.to_str().ok()?;
    let origin_host = origin
        .split("://")
        .nth(1)
        .unwrap_or(origin)
        .trim_end_matches('/');
    Some(strip_default_port(origin_host).eq_ignore_ascii_case(strip_default_port(host)))
}

/// Drops a trailing `:80` or `:443`, matching `check_host_origin`'s
/// normalization: an explicit default port is equivalent to no port at all
/// when comparing Origin against Host.
fn strip_default_port(authority: &str) -> &str {
    authority
        .strip_suffix(":80")
        .or_else(|| authority.strip_suffix(":443"))
        .unwrap_or(authority)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_service_has_no_relative_prefix() {
        assert_eq!(relative_socket_path("/", "/ws"), "ws");
    }

    #[test]
    fn nested_service_climbs_one_level_per_intermediate_slash() {
        assert_eq!(relative_socket_path("/admin/run", "/ws"), "../ws");
        assert_eq!(relative_socket_path("/a/b/c", "/ws"), "../../ws");
    }

    #[test]
    fn origin_matches_host_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("origin", "HTTP://Example.com".parse().unwrap());
        headers.insert("host", "example.com".parse().unwrap());
        assert_eq!(origin_matches_host(&headers), Some(true));
    }

    #[test]
    fn origin_mismatch_is_detected() {
        let mut headers = HeaderMap::new();
        headers.insert("origin", "http://evil.com".parse().unwrap());
        headers.insert("host", "example.com".parse().unwrap());
        assert_eq!(origin_matches_host(&headers), Some(false));
    }

    #[test]
    fn missing_origin_header_yields_none() {
        let mut headers = HeaderMap::new();
        headers.insert("host", "example.com".parse().unwrap());
        assert_eq!(origin_matches_host(&headers), None);
    }

    #[test]
    fn origin_matches_host_ignores_default_ports() {
        let mut headers = HeaderMap::new();
        headers.insert("origin", "https://example.com:443".parse().unwrap());
        headers.insert("host", "example.com".parse().unwrap());
        assert_eq!(origin_matches_host(&headers), Some(true));

        let mut headers = HeaderMap::new();
        headers.insert("origin", "http://example.com".parse().unwrap());
        headers.insert("host", "example.com:80".parse().unwrap());
        assert_eq!(origin_matches_host(&headers), Some(true));
    }
}
