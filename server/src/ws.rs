//! Per-connection session loop: the Established -> Initializing -> AuthWait
//! -> Ready -> Closed lifecycle (spec section 3/5), implemented as one task
//! per WebSocket connection.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use webtty_core::auth;
use webtty_core::client::{PendingSession, SessionPhase};
use webtty_core::error::CoreError;
use webtty_core::protocol::{self, Inbound, JsonData};
use webtty_core::pty::{self, PtyEvent, PtyHandle};
use webtty_core::registry::ClientId;
use webtty_core::server::{self, SharedServer};
use webtty_core::service::{substitute_argv, Fragment};
use webtty_core::CloseReason;

pub async fn handle_connection(
    socket: WebSocket,
    server: SharedServer,
    client_id: ClientId,
    fragments: Vec<Fragment>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut pending = PendingSession::new(server.config.credential.is_some());

    let outcome = run_handshake(&mut ws_rx, &server, &mut pending, &fragments).await;

    let (mut pty, mut pty_rx, argv) = match outcome {
        Ok(ready) => ready,
        Err(close_reason) => {
            close_with(&mut ws_tx, close_reason).await;
            server.clients.remove(&client_id);
            return;
        }
    };

    if let Some(size) = pending.pending_size.take() {
        pty.resize(size);
    }

    send_initial_messages(&mut ws_tx, &server, &argv).await;

    bridge(&mut ws_tx, &mut ws_rx, &mut pty, &mut pty_rx, &server).await;

    if let Err(e) = pty.shutdown(server.config.exit_signal_code) {
        warn!(error = %e, "pty teardown reported an error (non-fatal)");
    }
    server.clients.remove(&client_id);
    info!(client = %client_id, "session closed");

    if server.config.once {
        info!("--once: exiting after the single served client");
        std::process::exit(0);
    }
}

type HandshakeOk = (PtyHandle, mpsc::Receiver<PtyEvent>, Vec<String>);

/// Reads inbound frames until a service is resolved and a PTY spawned, or the
/// connection must close. Matches the original's ordering exactly: JSON_DATA
/// (with its embedded AuthToken check) is what actually resolves AuthWait,
/// and it happens before any initial message is sent (see `SPEC_FULL.md`
/// section 3's ownership note).
async fn run_handshake(
    ws_rx: &mut futures_util::stream::SplitStream<WebSocket>,
    server: &SharedServer,
    pending: &mut PendingSession,
    fragments: &[Fragment],
) -> Result<HandshakeOk, CloseReason> {
    pending.phase = SessionPhase::Initializing;
    loop {
        let Some(msg) = ws_rx.next().await else {
            return Err(CloseReason::Normal);
        };
        let msg = match msg {
            Ok(m) => m,
            Err(_) => return Err(CloseReason::UnexpectedCondition),
        };
        let frame = match msg {
            Message::Binary(b) => b.to_vec(),
            Message::Text(t) => t.as_bytes().to_vec(),
            Message::Close(_) => return Err(CloseReason::Normal),
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        let Some(&command) = frame.first() else {
            continue;
        };

        if server.config.credential.is_some()
            && !pending.authenticated
            && command != protocol::CMD_JSON_DATA
        {
            warn!("WS client not authenticated");
            return Err(CloseReason::PolicyViolation);
        }

        let decoded = match protocol::decode_inbound(&frame) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "dropping malformed pre-handshake frame");
                continue;
            }
        };

        match decoded {
            Inbound::Input(_) => {
                // No PTY yet; mirrors the original's silent drop.
            }
            Inbound::Resize(size) => {
                pending.pending_size = Some(size);
            }
            Inbound::JsonData(data) => {
                return handle_json_data(server, pending, data, fragments).await;
            }
        }
    }
}

async fn handle_json_data(
    server: &SharedServer,
    pending: &mut PendingSession,
    data: JsonData,
    fragments: &[Fragment],
) -> Result<HandshakeOk, CloseReason> {
    if server.config.credential.is_some() {
        if auth::check_ws_token(&server.config, data.auth_token.as_deref()) {
            pending.authenticated = true;
        } else {
            warn!("WS authentication failed with a bad token");
            return Err(CloseReason::PolicyViolation);
        }
    }
    pending.phase = SessionPhase::Ready;

    // ServicePath is matched verbatim: real clients send a bare path here and
    // put the template query on the WS upgrade URL instead (section 3).
    let Some(service) = server.services.resolve(&data.service_path) else {
        warn!(path = %data.service_path, "disconnecting client, unresolvable service path");
        return Err(CloseReason::UnexpectedCondition);
    };
    let argv = substitute_argv(&service.argv, fragments);

    let size = pending.pending_size.unwrap_or_default();
    let (handle, rx) = pty::spawn(&argv, &server.config.terminal_type, size)
        .map_err(|e: CoreError| {
            warn!(error = %e, "failed to spawn pty");
            e
        })
        .map_err(|_| CloseReason::UnexpectedCondition)?;

    Ok((handle, rx, argv))
}

async fn send_initial_messages(
    ws_tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    server: &SharedServer,
    argv: &[String],
) {
    let hostname = server::local_hostname();
    let title = protocol::encode_window_title(argv, &hostname);
    let _ = ws_tx.send(Message::Binary(Bytes::from(title))).await;

    let reconnect = protocol::encode_reconnect(server.config.reconnect_secs);
    let _ = ws_tx.send(Message::Binary(Bytes::from(reconnect))).await;

    let prefs = protocol::encode_preferences(&server.config.preferences);
    let _ = ws_tx.send(Message::Binary(Bytes::from(prefs))).await;
}

/// Ready-phase bridging: `tokio::select!` between PTY output and inbound WS
/// frames, event-driven rather than on a polling tick (section 4.7).
async fn bridge(
    ws_tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    ws_rx: &mut futures_util::stream::SplitStream<WebSocket>,
    pty: &mut PtyHandle,
    pty_rx: &mut mpsc::Receiver<PtyEvent>,
    server: &SharedServer,
) {
    loop {
        tokio::select! {
            event = pty_rx.recv() => {
                match event {
                    Some(PtyEvent::Chunk(bytes)) => {
                        let framed = protocol::encode_output(&bytes);
                        if ws_tx.send(Message::Binary(Bytes::from(framed))).await.is_err() {
                            return;
                        }
                    }
                    Some(PtyEvent::Closed(Ok(()))) | None => {
                        close_with(ws_tx, CloseReason::Normal).await;
                        return;
                    }
                    Some(PtyEvent::Closed(Err(e))) => {
                        warn!(error = %e, "pty read failed");
                        close_with(ws_tx, CloseReason::UnexpectedCondition).await;
                        return;
                    }
                }
            }
            msg = ws_rx.next() => {
                let Some(msg) = msg else { return };
                let msg = match msg {
                    Ok(m) => m,
                    Err(_) => return,
                };
                let frame = match msg {
                    Message::Binary(b) => b.to_vec(),
                    Message::Text(t) => t.as_bytes().to_vec(),
                    Message::Close(_) => return,
                    Message::Ping(_) | Message::Pong(_) => continue,
                };
                match protocol::decode_inbound(&frame) {
                    Ok(Inbound::Input(data)) => {
                        if server.config.readonly {
                            continue;
                        }
                        if let Err(e) = pty.write(&data) {
                            warn!(error = %e, "write INPUT to pty failed");
                            close_with(ws_tx, CloseReason::UnexpectedCondition).await;
                            return;
                        }
                    }
                    Ok(Inbound::Resize(size)) => {
                        pty.resize(size);
                    }
                    Ok(Inbound::JsonData(_)) => {
                        debug!("ignoring JSON_DATA after the pty has already spawned");
                    }
                    Err(e) => {
                        debug!(error = %e, "dropping malformed frame during bridging");
                    }
                }
            }
        }
    }
}

async fn close_with(ws_tx: &mut futures_util::stream::SplitSink<WebSocket, Message>, reason: CloseReason) {
    let frame = CloseFrame {
        code: reason.code(),
        reason: "".into(),
    };
    let _ = ws_tx.send(Message::Close(Some(frame))).await;
}
