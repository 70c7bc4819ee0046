//! The WebSocket connection handler (§4.6 "Authentication", §6 "Wire
//! protocol"). Grounded on the Zobbo reference backend's
//! `ws_handler`/`handle_socket` split: one task reads frames off the
//! socket, a second forwards an `mpsc` channel of outbound events back
//! to it, so a broadcast never blocks on a slow reader.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use once_cell::sync::Lazy;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::verify_token;

use super::protocol::{Inbound, Outbound};
use super::Server;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub token: String,
    #[serde(rename = "userId")]
    pub user_id: String,
}

const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub async fn ws_handler(
    State(server): State<Arc<Server>>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(server, socket, query))
}

/// Duplicate concurrent connections for the same user force-disconnect
/// the older one (§4.6 "Authentication"); tracked process-wide so a
/// reconnect from a second tab evicts the first.
static ACTIVE_CONNECTIONS: Lazy<DashMap<String, (Uuid, mpsc::UnboundedSender<Outbound>)>> =
    Lazy::new(DashMap::new);

fn evict_if_present(user_id: &str) {
    if let Some((_, (_, tx))) = ACTIVE_CONNECTIONS.remove(user_id) {
        let _ = tx.send(Outbound::Error {
            message: "replaced by a newer connection".to_string(),
        });
    }
}

fn register_active(user_id: &str, connection_id: Uuid, tx: mpsc::UnboundedSender<Outbound>) {
    ACTIVE_CONNECTIONS.insert(user_id.to_string(), (connection_id, tx));
}

fn clear_if_current(user_id: &str, connection_id: Uuid) {
    if let Some(entry) = ACTIVE_CONNECTIONS.get(user_id) {
        if entry.0 == connection_id {
            drop(entry);
            ACTIVE_CONNECTIONS.remove(user_id);
        }
    }
}

async fn handle_socket(server: Arc<Server>, socket: WebSocket, query: ConnectQuery) {
    if verify_token(&server.config.token_secret, &query.token, &query.user_id).is_err() {
        warn!(user_id = %query.user_id, "authentication failed, closing connection silently");
        return;
    }

    let connection_id = Uuid::new_v4();
    evict_if_present(&query.user_id);

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
    register_active(&query.user_id, connection_id, out_tx.clone());

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "failed to serialize outbound message");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let pinger_tx = out_tx.clone();
    let ping_interval = server.config.ping_interval;
    let pinger = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        loop {
            ticker.tick().await;
            if pinger_tx.send(Outbound::Ping).is_err() {
                break;
            }
        }
    });

    let mut current_table: Option<Arc<super::table::Table>> = None;
    let username = query.user_id.clone();

    loop {
        let frame = tokio::time::timeout(IDLE_TIMEOUT, ws_rx.next()).await;
        let Ok(Some(Ok(msg))) = frame else {
            break;
        };
        let Message::Text(text) = msg else {
            if matches!(msg, Message::Close(_)) {
                break;
            }
            continue;
        };
        let inbound: Inbound = match serde_json::from_str(&text) {
            Ok(i) => i,
            Err(e) => {
                let _ = out_tx.send(Outbound::Error {
                    message: format!("malformed message: {e}"),
                });
                continue;
            }
        };

        if let Err(e) = dispatch(&server, &mut current_table, &username, connection_id, &out_tx, inbound).await {
            let _ = out_tx.send(Outbound::Error { message: e.to_string() });
        }
    }

    pinger.abort();
    writer.abort();
    clear_if_current(&query.user_id, connection_id);
    if let Some(table) = current_table {
        table.disconnect(connection_id).await;
    }
    info!(user_id = %username, "connection closed");
}

async fn dispatch(
    server: &Arc<Server>,
    current_table: &mut Option<Arc<super::table::Table>>,
    username: &str,
    connection_id: Uuid,
    out_tx: &mpsc::UnboundedSender<Outbound>,
    inbound: Inbound,
) -> Result<(), crate::error::SessionError> {
    match inbound {
        Inbound::JoinQueue { stake } => {
            server.join_queue(stake, username).await?;
            let position = server.queue.position(stake, username).unwrap_or(0);
            let eta = server.queue.estimated_wait(stake, username).as_secs();
            let _ = out_tx.send(Outbound::QueueStatus {
                stake,
                position,
                eta_secs: eta,
            });
        }
        Inbound::LeaveQueue { stake } => {
            server.leave_queue(stake, username)?;
        }
        Inbound::JoinTable { table_id } => {
            let table = server
                .table(&table_id)
                .ok_or_else(|| crate::error::SessionError::UnknownTable(table_id.clone()))?;
            table.register_connection(connection_id, out_tx.clone());
            table.join_table(username, connection_id).await?;
            *current_table = Some(table);
        }
        Inbound::JoinSpectator { table_id } => {
            let table = server
                .table(&table_id)
                .ok_or_else(|| crate::error::SessionError::UnknownTable(table_id.clone()))?;
            table.register_connection(connection_id, out_tx.clone());
            table.join_spectator(username, connection_id).await;
            *current_table = Some(table);
        }
        Inbound::PlayerReady => {
            let table = current_table.as_ref().ok_or(crate::error::SessionError::NotASeat)?;
            table.player_ready(username).await?;
        }
        Inbound::GameAction { action, client_hash } => {
            let table = current_table.as_ref().ok_or(crate::error::SessionError::NotASeat)?;
            table.apply_player_action(username, connection_id, action, client_hash).await?;
        }
        Inbound::LeaveTable => {
            if let Some(table) = current_table.take() {
                table.leave(username).await?;
                table.unregister_connection(&connection_id);
            }
        }
        Inbound::RequestStateSync => {
            if let Some(table) = current_table.as_ref() {
                table.request_state_sync(connection_id).await;
            }
        }
        Inbound::VerifyState { hash } => {
            if let Some(table) = current_table.as_ref() {
                let ok = table.verify_state(&hash).await;
                if !ok {
                    let _ = out_tx.send(Outbound::Error {
                        message: "state hash mismatch".to_string(),
                    });
                }
            }
        }
        Inbound::ReconnectPlayer { table_id } => {
            let table = server
                .table(&table_id)
                .ok_or_else(|| crate::error::SessionError::UnknownTable(table_id.clone()))?;
            table.register_connection(connection_id, out_tx.clone());
            table.reconnect(username, connection_id).await?;
            *current_table = Some(table);
        }
        Inbound::Pong => {}
    }
    Ok(())
}
