//! Process entrypoint: wires `Config`, boots the `Server` aggregate
//! (§9 "global singletons -> explicit context"), and serves the C6
//! WebSocket endpoint plus the handful of HTTP surfaces the spec names
//! (§6 "HTTP surface"). Grounded on the Zobbo reference backend's
//! `main` (tracing init, `CorsLayer`, `axum::serve`), generalized from
//! its single-room server to the multi-table `Server`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use reem_table_server::config::Config;
use reem_table_server::session::{self, Server};

#[derive(Debug, Deserialize)]
struct ValidateStateRequest {
    hash: String,
}

#[derive(Debug, Serialize)]
struct ValidateStateResponse {
    valid: bool,
}

async fn healthz() -> &'static str {
    "ok"
}

/// `POST /tables/:id/validate-state` (§6): the one mandatory HTTP
/// surface, used by clients to reconcile a suspect hash out-of-band
/// from the websocket.
async fn validate_state(
    State(server): State<Arc<Server>>,
    Path(table_id): Path<String>,
    Json(body): Json<ValidateStateRequest>,
) -> impl IntoResponse {
    let Some(table) = server.table(&table_id) else {
        return (axum::http::StatusCode::NOT_FOUND, Json(ValidateStateResponse { valid: false }));
    };
    let valid = table.verify_state(&body.hash).await;
    (axum::http::StatusCode::OK, Json(ValidateStateResponse { valid }))
}

async fn list_tables(State(server): State<Arc<Server>>) -> Json<Vec<session::protocol::TableSummary>> {
    let mut summaries = Vec::new();
    for entry in server.tables.iter() {
        summaries.push(entry.value().table_summary().await);
    }
    Json(summaries)
}

fn build_cors(config: &Config) -> CorsLayer {
    if config.allowed_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any);
    }
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

/// Ad-hoc `Result` propagation in `main` itself uses `anyhow`, the way
/// the Zobbo reference backend's own `main` does; it never crosses into
/// library code, where every C1-C6 boundary returns a typed error.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    let bind_addr = config.bind_addr.clone();
    let cors = build_cors(&config);

    let server = Server::new(config);

    tokio::spawn(Arc::clone(&server).run_matchmaker_loop());
    tokio::spawn(Arc::clone(&server).run_queue_sweep_loop());

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/tables", get(list_tables))
        .route("/tables/:id/validate-state", axum::routing::post(validate_state))
        .route("/ws", get(session::connection::ws_handler))
        .with_state(server)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = bind_addr
        .parse()
        .with_context(|| format!("BIND_ADDR {bind_addr:?} is not a valid socket address"))?;
    tracing::info!(%addr, "starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
