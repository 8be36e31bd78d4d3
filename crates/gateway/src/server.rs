use std::{future::Future, net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::{ConnectInfo, State, WebSocketUpgrade},
        response::{IntoResponse, Json},
        routing::get,
    },
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::info,
};

use commbridge_protocol::PROTOCOL_VERSION;

use crate::{channel::ChannelManager, ws::handle_connection};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ChannelManager>,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the bridge router (shared between production startup and tests).
pub fn build_app(manager: Arc<ChannelManager>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/channels", get(channels_handler))
        .route("/ws", get(ws_upgrade_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { manager })
}

/// Serve HTTP + WebSocket until `shutdown` resolves, then close every channel.
pub async fn serve(
    listener: tokio::net::TcpListener,
    manager: Arc<ChannelManager>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_app(Arc::clone(&manager));
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    manager.teardown().await;
    Ok(())
}

/// Bind `bind:port` and serve until `shutdown` resolves.
pub async fn start_server(
    bind: &str,
    port: u16,
    manager: Arc<ChannelManager>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((bind, port)).await?;
    let addr = listener.local_addr()?;
    info!(
        %addr,
        version = %manager.state().version,
        actions = ?manager.registry().action_names(),
        "commbridge listening"
    );
    serve(listener, manager, shutdown).await
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let count = state.manager.channel_count().await;
    Json(serde_json::json!({
        "status": "ok",
        "version": state.manager.state().version,
        "protocol": PROTOCOL_VERSION,
        "uptimeMs": state.manager.state().uptime_ms(),
        "channels": count,
    }))
}

async fn channels_handler(State(state): State<AppState>) -> impl IntoResponse {
    let channels: Vec<_> = state
        .manager
        .list()
        .await
        .into_iter()
        .map(|c| {
            serde_json::json!({
                "commId": c.id,
                "targetName": c.target_name,
                "connId": c.conn_id,
                "openForSecs": c.open_for.as_secs(),
            })
        })
        .collect();
    Json(serde_json::json!({ "channels": channels }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state.manager, addr))
}
