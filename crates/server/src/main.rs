use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use session::{GenerationController, SessionStore, SubmissionGate, WorldClock};
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{ClientRequest, ServerEvent, SessionSnapshot, SubmitRequest},
};
use skybox_client::BlockadeLabsClient;
use tokio::sync::mpsc;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod config;

use api::submit_prompt;
use app_state::AppState;
use config::load_settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings()?;
    let api_key = settings.require_api_key()?;
    let service = Arc::new(BlockadeLabsClient::new(
        settings.generation_base_url.clone(),
        api_key,
    ));

    let store = SessionStore::new();
    let controller =
        GenerationController::new(store.clone(), service, settings.workflow_config()).spawn();

    let state = AppState {
        store,
        gate: SubmissionGate::new(settings.cooldown_seconds),
        clock: Arc::new(WorldClock::start()),
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(
        %addr,
        base_url = %settings.generation_base_url,
        cooldown_seconds = settings.cooldown_seconds,
        "skybox server listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    controller.abort();
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/state", get(http_state))
        .route("/submit", post(http_submit))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn http_state(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    Json(state.store.snapshot())
}

async fn http_submit(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SessionSnapshot>), (StatusCode, Json<ApiError>)> {
    let Json(req) = body.map_err(|rejection| {
        let err = ApiError::new(
            ErrorCode::Validation,
            format!("invalid request: {}", rejection.body_text()),
        );
        (status_for(&err), Json(err))
    })?;
    let snapshot = submit_prompt(&state, req.prompt).map_err(|e| (status_for(&e), Json(e)))?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

fn status_for(err: &ApiError) -> StatusCode {
    match err.code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::Conflict => StatusCode::CONFLICT,
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let mut feed = WatchStream::new(state.store.subscribe());
    let (replies, mut replies_rx) = mpsc::channel::<ServerEvent>(16);

    let send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                Some(snapshot) = feed.next() => ServerEvent::StateChanged { snapshot },
                Some(event) = replies_rx.recv() => event,
                else => break,
            };
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(err) => {
                    warn!(%err, "failed to encode server event");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let reply = match serde_json::from_str::<ClientRequest>(&text) {
            Ok(ClientRequest::Submit { prompt }) => submit_prompt(&state, prompt).err(),
            Err(err) => Some(ApiError::new(
                ErrorCode::Validation,
                format!("invalid request: {err}"),
            )),
        };
        if let Some(err) = reply {
            if replies.send(ServerEvent::Error(err)).await.is_err() {
                break;
            }
        }
    }

    debug!("change feed connection closed");
    send_task.abort();
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
