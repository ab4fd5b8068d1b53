use crate::tally_logic::render::render_summary;
use crate::tally_logic::state::AppState;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use lib_tally::core::{AggregationView, ClientId, Notification, TouchMessage, current_notification};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use tokio::sync::broadcast;

const TEXT_PLAIN: &str = "text/plain; charset=UTF-8";
const APPLICATION_JSON: &str = "application/json";

pub async fn run(port: u16, app_state: AppState, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("Downstream server listening on {}", addr);

    axum::serve(listener, router(app_state))
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            log::info!("Downstream server shutting down.");
        })
        .await?;

    Ok(())
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/now.txt", get(now_txt_handler))
        .route("/api.txt", get(api_txt_handler))
        .route("/health", get(health_handler))
        .fallback(fallback_handler)
        .with_state(app_state)
}

/// Command-line clients get the text summary wherever they point.
fn is_text_client(headers: &HeaderMap) -> bool {
    headers
        .get(header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .is_some_and(|ua| ua.contains("curl") || ua.contains("Wget"))
}

/// Strong ETag: quoted SHA-256 hex of the body.
pub fn etag_for(body: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Sha256::digest(body)))
}

fn matches_etag(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == etag)
}

fn cached_response(headers: &HeaderMap, content_type: &'static str, body: String) -> Response {
    let etag = etag_for(body.as_bytes());
    let Ok(etag_value) = HeaderValue::from_str(&etag) else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "invalid etag").into_response();
    };

    if matches_etag(headers, &etag) {
        return (
            StatusCode::NOT_MODIFIED,
            [(header::CONTENT_TYPE, HeaderValue::from_static(content_type)), (header::ETAG, etag_value)],
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static(content_type)), (header::ETAG, etag_value)],
        body,
    )
        .into_response()
}

fn current_view(state: &AppState) -> Result<AggregationView, Response> {
    let Some(snapshot) = state.store.current() else {
        return Err((StatusCode::SERVICE_UNAVAILABLE, [(header::CONTENT_TYPE, TEXT_PLAIN)], "no results yet").into_response());
    };

    AggregationView::from_snapshot(&snapshot, Utc::now()).map_err(|e| {
        log::error!("failed to project snapshot: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

async fn root_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if let Ok(ws) = ws {
        return ws.on_upgrade(move |socket| handle_socket(socket, state));
    }
    if is_text_client(&headers) {
        return now_txt(&state);
    }

    let view = match current_view(&state) {
        Ok(view) => view,
        Err(response) => return response,
    };
    match serde_json::to_string(&view) {
        Ok(body) => cached_response(&headers, APPLICATION_JSON, body),
        Err(e) => {
            log::error!("failed to encode aggregation: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn now_txt(state: &AppState) -> Response {
    match current_view(state) {
        Ok(view) => ([(header::CONTENT_TYPE, TEXT_PLAIN)], render_summary(&view, Utc::now())).into_response(),
        Err(response) => response,
    }
}

async fn now_txt_handler(State(state): State<AppState>) -> Response {
    now_txt(&state)
}

async fn api_txt_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match tokio::fs::read_to_string(state.api_doc_path.as_path()).await {
        Ok(body) => cached_response(&headers, TEXT_PLAIN, body),
        Err(e) => {
            log::warn!("cannot read {}: {}", state.api_doc_path.display(), e);
            (StatusCode::NOT_FOUND, "404").into_response()
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn fallback_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if is_text_client(&headers) {
        return now_txt(&state);
    }
    (StatusCode::NOT_FOUND, "404").into_response()
}

/// Relays a touch from `origin` to every other subscriber. Returns how many
/// received it, `None` if the message was discarded.
pub fn relay_touch(state: &AppState, origin: &ClientId, text: &str) -> Option<usize> {
    let touch = match TouchMessage::parse(text) {
        Ok(touch) => touch,
        Err(e) => {
            log::warn!("malformed touch by {}, discarding: {}", origin, e);
            return None;
        }
    };

    match Notification::touch(touch, &state.calendar, Utc::now()).to_payload() {
        Ok(payload) => Some(state.registry.broadcast(payload, &[*origin])),
        Err(e) => {
            log::error!("failed to encode touch by {}: {}", origin, e);
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, mut outbound) = state.registry.register();
    log::info!("Client {} connected", client_id);

    match current_notification(&state.calendar, &state.store, Utc::now()).and_then(|n| n.to_payload()) {
        Ok(payload) => {
            if let Err(e) = state.registry.send_to(&client_id, payload) {
                log::warn!("initial notification for {} not sent: {}", client_id, e);
            }
        }
        Err(e) => log::error!("failed to build initial notification for {}: {}", client_id, e),
    }

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            if sink.send(Message::Text(payload.to_string().into())).await.is_err() {
                break; // client disconnected
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut writer => {
                break;
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        log::debug!("receiving message from {}", client_id);
                        relay_touch(&state, &client_id, text.as_str());
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::error!("Client {} errored out: {}", client_id, e);
                        break;
                    }
                }
            }
        }
    }

    state.registry.remove(&client_id);
    writer.abort();
    log::info!("Client {} disconnected", client_id);
}
