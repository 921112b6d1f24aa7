//! Reference backend for local development and integration tests.
//!
//! Implements the widget's wire contract: session creation on both route
//! styles, an SSE message endpoint that echoes the visitor's message back as
//! `chunk` frames followed by `complete`, the remote config route, the
//! analytics sink, and a demo page at `/`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::WidgetConfig;
use crate::render::{UiState, render_widget};
use crate::sse::{StreamEvent, encode_event};
use crate::transport::{AnalyticsEvent, MessageRequest, SessionRequest};

/// A chat session known to the dev backend.
#[derive(Debug, Clone)]
pub struct DevSession {
    pub organization_id: String,
    pub agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub messages: usize,
}

/// Shared state for the dev backend handlers.
#[derive(Debug, Clone)]
pub struct DevState {
    sessions: Arc<RwLock<HashMap<String, DevSession>>>,
    beacons: Arc<Mutex<Vec<AnalyticsEvent>>>,
    remote_config: Arc<Map<String, Value>>,
    demo: Arc<WidgetConfig>,
    chunk_delay: Duration,
}

impl DevState {
    #[must_use]
    pub fn new(demo: WidgetConfig) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            beacons: Arc::new(Mutex::new(Vec::new())),
            remote_config: Arc::new(Map::new()),
            demo: Arc::new(demo),
            chunk_delay: Duration::from_millis(30),
        }
    }

    /// Config served from `GET /widget/config`.
    #[must_use]
    pub fn with_remote_config(mut self, config: Map<String, Value>) -> Self {
        self.remote_config = Arc::new(config);
        self
    }

    /// Pause between reply chunks.
    #[must_use]
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    #[must_use]
    pub fn session(&self, id: &str) -> Option<DevSession> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Analytics events received so far.
    #[must_use]
    pub fn beacons(&self) -> Vec<AnalyticsEvent> {
        self.beacons
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Build the dev backend router.
pub fn router(state: DevState) -> Router {
    Router::new()
        .route("/", get(demo_page))
        .route("/widget/session", post(widget_session))
        .route("/api/public/chat/session", post(public_session))
        .route("/widget/message", post(message))
        .route("/api/public/chat/message", post(message))
        .route("/widget/config", get(remote_config))
        .route("/analytics/widget", post(analytics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

fn session_error(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": message })),
    )
        .into_response()
}

fn create_session(state: &DevState, req: SessionRequest) -> Response {
    if req.organization_id.trim().is_empty() {
        return session_error("organizationId is required");
    }

    let id = uuid::Uuid::new_v4().to_string();
    state
        .sessions
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(
            id.clone(),
            DevSession {
                organization_id: req.organization_id.clone(),
                agent_id: req.agent_id,
                created_at: Utc::now(),
                messages: 0,
            },
        );

    tracing::info!(
        name: "dev.session.created",
        session_id = %id,
        organization_id = %req.organization_id,
        "Session created"
    );
    Json(json!({
        "success": true,
        "session": { "id": id, "status": "active" }
    }))
    .into_response()
}

async fn widget_session(State(state): State<DevState>, Json(req): Json<SessionRequest>) -> Response {
    create_session(&state, req)
}

async fn public_session(State(state): State<DevState>, Json(req): Json<SessionRequest>) -> Response {
    if req.agent_id.as_deref().is_none_or(|a| a.trim().is_empty()) {
        return session_error("agentId is required");
    }
    create_session(&state, req)
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

fn build_sse_response(body: Body) -> Response {
    let mut resp = Response::new(body);
    let h = resp.headers_mut();
    h.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    h.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    h.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    h.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    resp
}

fn single_error_sse(message: &str) -> Response {
    let err = StreamEvent::Error {
        error: message.to_string(),
    };
    build_sse_response(Body::from(encode_event(&err)))
}

/// Split a reply into word-sized chunks, keeping the separators.
fn reply_chunks(reply: &str) -> Vec<String> {
    reply.split_inclusive(' ').map(str::to_string).collect()
}

async fn message(State(state): State<DevState>, Json(req): Json<MessageRequest>) -> Response {
    let known = {
        let mut sessions = state.sessions.write().unwrap_or_else(PoisonError::into_inner);
        match sessions.get_mut(&req.session_id) {
            Some(session) => {
                session.messages += 1;
                true
            }
            None => false,
        }
    };
    if !known {
        tracing::warn!(session_id = %req.session_id, "Message for unknown session");
        return single_error_sse("Session not found");
    }
    if req.message.trim().is_empty() {
        return single_error_sse("Message is empty");
    }

    tracing::info!(
        name: "dev.message.received",
        session_id = %req.session_id,
        message_length = req.message.len(),
        "Streaming echo reply"
    );

    let chunks = reply_chunks(&format!("You said: {}", req.message.trim()));
    let delay = state.chunk_delay;
    let sse_stream = async_stream::stream! {
        for content in chunks {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            yield Ok::<String, Infallible>(encode_event(&StreamEvent::Chunk { content }));
        }
        yield Ok::<String, Infallible>(encode_event(&StreamEvent::Complete));
    };

    build_sse_response(Body::from_stream(sse_stream))
}

// ─────────────────────────────────────────────────────────────────────────────
// Config, analytics, demo page
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigQuery {
    organization_id: Option<String>,
}

async fn remote_config(State(state): State<DevState>, Query(query): Query<ConfigQuery>) -> Response {
    let Some(organization_id) = query.organization_id.filter(|o| !o.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "organizationId is required" })),
        )
            .into_response();
    };
    tracing::debug!(organization_id = %organization_id, "Serving remote config");
    Json(json!({ "success": true, "config": state.remote_config.as_ref() })).into_response()
}

async fn analytics(State(state): State<DevState>, Json(event): Json<AnalyticsEvent>) -> StatusCode {
    tracing::info!(
        name: "dev.analytics",
        event = %event.event,
        organization_id = %event.organization_id,
        version = %event.version,
        "Analytics beacon"
    );
    state
        .beacons
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(event);
    StatusCode::NO_CONTENT
}

async fn demo_page(State(state): State<DevState>) -> impl IntoResponse {
    let ui = UiState {
        is_open: true,
        ..UiState::closed()
    };
    Html(demo_shell(
        &state.demo.company_name,
        &render_widget(&state.demo, &ui, &[]),
    ))
}

fn demo_shell(company: &str, widget: &str) -> String {
    let company = crate::render::escape_html(company);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{company} - Widget demo</title>
</head>
<body>
    <main>
        <h1>{company}</h1>
        <p>Host page content. The chat widget is rendered in the corner.</p>
    </main>
    {widget}
</body>
</html>"#
    )
}
