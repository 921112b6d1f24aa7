//! Scripted transport and page helpers shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{Map, Value};

use clayo_widget::transport::{
    AnalyticsEvent, ByteStream, ChatTransport, Endpoints, MessageRequest, SessionInfo,
    SessionRequest,
};
use clayo_widget::{Document, HostPage, Result, WidgetError, WidgetHandle, load};

/// What the next message request returns.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Body delivered as these network reads, then closed.
    Reads(Vec<String>),
    /// Body delivered as these reads, then left open forever.
    Hang(Vec<String>),
    /// The request itself fails.
    Fail(String),
}

impl Reply {
    /// Well-formed reply: one `chunk` frame per piece, then `complete`.
    pub fn chunks(pieces: &[&str]) -> Self {
        let mut reads: Vec<String> = pieces.iter().map(|p| chunk_frame(p)).collect();
        reads.push(complete_frame());
        Self::Reads(reads)
    }
}

pub fn chunk_frame(content: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({ "type": "chunk", "content": content })
    )
}

pub fn complete_frame() -> String {
    "data: {\"type\":\"complete\"}\n\n".to_string()
}

pub fn error_frame(error: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({ "type": "error", "error": error })
    )
}

#[derive(Debug, Default)]
pub struct ScriptedTransport {
    pub session_calls: AtomicUsize,
    pub message_calls: AtomicUsize,
    pub config_calls: AtomicUsize,
    session_failures: AtomicUsize,
    session_delay: Duration,
    replies: Mutex<VecDeque<Reply>>,
    remote_config: Option<Map<String, Value>>,
    requests: Mutex<Vec<MessageRequest>>,
    beacons: Mutex<Vec<AnalyticsEvent>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, reply: Reply) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    /// Fail the first `n` session requests.
    pub fn failing_sessions(self, n: usize) -> Self {
        self.session_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn session_delay(mut self, delay: Duration) -> Self {
        self.session_delay = delay;
        self
    }

    /// Serve this remote config; without it the config route fails.
    pub fn remote_config(mut self, config: Map<String, Value>) -> Self {
        self.remote_config = Some(config);
        self
    }

    pub fn sessions(&self) -> usize {
        self.session_calls.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> usize {
        self.message_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<MessageRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn beacons(&self) -> Vec<String> {
        self.beacons
            .lock()
            .unwrap()
            .iter()
            .map(|b| b.event.clone())
            .collect()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn create_session(&self, _: &Endpoints, req: &SessionRequest) -> Result<SessionInfo> {
        let n = self.session_calls.fetch_add(1, Ordering::SeqCst);
        if !self.session_delay.is_zero() {
            tokio::time::sleep(self.session_delay).await;
        }
        let failing = self.session_failures.load(Ordering::SeqCst);
        if failing > 0 {
            self.session_failures.store(failing - 1, Ordering::SeqCst);
            return Err(WidgetError::Network("connection refused".to_string()));
        }
        Ok(SessionInfo {
            id: format!("{}-session-{n}", req.organization_id),
        })
    }

    async fn send_message(&self, _: &Endpoints, req: &MessageRequest) -> Result<ByteStream> {
        self.message_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(req.clone());

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::chunks(&["ok"]));
        let reads = |reads: Vec<String>| {
            futures::stream::iter(
                reads
                    .into_iter()
                    .map(|r| Ok::<Bytes, WidgetError>(Bytes::from(r))),
            )
        };
        let body: ByteStream = match reply {
            Reply::Reads(r) => Box::pin(reads(r)),
            Reply::Hang(r) => Box::pin(reads(r).chain(futures::stream::pending())),
            Reply::Fail(e) => return Err(WidgetError::Network(e)),
        };
        Ok(body)
    }

    async fn fetch_config(&self, _: &Endpoints, _: &str) -> Result<Map<String, Value>> {
        self.config_calls.fetch_add(1, Ordering::SeqCst);
        self.remote_config
            .clone()
            .ok_or_else(|| WidgetError::Network("config route unavailable".to_string()))
    }

    async fn track(&self, _: &Endpoints, event: &AnalyticsEvent) -> Result<()> {
        self.beacons.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected a JSON object"),
    }
}

/// Globals of a typical host page.
pub fn acme_globals() -> Map<String, Value> {
    object(serde_json::json!({
        "organizationId": "acme",
        "companyName": "Acme Shipping",
        "agentName": "Ava"
    }))
}

pub fn page(globals: Map<String, Value>) -> (HostPage, Arc<Document>) {
    let doc = Arc::new(Document::new());
    let page = HostPage::new(globals, "https://acme.example/support", doc.clone());
    (page, doc)
}

/// Load a widget for `acme` and open it.
pub async fn open_widget(
    transport: ScriptedTransport,
) -> (Arc<ScriptedTransport>, Arc<Document>, WidgetHandle) {
    let transport = Arc::new(transport);
    let (page, doc) = page(acme_globals());
    let widget = load(&page, transport.clone()).await.expect("widget loads");
    widget.open().await.expect("session created");
    (transport, doc, widget)
}

/// Let spawned background tasks (analytics) run.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
