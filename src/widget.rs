//! Widget controller and its public handle.
//!
//! [`Widget`] owns every piece of mutable widget state: config, UI state,
//! the message log, the session and the send pipeline. The render functions
//! only read snapshots of it. [`WidgetHandle`] is the cheap, cloneable
//! handle a host uses to drive the widget (`open`, `close`, `toggle`,
//! `sendMessage`, `updateConfig`, `getVersion`).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use futures::StreamExt;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::analytics;
use crate::config::WidgetConfig;
use crate::error::{Result, WidgetError};
use crate::message::{Message, MessageLog};
use crate::pipeline::{Pipeline, PipelineStatus, SendGuard};
use crate::render::{UiState, render_message, render_message_list, render_widget};
use crate::session::{SessionManager, duration_ms};
use crate::sse::{SseDecoder, StreamEvent};
use crate::surface::Surface;
use crate::transport::{ByteStream, ChatTransport, Endpoints, MessageRequest};

/// Shown when no session could be created for a send.
pub const SESSION_ERROR_TEXT: &str =
    "No active chat session. Please try again in a moment.";

/// Shown when the message request itself failed.
pub const NETWORK_ERROR_TEXT: &str =
    "Sorry, I'm having trouble connecting right now. Please try again.";

/// Shown when a reply stream stalled or ended early with nothing in it.
pub const INTERRUPTED_TEXT: &str = "Sorry, the response was interrupted. Please try again.";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Whether a reply stream should keep being read.
enum Flow {
    Continue,
    Complete,
}

/// Widget state and behaviour.
#[derive(Debug)]
pub struct Widget {
    config: RwLock<WidgetConfig>,
    ui: Mutex<UiState>,
    messages: Mutex<MessageLog>,
    sessions: SessionManager,
    pipeline: Pipeline,
    transport: Arc<dyn ChatTransport>,
    surface: Arc<dyn Surface>,
    page_url: String,
    active_stream: Mutex<Option<CancellationToken>>,
}

impl Widget {
    pub fn new(
        config: WidgetConfig,
        transport: Arc<dyn ChatTransport>,
        surface: Arc<dyn Surface>,
        page_url: impl Into<String>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            ui: Mutex::new(UiState::closed()),
            messages: Mutex::new(MessageLog::new()),
            sessions: SessionManager::new(Arc::clone(&transport)),
            pipeline: Pipeline::new(),
            transport,
            surface,
            page_url: page_url.into(),
            active_stream: Mutex::new(None),
        }
    }

    fn config(&self) -> WidgetConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn ui(&self) -> UiState {
        *lock(&self.ui)
    }

    fn update_ui(&self, f: impl FnOnce(&mut UiState)) -> UiState {
        let mut ui = lock(&self.ui);
        f(&mut ui);
        *ui
    }

    fn markup(&self) -> String {
        let config = self.config();
        let ui = self.ui();
        let messages = lock(&self.messages);
        render_widget(&config, &ui, messages.messages())
    }

    fn mount(&self) {
        self.surface.mount(&self.markup());
    }

    fn repaint(&self) {
        self.surface.repaint(&self.markup());
        self.surface.scroll_to_bottom();
    }

    fn repaint_messages(&self) {
        let config = self.config();
        let html = {
            let messages = lock(&self.messages);
            render_message_list(&config, messages.messages())
        };
        self.surface.repaint_messages(&html);
        self.surface.scroll_to_bottom();
    }

    fn set_input_enabled(&self, enabled: bool) {
        self.update_ui(|ui| ui.input_enabled = enabled);
        self.surface.set_input_enabled(enabled);
    }

    /// Append a finished message and paint just that bubble.
    fn append(&self, message: Message) {
        let config = self.config();
        let appended = lock(&self.messages).push(message).cloned();
        match appended {
            Some(message) => {
                self.surface
                    .append_message(&message, &render_message(&config, &message));
                self.surface.scroll_to_bottom();
            }
            None => tracing::warn!("Message dropped while a reply is streaming"),
        }
    }

    fn begin_reply(&self) -> Option<Message> {
        let config = self.config();
        let placeholder = lock(&self.messages).begin_bot_message().cloned()?;
        self.surface
            .append_message(&placeholder, &render_message(&config, &placeholder));
        self.surface.scroll_to_bottom();
        Some(placeholder)
    }

    /// Re-render the in-flight bubble after it changed.
    fn patch(&self, message: &Message) {
        let config = self.config();
        self.surface
            .patch_message(message, &render_message(&config, message));
        self.surface.scroll_to_bottom();
    }

    fn apply(&self, event: StreamEvent) -> Result<Flow> {
        match event {
            StreamEvent::Chunk { content } => {
                if content.is_empty() {
                    return Ok(Flow::Continue);
                }
                let updated = lock(&self.messages).append_chunk(&content).cloned();
                if let Some(message) = updated {
                    self.patch(&message);
                }
                Ok(Flow::Continue)
            }
            StreamEvent::Complete => Ok(Flow::Complete),
            StreamEvent::Error { error } => Err(WidgetError::Stream(error)),
        }
    }

    fn finish_reply(&self, outcome: &Result<()>) {
        if let Err(WidgetError::Cancelled) = outcome {
            let (removed, last) = {
                let mut messages = lock(&self.messages);
                let removed = messages.abandon_in_flight();
                (removed, messages.messages().last().cloned())
            };
            if removed {
                self.repaint_messages();
            } else if let Some(message) = last {
                self.patch(&message);
            }
            return;
        }

        let finished = {
            let mut messages = lock(&self.messages);
            match outcome {
                Ok(()) => messages.finish_in_flight().cloned(),
                Err(WidgetError::Stream(error)) => messages
                    .fail_in_flight(&format!("Sorry, I encountered an error: {error}"))
                    .cloned(),
                Err(e) if e.is_network() => messages.fail_in_flight(NETWORK_ERROR_TEXT).cloned(),
                Err(_) => messages.fail_in_flight(INTERRUPTED_TEXT).cloned(),
            }
        };
        if let Some(message) = finished {
            self.patch(&message);
        }
    }

    /// Read the reply body until `complete`, an error, a stall or cancellation.
    async fn consume(
        &self,
        mut body: ByteStream,
        idle: std::time::Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut decoder = SseDecoder::new();
        loop {
            let read = tokio::select! {
                () = cancel.cancelled() => return Err(WidgetError::Cancelled),
                read = tokio::time::timeout(idle, body.next()) => read,
            };

            let events = match read {
                Err(_) => {
                    return Err(WidgetError::Interrupted(format!(
                        "no data received for {} ms",
                        duration_ms(idle)
                    )));
                }
                Ok(Some(Err(e))) => return Err(e),
                Ok(Some(Ok(bytes))) => decoder.push(&bytes),
                Ok(None) => {
                    if let Some(event) = decoder.finish()
                        && let Flow::Complete = self.apply(event)?
                    {
                        return Ok(());
                    }
                    tracing::warn!(
                        skipped_frames = decoder.skipped(),
                        last_skip = ?decoder.last_error(),
                        "Reply stream ended without a complete frame"
                    );
                    return Err(WidgetError::Interrupted(
                        "stream ended before completion".to_string(),
                    ));
                }
            };

            for event in events {
                if let Flow::Complete = self.apply(event)? {
                    return Ok(());
                }
            }
        }
    }

    async fn deliver(
        &self,
        guard: &SendGuard,
        config: &WidgetConfig,
        session_id: String,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let endpoints = Endpoints::from_config(config)?;
        let req = MessageRequest {
            message: text.to_string(),
            session_id,
            agent_id: config.agent_id.clone(),
            organization_id: config.organization_id.clone(),
        };

        let timeout = config.request_timeout();
        let body = tokio::select! {
            () = cancel.cancelled() => return Err(WidgetError::Cancelled),
            sent = tokio::time::timeout(timeout, self.transport.send_message(&endpoints, &req)) => {
                match sent {
                    Ok(body) => body?,
                    Err(_) => return Err(WidgetError::Timeout(duration_ms(timeout))),
                }
            }
        };

        guard.advance(PipelineStatus::Streaming);
        self.consume(body, config.stream_idle_timeout(), cancel).await
    }

    fn cancel_stream(&self) {
        if let Some(token) = lock(&self.active_stream).take() {
            tracing::debug!("Cancelling active reply stream");
            token.cancel();
        }
    }
}

/// Host-facing handle to a loaded widget.
#[derive(Debug, Clone)]
pub struct WidgetHandle {
    inner: Arc<Widget>,
}

impl WidgetHandle {
    pub fn new(widget: Widget) -> Self {
        Self {
            inner: Arc::new(widget),
        }
    }

    /// Insert the widget into its surface for the first time.
    pub(crate) fn mount(&self) {
        self.inner.mount();
    }

    #[must_use]
    pub fn get_version(&self) -> &'static str {
        analytics::VERSION
    }

    #[must_use]
    pub fn config(&self) -> WidgetConfig {
        self.inner.config()
    }

    #[must_use]
    pub fn ui_state(&self) -> UiState {
        self.inner.ui()
    }

    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        self.inner.pipeline.status()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.inner.messages).messages().to_vec()
    }

    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.inner.sessions.session_id()
    }

    /// Open the panel and make sure a session exists.
    ///
    /// The panel opens even when session creation fails; the next send
    /// retries it.
    pub async fn open(&self) -> Result<()> {
        let w = &self.inner;
        let before = w.ui();
        if before.is_open && !before.is_minimized {
            return Ok(());
        }
        w.update_ui(|ui| {
            ui.is_open = true;
            ui.is_minimized = false;
        });
        w.repaint();

        let config = w.config();
        if let Ok(endpoints) = Endpoints::from_config(&config) {
            analytics::track(
                &w.transport,
                endpoints,
                analytics::event("widget_opened", config.organization(), &w.page_url),
            );
        }

        if w.sessions.has_session() {
            return Ok(());
        }
        w.sessions.ensure_session(&config).await?;
        w.update_ui(|ui| ui.has_active_session = true);
        w.repaint();
        Ok(())
    }

    /// Collapse to the toggle button; cancels a reply that is streaming.
    pub fn close(&self) {
        let w = &self.inner;
        w.cancel_stream();
        if !w.ui().is_open {
            return;
        }
        w.update_ui(|ui| {
            ui.is_open = false;
            ui.is_minimized = false;
        });
        w.repaint();
    }

    pub async fn toggle(&self) -> Result<()> {
        if self.inner.ui().is_open {
            self.close();
            Ok(())
        } else {
            self.open().await
        }
    }

    /// Shrink the open panel to its header.
    pub fn minimize(&self) {
        let w = &self.inner;
        if !w.ui().is_open {
            return;
        }
        w.update_ui(|ui| ui.is_minimized = true);
        w.repaint();
    }

    pub fn restore(&self) {
        let w = &self.inner;
        if !w.ui().is_minimized {
            return;
        }
        w.update_ui(|ui| ui.is_minimized = false);
        w.repaint();
    }

    /// Send a visitor message and stream the reply into the message list.
    ///
    /// Empty input is rejected without touching the network. A second call
    /// while a reply is still in flight fails with [`WidgetError::Busy`].
    /// Every other failure also leaves a bot bubble explaining it.
    pub async fn send_message(&self, content: &str) -> Result<()> {
        let text = content.trim();
        if text.is_empty() {
            return Err(WidgetError::EmptyMessage);
        }

        let w = &self.inner;
        let first = if w.sessions.has_session() {
            PipelineStatus::Sending
        } else {
            PipelineStatus::AwaitingSession
        };
        let guard = SendGuard::claim(&w.pipeline, first)?;
        let config = w.config();

        let cancel = CancellationToken::new();
        *lock(&w.active_stream) = Some(cancel.clone());

        let session = tokio::select! {
            () = cancel.cancelled() => Err(WidgetError::Cancelled),
            session = w.sessions.ensure_session(&config) => session,
        };
        let session_id = match session {
            Ok(id) => id,
            Err(WidgetError::Cancelled) => {
                tracing::info!("Send cancelled while waiting for a session");
                return Err(WidgetError::Cancelled);
            }
            Err(e) => {
                lock(&w.active_stream).take();
                tracing::error!(error = %e, "Cannot send without a chat session");
                guard.advance(PipelineStatus::Error);
                w.append(Message::bot(SESSION_ERROR_TEXT));
                return Err(WidgetError::Session);
            }
        };
        if !w.ui().has_active_session {
            w.update_ui(|ui| ui.has_active_session = true);
            w.repaint();
        }
        if first == PipelineStatus::AwaitingSession {
            guard.advance(PipelineStatus::Sending);
        }

        w.append(Message::user(text));
        w.surface.clear_input();
        w.set_input_enabled(false);
        let Some(placeholder) = w.begin_reply() else {
            lock(&w.active_stream).take();
            w.set_input_enabled(true);
            return Err(WidgetError::Busy);
        };

        tracing::info!(
            session_id = %session_id,
            message_id = %placeholder.id,
            message_length = text.len(),
            "Sending chat message"
        );
        let outcome = w.deliver(&guard, &config, session_id, text, &cancel).await;
        lock(&w.active_stream).take();

        match &outcome {
            Ok(()) => tracing::info!(message_id = %placeholder.id, "Reply complete"),
            Err(WidgetError::Cancelled) => {
                tracing::info!(message_id = %placeholder.id, "Reply cancelled");
            }
            Err(e) => {
                tracing::warn!(message_id = %placeholder.id, error = %e, "Reply failed");
                guard.advance(PipelineStatus::Error);
            }
        }
        w.finish_reply(&outcome);
        w.set_input_enabled(true);
        drop(guard);
        outcome
    }

    /// Merge `partial` into the live config and repaint.
    pub fn update_config(&self, partial: &Map<String, Value>) -> Result<()> {
        let w = &self.inner;
        let merged = w.config().merge(partial)?;
        merged.validate()?;
        *w.config.write().unwrap_or_else(PoisonError::into_inner) = merged;
        w.repaint();
        Ok(())
    }

    /// Clear the conversation and forget the session, without telling the
    /// backend.
    pub fn reset_chat(&self) {
        let w = &self.inner;
        w.cancel_stream();
        lock(&w.messages).clear();
        w.sessions.reset();
        w.update_ui(|ui| ui.has_active_session = false);
        w.repaint();
    }

    /// Open after the configured delay if `autoOpen` is set.
    pub fn schedule_auto_open(&self) {
        let config = self.inner.config();
        if !config.auto_open {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let handle = self.clone();
        let delay = std::time::Duration::from_millis(config.auto_open_delay);
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if !handle.ui_state().is_open
                && let Err(e) = handle.open().await
            {
                tracing::warn!(error = %e, "Auto-open could not create a session");
            }
        });
    }

    /// Page teardown: stop any reply that is still streaming.
    pub fn unload(&self) {
        self.inner.cancel_stream();
    }
}
