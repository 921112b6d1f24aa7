//! Lazy backend session.
//!
//! A widget holds at most one session id for the lifetime of the page. It is
//! created on first open (or first send) and reused for every later message.
//! Creation is serialized: callers that arrive while a request is in flight
//! wait for it and reuse its result instead of issuing their own.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::WidgetConfig;
use crate::error::{Result, WidgetError};
use crate::transport::{ChatTransport, Endpoints, SessionRequest};

/// Owns the cached session id.
#[derive(Debug)]
pub struct SessionManager {
    transport: Arc<dyn ChatTransport>,
    id: RwLock<Option<String>>,
    creating: Mutex<()>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            transport,
            id: RwLock::new(None),
            creating: Mutex::new(()),
        }
    }

    /// Cached session id, if one exists.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn has_session(&self) -> bool {
        self.session_id().is_some()
    }

    /// Return the cached session id, creating a session if there is none.
    ///
    /// On failure nothing is cached, so the next call tries again.
    pub async fn ensure_session(&self, config: &WidgetConfig) -> Result<String> {
        if let Some(id) = self.session_id() {
            return Ok(id);
        }

        let _creating = self.creating.lock().await;
        // Another caller may have finished while we waited.
        if let Some(id) = self.session_id() {
            return Ok(id);
        }

        let endpoints = Endpoints::from_config(config)?;
        let req = SessionRequest {
            organization_id: config.organization().to_string(),
            agent_id: config.agent_id.clone().filter(|a| !a.trim().is_empty()),
        };

        let timeout = config.request_timeout();
        let session = match tokio::time::timeout(
            timeout,
            self.transport.create_session(&endpoints, &req),
        )
        .await
        {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                tracing::warn!(
                    organization_id = %req.organization_id,
                    error = %e,
                    "Failed to create chat session"
                );
                return Err(e);
            }
            Err(_) => {
                tracing::warn!(
                    organization_id = %req.organization_id,
                    timeout_ms = duration_ms(timeout),
                    "Chat session creation timed out"
                );
                return Err(WidgetError::Timeout(duration_ms(timeout)));
            }
        };

        tracing::info!(session_id = %session.id, "Chat session created");
        *self.id.write().unwrap_or_else(PoisonError::into_inner) = Some(session.id.clone());
        Ok(session.id)
    }

    /// Forget the session locally; the backend is not notified.
    pub fn reset(&self) {
        let previous = self
            .id
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = previous {
            tracing::debug!(session_id = %id, "Chat session reset");
        }
    }
}

pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{AnalyticsEvent, ByteStream, MessageRequest, SessionInfo};
    use serde_json::{Map, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingTransport {
        calls: AtomicUsize,
        fail_first: bool,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl ChatTransport for CountingTransport {
        async fn create_session(&self, _: &Endpoints, req: &SessionRequest) -> Result<SessionInfo> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail_first && n == 0 {
                return Err(WidgetError::Network("connection refused".to_string()));
            }
            Ok(SessionInfo {
                id: format!("{}-{n}", req.organization_id),
            })
        }

        async fn send_message(&self, _: &Endpoints, _: &MessageRequest) -> Result<ByteStream> {
            unreachable!("not used")
        }

        async fn fetch_config(&self, _: &Endpoints, _: &str) -> Result<Map<String, Value>> {
            Ok(Map::new())
        }

        async fn track(&self, _: &Endpoints, _: &AnalyticsEvent) -> Result<()> {
            Ok(())
        }
    }

    fn config() -> WidgetConfig {
        WidgetConfig {
            organization_id: Some("acme".to_string()),
            ..WidgetConfig::default()
        }
    }

    #[tokio::test]
    async fn test_session_is_reused() {
        let transport = Arc::new(CountingTransport::default());
        let sessions = SessionManager::new(transport.clone());

        let first = sessions.ensure_session(&config()).await.unwrap();
        let second = sessions.ensure_session(&config()).await.unwrap();

        assert_eq!(first, "acme-0");
        assert_eq!(first, second);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_request() {
        let transport = Arc::new(CountingTransport {
            delay: Duration::from_millis(20),
            ..CountingTransport::default()
        });
        let sessions = SessionManager::new(transport.clone());
        let cfg = config();

        let (a, b, c) = tokio::join!(
            sessions.ensure_session(&cfg),
            sessions.ensure_session(&cfg),
            sessions.ensure_session(&cfg),
        );

        assert_eq!(a.unwrap(), "acme-0");
        assert_eq!(b.unwrap(), "acme-0");
        assert_eq!(c.unwrap(), "acme-0");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let transport = Arc::new(CountingTransport {
            fail_first: true,
            ..CountingTransport::default()
        });
        let sessions = SessionManager::new(transport.clone());

        assert!(sessions.ensure_session(&config()).await.is_err());
        assert!(!sessions.has_session());
        assert_eq!(sessions.ensure_session(&config()).await.unwrap(), "acme-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_creation_times_out() {
        let transport = Arc::new(CountingTransport {
            delay: Duration::from_secs(120),
            ..CountingTransport::default()
        });
        let sessions = SessionManager::new(transport);
        let cfg = WidgetConfig {
            request_timeout_ms: 1_000,
            ..config()
        };

        let err = sessions.ensure_session(&cfg).await.unwrap_err();
        assert!(matches!(err, WidgetError::Timeout(1_000)));
        assert!(!sessions.has_session());
    }

    #[tokio::test]
    async fn test_reset_forgets_session() {
        let transport = Arc::new(CountingTransport::default());
        let sessions = SessionManager::new(transport.clone());
        sessions.ensure_session(&config()).await.unwrap();

        sessions.reset();
        assert!(sessions.session_id().is_none());
        assert_eq!(sessions.ensure_session(&config()).await.unwrap(), "acme-1");
    }
}
