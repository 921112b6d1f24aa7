//! Fire-and-forget usage beacon.

use std::sync::Arc;

use chrono::Utc;

use crate::transport::{AnalyticsEvent, ChatTransport, Endpoints};

/// Widget version reported by `getVersion()` and every beacon.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build a beacon payload.
pub fn event(name: &str, organization_id: &str, page_url: &str) -> AnalyticsEvent {
    AnalyticsEvent {
        event: name.to_string(),
        organization_id: organization_id.to_string(),
        url: page_url.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        version: VERSION.to_string(),
    }
}

/// Send `event` on a background task. Failures are logged and dropped.
///
/// Does nothing outside a Tokio runtime.
pub fn track(transport: &Arc<dyn ChatTransport>, endpoints: Endpoints, event: AnalyticsEvent) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::debug!(event = %event.event, "No runtime, analytics beacon dropped");
        return;
    };
    let transport = Arc::clone(transport);
    handle.spawn(async move {
        if let Err(e) = transport.track(&endpoints, &event).await {
            tracing::debug!(event = %event.event, error = %e, "Analytics beacon failed");
        }
    });
}
