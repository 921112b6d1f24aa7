//! Loader and guard: turns a host page into at most one running widget.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::OnceCell;

use crate::analytics;
use crate::config::{EndpointStyle, WidgetConfig};
use crate::error::Result;
use crate::surface::Surface;
use crate::transport::{ChatTransport, Endpoints};
use crate::widget::{Widget, WidgetHandle};

/// The page a widget is embedded in.
///
/// `globals` is the host's `ClayoConfig` object. `slot` is the single
/// namespaced handle the widget installs on the page; once filled (or once a
/// load has failed) it never changes.
#[derive(Debug)]
pub struct HostPage {
    globals: Map<String, Value>,
    url: String,
    surface: Arc<dyn Surface>,
    slot: OnceCell<Option<WidgetHandle>>,
}

impl HostPage {
    pub fn new(
        globals: Map<String, Value>,
        url: impl Into<String>,
        surface: Arc<dyn Surface>,
    ) -> Self {
        Self {
            globals,
            url: url.into(),
            surface,
            slot: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn globals(&self) -> &Map<String, Value> {
        &self.globals
    }

    /// The installed widget handle, if a load succeeded.
    #[must_use]
    pub fn widget(&self) -> Option<WidgetHandle> {
        self.slot.get().cloned().flatten()
    }

    /// Tear the page down: cancel whatever the widget is streaming.
    pub fn unload(&self) {
        if let Some(widget) = self.widget() {
            widget.unload();
        }
    }
}

/// Load the widget into `page`.
///
/// Repeated or concurrent calls for the same page share the first call's
/// outcome, so a page never gets two widgets. Configuration problems are
/// logged and produce `None`; they never surface as an error to the host.
pub async fn load(page: &HostPage, transport: Arc<dyn ChatTransport>) -> Option<WidgetHandle> {
    page.slot
        .get_or_init(|| async move {
            match init(page, transport).await {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::error!(error = %e, url = %page.url, "Clayo widget failed to load");
                    None
                }
            }
        })
        .await
        .clone()
}

async fn init(page: &HostPage, transport: Arc<dyn ChatTransport>) -> Result<WidgetHandle> {
    let mut config = WidgetConfig::default().merge(&page.globals)?;
    config.validate()?;

    if config.endpoint_style == EndpointStyle::Widget {
        config = with_remote_config(config, transport.as_ref()).await;
    }

    let endpoints = Endpoints::from_config(&config)?;
    let organization = config.organization().to_string();
    let handle = WidgetHandle::new(Widget::new(
        config,
        Arc::clone(&transport),
        Arc::clone(&page.surface),
        page.url.clone(),
    ));
    handle.mount();
    handle.schedule_auto_open();

    tracing::info!(
        organization_id = %organization,
        version = analytics::VERSION,
        "Clayo widget loaded"
    );
    analytics::track(
        &transport,
        endpoints,
        analytics::event("widget_loaded", &organization, &page.url),
    );
    Ok(handle)
}

/// Overlay the backend's per-organization config. Any failure keeps the
/// local config.
async fn with_remote_config(config: WidgetConfig, transport: &dyn ChatTransport) -> WidgetConfig {
    let fetched = match Endpoints::from_config(&config) {
        Ok(endpoints) => {
            let timeout = config.request_timeout();
            tokio::time::timeout(
                timeout,
                transport.fetch_config(&endpoints, config.organization()),
            )
            .await
        }
        Err(e) => {
            tracing::warn!(error = %e, "Skipping remote config");
            return config;
        }
    };

    let remote = match fetched {
        Ok(Ok(remote)) => remote,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Remote config unavailable, using local config");
            return config;
        }
        Err(_) => {
            tracing::warn!("Remote config timed out, using local config");
            return config;
        }
    };

    let merged = config.merge(&remote).and_then(|merged| {
        merged.validate()?;
        Ok(merged)
    });
    match merged {
        Ok(merged) => {
            tracing::debug!(keys = remote.len(), "Applied remote config");
            merged
        }
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring invalid remote config");
            config
        }
    }
}
