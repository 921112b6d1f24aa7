//! Network seam between the widget and its backend.
//!
//! [`ChatTransport`] is the only way the widget talks to the network, so the
//! pipeline can be driven by a scripted transport in tests. [`HttpTransport`]
//! is the real implementation over `reqwest`.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::config::{EndpointStyle, WidgetConfig};
use crate::error::{Result, WidgetError};

/// Raw reply body, one item per network read.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Backend URLs derived from `apiUrl` and the endpoint style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: Url,
    style: EndpointStyle,
}

impl Endpoints {
    pub fn new(api_url: &str, style: EndpointStyle) -> Result<Self> {
        let mut base = Url::parse(api_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base, style })
    }

    pub fn from_config(config: &WidgetConfig) -> Result<Self> {
        Self::new(&config.api_url, config.endpoint_style)
    }

    #[must_use]
    pub fn style(&self) -> EndpointStyle {
        self.style
    }

    fn join(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    pub fn session_url(&self) -> Result<Url> {
        match self.style {
            EndpointStyle::Public => self.join("api/public/chat/session"),
            EndpointStyle::Widget => self.join("widget/session"),
        }
    }

    pub fn message_url(&self) -> Result<Url> {
        match self.style {
            EndpointStyle::Public => self.join("api/public/chat/message"),
            EndpointStyle::Widget => self.join("widget/message"),
        }
    }

    pub fn config_url(&self, organization_id: &str) -> Result<Url> {
        let mut url = self.join("widget/config")?;
        url.query_pairs_mut()
            .append_pair("organizationId", organization_id);
        Ok(url)
    }

    pub fn analytics_url(&self) -> Result<Url> {
        self.join("analytics/widget")
    }
}

// =============================================================================
// Wire types
// =============================================================================

/// Body of a session-creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub organization_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// Session as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct SessionEnvelope {
    #[serde(default)]
    success: bool,
    session: Option<SessionInfo>,
    error: Option<String>,
}

/// Body of a message-send request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub message: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfigEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    config: Map<String, Value>,
}

/// Analytics beacon payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub event: String,
    pub organization_id: String,
    pub url: String,
    pub timestamp: String,
    pub version: String,
}

// =============================================================================
// Transport
// =============================================================================

/// Everything the widget asks of the network.
#[async_trait]
pub trait ChatTransport: Send + Sync + std::fmt::Debug {
    /// `POST` the session route and return the new session.
    async fn create_session(&self, endpoints: &Endpoints, req: &SessionRequest)
    -> Result<SessionInfo>;

    /// `POST` the message route and return the streamed reply body.
    async fn send_message(&self, endpoints: &Endpoints, req: &MessageRequest)
    -> Result<ByteStream>;

    /// `GET /widget/config`; returns the partial config override.
    async fn fetch_config(
        &self,
        endpoints: &Endpoints,
        organization_id: &str,
    ) -> Result<Map<String, Value>>;

    /// `POST /analytics/widget`.
    async fn track(&self, endpoints: &Endpoints, event: &AnalyticsEvent) -> Result<()>;
}

/// [`ChatTransport`] over HTTP.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client (proxies, TLS roots, default headers).
    #[must_use]
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".into());
            Err(WidgetError::Status {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn create_session(
        &self,
        endpoints: &Endpoints,
        req: &SessionRequest,
    ) -> Result<SessionInfo> {
        let response = self
            .http
            .post(endpoints.session_url()?)
            .json(req)
            .send()
            .await?;
        let envelope: SessionEnvelope = Self::check(response).await?.json().await?;

        match envelope.session {
            Some(session) if envelope.success => Ok(session),
            _ => Err(WidgetError::Status {
                status: 200,
                message: envelope
                    .error
                    .unwrap_or_else(|| "session not created".to_string()),
            }),
        }
    }

    async fn send_message(&self, endpoints: &Endpoints, req: &MessageRequest) -> Result<ByteStream> {
        let response = self
            .http
            .post(endpoints.message_url()?)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(req)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(WidgetError::from));
        Ok(Box::pin(stream))
    }

    async fn fetch_config(
        &self,
        endpoints: &Endpoints,
        organization_id: &str,
    ) -> Result<Map<String, Value>> {
        let response = self
            .http
            .get(endpoints.config_url(organization_id)?)
            .send()
            .await?;
        let envelope: ConfigEnvelope = Self::check(response).await?.json().await?;
        if envelope.success {
            Ok(envelope.config)
        } else {
            Ok(Map::new())
        }
    }

    async fn track(&self, endpoints: &Endpoints, event: &AnalyticsEvent) -> Result<()> {
        let response = self
            .http
            .post(endpoints.analytics_url()?)
            .json(event)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widget_routes() {
        let endpoints = Endpoints::new("https://api.clayo.co", EndpointStyle::Widget).unwrap();
        assert_eq!(
            endpoints.session_url().unwrap().as_str(),
            "https://api.clayo.co/widget/session"
        );
        assert_eq!(
            endpoints.message_url().unwrap().as_str(),
            "https://api.clayo.co/widget/message"
        );
        assert_eq!(
            endpoints.config_url("acme co").unwrap().as_str(),
            "https://api.clayo.co/widget/config?organizationId=acme+co"
        );
        assert_eq!(
            endpoints.analytics_url().unwrap().as_str(),
            "https://api.clayo.co/analytics/widget"
        );
    }

    #[test]
    fn test_public_routes_keep_base_path() {
        let endpoints = Endpoints::new("https://crm.example.com/v2", EndpointStyle::Public).unwrap();
        assert_eq!(
            endpoints.session_url().unwrap().as_str(),
            "https://crm.example.com/v2/api/public/chat/session"
        );
        assert_eq!(
            endpoints.message_url().unwrap().as_str(),
            "https://crm.example.com/v2/api/public/chat/message"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(Endpoints::new("not a url", EndpointStyle::Widget).is_err());
    }

    #[test]
    fn test_message_request_wire_format() {
        let req = MessageRequest {
            message: "track my order".to_string(),
            session_id: "s-1".to_string(),
            agent_id: Some("a-1".to_string()),
            organization_id: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["sessionId"], "s-1");
        assert_eq!(json["agentId"], "a-1");
        assert!(json.get("organizationId").is_none());
    }

    #[test]
    fn test_session_envelope() {
        let env: SessionEnvelope =
            serde_json::from_str(r#"{"success":true,"session":{"id":"abc","status":"active"}}"#)
                .unwrap();
        assert!(env.success);
        assert_eq!(env.session.unwrap().id, "abc");

        let env: SessionEnvelope =
            serde_json::from_str(r#"{"success":false,"error":"unknown organization"}"#).unwrap();
        assert!(env.session.is_none());
        assert_eq!(env.error.as_deref(), Some("unknown organization"));
    }
}
