//! Widget configuration and layered application settings.
//!
//! [`WidgetConfig`] is the flat, camelCase configuration the host page hands
//! the widget. [`AppConfig`] is the binary's own layered config (defaults,
//! file, `CLAYO_` environment, CLI flags) from which host globals are derived.

use std::env;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Host-page keys that are accepted as synonyms of a canonical key.
const KEY_ALIASES: &[(&str, &str)] = &[("API_BASE", "apiUrl"), ("apiBase", "apiUrl")];

/// Screen corner the widget is pinned to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Position {
    #[default]
    BottomRight,
    BottomLeft,
    TopRight,
    TopLeft,
}

impl Position {
    /// CSS offsets for the root container.
    #[must_use]
    pub fn css(self) -> &'static str {
        match self {
            Self::BottomRight => "bottom: 20px; right: 20px;",
            Self::BottomLeft => "bottom: 20px; left: 20px;",
            Self::TopRight => "top: 20px; right: 20px;",
            Self::TopLeft => "top: 20px; left: 20px;",
        }
    }

    /// Whether the panel opens upward from the toggle button.
    #[must_use]
    pub fn is_bottom(self) -> bool {
        matches!(self, Self::BottomRight | Self::BottomLeft)
    }
}

/// Which backend route family the widget talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointStyle {
    /// Standalone widget routes: `/widget/session`, `/widget/message`, `/widget/config`.
    #[default]
    Widget,
    /// CRM chat routes: `/api/public/chat/session`, `/api/public/chat/message`.
    /// Requires an `agentId`.
    Public,
}

/// Flat widget configuration.
///
/// Built once at load time by shallow-merging host globals over
/// [`WidgetConfig::default`]. Only `updateConfig` changes it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WidgetConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    // Theme
    pub primary_color: String,
    pub background_color: String,
    pub text_color: String,
    pub font_family: String,
    pub border_radius: u32,
    pub width: u32,
    pub height: u32,
    pub position: Position,

    // Behaviour
    pub auto_open: bool,
    /// Milliseconds before an auto-open fires.
    pub auto_open_delay: u64,
    pub enable_file_upload: bool,
    pub enable_emojis: bool,
    pub show_powered_by: bool,

    // Network
    pub api_url: String,
    pub endpoint_style: EndpointStyle,
    pub request_timeout_ms: u64,
    pub stream_idle_timeout_ms: u64,

    // Copy
    pub welcome_message: String,
    pub placeholder_text: String,
    pub company_name: String,
    pub agent_name: String,
    /// Minutes east of UTC used for bubble timestamps.
    pub utc_offset_minutes: i32,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            organization_id: None,
            agent_id: None,
            primary_color: "#2563eb".to_string(),
            background_color: "#ffffff".to_string(),
            text_color: "#1f2937".to_string(),
            font_family: "-apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif"
                .to_string(),
            border_radius: 12,
            width: 380,
            height: 600,
            position: Position::BottomRight,
            auto_open: false,
            auto_open_delay: 3000,
            enable_file_upload: false,
            enable_emojis: true,
            show_powered_by: true,
            api_url: "http://localhost:3001".to_string(),
            endpoint_style: EndpointStyle::Widget,
            request_timeout_ms: 30_000,
            stream_idle_timeout_ms: 60_000,
            welcome_message: "Hi! How can I help you today?".to_string(),
            placeholder_text: "Type your message...".to_string(),
            company_name: "Clayo".to_string(),
            agent_name: "Assistant".to_string(),
            utc_offset_minutes: 0,
        }
    }
}

impl WidgetConfig {
    /// Shallow-merge `overrides` over `self`; override values win key by key.
    ///
    /// `null` values are skipped, unknown keys are ignored, and a value of the
    /// wrong type is reported as [`ConfigError::Invalid`].
    pub fn merge(&self, overrides: &Map<String, Value>) -> Result<Self, ConfigError> {
        let Value::Object(mut merged) =
            serde_json::to_value(self).map_err(|e| ConfigError::Invalid(e.to_string()))?
        else {
            return Err(ConfigError::Invalid("config is not an object".to_string()));
        };

        for (key, value) in overrides {
            if value.is_null() {
                continue;
            }
            let key = canonical_key(key);
            merged.insert(key.to_string(), value.clone());
        }

        serde_json::from_value(Value::Object(merged)).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Check required fields for the configured endpoint style.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if is_blank(self.organization_id.as_deref()) {
            return Err(ConfigError::MissingField("organizationId"));
        }
        if self.endpoint_style == EndpointStyle::Public && is_blank(self.agent_id.as_deref()) {
            return Err(ConfigError::MissingField("agentId"));
        }
        url::Url::parse(&self.api_url)
            .map_err(|e| ConfigError::Invalid(format!("apiUrl: {e}")))?;
        Ok(())
    }

    /// Organization id, empty when unset.
    #[must_use]
    pub fn organization(&self) -> &str {
        self.organization_id.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_idle_timeout_ms)
    }
}

fn canonical_key(key: &str) -> &str {
    KEY_ALIASES
        .iter()
        .find(|&&(alias, _)| alias == key)
        .map_or(key, |&(_, canonical)| canonical)
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

// ─────────────────────────────────────────────────────────────────────────────
// Application config (binary)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE", global = true)]
    pub config: Option<String>,

    /// Organization the widget belongs to
    #[arg(long, env = "CLAYO_ORGANIZATION_ID", global = true)]
    pub organization_id: Option<String>,

    /// Agent answering the conversation
    #[arg(long, env = "CLAYO_AGENT_ID", global = true)]
    pub agent_id: Option<String>,

    /// Backend base URL
    #[arg(long, env = "CLAYO_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Route family used by the backend
    #[arg(long, value_enum, global = true)]
    pub endpoint_style: Option<EndpointStyle>,

    /// JSON file standing in for the host page's `ClayoConfig` global
    #[arg(long, env = "CLAYO_HOST_CONFIG", global = true)]
    pub host_config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Chat with the backend from the terminal
    Chat,
    /// Print the widget markup for a UI state
    Render {
        /// UI state to render
        #[arg(long, value_enum, default_value_t = RenderState::Open)]
        state: RenderState,
    },
    /// Run the development backend
    Serve {
        /// Port to listen on
        #[arg(long, env = "PORT")]
        port: Option<u16>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RenderState {
    Closed,
    Open,
    Minimized,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub widget: WidgetSection,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WidgetSection {
    pub organization_id: Option<String>,
    pub agent_id: Option<String>,
    pub api_url: Option<String>,
    pub endpoint_style: Option<String>,
    pub host_config: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

impl AppConfig {
    pub fn load() -> Result<(Cli, Self), ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<(Cli, Self), ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let config = Self::from_cli(&cli)?;
        Ok((cli, config))
    }

    /// Build the layered config: defaults < file < `CLAYO_` env < CLI flags.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("server.port", 3001)?
            .set_default("server.host", "127.0.0.1")?;

        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name("clayo").required(false)),
        };

        // CLAYO_WIDGET__ORGANIZATION_ID=acme, CLAYO_SERVER__PORT=8080
        builder = builder.add_source(
            Environment::with_prefix("CLAYO")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(org) = &cli.organization_id {
            builder = builder.set_override("widget.organization_id", org.as_str())?;
        }
        if let Some(agent) = &cli.agent_id {
            builder = builder.set_override("widget.agent_id", agent.as_str())?;
        }
        if let Some(api_url) = &cli.api_url {
            builder = builder.set_override("widget.api_url", api_url.as_str())?;
        }
        if let Some(style) = cli.endpoint_style {
            let style = match style {
                EndpointStyle::Widget => "widget",
                EndpointStyle::Public => "public",
            };
            builder = builder.set_override("widget.endpoint_style", style)?;
        }
        if let Some(path) = &cli.host_config {
            builder = builder.set_override("widget.host_config", path.as_str())?;
        }
        if let Some(Command::Serve { port: Some(port) }) = &cli.command {
            builder = builder.set_override("server.port", i64::from(*port))?;
        }

        let cfg = builder.build()?;
        let mut app: Self = cfg.try_deserialize()?;

        // Unprefixed PORT is honoured for the dev backend, like most hosts expect.
        if let Ok(port) = env::var("PORT")
            && let Ok(port) = port.parse::<u16>()
            && !matches!(&cli.command, Some(Command::Serve { port: Some(_) }))
        {
            app.server.port = port;
        }

        Ok(app)
    }

    /// Host-page globals: the host config file (if any) with CLI/env values on top.
    pub fn host_globals(&self) -> Result<Map<String, Value>, ConfigError> {
        let mut globals = match &self.widget.host_config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::Invalid(format!("{path}: {e}")))?;
                match serde_json::from_str::<Value>(&raw)
                    .map_err(|e| ConfigError::Invalid(format!("{path}: {e}")))?
                {
                    Value::Object(map) => map,
                    _ => {
                        return Err(ConfigError::Invalid(format!(
                            "{path}: expected a JSON object"
                        )));
                    }
                }
            }
            None => Map::new(),
        };

        let section = &self.widget;
        for (key, value) in [
            ("organizationId", &section.organization_id),
            ("agentId", &section.agent_id),
            ("apiUrl", &section.api_url),
            ("endpointStyle", &section.endpoint_style),
        ] {
            if let Some(value) = value {
                globals.insert(key.to_string(), Value::String(value.clone()));
            }
        }

        Ok(globals)
    }
}
