//! Widget markup.
//!
//! Everything here is a pure function of config, UI state and messages, so
//! the whole widget can be rendered and inspected without a DOM. Each message
//! bubble renders to exactly one line of markup carrying a
//! `data-message-id` attribute, which is what lets a surface swap a single
//! bubble while a reply streams in.

use std::fmt::Write as _;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::config::WidgetConfig;
use crate::message::{Message, Sender};

/// Id of the root container; the only node the widget adds to a page.
pub const ROOT_ID: &str = "clayo-chat-widget";

/// Opening tag of the message list container.
pub const MESSAGES_OPEN: &str = "<div class=\"clayo-messages\" id=\"clayo-messages\">\n";

/// Closing marker of the message list container.
pub const MESSAGES_CLOSE: &str = "<!--/clayo-messages--></div>";

/// Message id used for the synthesized welcome bubble.
pub const WELCOME_ID: &str = "welcome";

/// Above anything a host page is likely to use.
const Z_INDEX: u32 = 2_147_483_647;

/// Which subtree of the widget is showing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiState {
    pub is_open: bool,
    pub is_minimized: bool,
    pub has_active_session: bool,
    pub input_enabled: bool,
}

impl UiState {
    #[must_use]
    pub fn closed() -> Self {
        Self {
            input_enabled: true,
            ..Self::default()
        }
    }
}

/// Escape text for element content and double-quoted attributes.
///
/// Newlines become character references so a bubble stays on one line of
/// markup; `white-space: pre-wrap` still shows them.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '\n' => out.push_str("&#10;"),
            '\r' => {}
            _ => out.push(c),
        }
    }
    out
}

/// Time label shown under a bubble: `HH:MM` at `offset_minutes` east of UTC.
///
/// Offsets outside a day fall back to UTC.
pub fn format_timestamp(ts: DateTime<Utc>, offset_minutes: i32) -> String {
    let offset = offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix());
    ts.with_timezone(&offset).format("%H:%M").to_string()
}

/// Render the complete widget.
pub fn render_widget(config: &WidgetConfig, ui: &UiState, messages: &[Message]) -> String {
    let mut html = String::new();
    let _ = write!(
        html,
        r#"<div id="{ROOT_ID}" class="clayo-widget" style="position: fixed; {pos} z-index: {Z_INDEX}; font-family: {font};">"#,
        pos = config.position.css(),
        font = escape_html(&config.font_family),
    );
    html.push_str("\n<style>");
    html.push_str(&render_styles(config));
    html.push_str("</style>\n");

    if ui.is_open {
        html.push_str(&render_panel(config, ui, messages));
    } else {
        html.push_str(&render_toggle(config));
    }

    html.push_str("\n</div>");
    html
}

/// Circular launcher shown while the widget is closed.
pub fn render_toggle(config: &WidgetConfig) -> String {
    format!(
        r#"<button type="button" class="clayo-toggle" data-action="toggle" aria-label="Open chat with {name}">
    <svg width="26" height="26" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2"><path d="M21 15a2 2 0 0 1-2 2H7l-4 4V5a2 2 0 0 1 2-2h14a2 2 0 0 1 2 2z"/></svg>
</button>"#,
        name = escape_html(&config.company_name),
    )
}

/// Open panel: header, and unless minimized, message list and input bar.
pub fn render_panel(config: &WidgetConfig, ui: &UiState, messages: &[Message]) -> String {
    let mut html = String::new();
    let minimized = if ui.is_minimized {
        " clayo-panel--minimized"
    } else {
        ""
    };
    let _ = writeln!(
        html,
        r#"<div class="clayo-panel{minimized}" role="dialog" aria-label="{company} chat">"#,
        company = escape_html(&config.company_name),
    );
    html.push_str(&render_header(config, ui));

    if !ui.is_minimized {
        html.push('\n');
        html.push_str(MESSAGES_OPEN);
        html.push_str(&render_message_list(config, messages));
        html.push_str(MESSAGES_CLOSE);
        html.push('\n');
        html.push_str(&render_input(config, ui));
        if config.show_powered_by {
            html.push_str(
                "\n<div class=\"clayo-powered\">Powered by <a href=\"https://clayo.co\" target=\"_blank\" rel=\"noopener\">Clayo</a></div>",
            );
        }
    }

    html.push_str("\n</div>");
    html
}

fn render_header(config: &WidgetConfig, ui: &UiState) -> String {
    let status = if ui.has_active_session {
        "Online"
    } else {
        "Connecting..."
    };
    let (min_action, min_label) = if ui.is_minimized {
        ("restore", "Restore chat")
    } else {
        ("minimize", "Minimize chat")
    };
    format!(
        r#"<div class="clayo-header"><div class="clayo-avatar">{initial}</div><div class="clayo-title"><div class="clayo-agent">{agent}</div><div class="clayo-status">{status}</div></div><button type="button" class="clayo-icon" data-action="{min_action}" aria-label="{min_label}">&#8211;</button><button type="button" class="clayo-icon" data-action="close" aria-label="Close chat">&#215;</button></div>"#,
        initial = escape_html(&initial(&config.agent_name)),
        agent = escape_html(&config.agent_name),
    )
}

fn render_input(config: &WidgetConfig, ui: &UiState) -> String {
    let disabled = if ui.input_enabled { "" } else { " disabled" };
    let upload = if config.enable_file_upload {
        r#"<button type="button" class="clayo-icon" data-action="upload" aria-label="Attach file">&#128206;</button>"#
    } else {
        ""
    };
    let emoji = if config.enable_emojis {
        r#"<button type="button" class="clayo-icon" data-action="emoji" aria-label="Insert emoji">&#128578;</button>"#
    } else {
        ""
    };
    format!(
        r#"<form class="clayo-input" data-action="send">{upload}<input id="clayo-input" type="text" name="message" autocomplete="off" placeholder="{placeholder}"{disabled}>{emoji}<button type="submit" class="clayo-send" aria-label="Send"{disabled}>&#10148;</button></form>"#,
        placeholder = escape_html(&config.placeholder_text),
    )
}

/// Inner markup of the message list: the welcome bubble when empty,
/// otherwise one line per message.
pub fn render_message_list(config: &WidgetConfig, messages: &[Message]) -> String {
    if messages.is_empty() {
        let mut html = render_welcome(config);
        html.push('\n');
        return html;
    }

    let mut html = String::new();
    for message in messages {
        html.push_str(&render_message(config, message));
        html.push('\n');
    }
    html
}

/// Greeting from the bot persona shown before the first message.
pub fn render_welcome(config: &WidgetConfig) -> String {
    format!(
        r#"<div class="clayo-row clayo-row--bot" data-message-id="{WELCOME_ID}"><div class="clayo-bubble">{text}</div></div>"#,
        text = escape_html(&config.welcome_message),
    )
}

/// One message bubble, on a single line.
pub fn render_message(config: &WidgetConfig, message: &Message) -> String {
    let side = match message.sender {
        Sender::User => "user",
        Sender::Bot => "bot",
    };
    let body = if message.streaming && message.content.is_empty() {
        render_typing_indicator(config)
    } else {
        format!(
            r#"<div class="clayo-bubble">{}</div>"#,
            escape_html(&message.content)
        )
    };
    let streaming = if message.streaming {
        r#" data-streaming="true""#
    } else {
        ""
    };
    format!(
        r#"<div class="clayo-row clayo-row--{side}" data-message-id="{id}"{streaming}>{body}<div class="clayo-time">{time}</div></div>"#,
        id = escape_html(&message.id),
        time = format_timestamp(message.timestamp, config.utc_offset_minutes),
    )
}

/// Three bouncing dots while the bot is composing.
pub fn render_typing_indicator(config: &WidgetConfig) -> String {
    format!(
        r#"<div class="clayo-bubble clayo-typing" aria-label="{agent} is typing"><span></span><span></span><span></span></div>"#,
        agent = escape_html(&config.agent_name),
    )
}

/// Stylesheet scoped under the root id so host rules neither leak in nor out.
pub fn render_styles(config: &WidgetConfig) -> String {
    let primary = escape_html(&config.primary_color);
    let background = escape_html(&config.background_color);
    let text = escape_html(&config.text_color);
    let radius = config.border_radius;
    let width = config.width;
    let height = config.height;
    let panel_edge = if config.position.is_bottom() {
        "bottom"
    } else {
        "top"
    };
    format!(
        "#{ROOT_ID}, #{ROOT_ID} * {{ box-sizing: border-box; margin: 0; padding: 0; line-height: 1.4; }}\
         #{ROOT_ID} .clayo-toggle {{ width: 60px; height: 60px; border-radius: 50%; border: none; cursor: pointer; background: {primary}; color: #fff; display: flex; align-items: center; justify-content: center; box-shadow: 0 4px 12px rgba(0,0,0,.15); }}\
         #{ROOT_ID} .clayo-panel {{ position: absolute; {panel_edge}: 0; width: {width}px; height: {height}px; max-width: calc(100vw - 40px); max-height: calc(100vh - 40px); background: {background}; color: {text}; border-radius: {radius}px; display: flex; flex-direction: column; overflow: hidden; box-shadow: 0 8px 32px rgba(0,0,0,.12); }}\
         #{ROOT_ID} .clayo-panel--minimized {{ height: auto; }}\
         #{ROOT_ID} .clayo-header {{ display: flex; align-items: center; gap: 10px; padding: 14px 16px; background: {primary}; color: #fff; }}\
         #{ROOT_ID} .clayo-avatar {{ width: 36px; height: 36px; border-radius: 50%; background: rgba(255,255,255,.2); display: flex; align-items: center; justify-content: center; font-weight: 600; }}\
         #{ROOT_ID} .clayo-title {{ flex: 1; }}\
         #{ROOT_ID} .clayo-agent {{ font-weight: 600; font-size: 15px; }}\
         #{ROOT_ID} .clayo-status {{ font-size: 12px; opacity: .85; }}\
         #{ROOT_ID} .clayo-icon {{ background: transparent; border: none; color: inherit; cursor: pointer; font-size: 18px; padding: 4px 6px; }}\
         #{ROOT_ID} .clayo-messages {{ flex: 1; overflow-y: auto; padding: 16px; display: flex; flex-direction: column; gap: 12px; }}\
         #{ROOT_ID} .clayo-row {{ display: flex; flex-direction: column; max-width: 80%; }}\
         #{ROOT_ID} .clayo-row--user {{ align-self: flex-end; align-items: flex-end; }}\
         #{ROOT_ID} .clayo-row--bot {{ align-self: flex-start; align-items: flex-start; }}\
         #{ROOT_ID} .clayo-bubble {{ padding: 10px 14px; border-radius: {radius}px; font-size: 14px; white-space: pre-wrap; word-wrap: break-word; }}\
         #{ROOT_ID} .clayo-row--user .clayo-bubble {{ background: {primary}; color: #fff; }}\
         #{ROOT_ID} .clayo-row--bot .clayo-bubble {{ background: #f3f4f6; color: {text}; }}\
         #{ROOT_ID} .clayo-time {{ font-size: 11px; color: #9ca3af; margin-top: 4px; }}\
         #{ROOT_ID} .clayo-typing span {{ display: inline-block; width: 6px; height: 6px; margin: 0 2px; border-radius: 50%; background: #9ca3af; animation: clayo-bounce 1.4s infinite ease-in-out both; }}\
         #{ROOT_ID} .clayo-typing span:nth-child(2) {{ animation-delay: .16s; }}\
         #{ROOT_ID} .clayo-typing span:nth-child(3) {{ animation-delay: .32s; }}\
         @keyframes clayo-bounce {{ 0%, 80%, 100% {{ transform: scale(0); }} 40% {{ transform: scale(1); }} }}\
         #{ROOT_ID} .clayo-input {{ display: flex; gap: 8px; padding: 12px; border-top: 1px solid #e5e7eb; }}\
         #{ROOT_ID} .clayo-input input {{ flex: 1; padding: 10px 12px; border: 1px solid #e5e7eb; border-radius: 20px; font-size: 14px; outline: none; }}\
         #{ROOT_ID} .clayo-send {{ width: 40px; height: 40px; border-radius: 50%; border: none; background: {primary}; color: #fff; cursor: pointer; }}\
         #{ROOT_ID} .clayo-send[disabled] {{ opacity: .5; cursor: not-allowed; }}\
         #{ROOT_ID} .clayo-powered {{ text-align: center; font-size: 11px; color: #9ca3af; padding: 6px; }}\
         #{ROOT_ID} .clayo-powered a {{ color: inherit; }}"
    )
}

fn initial(name: &str) -> String {
    name.chars()
        .next()
        .map(|c| c.to_uppercase().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Position;

    fn config() -> WidgetConfig {
        WidgetConfig {
            organization_id: Some("acme".to_string()),
            ..WidgetConfig::default()
        }
    }

    fn open() -> UiState {
        UiState {
            is_open: true,
            ..UiState::closed()
        }
    }

    #[test]
    fn test_closed_widget_shows_toggle_only() {
        let html = render_widget(&config(), &UiState::closed(), &[]);
        assert!(html.contains(r#"id="clayo-chat-widget""#));
        assert!(html.contains("clayo-toggle"));
        assert!(!html.contains(r#"role="dialog""#));
        assert!(html.contains("z-index: 2147483647"));
        assert!(html.contains("position: fixed"));
    }

    #[test]
    fn test_open_empty_widget_shows_welcome() {
        let html = render_widget(&config(), &open(), &[]);
        assert!(html.contains("Hi! How can I help you today?"));
        assert!(html.contains(r#"data-message-id="welcome""#));
        assert!(html.contains(MESSAGES_OPEN));
        assert!(html.contains(MESSAGES_CLOSE));
    }

    #[test]
    fn test_minimized_panel_has_header_only() {
        let ui = UiState {
            is_minimized: true,
            ..open()
        };
        let html = render_widget(&config(), &ui, &[Message::user("hello")]);
        assert!(html.contains("clayo-panel--minimized"));
        assert!(html.contains("clayo-header"));
        assert!(!html.contains(MESSAGES_OPEN));
        assert!(!html.contains(r#"id="clayo-input""#));
    }

    #[test]
    fn test_host_values_reach_markup() {
        let cfg = WidgetConfig {
            primary_color: "#ff0000".to_string(),
            position: Position::TopLeft,
            agent_name: "Marina".to_string(),
            ..config()
        };
        let html = render_widget(&cfg, &open(), &[]);
        assert!(html.contains("background: #ff0000"));
        assert!(html.contains("top: 20px; left: 20px;"));
        assert!(html.contains("Marina"));
    }

    #[test]
    fn test_message_sides_and_one_line_per_bubble() {
        let messages = vec![Message::user("line one\nline two"), Message::bot("hi")];
        let list = render_message_list(&config(), &messages);

        let lines: Vec<&str> = list.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("clayo-row--user"));
        assert!(lines[0].contains("line one&#10;line two"));
        assert!(lines[1].contains("clayo-row--bot"));
        assert!(lines[0].contains("clayo-time"));
    }

    #[test]
    fn test_content_is_escaped() {
        let html = render_message(&config(), &Message::bot("<script>alert('x')</script>"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_empty_streaming_message_is_typing_indicator() {
        let mut msg = Message::bot("");
        msg.streaming = true;
        let html = render_message(&config(), &msg);
        assert!(html.contains("clayo-typing"));
        assert!(html.contains(r#"data-streaming="true""#));
    }

    #[test]
    fn test_input_disabled_state() {
        let ui = UiState {
            input_enabled: false,
            ..open()
        };
        let html = render_widget(&config(), &ui, &[]);
        assert!(html.contains(r#"placeholder="Type your message..." disabled"#));
    }

    #[test]
    fn test_timestamp_uses_configured_offset() {
        let ts = DateTime::parse_from_rfc3339("2026-03-01T23:45:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(ts, 0), "23:45");
        assert_eq!(format_timestamp(ts, 90), "01:15");
        assert_eq!(format_timestamp(ts, -300), "18:45");
        assert_eq!(format_timestamp(ts, 100_000), "23:45");

        let mut msg = Message::bot("hi");
        msg.timestamp = ts;
        let cfg = WidgetConfig {
            utc_offset_minutes: 60,
            ..config()
        };
        assert!(render_message(&cfg, &msg).contains(">00:45<"));
        assert!(render_message(&config(), &msg).contains(">23:45<"));
    }

    #[test]
    fn test_powered_by_flag() {
        let cfg = WidgetConfig {
            show_powered_by: false,
            ..config()
        };
        assert!(!render_widget(&cfg, &open(), &[]).contains("Powered by"));
        assert!(render_widget(&config(), &open(), &[]).contains("Powered by"));
    }
}
