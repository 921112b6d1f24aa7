//! Render targets.
//!
//! A [`Surface`] is where widget markup lands. The controller prefers the
//! narrowest update that reflects a change: a streamed chunk patches one
//! bubble, a new message appends one bubble, and only open/close/config
//! changes repaint the whole widget. That keeps a visitor's caret and scroll
//! position intact while a reply streams in.
//!
//! - [`Document`]: in-memory page used for tests and snapshot rendering
//! - [`TerminalSurface`]: prints bot replies to stdout as they stream

use std::collections::HashMap;
use std::io::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::message::{Message, Sender};
use crate::render::{MESSAGES_CLOSE, MESSAGES_OPEN, WELCOME_ID};

/// A place the widget paints into.
pub trait Surface: Send + Sync + std::fmt::Debug {
    /// Insert the widget root into the page. Called once per loaded widget.
    fn mount(&self, html: &str);

    /// Replace the widget root's markup.
    fn repaint(&self, html: &str);

    /// Replace the message list's inner markup.
    fn repaint_messages(&self, html: &str);

    /// Append one bubble to the message list.
    fn append_message(&self, message: &Message, html: &str);

    /// Replace one existing bubble in place.
    fn patch_message(&self, message: &Message, html: &str);

    fn set_input_enabled(&self, enabled: bool);

    fn clear_input(&self);

    /// Pin the message list to its newest content.
    fn scroll_to_bottom(&self);
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory page holding the widget's markup.
#[derive(Debug, Default)]
pub struct Document {
    inner: Mutex<DocumentState>,
}

#[derive(Debug, Default)]
struct DocumentState {
    roots: usize,
    shell: String,
    lines: Vec<String>,
    input_enabled: bool,
    input_value: String,
    scroll_pinned: bool,
    repaints: usize,
    list_repaints: usize,
    patches: usize,
}

impl DocumentState {
    fn set_list(&mut self, html: &str) {
        self.lines = html.lines().map(ToString::to_string).collect();
    }

    fn position_of(&self, id: &str) -> Option<usize> {
        let needle = format!("data-message-id=\"{id}\"");
        self.lines.iter().position(|line| line.contains(&needle))
    }
}

impl Document {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(DocumentState {
                input_enabled: true,
                ..DocumentState::default()
            }),
        }
    }

    /// Number of widget root nodes in the page.
    #[must_use]
    pub fn widget_nodes(&self) -> usize {
        lock(&self.inner).roots
    }

    /// Current markup of the widget, message list included.
    #[must_use]
    pub fn html(&self) -> String {
        let state = lock(&self.inner);
        let list = state.lines.iter().fold(String::new(), |mut acc, line| {
            acc.push_str(line);
            acc.push('\n');
            acc
        });
        match (state.shell.find(MESSAGES_OPEN), state.shell.find(MESSAGES_CLOSE)) {
            (Some(start), Some(end)) if start < end => format!(
                "{}{list}{}",
                &state.shell[..start + MESSAGES_OPEN.len()],
                &state.shell[end..]
            ),
            _ => state.shell.clone(),
        }
    }

    /// Inner markup of the message list.
    #[must_use]
    pub fn messages_html(&self) -> Vec<String> {
        lock(&self.inner).lines.clone()
    }

    /// Markup of one bubble.
    #[must_use]
    pub fn message_html(&self, id: &str) -> Option<String> {
        let state = lock(&self.inner);
        state.position_of(id).map(|idx| state.lines[idx].clone())
    }

    #[must_use]
    pub fn input_enabled(&self) -> bool {
        lock(&self.inner).input_enabled
    }

    #[must_use]
    pub fn input_value(&self) -> String {
        lock(&self.inner).input_value.clone()
    }

    /// Simulate the visitor typing into the input box.
    pub fn type_input(&self, text: &str) {
        lock(&self.inner).input_value = text.to_string();
    }

    #[must_use]
    pub fn scroll_pinned(&self) -> bool {
        lock(&self.inner).scroll_pinned
    }

    /// Full widget repaints since mount.
    #[must_use]
    pub fn repaints(&self) -> usize {
        lock(&self.inner).repaints
    }

    /// Whole message-list repaints.
    #[must_use]
    pub fn list_repaints(&self) -> usize {
        lock(&self.inner).list_repaints
    }

    /// Single-bubble patches.
    #[must_use]
    pub fn patches(&self) -> usize {
        lock(&self.inner).patches
    }

    fn paint_shell(state: &mut DocumentState, html: &str) {
        state.shell = html.to_string();
        match (html.find(MESSAGES_OPEN), html.find(MESSAGES_CLOSE)) {
            (Some(start), Some(end)) if start < end => {
                let list = &html[start + MESSAGES_OPEN.len()..end];
                state.set_list(list);
            }
            _ => state.lines.clear(),
        }
    }
}

impl Surface for Document {
    fn mount(&self, html: &str) {
        let mut state = lock(&self.inner);
        state.roots += 1;
        Self::paint_shell(&mut state, html);
    }

    fn repaint(&self, html: &str) {
        let mut state = lock(&self.inner);
        state.repaints += 1;
        Self::paint_shell(&mut state, html);
    }

    fn repaint_messages(&self, html: &str) {
        let mut state = lock(&self.inner);
        state.list_repaints += 1;
        state.set_list(html);
    }

    fn append_message(&self, _message: &Message, html: &str) {
        let mut state = lock(&self.inner);
        if let Some(idx) = state.position_of(WELCOME_ID) {
            state.lines.remove(idx);
        }
        state.lines.push(html.to_string());
    }

    fn patch_message(&self, message: &Message, html: &str) {
        let mut state = lock(&self.inner);
        state.patches += 1;
        match state.position_of(&message.id) {
            Some(idx) => state.lines[idx] = html.to_string(),
            None => state.lines.push(html.to_string()),
        }
    }

    fn set_input_enabled(&self, enabled: bool) {
        lock(&self.inner).input_enabled = enabled;
    }

    fn clear_input(&self) {
        lock(&self.inner).input_value.clear();
    }

    fn scroll_to_bottom(&self) {
        lock(&self.inner).scroll_pinned = true;
    }
}

/// Streams bot replies to stdout.
///
/// Only the text appended since the last update of a bubble is printed, so a
/// reply appears on the terminal as it is generated.
#[derive(Debug)]
pub struct TerminalSurface {
    agent_name: String,
    printed: Mutex<HashMap<String, usize>>,
}

impl TerminalSurface {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            printed: Mutex::new(HashMap::new()),
        }
    }

    fn print_bot(&self, message: &Message) {
        if message.sender != Sender::Bot {
            return;
        }
        let mut printed = lock(&self.printed);
        let seen = printed.entry(message.id.clone()).or_insert(usize::MAX);

        let mut out = std::io::stdout().lock();
        let start = if *seen == usize::MAX {
            if message.content.is_empty() && message.streaming {
                return;
            }
            let _ = write!(out, "{}: ", self.agent_name);
            0
        } else {
            *seen
        };

        if let Some(delta) = message.content.get(start..) {
            let _ = write!(out, "{delta}");
        }
        *seen = message.content.len();
        if !message.streaming {
            let _ = writeln!(out);
            printed.remove(&message.id);
        }
        let _ = out.flush();
    }
}

impl Surface for TerminalSurface {
    fn mount(&self, _html: &str) {
        tracing::debug!("Terminal surface mounted");
    }

    fn repaint(&self, _html: &str) {}

    fn repaint_messages(&self, _html: &str) {}

    fn append_message(&self, message: &Message, _html: &str) {
        self.print_bot(message);
    }

    fn patch_message(&self, message: &Message, _html: &str) {
        self.print_bot(message);
    }

    fn set_input_enabled(&self, _enabled: bool) {}

    fn clear_input(&self) {}

    fn scroll_to_bottom(&self) {}
}
