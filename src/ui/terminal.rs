use std::io::Write;

use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;

use super::presenter::{NotifyLevel, Presenter};
use crate::models::{ChatTurn, ConversationSummary, Role};

struct StreamBuffer {
    /// Bytes of the accumulated reply already written out.
    printed: usize,
    active: bool,
}

/// Line-oriented presenter for a terminal. Streaming output is written
/// incrementally: only the part of the reply not yet printed goes out.
pub struct TerminalPresenter<W: Write + Send> {
    out: Mutex<W>,
    stream: Mutex<StreamBuffer>,
}

impl TerminalPresenter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> TerminalPresenter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            stream: Mutex::new(StreamBuffer {
                printed: 0,
                active: false,
            }),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn write(&self, text: &str) {
        let mut out = self.out.lock();
        if let Err(e) = out.write_all(text.as_bytes()).and_then(|_| out.flush()) {
            tracing::warn!("Failed to write to terminal: {}", e);
        }
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "You",
        Role::Assistant => "Assistant",
    }
}

/// Classify a timestamp into a date group label.
fn date_group(dt: &DateTime<Utc>) -> &'static str {
    let now = Utc::now();
    let today = now.date_naive();
    let date = dt.date_naive();

    if date == today {
        "Today"
    } else if date == today.pred_opt().unwrap_or(today) {
        "Yesterday"
    } else if date.iso_week() == today.iso_week() && date.year() == today.year() {
        "This Week"
    } else {
        "Older"
    }
}

impl<W: Write + Send> Presenter for TerminalPresenter<W> {
    fn render_conversation(&self, messages: &[ChatTurn]) {
        if messages.is_empty() {
            self.write("-- empty conversation --\n");
            return;
        }
        let mut text = String::new();
        for msg in messages {
            text.push_str(&format!("{}: {}\n", role_label(msg.role), msg.content));
        }
        self.write(&text);
    }

    fn render_streaming_delta(&self, accumulated: &str) {
        let suffix = {
            let mut stream = self.stream.lock();
            let mut suffix = String::new();
            if !stream.active {
                stream.active = true;
                stream.printed = 0;
                suffix.push_str(&format!("{}: ", role_label(Role::Assistant)));
            }
            // The accumulator only grows, so anything past `printed` is new.
            if let Some(rest) = accumulated.get(stream.printed..) {
                suffix.push_str(rest);
                stream.printed = accumulated.len();
            }
            suffix
        };
        self.write(&suffix);
    }

    fn clear_streaming_indicator(&self) {
        let was_active = {
            let mut stream = self.stream.lock();
            let was_active = stream.active;
            stream.active = false;
            stream.printed = 0;
            was_active
        };
        if was_active {
            self.write("\n");
        }
    }

    fn notify(&self, message: &str, level: NotifyLevel) {
        match level {
            NotifyLevel::Info => tracing::info!("{}", message),
            NotifyLevel::Warning => tracing::warn!("{}", message),
            NotifyLevel::Error => tracing::error!("{}", message),
        }
        self.write(&format!("[{}] {}\n", level.as_str(), message));
    }

    fn render_conversation_list(&self, conversations: &[ConversationSummary], active: Option<i64>) {
        if conversations.is_empty() {
            self.write("-- no conversations --\n");
            return;
        }
        let mut text = String::new();
        let mut group = "";
        for conv in conversations {
            let this_group = date_group(&conv.created_at);
            if this_group != group {
                text.push_str(&format!("{}\n", this_group));
                group = this_group;
            }
            let marker = if Some(conv.id) == active { '*' } else { ' ' };
            text.push_str(&format!("{} {:>4}  {}\n", marker, conv.id, conv.title));
        }
        self.write(&text);
    }
}
