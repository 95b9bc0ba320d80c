use crate::models::{ChatTurn, ConversationSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    Info,
    Warning,
    Error,
}

impl NotifyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyLevel::Info => "info",
            NotifyLevel::Warning => "warning",
            NotifyLevel::Error => "error",
        }
    }
}

/// Render sink driven by the chat engine. The engine only ever calls into
/// it; nothing is read back.
pub trait Presenter: Send + Sync {
    fn render_conversation(&self, messages: &[ChatTurn]);

    /// Called after every token with the whole reply so far.
    fn render_streaming_delta(&self, accumulated: &str);

    fn clear_streaming_indicator(&self);

    fn notify(&self, message: &str, level: NotifyLevel);

    fn render_conversation_list(&self, _conversations: &[ConversationSummary], _active: Option<i64>) {}
}

#[cfg(test)]
pub use recording::{PresenterEvent, RecordingPresenter};
