use async_trait::async_trait;

use super::token_stream::TokenStream;
use super::types::{BackendError, ModelInfo};
use crate::models::ChatTurn;

/// A local inference server that can host sessions for named models.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Pure construction: nothing is sent until the session is used.
    fn open_session(&self, model: &str) -> Box<dyn ChatSession>;

    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError>;
}

/// A logical chat bound to one model and one prior turn history.
#[async_trait]
pub trait ChatSession: Send + Sync {
    fn model(&self) -> &str;

    /// Replaces the prior context.
    fn load_history(&self, turns: Vec<ChatTurn>);

    fn history(&self) -> Vec<ChatTurn>;

    /// Starts a generation for `prompt` on top of the current history. The
    /// prompt joins the history right away; the reply does not.
    async fn stream_reply(&self, prompt: &str) -> Result<TokenStream, BackendError>;

    /// Appends the assistant turn that was kept for the last prompt. Not
    /// called when nothing was kept.
    fn record_reply(&self, content: &str);

    /// Single blocking round trip, independent of the session history.
    async fn complete(&self, prompt: &str) -> Result<String, BackendError>;
}
