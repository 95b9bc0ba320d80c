use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::database::Database;
use super::title;
use crate::error::ChatError;
use crate::models::{to_turns, Role};
use crate::providers::{ChatSession, ModelBackend, TokenStream};
use crate::ui::{NotifyLevel, Presenter};

/// Appended to a reply the user stopped.
pub const STOP_MARKER: &str = " (stopped)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming,
    Completing,
    Cancelling,
    Failing,
}

/// How a generation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Completed,
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing in flight.
    Idle,
    /// One token was applied; the stream is still open.
    Token,
    Finished(Termination),
}

/// Cloneable handle for stopping the in-flight generation from another task.
#[derive(Debug, Clone)]
pub struct StopHandle(CancellationToken);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.is_cancelled()
    }
}

struct ActiveStream {
    conversation_id: i64,
    accumulated: String,
    stop: CancellationToken,
    session: Arc<dyn ChatSession>,
    stream: TokenStream,
}

/// Owns the single in-flight generation.
///
/// A send is accepted only from `Idle`. Each `step` pulls at most one token;
/// the stop flag is checked before every pull, so a stop lands after the
/// token currently being fetched. Every terminal path persists at most one
/// assistant message and returns to `Idle`.
pub struct StreamController {
    db: Database,
    backend: Arc<dyn ModelBackend>,
    presenter: Arc<dyn Presenter>,
    title_model: Option<String>,
    state: StreamState,
    active: Option<ActiveStream>,
}

impl StreamController {
    pub fn new(
        db: Database,
        backend: Arc<dyn ModelBackend>,
        presenter: Arc<dyn Presenter>,
        title_model: Option<String>,
    ) -> Self {
        Self {
            db,
            backend,
            presenter,
            title_model,
            state: StreamState::Idle,
            active: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    pub fn streaming_conversation(&self) -> Option<i64> {
        self.active.as_ref().map(|a| a.conversation_id)
    }

    pub fn accumulated(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.accumulated.as_str())
    }

    pub fn set_title_model(&mut self, model: Option<String>) {
        self.title_model = model;
    }

    pub fn stop_handle(&self) -> Option<StopHandle> {
        self.active.as_ref().map(|a| StopHandle(a.stop.clone()))
    }

    /// Returns `false` if nothing is streaming.
    pub fn request_stop(&self) -> bool {
        match &self.active {
            Some(active) => {
                debug!(conversation_id = active.conversation_id, "Stop requested");
                active.stop.cancel();
                true
            }
            None => false,
        }
    }

    /// Start generating a reply to `prompt`. The user message is expected to
    /// be persisted already; nothing is written for the assistant yet. When
    /// the reply ends, `session` is given exactly the assistant turn that was
    /// saved.
    pub async fn begin_send(
        &mut self,
        conversation_id: i64,
        session: Arc<dyn ChatSession>,
        prompt: &str,
    ) -> Result<(), ChatError> {
        if self.state != StreamState::Idle || self.active.is_some() {
            return Err(ChatError::AlreadyStreaming);
        }

        let stream = session.stream_reply(prompt).await?;
        debug!(conversation_id, model = %session.model(), "Streaming started");

        self.active = Some(ActiveStream {
            conversation_id,
            accumulated: String::new(),
            stop: CancellationToken::new(),
            session,
            stream,
        });
        self.state = StreamState::Streaming;
        Ok(())
    }

    /// Advance the generation by one unit of work.
    pub async fn step(&mut self) -> StepOutcome {
        let fetched = {
            let Some(active) = self.active.as_mut() else {
                return StepOutcome::Idle;
            };
            if active.stop.is_cancelled() {
                None
            } else {
                Some(active.stream.next().await)
            }
        };

        match fetched {
            None => {
                self.state = StreamState::Cancelling;
                self.finish(Termination::Cancelled).await
            }
            Some(Ok(Some(token))) => {
                if let Some(active) = self.active.as_mut() {
                    active.accumulated.push_str(&token);
                    self.presenter.render_streaming_delta(&active.accumulated);
                }
                StepOutcome::Token
            }
            Some(Ok(None)) => {
                self.state = StreamState::Completing;
                self.finish(Termination::Completed).await
            }
            Some(Err(e)) => {
                warn!("Generation failed: {}", e);
                self.state = StreamState::Failing;
                self.finish(Termination::Failed(e.to_string())).await
            }
        }
    }

    /// Drive the generation to its end, yielding to the runtime between
    /// tokens so stop requests and other tasks get a chance to run.
    pub async fn run_until_idle(&mut self) -> Option<Termination> {
        loop {
            match self.step().await {
                StepOutcome::Token => tokio::task::yield_now().await,
                StepOutcome::Finished(termination) => return Some(termination),
                StepOutcome::Idle => return None,
            }
        }
    }

    async fn finish(&mut self, termination: Termination) -> StepOutcome {
        let Some(active) = self.active.take() else {
            self.state = StreamState::Idle;
            return StepOutcome::Idle;
        };
        let ActiveStream {
            conversation_id,
            accumulated,
            session,
            stream,
            ..
        } = active;
        // Dropping the stream cancels the backend request.
        drop(stream);
        self.presenter.clear_streaming_indicator();

        let kept = match &termination {
            Termination::Completed => Some(accumulated),
            Termination::Cancelled if accumulated.is_empty() => {
                debug!(conversation_id, "Stopped before any output, nothing to save");
                None
            }
            Termination::Cancelled => Some(format!("{}{}", accumulated, STOP_MARKER)),
            Termination::Failed(_) => Some(accumulated).filter(|text| !text.is_empty()),
        };

        let mut saved = false;
        if let Some(content) = kept {
            saved = self.persist_reply(conversation_id, &content).await;
            if saved {
                session.record_reply(&content);
            }
        }

        match &termination {
            Termination::Completed if saved => self.maybe_generate_title(conversation_id).await,
            Termination::Failed(error) => self
                .presenter
                .notify(&format!("AI error: {}", error), NotifyLevel::Error),
            _ => {}
        }

        self.render_history(conversation_id).await;
        self.state = StreamState::Idle;
        info!(conversation_id, ?termination, "Generation finished");
        StepOutcome::Finished(termination)
    }

    async fn persist_reply(&self, conversation_id: i64, content: &str) -> bool {
        match self
            .db
            .append_message(conversation_id, Role::Assistant, content)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!("Failed to save assistant message: {}", e);
                self.presenter.notify(
                    &format!("Failed to save reply: {}", e),
                    NotifyLevel::Error,
                );
                false
            }
        }
    }

    async fn render_history(&self, conversation_id: i64) {
        match self.db.list_messages(conversation_id).await {
            Ok(messages) => self.presenter.render_conversation(&to_turns(&messages)),
            Err(e) => error!("Failed to reload messages: {}", e),
        }
    }

    /// Titles the conversation after its first completed reply.
    async fn maybe_generate_title(&self, conversation_id: i64) {
        let Some(model) = self.title_model.as_deref() else {
            return;
        };

        let messages = match self.db.list_messages(conversation_id).await {
            Ok(messages) => messages,
            Err(e) => {
                error!("Failed to load messages for title: {}", e);
                return;
            }
        };

        let assistant_count = messages.iter().filter(|m| m.role == Role::Assistant).count();
        if assistant_count != 1 {
            return;
        }
        let Some(reply) = messages.last().filter(|m| m.role == Role::Assistant) else {
            return;
        };
        let user_text = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        match title::generate_title(self.backend.as_ref(), model, user_text, &reply.content).await {
            Ok(Some(new_title)) => {
                if let Err(e) = self.db.rename_conversation(conversation_id, &new_title).await {
                    error!("Failed to rename conversation: {}", e);
                    self.presenter
                        .notify("Could not save the generated title", NotifyLevel::Warning);
                    return;
                }
                info!(conversation_id, title = %new_title, "Conversation titled");
                match self.db.list_conversations().await {
                    Ok(list) => self
                        .presenter
                        .render_conversation_list(&list, Some(conversation_id)),
                    Err(e) => error!("Failed to reload conversations: {}", e),
                }
            }
            Ok(None) => {
                warn!("Title model returned an empty title");
                self.presenter
                    .notify("Could not generate a title", NotifyLevel::Warning);
            }
            Err(e) => {
                warn!("Title generation failed: {}", e);
                self.presenter.notify(
                    &format!("Could not generate a title: {}", e),
                    NotifyLevel::Warning,
                );
            }
        }
    }
}
