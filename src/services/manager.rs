use std::sync::Arc;

use tracing::{debug, error, info};

use super::database::Database;
use super::export::export_to_markdown;
use super::streaming::{StepOutcome, StopHandle, StreamController, StreamState, Termination};
use crate::error::ChatError;
use crate::models::{to_turns, ConversationSummary, Role};
use crate::providers::{ChatSession, ModelBackend, ModelInfo};
use crate::ui::{NotifyLevel, Presenter};

/// Process-local selection state: which chat is open, the backend session
/// bound to it, and the model the next new chat will use. Never persisted.
pub struct SessionState {
    active_conversation: Option<i64>,
    active_session: Option<Arc<dyn ChatSession>>,
    selected_model: String,
}

impl SessionState {
    pub fn new(selected_model: impl Into<String>) -> Self {
        Self {
            active_conversation: None,
            active_session: None,
            selected_model: selected_model.into(),
        }
    }

    pub fn active_conversation(&self) -> Option<i64> {
        self.active_conversation
    }

    pub fn has_session(&self) -> bool {
        self.active_session.is_some()
    }

    pub fn selected_model(&self) -> &str {
        &self.selected_model
    }

    fn activate(&mut self, conversation_id: i64, session: Option<Arc<dyn ChatSession>>) {
        self.active_conversation = Some(conversation_id);
        self.active_session = session;
    }

    fn clear(&mut self) {
        self.active_conversation = None;
        self.active_session = None;
    }
}

/// Orchestrates the chat lifecycle on top of the store and the stream
/// controller. All selection state changes go through its methods and each
/// change is pushed to the presenter explicitly.
pub struct ChatManager {
    db: Database,
    backend: Arc<dyn ModelBackend>,
    presenter: Arc<dyn Presenter>,
    controller: StreamController,
    state: SessionState,
}

impl ChatManager {
    pub fn new(
        db: Database,
        backend: Arc<dyn ModelBackend>,
        presenter: Arc<dyn Presenter>,
        default_model: impl Into<String>,
        title_model: Option<String>,
    ) -> Self {
        let controller =
            StreamController::new(db.clone(), backend.clone(), presenter.clone(), title_model);
        Self {
            db,
            backend,
            presenter,
            controller,
            state: SessionState::new(default_model),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn stream_state(&self) -> StreamState {
        self.controller.state()
    }

    pub fn is_streaming(&self) -> bool {
        self.controller.is_streaming()
    }

    fn reject_if_busy(&self) -> Result<(), ChatError> {
        if self.controller.is_streaming() {
            self.presenter.notify(
                "A reply is still being generated. Stop it first.",
                NotifyLevel::Warning,
            );
            return Err(ChatError::Busy);
        }
        Ok(())
    }

    fn report<T>(&self, action: &str, result: Result<T, ChatError>) -> Result<T, ChatError> {
        if let Err(e) = &result {
            error!("Failed to {}: {}", action, e);
            self.presenter
                .notify(&format!("Failed to {}: {}", action, e), NotifyLevel::Error);
        }
        result
    }

    async fn refresh_list(&self) {
        match self.db.list_conversations().await {
            Ok(list) => self
                .presenter
                .render_conversation_list(&list, self.state.active_conversation),
            Err(e) => error!("Failed to load conversations: {}", e),
        }
    }

    pub async fn list_chats(&self) -> Result<Vec<ConversationSummary>, ChatError> {
        let result = self.db.list_conversations().await.map_err(ChatError::from);
        let list = self.report("load conversations", result)?;
        self.presenter
            .render_conversation_list(&list, self.state.active_conversation);
        Ok(list)
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ChatError> {
        let result = self.backend.list_models().await.map_err(ChatError::from);
        self.report("list models", result)
    }

    /// Create an empty conversation bound to `model` (or the selected model)
    /// and make it active.
    pub async fn new_chat(&mut self, model: Option<&str>) -> Result<i64, ChatError> {
        self.reject_if_busy()?;

        let model = model
            .unwrap_or(self.state.selected_model.as_str())
            .to_string();
        let result = self.db.create_conversation(&model).await.map_err(ChatError::from);
        let id = self.report("create conversation", result)?;

        info!(conversation_id = id, model = %model, "New chat");
        self.state.selected_model = model;
        self.state.activate(id, None);
        self.presenter.render_conversation(&[]);
        self.refresh_list().await;
        Ok(id)
    }

    /// Open a stored conversation in a fresh backend session.
    pub async fn select_chat(&mut self, id: i64) -> Result<(), ChatError> {
        self.reject_if_busy()?;

        let result = async {
            let model = self.db.get_conversation_model(id).await?;
            let messages = self.db.list_messages(id).await?;
            Ok::<_, ChatError>((model, messages))
        }
        .await;
        let (model, messages) = self.report("open conversation", result)?;

        let turns = to_turns(&messages);
        let session: Arc<dyn ChatSession> = Arc::from(self.backend.open_session(&model));
        session.load_history(turns.clone());

        debug!(conversation_id = id, model = %model, turns = turns.len(), "Chat selected");
        self.state.selected_model = model;
        self.state.activate(id, Some(session));
        self.presenter.render_conversation(&turns);
        self.refresh_list().await;
        Ok(())
    }

    /// Delete a conversation. Deleting the open one clears the selection.
    pub async fn delete_chat(&mut self, id: i64) -> Result<(), ChatError> {
        if self.controller.streaming_conversation() == Some(id) {
            self.reject_if_busy()?;
        }

        let result = self.db.delete_conversation(id).await.map_err(ChatError::from);
        self.report("delete conversation", result)?;

        info!(conversation_id = id, "Chat deleted");
        if self.state.active_conversation == Some(id) {
            self.state.clear();
            self.presenter.render_conversation(&[]);
        }
        self.refresh_list().await;
        Ok(())
    }

    /// Persist the user's message and start streaming the reply. Drive the
    /// reply with `step` or `run_until_idle`.
    pub async fn send(&mut self, text: &str) -> Result<(), ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::InvalidInput);
        }
        self.reject_if_busy()?;

        let conversation_id = match self.state.active_conversation {
            Some(id) => id,
            None => self.new_chat(None).await?,
        };

        let result = self
            .db
            .append_message(conversation_id, Role::User, text)
            .await
            .map_err(ChatError::from);
        self.report("save message", result)?;

        let session = match self.state.active_session.clone() {
            Some(session) => session,
            None => {
                let session = self.open_session_for(conversation_id).await;
                let session = self.report("open model session", session)?;
                self.state.active_session = Some(session.clone());
                session
            }
        };

        match self.db.list_messages(conversation_id).await {
            Ok(messages) => self.presenter.render_conversation(&to_turns(&messages)),
            Err(e) => error!("Failed to reload messages: {}", e),
        }

        let result = self
            .controller
            .begin_send(conversation_id, session, text)
            .await;
        self.report("start reply", result)
    }

    /// Fresh session for a conversation whose newest message is the prompt
    /// about to be sent; that prompt is left out of the loaded history.
    async fn open_session_for(
        &self,
        conversation_id: i64,
    ) -> Result<Arc<dyn ChatSession>, ChatError> {
        let model = self.db.get_conversation_model(conversation_id).await?;
        let mut messages = self.db.list_messages(conversation_id).await?;
        messages.pop();

        let session: Arc<dyn ChatSession> = Arc::from(self.backend.open_session(&model));
        session.load_history(to_turns(&messages));
        Ok(session)
    }

    /// Select the model for the open conversation (if any) and for new chats.
    /// The conversation stays open; its cached session is discarded so the
    /// next send binds to `model`.
    pub async fn switch_model(&mut self, model: &str) -> Result<(), ChatError> {
        self.reject_if_busy()?;

        if let Some(id) = self.state.active_conversation {
            let result = self
                .db
                .set_conversation_model(id, model)
                .await
                .map_err(ChatError::from);
            self.report("switch model", result)?;
        }

        info!(model = %model, "Model switched");
        self.state.selected_model = model.to_string();
        self.state.active_session = None;
        Ok(())
    }

    pub fn request_stop(&self) -> bool {
        self.controller.request_stop()
    }

    pub fn stop_handle(&self) -> Option<StopHandle> {
        self.controller.stop_handle()
    }

    pub async fn step(&mut self) -> StepOutcome {
        self.controller.step().await
    }

    pub async fn run_until_idle(&mut self) -> Option<Termination> {
        self.controller.run_until_idle().await
    }

    /// Markdown rendering of the open conversation.
    pub async fn export_active(&self) -> Result<Option<(String, String)>, ChatError> {
        let Some(id) = self.state.active_conversation else {
            return Ok(None);
        };
        let result = async {
            let conversation = self.db.get_conversation(id).await?;
            let messages = self.db.list_messages(id).await?;
            Ok::<_, ChatError>((conversation, messages))
        }
        .await;
        let (conversation, messages) = self.report("export conversation", result)?;
        Ok(Some((
            super::export::export_file_name(&conversation),
            export_to_markdown(&conversation, &messages),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatTurn;
    use crate::providers::scripted::ScriptedBackend;
    use crate::ui::presenter::RecordingPresenter;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        db: Database,
        backend: ScriptedBackend,
        presenter: Arc<RecordingPresenter>,
        manager: ChatManager,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("hearth.db")).await.unwrap();
        let backend = ScriptedBackend::new();
        let presenter = Arc::new(RecordingPresenter::default());
        let manager = ChatManager::new(
            db.clone(),
            Arc::new(backend.clone()),
            presenter.clone(),
            "llama3.2:1b",
            Some("llama3.2:1b".to_string()),
        );
        Harness {
            _dir: dir,
            db,
            backend,
            presenter,
            manager,
        }
    }

    async fn contents(db: &Database, id: i64) -> Vec<(Role, String)> {
        db.list_messages(id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| (m.role, m.content))
            .collect()
    }

    #[tokio::test]
    async fn test_hello_scenario() {
        let mut h = harness().await;
        h.backend.push_reply(&["Hi", " there", "!"]);
        h.backend.set_title_reply(Ok("Friendly Greeting"));

        let id = h.manager.new_chat(Some("llama3.2:1b")).await.unwrap();
        h.manager.send("Hello").await.unwrap();
        assert_eq!(h.manager.stream_state(), StreamState::Streaming);
        assert_eq!(h.manager.run_until_idle().await, Some(Termination::Completed));

        assert_eq!(
            contents(&h.db, id).await,
            vec![
                (Role::User, "Hello".to_string()),
                (Role::Assistant, "Hi there!".to_string())
            ]
        );
        let completions = h.backend.completions();
        assert_eq!(completions.len(), 1);
        assert!(completions[0].1.contains("Hello"));
        assert!(completions[0].1.contains("Hi there!"));
        assert_eq!(h.backend.opened_models()[0], "llama3.2:1b");
        assert_eq!(h.manager.stream_state(), StreamState::Idle);
    }

    #[tokio::test]
    async fn test_send_without_active_chat_creates_one() {
        let mut h = harness().await;
        h.backend.push_reply(&["Sure"]);

        h.manager.send("Help me").await.unwrap();
        let id = h.manager.state().active_conversation().unwrap();
        assert_eq!(h.db.get_conversation_model(id).await.unwrap(), "llama3.2:1b");
        h.manager.run_until_idle().await;
        assert_eq!(contents(&h.db, id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_blank_send_is_ignored() {
        let mut h = harness().await;
        assert!(matches!(
            h.manager.send("   \n\t").await,
            Err(ChatError::InvalidInput)
        ));
        assert!(h.db.list_conversations().await.unwrap().is_empty());
        assert!(h.presenter.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_new_chat_while_streaming_is_rejected() {
        let mut h = harness().await;
        // No terminal event: the reply stays in flight.
        h.backend
            .push_events(vec![crate::providers::StreamEvent::Token("Once".to_string())]);
        let id = h.manager.new_chat(None).await.unwrap();
        h.manager.send("Tell me a story").await.unwrap();
        assert_eq!(h.manager.step().await, StepOutcome::Token);

        assert!(matches!(h.manager.new_chat(None).await, Err(ChatError::Busy)));
        assert!(matches!(h.manager.send("More").await, Err(ChatError::Busy)));
        assert!(matches!(h.manager.select_chat(id).await, Err(ChatError::Busy)));
        assert!(matches!(h.manager.delete_chat(id).await, Err(ChatError::Busy)));

        assert_eq!(h.manager.state().active_conversation(), Some(id));
        assert!(h.manager.is_streaming());
        assert_eq!(h.db.list_conversations().await.unwrap().len(), 1);
        assert!(h
            .presenter
            .notifications()
            .iter()
            .all(|(_, level)| *level == NotifyLevel::Warning));

        assert!(h.manager.request_stop());
        assert_eq!(h.manager.run_until_idle().await, Some(Termination::Cancelled));
        assert_eq!(contents(&h.db, id).await[1].1, "Once (stopped)");
    }

    #[tokio::test]
    async fn test_reused_session_matches_store_after_stop() {
        let mut h = harness().await;
        h.backend.push_reply(&["Once", " upon", " a", " time"]);
        h.backend.push_reply(&["The end."]);
        let id = h.manager.new_chat(None).await.unwrap();

        h.manager.send("Tell me a story").await.unwrap();
        assert_eq!(h.manager.step().await, StepOutcome::Token);
        assert_eq!(h.manager.step().await, StepOutcome::Token);
        h.manager.request_stop();
        assert_eq!(h.manager.run_until_idle().await, Some(Termination::Cancelled));

        h.manager.send("Go on").await.unwrap();
        assert_eq!(h.manager.run_until_idle().await, Some(Termination::Completed));

        assert_eq!(h.backend.opened_models().len(), 1);
        let stored = to_turns(&h.db.list_messages(id).await.unwrap());
        assert_eq!(stored[1].content, "Once upon (stopped)");
        assert_eq!(h.backend.session_history(0), stored);
    }

    #[tokio::test]
    async fn test_select_chat_loads_history() {
        let mut h = harness().await;
        let id = h.db.create_conversation("qwen2.5:3b").await.unwrap();
        h.db.append_message(id, Role::User, "Hello").await.unwrap();
        h.db.append_message(id, Role::Assistant, "Hi there!").await.unwrap();

        h.manager.select_chat(id).await.unwrap();

        assert_eq!(h.manager.state().active_conversation(), Some(id));
        assert_eq!(h.manager.state().selected_model(), "qwen2.5:3b");
        assert_eq!(h.backend.opened_models(), vec!["qwen2.5:3b"]);
        let expected = vec![
            ChatTurn::new(Role::User, "Hello"),
            ChatTurn::new(Role::Assistant, "Hi there!"),
        ];
        assert_eq!(h.backend.loaded_histories(), vec![expected.clone()]);
        assert_eq!(h.presenter.last_conversation(), Some(expected));

        // The selected session is reused for the next send.
        h.backend.push_reply(&["Again?"]);
        h.manager.send("Hello").await.unwrap();
        h.manager.run_until_idle().await;
        assert_eq!(h.backend.opened_models(), vec!["qwen2.5:3b"]);
    }

    #[tokio::test]
    async fn test_select_missing_chat() {
        let mut h = harness().await;
        let result = h.manager.select_chat(404).await;
        assert!(matches!(
            result,
            Err(ChatError::Store(crate::services::database::StoreError::NotFound(404)))
        ));
        assert_eq!(h.presenter.notifications()[0].1, NotifyLevel::Error);
    }

    #[tokio::test]
    async fn test_delete_active_chat_clears_selection() {
        let mut h = harness().await;
        let other = h.manager.new_chat(None).await.unwrap();
        let id = h.manager.new_chat(None).await.unwrap();
        h.backend.push_reply(&["Hi"]);
        h.manager.send("Hello").await.unwrap();
        h.manager.run_until_idle().await;

        h.manager.delete_chat(other).await.unwrap();
        assert_eq!(h.manager.state().active_conversation(), Some(id));

        h.manager.delete_chat(id).await.unwrap();
        assert_eq!(h.manager.state().active_conversation(), None);
        assert!(!h.manager.state().has_session());
        assert_eq!(h.presenter.last_conversation(), Some(Vec::new()));
        assert!(h.db.list_messages(id).await.unwrap().is_empty());
        let (list, active) = h.presenter.last_list().unwrap();
        assert!(list.is_empty());
        assert_eq!(active, None);
    }

    #[tokio::test]
    async fn test_switch_model_discards_session() {
        let mut h = harness().await;
        h.backend.push_reply(&["Hi"]);
        h.backend.push_reply(&["Hello from qwen"]);
        let id = h.manager.new_chat(None).await.unwrap();
        h.manager.send("Hello").await.unwrap();
        h.manager.run_until_idle().await;
        assert!(h.manager.state().has_session());

        h.manager.switch_model("qwen2.5:3b").await.unwrap();
        assert!(!h.manager.state().has_session());
        assert_eq!(h.manager.state().active_conversation(), Some(id));
        assert_eq!(h.db.get_conversation_model(id).await.unwrap(), "qwen2.5:3b");

        h.manager.send("Who are you?").await.unwrap();
        h.manager.run_until_idle().await;

        assert_eq!(h.backend.opened_models().last().unwrap(), "qwen2.5:3b");
        // The fresh session gets the prior exchange but not the new prompt.
        let histories = h.backend.loaded_histories();
        let last = histories.last().unwrap();
        assert_eq!(last.len(), 2);
        assert_eq!(last[1].content, "Hi");
        // Earlier messages are untouched.
        assert_eq!(contents(&h.db, id).await[1].1, "Hi");
    }

    #[tokio::test]
    async fn test_switch_model_without_chat_sets_default() {
        let mut h = harness().await;
        h.manager.switch_model("qwen2.5:3b").await.unwrap();
        let id = h.manager.new_chat(None).await.unwrap();
        assert_eq!(h.db.get_conversation_model(id).await.unwrap(), "qwen2.5:3b");
    }

    #[tokio::test]
    async fn test_export_active() {
        let mut h = harness().await;
        assert!(h.manager.export_active().await.unwrap().is_none());

        h.backend.push_reply(&["Hi there!"]);
        h.backend.set_title_reply(Ok("Greetings"));
        h.manager.send("Hello").await.unwrap();
        h.manager.run_until_idle().await;

        let (name, markdown) = h.manager.export_active().await.unwrap().unwrap();
        assert_eq!(name, "Greetings.md");
        assert!(markdown.starts_with("# Greetings"));
        assert!(markdown.contains("Hi there!"));
    }

    #[tokio::test]
    async fn test_list_models_and_chats() {
        let mut h = harness().await;
        let models = h.manager.list_models().await.unwrap();
        assert_eq!(models.len(), 2);

        let id = h.manager.new_chat(None).await.unwrap();
        let chats = h.manager.list_chats().await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(h.presenter.last_list().unwrap().1, Some(id));
    }
}
