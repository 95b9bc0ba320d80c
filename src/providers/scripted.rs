//! In-process backend that replays canned events, for driving the
//! controller and manager in tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::token_stream::TokenStream;
use super::traits::{ChatSession, ModelBackend};
use super::types::{BackendError, ModelInfo, StreamEvent};
use crate::models::{ChatTurn, Role};

#[derive(Default)]
struct Script {
    replies: VecDeque<Vec<StreamEvent>>,
    title_reply: Option<Result<String, String>>,
    opened: Vec<String>,
    prompts: Vec<String>,
    completions: Vec<(String, String)>,
    loaded_histories: Vec<Vec<ChatTurn>>,
    sessions: Vec<Arc<Mutex<Vec<ChatTurn>>>>,
}

#[derive(Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply made of `tokens` followed by a clean end of stream.
    pub fn push_reply(&self, tokens: &[&str]) {
        let mut events: Vec<StreamEvent> = tokens
            .iter()
            .map(|t| StreamEvent::Token(t.to_string()))
            .collect();
        events.push(StreamEvent::Done {
            tokens_in: None,
            tokens_out: None,
        });
        self.push_events(events);
    }

    pub fn push_events(&self, events: Vec<StreamEvent>) {
        self.script.lock().replies.push_back(events);
    }

    pub fn set_title_reply(&self, reply: Result<&str, &str>) {
        self.script.lock().title_reply = Some(reply.map(str::to_string).map_err(str::to_string));
    }

    pub fn opened_models(&self) -> Vec<String> {
        self.script.lock().opened.clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.script.lock().prompts.clone()
    }

    /// `(model, prompt)` for every non-streaming call.
    pub fn completions(&self) -> Vec<(String, String)> {
        self.script.lock().completions.clone()
    }

    pub fn loaded_histories(&self) -> Vec<Vec<ChatTurn>> {
        self.script.lock().loaded_histories.clone()
    }

    /// Current history of the `index`-th session opened on this backend.
    pub fn session_history(&self, index: usize) -> Vec<ChatTurn> {
        self.script.lock().sessions[index].lock().clone()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn open_session(&self, model: &str) -> Box<dyn ChatSession> {
        let history = Arc::new(Mutex::new(Vec::new()));
        {
            let mut script = self.script.lock();
            script.opened.push(model.to_string());
            script.sessions.push(history.clone());
        }
        Box::new(ScriptedSession {
            model: model.to_string(),
            script: self.script.clone(),
            history,
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError> {
        Ok(vec![
            ModelInfo {
                name: "llama3.2:1b".to_string(),
            },
            ModelInfo {
                name: "qwen2.5:3b".to_string(),
            },
        ])
    }
}

struct ScriptedSession {
    model: String,
    script: Arc<Mutex<Script>>,
    history: Arc<Mutex<Vec<ChatTurn>>>,
}

#[async_trait]
impl ChatSession for ScriptedSession {
    fn model(&self) -> &str {
        &self.model
    }

    fn load_history(&self, turns: Vec<ChatTurn>) {
        self.script.lock().loaded_histories.push(turns.clone());
        *self.history.lock() = turns;
    }

    fn history(&self) -> Vec<ChatTurn> {
        self.history.lock().clone()
    }

    async fn stream_reply(&self, prompt: &str) -> Result<TokenStream, BackendError> {
        let events = {
            let mut script = self.script.lock();
            script.prompts.push(prompt.to_string());
            self.history.lock().push(ChatTurn::new(Role::User, prompt));
            script.replies.pop_front().unwrap_or_else(|| {
                vec![StreamEvent::Done {
                    tokens_in: None,
                    tokens_out: None,
                }]
            })
        };

        let (feed, stream) = TokenStream::channel(events.len() + 1);
        for event in events {
            feed.tx
                .try_send(event)
                .map_err(|e| BackendError::Stream(e.to_string()))?;
        }
        // Keep the feed open so a script without a terminal event stays "in flight".
        tokio::spawn(async move { feed.cancel.cancelled().await });
        Ok(stream)
    }

    fn record_reply(&self, content: &str) {
        self.history
            .lock()
            .push(ChatTurn::new(Role::Assistant, content));
    }

    async fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        let mut script = self.script.lock();
        script
            .completions
            .push((self.model.clone(), prompt.to_string()));
        match script.title_reply.clone() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => Err(BackendError::RequestFailed(e)),
            None => Ok("Untitled".to_string()),
        }
    }
}
