use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use url::Url;

use super::models::*;
use super::stream::read_ndjson_stream;
use crate::models::{ChatTurn, Role};
use crate::providers::token_stream::{StreamFeed, TokenStream};
use crate::providers::traits::{ChatSession, ModelBackend};
use crate::providers::types::{BackendError, ModelInfo, StreamEvent};

const STREAM_BUFFER: usize = 64;

/// Backend for an Ollama-compatible inference server.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: Client,
    endpoint: Url,
}

impl OllamaBackend {
    pub fn new(endpoint: Url) -> Self {
        Self {
            client: Client::new(),
            endpoint,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn api_url(endpoint: &Url, path: &str) -> String {
    format!("{}/api/{}", endpoint.as_str().trim_end_matches('/'), path)
}

fn parse_error_message(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<OllamaErrorResponse>(body) {
        return format!("HTTP {}: {}", status.as_u16(), parsed.error);
    }
    format!("HTTP {}: Request failed", status.as_u16())
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::RequestFailed(parse_error_message(status, &body)))
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    fn open_session(&self, model: &str) -> Box<dyn ChatSession> {
        Box::new(OllamaSession {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            model: model.to_string(),
            history: Mutex::new(Vec::new()),
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError> {
        let url = api_url(&self.endpoint, "tags");
        let response = self.client.get(&url).send().await.map_err(|e| {
            BackendError::Network(format!("Failed to connect to {}: {}", self.endpoint, e))
        })?;
        let response = check_status(response).await?;

        let tags: OllamaTagsResponse = response.json().await.map_err(|e| {
            BackendError::InvalidResponse(format!("Failed to parse model list: {}", e))
        })?;

        Ok(tags
            .models
            .into_iter()
            .map(|m| ModelInfo { name: m.name })
            .collect())
    }
}

pub struct OllamaSession {
    client: Client,
    endpoint: Url,
    model: String,
    history: Mutex<Vec<ChatTurn>>,
}

impl OllamaSession {
    fn to_wire(turns: &[ChatTurn]) -> Vec<OllamaMessage> {
        turns
            .iter()
            .map(|t| OllamaMessage {
                role: t.role.as_str().to_string(),
                content: t.content.clone(),
            })
            .collect()
    }

    fn chat_request(&self, messages: Vec<OllamaMessage>, stream: bool) -> reqwest::RequestBuilder {
        let body = OllamaChatRequest {
            model: self.model.clone(),
            messages,
            stream,
        };
        self.client
            .post(api_url(&self.endpoint, "chat"))
            .header("content-type", "application/json")
            .json(&body)
    }
}

/// Runs one streaming request until it ends or the consumer goes away.
async fn pump_reply(request: reqwest::RequestBuilder, feed: StreamFeed) {
    let response = tokio::select! {
        _ = feed.cancel.cancelled() => return,
        response = request.send() => response,
    };

    let response = match response {
        Ok(r) => r,
        Err(e) => {
            let _ = feed
                .send(StreamEvent::Error(BackendError::Network(e.to_string()).to_string()))
                .await;
            return;
        }
    };
    let response = match check_status(response).await {
        Ok(r) => r,
        Err(e) => {
            let _ = feed.send(StreamEvent::Error(e.to_string())).await;
            return;
        }
    };

    if let Some(event) = read_ndjson_stream(response, &feed).await {
        let _ = feed.send(event).await;
    }
}

#[async_trait]
impl ChatSession for OllamaSession {
    fn model(&self) -> &str {
        &self.model
    }

    fn load_history(&self, turns: Vec<ChatTurn>) {
        *self.history.lock() = turns;
    }

    fn history(&self) -> Vec<ChatTurn> {
        self.history.lock().clone()
    }

    async fn stream_reply(&self, prompt: &str) -> Result<TokenStream, BackendError> {
        let messages = {
            let mut history = self.history.lock();
            history.push(ChatTurn::new(Role::User, prompt));
            Self::to_wire(&history)
        };

        let request = self.chat_request(messages, true);
        let (feed, stream) = TokenStream::channel(STREAM_BUFFER);
        tracing::debug!(model = %self.model, "Starting streamed reply");
        tokio::spawn(pump_reply(request, feed));
        Ok(stream)
    }

    fn record_reply(&self, content: &str) {
        self.history
            .lock()
            .push(ChatTurn::new(Role::Assistant, content));
    }

    async fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        let messages = vec![OllamaMessage {
            role: Role::User.as_str().to_string(),
            content: prompt.to_string(),
        }];

        let response = self
            .chat_request(messages, false)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        let response = check_status(response).await?;

        let chunk: OllamaChatChunk = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        if let Some(error) = chunk.error {
            return Err(BackendError::RequestFailed(error));
        }

        chunk
            .message
            .map(|m| m.content)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| BackendError::InvalidResponse("No content in response".to_string()))
    }
}
