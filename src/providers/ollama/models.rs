use serde::{Deserialize, Serialize};

// --- Request types ---

#[derive(Debug, Serialize)]
pub struct OllamaChatRequest {
    pub model: String,
    pub messages: Vec<OllamaMessage>,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

// --- Response types (one NDJSON line, or the whole non-streaming body) ---

#[derive(Debug, Deserialize)]
pub struct OllamaChatChunk {
    pub message: Option<OllamaMessage>,
    #[serde(default)]
    pub done: bool,
    pub prompt_eval_count: Option<i64>,
    pub eval_count: Option<i64>,
    pub error: Option<String>,
}

// --- Model list ---

#[derive(Debug, Deserialize)]
pub struct OllamaTagsResponse {
    #[serde(default)]
    pub models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
pub struct OllamaModel {
    pub name: String,
}

// --- Error types ---

#[derive(Debug, Deserialize)]
pub struct OllamaErrorResponse {
    pub error: String,
}
