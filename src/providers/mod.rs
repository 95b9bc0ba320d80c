pub mod ollama;
#[cfg(test)]
pub mod scripted;
pub mod token_stream;
pub mod traits;
pub mod types;

pub use ollama::OllamaBackend;
pub use token_stream::{StreamFeed, TokenStream};
pub use traits::{ChatSession, ModelBackend};
pub use types::{BackendError, ModelInfo, StreamEvent};
