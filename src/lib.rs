//! Hearth: a local-first chat engine for locally hosted language models.
//!
//! - [`services::Database`] stores conversations and messages in SQLite.
//! - [`providers`] abstracts the inference server behind [`providers::ModelBackend`].
//! - [`services::StreamController`] owns the single in-flight reply.
//! - [`services::ChatManager`] drives the chat lifecycle.
//! - [`ui::Presenter`] is the render boundary the engine pushes into.

pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod providers;
pub mod services;
pub mod ui;

pub use config::Config;
pub use error::ChatError;
pub use providers::{ModelBackend, OllamaBackend};
pub use services::{ChatManager, Database};
pub use ui::{NotifyLevel, Presenter};
