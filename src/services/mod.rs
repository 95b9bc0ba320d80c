pub mod database;
pub mod export;
pub mod manager;
pub mod settings;
pub mod streaming;
pub mod title;

pub use database::{Database, StoreError};
pub use manager::{ChatManager, SessionState};
pub use settings::{AppSettings, SettingsService};
pub use streaming::{StepOutcome, StopHandle, StreamController, StreamState, Termination};
