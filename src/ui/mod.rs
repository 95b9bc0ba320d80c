pub mod presenter;
pub mod terminal;

pub use presenter::{NotifyLevel, Presenter};
pub use terminal::TerminalPresenter;
