pub mod conversation;
pub mod message;

pub use conversation::{Conversation, ConversationSummary};
pub use message::{to_turns, ChatTurn, Message, Role, UnknownRole};
