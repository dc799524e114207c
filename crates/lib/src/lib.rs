//! sdbot core library — reply delivery for a DingTalk image-generation chatbot:
//! card addressing, image composition, card content, and the reply coordinator
//! used by the CLI.

pub mod address;
pub mod card;
pub mod compose;
pub mod config;
pub mod dingtalk;
pub mod message;
pub mod progress;
pub mod reply;

pub use message::{ConversationType, IncomingMessage};
pub use reply::{CardResult, MessageKind, ReplyCoordinator, ReplyState};
