//! Inbound chatbot message: the DingTalk callback payload that triggers a reply thread.

use serde::{Deserialize, Serialize};

use crate::address;

/// Conversation type as sent by DingTalk (`"1"` = private chat, `"2"` = group chat).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationType {
    #[serde(rename = "1")]
    Private,
    #[serde(rename = "2")]
    Group,
}

/// Text body of a chatbot message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextContent {
    #[serde(default)]
    pub content: String,
}

/// A message from a DingTalk conversation that the bot replies to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    pub conversation_type: ConversationType,
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_corp_id: String,
    /// Staff id used for @-mentions and private-chat card delivery.
    #[serde(default)]
    pub sender_staff_id: String,
    #[serde(default)]
    pub sender_nick: String,
    #[serde(rename = "msgId")]
    pub message_id: String,
    #[serde(default)]
    pub robot_code: String,
    #[serde(default)]
    pub text: TextContent,
    /// Per-conversation webhook for plain (markdown) replies.
    #[serde(default)]
    pub session_webhook: String,
}

/// Where an interactive card is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardReceiver {
    /// Private chat: the card goes directly to this staff id.
    SingleChat { user_id: String },
    /// Group chat: the card is posted into this open conversation.
    Group { open_conversation_id: String },
}

impl IncomingMessage {
    /// Trimmed message text, used as the image prompt.
    pub fn prompt(&self) -> &str {
        self.text.content.trim()
    }

    /// Stable card business id for the reply thread started by this message.
    pub fn card_biz_id(&self) -> String {
        address::card_biz_id(
            &self.sender_id,
            &self.sender_corp_id,
            &self.conversation_id,
            &self.message_id,
        )
    }

    pub fn card_receiver(&self) -> CardReceiver {
        match self.conversation_type {
            ConversationType::Private => CardReceiver::SingleChat {
                user_id: self.sender_staff_id.clone(),
            },
            ConversationType::Group => CardReceiver::Group {
                open_conversation_id: self.conversation_id.clone(),
            },
        }
    }
}
