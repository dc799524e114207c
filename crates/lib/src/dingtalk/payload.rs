//! Request envelopes for the card and webhook APIs. Nested JSON documents
//! (`cardData`, `atUserListJson`, `singleChatReceiver`) are sent as JSON strings.

use serde::Serialize;

use crate::message::{CardReceiver, IncomingMessage};

/// Body of `POST /v1.0/im/v1.0/robot/interactiveCards/send`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendCardRequest {
    pub card_template_id: String,
    pub card_biz_id: String,
    pub robot_code: String,
    pub card_data: String,
    pub send_options: SendOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single_chat_receiver: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_conversation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOptions {
    pub at_user_list_json: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AtUser<'a> {
    nick_name: &'a str,
    user_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SingleChatReceiver<'a> {
    user_id: &'a str,
}

impl SendCardRequest {
    /// Card creation for the thread of `message`: @-mentions the sender and routes to the
    /// sender directly (private chat) or to the conversation (group chat).
    pub fn new(
        card_template_id: &str,
        card_biz_id: String,
        card_data: String,
        message: &IncomingMessage,
    ) -> Result<Self, serde_json::Error> {
        let at_users = [AtUser {
            nick_name: &message.sender_nick,
            user_id: &message.sender_staff_id,
        }];
        let (single_chat_receiver, open_conversation_id) = match message.card_receiver() {
            CardReceiver::SingleChat { user_id } => (
                Some(serde_json::to_string(&SingleChatReceiver { user_id: &user_id })?),
                None,
            ),
            CardReceiver::Group {
                open_conversation_id,
            } => (None, Some(open_conversation_id)),
        };
        Ok(Self {
            card_template_id: card_template_id.to_string(),
            card_biz_id,
            robot_code: message.robot_code.clone(),
            card_data,
            send_options: SendOptions {
                at_user_list_json: serde_json::to_string(&at_users)?,
            },
            single_chat_receiver,
            open_conversation_id,
        })
    }
}

/// Body of `PUT /v1.0/im/robots/interactiveCards`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCardRequest {
    pub card_biz_id: String,
    pub card_data: String,
}

/// Markdown message posted to a conversation's session webhook.
#[derive(Debug, Clone, Serialize)]
pub struct MarkdownMessage {
    pub msgtype: &'static str,
    pub markdown: MarkdownBody,
    pub at: AtMention,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkdownBody {
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AtMention {
    pub at_user_ids: Vec<String>,
}

impl MarkdownMessage {
    pub fn new(title: &str, text: String, mention_user_id: &str) -> Self {
        Self {
            msgtype: "markdown",
            markdown: MarkdownBody {
                title: title.to_string(),
                text,
            },
            at: AtMention {
                at_user_ids: vec![mention_user_id.to_string()],
            },
        }
    }
}
