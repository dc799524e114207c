//! DingTalk collaborators consumed by the reply coordinator.
//!
//! The coordinator only sees these traits; `DingTalkClient` is the HTTP implementation.
//! Tests substitute recording fakes.

mod client;
mod payload;

pub use client::DingTalkClient;
pub use payload::{
    AtMention, MarkdownBody, MarkdownMessage, SendCardRequest, SendOptions, UpdateCardRequest,
};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("dingtalk request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("dingtalk http {status}: {body}")]
    Status { status: u16, body: String },
    #[error("dingtalk api error: {0}")]
    Api(String),
    #[error("dingtalk call cancelled")]
    Cancelled,
}

impl TransportError {
    /// HTTP status of a non-success response, if the call got that far.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            TransportError::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Supplies the access token for card send/update calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, TransportError>;
}

/// Uploads image bytes and returns the media id usable in cards and markdown.
#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload_media(&self, content: Vec<u8>) -> Result<String, TransportError>;
}

/// JSON over HTTP. `access_token`, when present, is sent as `x-acs-dingtalk-access-token`.
/// An empty response body yields `Value::Null`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        access_token: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, TransportError>;

    async fn put_json(
        &self,
        url: &str,
        access_token: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, TransportError>;
}

/// Interactive card endpoints under the open API base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardEndpoints {
    pub send: String,
    pub update: String,
}

impl CardEndpoints {
    pub fn new(api_base: &str) -> Self {
        let base = api_base.trim_end_matches('/');
        Self {
            send: format!("{}/v1.0/im/v1.0/robot/interactiveCards/send", base),
            update: format!("{}/v1.0/im/robots/interactiveCards", base),
        }
    }
}
