//! Reply coordinator: delivers progress and final results for one triggering message.
//!
//! A reply thread moves `START → {MarkdownSent | CardNew | CardUpdated}` and, when the card
//! channel answers 403, on to `DowngradedMarkdown`. Cards are addressed by
//! [`IncomingMessage::card_biz_id`], so nothing is tracked locally between calls.
//! Failures are logged and reported as a state; nothing is retried.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::card::{self, CardData};
use crate::compose;
use crate::config::{Config, ReplyConfig};
use crate::dingtalk::{
    CardEndpoints, DingTalkClient, MarkdownMessage, MediaUploader, SendCardRequest, TokenProvider,
    Transport, TransportError, UpdateCardRequest,
};
use crate::message::IncomingMessage;

/// How a final result is rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Markdown,
    #[default]
    Card,
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "markdown" => Ok(MessageKind::Markdown),
            "card" => Ok(MessageKind::Card),
            other => Err(format!("unknown message type: {} (expected markdown or card)", other)),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Markdown => f.write_str("markdown"),
            MessageKind::Card => f.write_str("card"),
        }
    }
}

/// Where a reply call left the thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyState {
    /// Caller-input error (no images); nothing was sent.
    Aborted,
    MarkdownSent,
    CardNew,
    CardUpdated,
    /// The card was refused (403) and the result went out as markdown instead.
    DowngradedMarkdown,
    /// Compositing, upload, or remote call failed; details are in the log.
    Failed,
}

/// Outcome of a card send or update.
#[derive(Debug, Clone, PartialEq)]
pub enum CardResult {
    Success(serde_json::Value),
    /// HTTP status of the failed call, or None when no response was received.
    Failure(Option<u16>),
}

impl CardResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CardResult::Success(_))
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, CardResult::Failure(Some(403)))
    }
}

/// Delivers replies through injected DingTalk collaborators.
pub struct ReplyCoordinator {
    settings: ReplyConfig,
    endpoints: CardEndpoints,
    tokens: Arc<dyn TokenProvider>,
    media: Arc<dyn MediaUploader>,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
}

impl ReplyCoordinator {
    pub fn new(
        settings: ReplyConfig,
        endpoints: CardEndpoints,
        tokens: Arc<dyn TokenProvider>,
        media: Arc<dyn MediaUploader>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            settings,
            endpoints,
            tokens,
            media,
            transport,
            cancel: CancellationToken::new(),
        }
    }

    /// Coordinator backed by a single DingTalk client for tokens, media, and transport.
    pub fn from_client(config: &Config, client: Arc<DingTalkClient>) -> Self {
        Self::new(
            config.reply.clone(),
            CardEndpoints::new(&config.dingtalk.api_base),
            client.clone(),
            client.clone(),
            client,
        )
    }

    /// Abandon in-flight remote calls once `cancel` fires; abandoned calls count as failures.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    async fn guarded<T>(
        &self,
        call: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransportError::Cancelled),
            res = call => res,
        }
    }

    /// Deliver a finished result. Empty `images` is a caller error and sends nothing.
    pub async fn reply(
        &self,
        kind: MessageKind,
        images: &[DynamicImage],
        elapsed_secs: f64,
        message: &IncomingMessage,
    ) -> ReplyState {
        if images.is_empty() {
            log::error!("empty image list, cid={}", message.conversation_id);
            return ReplyState::Aborted;
        }
        match kind {
            MessageKind::Markdown => self.reply_markdown(images, elapsed_secs, message).await,
            MessageKind::Card => self.reply_card(images, elapsed_secs, message).await,
        }
    }

    /// Show generation progress on the thread's card, with `image_count` placeholder images.
    /// `is_new` creates the card; otherwise the existing card is updated in place.
    pub async fn reply_progress(
        &self,
        is_new: bool,
        progress: Option<&str>,
        image_count: usize,
        elapsed_secs: f64,
        message: &IncomingMessage,
    ) -> ReplyState {
        log::info!(
            "progress={}, elapse={:.3}s, type={:?}, cid={}",
            progress.unwrap_or("-"),
            elapsed_secs,
            message.conversation_type,
            message.conversation_id
        );
        if image_count == 0 {
            log::error!("empty image list, cid={}", message.conversation_id);
            return ReplyState::Aborted;
        }
        let images = vec![self.settings.progress_media_id.clone(); image_count];
        if is_new {
            match self.send_card(progress, images, elapsed_secs, message).await {
                CardResult::Success(_) => ReplyState::CardNew,
                CardResult::Failure(_) => ReplyState::Failed,
            }
        } else {
            match self.update_card(progress, images, elapsed_secs, message).await {
                CardResult::Success(_) => ReplyState::CardUpdated,
                CardResult::Failure(_) => ReplyState::Failed,
            }
        }
    }

    /// Compose the images into one preview, upload it, and post a markdown message
    /// that @-mentions the sender.
    pub async fn reply_markdown(
        &self,
        images: &[DynamicImage],
        elapsed_secs: f64,
        message: &IncomingMessage,
    ) -> ReplyState {
        if images.is_empty() {
            log::error!("empty image list, cid={}", message.conversation_id);
            return ReplyState::Aborted;
        }
        let content = match compose::merge_images(images) {
            Ok(c) => c,
            Err(e) => {
                log::error!("reply markdown failed, error={}", e);
                return ReplyState::Failed;
            }
        };
        let media_id = match self.guarded(self.media.upload_media(content)).await {
            Ok(id) => id,
            Err(e) => {
                log::error!("upload image failed, error={}", e);
                return ReplyState::Failed;
            }
        };
        let text = card::markdown_body(message.prompt(), &media_id, elapsed_secs);
        match self
            .send_markdown(&self.settings.markdown_title, text, message)
            .await
        {
            Some(_) => ReplyState::MarkdownSent,
            None => ReplyState::Failed,
        }
    }

    /// POST a markdown message to the message's session webhook. None on failure.
    pub async fn send_markdown(
        &self,
        title: &str,
        text: String,
        message: &IncomingMessage,
    ) -> Option<serde_json::Value> {
        if message.session_webhook.is_empty() {
            log::error!("reply markdown failed, error=no session webhook");
            return None;
        }
        let body = match serde_json::to_value(MarkdownMessage::new(
            title,
            text,
            &message.sender_staff_id,
        )) {
            Ok(b) => b,
            Err(e) => {
                log::error!("reply markdown failed, error={}", e);
                return None;
            }
        };
        match self
            .guarded(self.transport.post_json(&message.session_webhook, None, &body))
            .await
        {
            Ok(v) => Some(v),
            Err(e) => {
                log::error!("reply markdown failed, error={}", e);
                None
            }
        }
    }

    /// Upload each image and replace the progress card with the final result.
    /// A 403 from the card API downgrades to a markdown reply with the same images.
    pub async fn reply_card(
        &self,
        images: &[DynamicImage],
        elapsed_secs: f64,
        message: &IncomingMessage,
    ) -> ReplyState {
        if images.is_empty() {
            log::error!("empty image list, cid={}", message.conversation_id);
            return ReplyState::Aborted;
        }
        let mut medias = Vec::with_capacity(images.len());
        for image in images {
            match self.upload_image(image).await {
                Some(id) => medias.push(id),
                None => return ReplyState::Failed,
            }
        }
        let result = self.update_card(None, medias, elapsed_secs, message).await;
        if result.is_permission_denied() {
            log::warn!(
                "card update forbidden, downgrading to markdown, cid={}",
                message.conversation_id
            );
            return match self.reply_markdown(images, elapsed_secs, message).await {
                ReplyState::MarkdownSent => ReplyState::DowngradedMarkdown,
                other => other,
            };
        }
        match result {
            CardResult::Success(_) => ReplyState::CardUpdated,
            CardResult::Failure(_) => ReplyState::Failed,
        }
    }

    async fn upload_image(&self, image: &DynamicImage) -> Option<String> {
        let content = match compose::encode_png(image) {
            Ok(c) => c,
            Err(e) => {
                log::error!("upload image failed, error={}", e);
                return None;
            }
        };
        match self.guarded(self.media.upload_media(content)).await {
            Ok(id) => Some(id),
            Err(e) => {
                log::error!("upload image failed, error={}", e);
                None
            }
        }
    }

    /// Create the thread's card, routed to the sender (private) or the conversation (group).
    pub async fn send_card(
        &self,
        progress: Option<&str>,
        images: Vec<String>,
        elapsed_secs: f64,
        message: &IncomingMessage,
    ) -> CardResult {
        let card_data = CardData::build(&self.settings, progress, images, elapsed_secs, message.prompt());
        let body = card_data.to_json_string().and_then(|data| {
            let req = SendCardRequest::new(
                &self.settings.card_template_id,
                message.card_biz_id(),
                data,
                message,
            )?;
            serde_json::to_value(req)
        });
        match body {
            Ok(body) => self.card_call("send card", &self.endpoints.send, body, false).await,
            Err(e) => {
                log::error!("send card failed, error={}", e);
                CardResult::Failure(None)
            }
        }
    }

    /// Replace the content of the thread's card.
    pub async fn update_card(
        &self,
        progress: Option<&str>,
        images: Vec<String>,
        elapsed_secs: f64,
        message: &IncomingMessage,
    ) -> CardResult {
        let card_data = CardData::build(&self.settings, progress, images, elapsed_secs, message.prompt());
        let body = card_data.to_json_string().and_then(|data| {
            serde_json::to_value(UpdateCardRequest {
                card_biz_id: message.card_biz_id(),
                card_data: data,
            })
        });
        match body {
            Ok(body) => self.card_call("update card", &self.endpoints.update, body, true).await,
            Err(e) => {
                log::error!("update card failed, error={}", e);
                CardResult::Failure(None)
            }
        }
    }

    async fn card_call(
        &self,
        action: &str,
        url: &str,
        body: serde_json::Value,
        put: bool,
    ) -> CardResult {
        let token = match self.guarded(self.tokens.access_token()).await {
            Ok(t) => t,
            Err(e) => {
                log::error!("{} failed, error=access token: {}", action, e);
                return CardResult::Failure(None);
            }
        };
        let res = if put {
            self.guarded(self.transport.put_json(url, Some(&token), &body)).await
        } else {
            self.guarded(self.transport.post_json(url, Some(&token), &body)).await
        };
        match res {
            Ok(v) => CardResult::Success(v),
            Err(e) => {
                log::error!("{} failed, error={}", action, e);
                CardResult::Failure(e.status())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_kind_parses_and_defaults_to_card() {
        assert_eq!("markdown".parse::<MessageKind>().unwrap(), MessageKind::Markdown);
        assert_eq!(" Card ".parse::<MessageKind>().unwrap(), MessageKind::Card);
        assert!("html".parse::<MessageKind>().is_err());
        assert_eq!(MessageKind::default(), MessageKind::Card);
        assert_eq!(MessageKind::Markdown.to_string(), "markdown");
    }

    #[test]
    fn only_403_is_permission_denied() {
        assert!(CardResult::Failure(Some(403)).is_permission_denied());
        assert!(!CardResult::Failure(Some(500)).is_permission_denied());
        assert!(!CardResult::Failure(None).is_permission_denied());
        assert!(!CardResult::Success(serde_json::Value::Null).is_permission_denied());
        assert!(CardResult::Success(serde_json::Value::Null).is_success());
    }
}
