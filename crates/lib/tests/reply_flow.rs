//! Reply lifecycle against an in-process DingTalk fake that records every call.
//! No network access is needed.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use sdbot::config::ReplyConfig;
use sdbot::dingtalk::{CardEndpoints, MediaUploader, TokenProvider, Transport, TransportError};
use sdbot::message::{ConversationType, IncomingMessage, TextContent};
use sdbot::progress::ProgressReporter;
use sdbot::{MessageKind, ReplyCoordinator, ReplyState};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

const API_BASE: &str = "http://dingtalk.test";
const WEBHOOK: &str = "http://dingtalk.test/robot/sendBySession?session=abc";

#[derive(Debug, Clone)]
enum Call {
    Upload(Vec<u8>),
    Post {
        url: String,
        token: Option<String>,
        body: Value,
    },
    Put {
        url: String,
        token: Option<String>,
        body: Value,
    },
}

#[derive(Default)]
struct FakeDingTalk {
    calls: Mutex<Vec<Call>>,
    /// When set, every PUT fails with this HTTP status.
    put_status: Option<u16>,
}

impl FakeDingTalk {
    fn failing_updates(status: u16) -> Self {
        Self {
            put_status: Some(status),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn uploads(&self) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Upload(bytes) => Some(bytes),
                _ => None,
            })
            .collect()
    }

    fn posts_to(&self, url: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Post { url: u, body, .. } if u == url => Some(body),
                _ => None,
            })
            .collect()
    }

    fn puts(&self) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Put { body, .. } => Some(body),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl TokenProvider for FakeDingTalk {
    async fn access_token(&self) -> Result<String, TransportError> {
        Ok("tok-123".to_string())
    }
}

#[async_trait]
impl MediaUploader for FakeDingTalk {
    async fn upload_media(&self, content: Vec<u8>) -> Result<String, TransportError> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(Call::Upload(content));
        let n = calls.iter().filter(|c| matches!(c, Call::Upload(_))).count();
        Ok(format!("@media{}", n))
    }
}

#[async_trait]
impl Transport for FakeDingTalk {
    async fn post_json(
        &self,
        url: &str,
        access_token: Option<&str>,
        body: &Value,
    ) -> Result<Value, TransportError> {
        self.calls.lock().unwrap().push(Call::Post {
            url: url.to_string(),
            token: access_token.map(str::to_string),
            body: body.clone(),
        });
        Ok(serde_json::json!({ "errcode": 0 }))
    }

    async fn put_json(
        &self,
        url: &str,
        access_token: Option<&str>,
        body: &Value,
    ) -> Result<Value, TransportError> {
        self.calls.lock().unwrap().push(Call::Put {
            url: url.to_string(),
            token: access_token.map(str::to_string),
            body: body.clone(),
        });
        match self.put_status {
            Some(status) => Err(TransportError::Status {
                status,
                body: r#"{"code":"Forbidden"}"#.to_string(),
            }),
            None => Ok(Value::Null),
        }
    }
}

fn coordinator(fake: &Arc<FakeDingTalk>) -> ReplyCoordinator {
    ReplyCoordinator::new(
        ReplyConfig::default(),
        CardEndpoints::new(API_BASE),
        fake.clone(),
        fake.clone(),
        fake.clone(),
    )
}

fn message(conversation_type: ConversationType) -> IncomingMessage {
    IncomingMessage {
        conversation_type,
        conversation_id: "convZ".to_string(),
        sender_id: "senderX".to_string(),
        sender_corp_id: "corpY".to_string(),
        sender_staff_id: "staff42".to_string(),
        sender_nick: "Zoe".to_string(),
        message_id: "msgW".to_string(),
        robot_code: "robotR".to_string(),
        text: TextContent {
            content: "  an astronaut riding a horse \n".to_string(),
        },
        session_webhook: WEBHOOK.to_string(),
    }
}

fn solid(w: u32, h: u32, rgb: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb(rgb)))
}

fn card_data(body: &Value) -> Value {
    let s = body["cardData"].as_str().expect("cardData is a JSON string");
    serde_json::from_str(s).expect("cardData parses")
}

fn send_url() -> String {
    CardEndpoints::new(API_BASE).send
}

#[tokio::test]
async fn private_card_thread_creates_then_updates_same_card() {
    let fake = Arc::new(FakeDingTalk::default());
    let coord = coordinator(&fake);
    let msg = message(ConversationType::Private);

    let state = coord.reply_progress(true, Some("0%"), 1, 0.0, &msg).await;
    assert_eq!(state, ReplyState::CardNew);
    let state = coord
        .reply(MessageKind::Card, &[solid(256, 256, [9, 9, 9])], 1.234, &msg)
        .await;
    assert_eq!(state, ReplyState::CardUpdated);

    let expected_id = sdbot::address::card_biz_id("senderX", "corpY", "convZ", "msgW");
    let creates = fake.posts_to(&send_url());
    assert_eq!(creates.len(), 1);
    let create = &creates[0];
    assert_eq!(create["cardBizId"], Value::String(expected_id.clone()));
    assert_eq!(create["cardTemplateId"], "StandardCard");
    assert_eq!(create["robotCode"], "robotR");
    assert_eq!(create["singleChatReceiver"], r#"{"userId":"staff42"}"#);
    assert!(create.get("openConversationId").is_none());

    assert_eq!(fake.uploads().len(), 1);
    let updates = fake.puts();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["cardBizId"], Value::String(expected_id));
    let data = card_data(&updates[0]);
    let contents = data["contents"].as_array().unwrap();
    assert_eq!(contents.len(), 3);
    assert_eq!(contents[0]["text"], "Prompt: an astronaut riding a horse");
    assert_eq!(contents[1]["type"], "imageList");
    assert_eq!(contents[1]["images"], serde_json::json!(["@media1"]));
    assert!(contents[2]["text"].as_str().unwrap().contains("Elapse 1.234s"));
}

#[tokio::test]
async fn card_calls_carry_access_token() {
    let fake = Arc::new(FakeDingTalk::default());
    let coord = coordinator(&fake);
    let msg = message(ConversationType::Group);
    coord.reply_progress(true, Some("0%"), 2, 0.1, &msg).await;
    coord.reply_progress(false, Some("10%"), 2, 0.2, &msg).await;
    for call in fake.calls() {
        match call {
            Call::Post { token, .. } | Call::Put { token, .. } => {
                assert_eq!(token.as_deref(), Some("tok-123"))
            }
            Call::Upload(_) => panic!("progress updates must not upload"),
        }
    }
}

#[tokio::test]
async fn group_progress_card_routes_to_conversation() {
    let fake = Arc::new(FakeDingTalk::default());
    let coord = coordinator(&fake);
    let msg = message(ConversationType::Group);
    coord.reply_progress(true, Some("0%"), 2, 0.0, &msg).await;

    let create = &fake.posts_to(&send_url())[0];
    assert_eq!(create["openConversationId"], "convZ");
    assert!(create.get("singleChatReceiver").is_none());
    assert_eq!(
        create["sendOptions"]["atUserListJson"],
        r#"[{"nickName":"Zoe","userId":"staff42"}]"#
    );
    let data = card_data(create);
    assert_eq!(data["contents"][0]["text"], "处理中，进度 0% ...");
    assert_eq!(
        data["contents"][2]["images"],
        serde_json::json!(["@lALPDeC2-ctyLH_NAgDNAgA", "@lALPDeC2-ctyLH_NAgDNAgA"])
    );
}

#[tokio::test]
async fn progress_updates_target_the_same_card() {
    let fake = Arc::new(FakeDingTalk::default());
    let coord = coordinator(&fake);
    let msg = message(ConversationType::Group);

    assert_eq!(
        coord.reply_progress(true, Some("0%"), 1, 0.0, &msg).await,
        ReplyState::CardNew
    );
    assert_eq!(
        coord.reply_progress(false, Some("50%"), 1, 3.0, &msg).await,
        ReplyState::CardUpdated
    );

    let created = &fake.posts_to(&send_url())[0];
    let updated = &fake.puts()[0];
    assert_eq!(created["cardBizId"], updated["cardBizId"]);
    assert_eq!(created["cardBizId"], Value::String(msg.card_biz_id()));
}

#[tokio::test]
async fn four_image_markdown_reply_uploads_one_grid() {
    let fake = Arc::new(FakeDingTalk::default());
    let coord = coordinator(&fake);
    let msg = message(ConversationType::Group);
    let colors = [[200, 0, 0], [0, 200, 0], [0, 0, 200], [200, 200, 200]];
    let images: Vec<_> = colors.iter().map(|c| solid(100, 100, *c)).collect();

    let state = coord.reply(MessageKind::Markdown, &images, 7.5, &msg).await;
    assert_eq!(state, ReplyState::MarkdownSent);

    let uploads = fake.uploads();
    assert_eq!(uploads.len(), 1);
    let grid = image::load_from_memory(&uploads[0]).unwrap();
    assert_eq!(grid.dimensions(), (200, 200));
    let grid = grid.to_rgb8();
    assert_eq!(grid.get_pixel(10, 10).0, colors[0]);
    assert_eq!(grid.get_pixel(110, 10).0, colors[1]);
    assert_eq!(grid.get_pixel(10, 110).0, colors[2]);
    assert_eq!(grid.get_pixel(110, 110).0, colors[3]);

    let posts = fake.posts_to(WEBHOOK);
    assert_eq!(posts.len(), 1);
    assert_eq!(fake.calls().len(), 2);
    let body = &posts[0];
    assert_eq!(body["msgtype"], "markdown");
    assert_eq!(body["markdown"]["title"], "jxm画图机器人");
    assert_eq!(body["at"]["atUserIds"], serde_json::json!(["staff42"]));
    let text = body["markdown"]["text"].as_str().unwrap();
    assert!(text.starts_with("#### Prompt: an astronaut riding a horse\n\n![image](@media1)"));
    assert!(text.contains("> cost 7.5s"));
}

#[tokio::test]
async fn forbidden_card_update_downgrades_to_markdown_once() {
    let fake = Arc::new(FakeDingTalk::failing_updates(403));
    let coord = coordinator(&fake);
    let msg = message(ConversationType::Private);
    let images = vec![solid(64, 64, [1, 2, 3])];

    let state = coord.reply(MessageKind::Card, &images, 2.25, &msg).await;
    assert_eq!(state, ReplyState::DowngradedMarkdown);

    assert_eq!(fake.puts().len(), 1);
    assert!(fake.posts_to(&send_url()).is_empty());
    let markdown = fake.posts_to(WEBHOOK);
    assert_eq!(markdown.len(), 1);
    assert!(markdown[0]["markdown"]["text"]
        .as_str()
        .unwrap()
        .contains("> cost 2.25s"));
    // one upload for the card gallery, one for the markdown preview
    let uploads = fake.uploads();
    assert_eq!(uploads.len(), 2);
    let preview = image::load_from_memory(&uploads[1]).unwrap();
    assert_eq!(preview.dimensions(), (64, 64));
}

#[tokio::test]
async fn other_card_failures_are_not_downgraded() {
    let fake = Arc::new(FakeDingTalk::failing_updates(500));
    let coord = coordinator(&fake);
    let msg = message(ConversationType::Group);

    let state = coord
        .reply(MessageKind::Card, &[solid(8, 8, [0, 0, 0])], 1.0, &msg)
        .await;
    assert_eq!(state, ReplyState::Failed);
    assert!(fake.posts_to(WEBHOOK).is_empty());
    assert_eq!(fake.puts().len(), 1);
}

#[tokio::test]
async fn empty_input_makes_no_calls() {
    let fake = Arc::new(FakeDingTalk::default());
    let coord = coordinator(&fake);
    let msg = message(ConversationType::Group);

    assert_eq!(coord.reply(MessageKind::Card, &[], 1.0, &msg).await, ReplyState::Aborted);
    assert_eq!(
        coord.reply(MessageKind::Markdown, &[], 1.0, &msg).await,
        ReplyState::Aborted
    );
    assert_eq!(
        coord.reply_progress(true, Some("0%"), 0, 0.0, &msg).await,
        ReplyState::Aborted
    );
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn uncomposable_markdown_batch_is_not_sent() {
    let fake = Arc::new(FakeDingTalk::default());
    let coord = coordinator(&fake);
    let msg = message(ConversationType::Group);
    let images = vec![solid(8, 8, [0, 0, 0]), solid(8, 8, [1, 1, 1])];

    let state = coord.reply(MessageKind::Markdown, &images, 1.0, &msg).await;
    assert_eq!(state, ReplyState::Failed);
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn four_image_card_keeps_gallery_order() {
    let fake = Arc::new(FakeDingTalk::default());
    let coord = coordinator(&fake);
    let msg = message(ConversationType::Group);
    let images: Vec<_> = (0..4u8).map(|i| solid(16, 16, [i, i, i])).collect();

    let state = coord.reply(MessageKind::Card, &images, 4.0, &msg).await;
    assert_eq!(state, ReplyState::CardUpdated);
    assert_eq!(fake.uploads().len(), 4);
    let data = card_data(&fake.puts()[0]);
    assert_eq!(
        data["contents"][1]["images"],
        serde_json::json!(["@media1", "@media2", "@media3", "@media4"])
    );
}

#[tokio::test]
async fn cancelled_coordinator_abandons_calls() {
    let fake = Arc::new(FakeDingTalk::default());
    let cancel = CancellationToken::new();
    let coord = coordinator(&fake).with_cancellation(cancel.clone());
    let msg = message(ConversationType::Group);
    cancel.cancel();

    assert_eq!(
        coord.reply_progress(true, Some("0%"), 1, 0.0, &msg).await,
        ReplyState::Failed
    );
    assert_eq!(
        coord
            .reply(MessageKind::Markdown, &[solid(4, 4, [0, 0, 0])], 1.0, &msg)
            .await,
        ReplyState::Failed
    );
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn progress_reporter_maps_steps_to_percent() {
    let fake = Arc::new(FakeDingTalk::default());
    let coord = Arc::new(coordinator(&fake));
    let reporter = ProgressReporter::new(coord, message(ConversationType::Group), 50, 2);

    assert_eq!(reporter.percent(0), Some(0));
    assert_eq!(reporter.percent(1), Some(0));
    assert_eq!(reporter.percent(26), Some(50));
    assert_eq!(reporter.percent(50), Some(98));
    assert_eq!(reporter.percent(51), None);

    assert_eq!(reporter.start().await, ReplyState::CardNew);
    assert_eq!(reporter.on_step(26).await, Some(ReplyState::CardUpdated));
    assert_eq!(reporter.on_step(99).await, None);

    let data = card_data(&fake.puts()[0]);
    assert_eq!(data["contents"][0]["text"], "处理中，进度 50% ...");
    assert_eq!(fake.calls().len(), 2);

    let state = reporter
        .finish(MessageKind::Card, &[solid(4, 4, [0, 0, 0]), solid(4, 4, [1, 1, 1])])
        .await;
    assert_eq!(state, ReplyState::CardUpdated);
}

#[tokio::test]
async fn zero_step_job_reports_nothing() {
    let fake = Arc::new(FakeDingTalk::default());
    let reporter = ProgressReporter::new(
        Arc::new(coordinator(&fake)),
        message(ConversationType::Group),
        0,
        1,
    );
    assert_eq!(reporter.on_step(0).await, None);
    assert!(fake.calls().is_empty());
}
