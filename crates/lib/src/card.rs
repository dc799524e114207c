//! Reply content: the interactive card payload (`cardData`) and the markdown message body.
//!
//! Block ids are fixed so each update replaces the same slot on the rendered card.

use serde::Serialize;

use crate::config::ReplyConfig;

const PROGRESS_BLOCK_ID: &str = "text_1685500462094";
const PROMPT_BLOCK_ID: &str = "text_1685432118811";
const IMAGES_BLOCK_ID: &str = "imageList_1685500414369";
const FOOTER_BLOCK_ID: &str = "markdown_1685516479734";

/// Elapsed seconds rounded to 3 decimal places, as displayed in replies.
pub fn format_elapsed(elapsed_secs: f64) -> String {
    let rounded = (elapsed_secs.max(0.0) * 1000.0).round() / 1000.0;
    format!("{}", rounded)
}

/// One block of card content. Serialized as `{"type": ..., <payload>, "id": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String, id: String },
    #[serde(rename = "imageList")]
    ImageList { images: Vec<String>, id: String },
    #[serde(rename = "markdown")]
    Markdown { text: String, id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardConfig {
    pub auto_layout: bool,
    pub enable_forward: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardTitle {
    #[serde(rename = "type")]
    pub typ: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardHeader {
    pub title: CardTitle,
    pub logo: String,
}

/// The `cardData` document of a standard interactive card.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardData {
    pub config: CardConfig,
    pub header: CardHeader,
    pub contents: Vec<ContentBlock>,
}

impl CardData {
    /// Build card content for the current state of a reply thread.
    /// `progress` is None for the final result.
    pub fn build(
        settings: &ReplyConfig,
        progress: Option<&str>,
        images: Vec<String>,
        elapsed_secs: f64,
        prompt: &str,
    ) -> Self {
        let mut contents = Vec::with_capacity(4);
        if let Some(label) = progress.filter(|p| !p.is_empty()) {
            contents.push(ContentBlock::Text {
                text: format!("处理中，进度 {} ...", label),
                id: PROGRESS_BLOCK_ID.to_string(),
            });
        }
        contents.push(ContentBlock::Text {
            text: format!("Prompt: {}", prompt.trim()),
            id: PROMPT_BLOCK_ID.to_string(),
        });
        contents.push(ContentBlock::ImageList {
            images,
            id: IMAGES_BLOCK_ID.to_string(),
        });
        let footer = [
            format!("> Elapse {}s", format_elapsed(elapsed_secs)),
            format!("> Powered by {}", settings.attribution),
        ];
        contents.push(ContentBlock::Markdown {
            text: footer.join("\n"),
            id: FOOTER_BLOCK_ID.to_string(),
        });
        Self {
            config: CardConfig {
                auto_layout: true,
                enable_forward: true,
            },
            header: CardHeader {
                title: CardTitle {
                    typ: "text".to_string(),
                    text: settings.card_title.clone(),
                },
                logo: settings.card_logo.clone(),
            },
            contents,
        }
    }

    /// The card data as the JSON string the card API expects in `cardData`.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Body of a markdown reply with a single (possibly composed) image.
pub fn markdown_body(prompt: &str, media_id: &str, elapsed_secs: f64) -> String {
    format!(
        "#### Prompt: {}\n\n![image]({})\n\n> cost {}s\n> \n> Powered by Stable Diffusion\n> \n> via jxm\n",
        prompt.trim(),
        media_id,
        format_elapsed(elapsed_secs)
    )
}
