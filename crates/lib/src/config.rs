//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.sdbot/config.json`) and environment.
//! Credentials may come from the environment so the file can be shared without secrets.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::reply::MessageKind;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// DingTalk app credentials and API endpoints.
    #[serde(default)]
    pub dingtalk: DingTalkConfig,

    /// How replies are rendered (card template, titles, placeholder media).
    #[serde(default)]
    pub reply: ReplyConfig,
}

/// DingTalk app credentials and endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DingTalkConfig {
    /// App key (client id). Overridden by DINGTALK_CLIENT_ID env.
    pub client_id: Option<String>,

    /// App secret (client secret). Overridden by DINGTALK_CLIENT_SECRET env.
    pub client_secret: Option<String>,

    /// Base URL of the v1.0 open API (tokens, interactive cards).
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Base URL of the legacy open API (media upload).
    #[serde(default = "default_oapi_base")]
    pub oapi_base: String,

    /// Per-request timeout in seconds (default 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://api.dingtalk.com".to_string()
}

fn default_oapi_base() -> String {
    "https://oapi.dingtalk.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for DingTalkConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            api_base: default_api_base(),
            oapi_base: default_oapi_base(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Reply rendering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyConfig {
    /// Default rendering for final results: "card" (default) or "markdown".
    #[serde(default)]
    pub message_type: MessageKind,

    #[serde(default = "default_card_template_id")]
    pub card_template_id: String,

    /// Card header title.
    #[serde(default = "default_card_title")]
    pub card_title: String,

    /// Card header logo (media id).
    #[serde(default = "default_card_logo")]
    pub card_logo: String,

    /// Media id shown in place of each image while generation is in progress.
    #[serde(default = "default_progress_media_id")]
    pub progress_media_id: String,

    /// Title of markdown replies (shown in conversation previews).
    #[serde(default = "default_markdown_title")]
    pub markdown_title: String,

    /// Attribution rendered in the card footer after "Powered by".
    #[serde(default = "default_attribution")]
    pub attribution: String,
}

fn default_card_template_id() -> String {
    "StandardCard".to_string()
}

fn default_card_title() -> String {
    "Stable Diffusion Bot".to_string()
}

fn default_card_logo() -> String {
    "@lALPDtXaA1csu9g4MA".to_string()
}

fn default_progress_media_id() -> String {
    "@lALPDeC2-ctyLH_NAgDNAgA".to_string()
}

fn default_markdown_title() -> String {
    "jxm画图机器人".to_string()
}

fn default_attribution() -> String {
    "[https://github.com/chzealot/dingtalk-stable-diffusion](https://github.com/chzealot/dingtalk-stable-diffusion)"
        .to_string()
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            message_type: MessageKind::default(),
            card_template_id: default_card_template_id(),
            card_title: default_card_title(),
            card_logo: default_card_logo(),
            progress_media_id: default_progress_media_id(),
            markdown_title: default_markdown_title(),
            attribution: default_attribution(),
        }
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the app key: env DINGTALK_CLIENT_ID overrides config.
pub fn resolve_client_id(config: &Config) -> Option<String> {
    env_non_empty("DINGTALK_CLIENT_ID").or_else(|| trimmed(&config.dingtalk.client_id))
}

/// Resolve the app secret: env DINGTALK_CLIENT_SECRET overrides config.
pub fn resolve_client_secret(config: &Config) -> Option<String> {
    env_non_empty("DINGTALK_CLIENT_SECRET").or_else(|| trimmed(&config.dingtalk.client_secret))
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("SDBOT_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".sdbot").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, the default path, or SDBOT_CONFIG_PATH. Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Create the config directory and write a default config file if none exists.
/// Returns true when a new file was written.
pub fn init_config(config_path: &Path) -> Result<bool> {
    if config_path.exists() {
        log::debug!("config already exists at {}, skipping", config_path.display());
        return Ok(false);
    }
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;
    let body = serde_json::to_string_pretty(&Config::default())
        .context("serializing default config")?;
    std::fs::write(config_path, body)
        .with_context(|| format!("writing default config to {}", config_path.display()))?;
    log::info!("created default config at {}", config_path.display());
    Ok(true)
}
