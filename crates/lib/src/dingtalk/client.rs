//! DingTalk open API client: access token (cached), media upload, and JSON calls.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{MediaUploader, TokenProvider, Transport, TransportError};
use crate::config::{self, Config};

const ACCESS_TOKEN_HEADER: &str = "x-acs-dingtalk-access-token";
/// Refresh the token this long before DingTalk says it expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessTokenResponse {
    access_token: String,
    #[serde(default)]
    expire_in: u64,
}

#[derive(Debug, Deserialize)]
struct MediaUploadResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    media_id: Option<String>,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// HTTP client for the DingTalk open API. Implements every collaborator trait the
/// reply coordinator needs, so one `Arc<DingTalkClient>` can back all three.
pub struct DingTalkClient {
    api_base: String,
    oapi_base: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    token: Mutex<Option<CachedToken>>,
    client: reqwest::Client,
}

impl DingTalkClient {
    /// Build a client from config; credentials are resolved with env overrides.
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.dingtalk.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            api_base: config.dingtalk.api_base.trim_end_matches('/').to_string(),
            oapi_base: config.dingtalk.oapi_base.trim_end_matches('/').to_string(),
            client_id: config::resolve_client_id(config),
            client_secret: config::resolve_client_secret(config),
            token: Mutex::new(None),
            client,
        })
    }

    /// POST /v1.0/oauth2/accessToken with the app credentials.
    async fn fetch_access_token(&self) -> Result<AccessTokenResponse, TransportError> {
        let app_key = self
            .client_id
            .as_deref()
            .ok_or_else(|| TransportError::Api("dingtalk client id not configured".to_string()))?;
        let app_secret = self
            .client_secret
            .as_deref()
            .ok_or_else(|| TransportError::Api("dingtalk client secret not configured".to_string()))?;
        let url = format!("{}/v1.0/oauth2/accessToken", self.api_base);
        let body = serde_json::json!({ "appKey": app_key, "appSecret": app_secret });
        let res = self.client.post(&url).json(&body).send().await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(TransportError::Status { status, body });
        }
        Ok(res.json().await?)
    }

    async fn send_json(
        &self,
        req: reqwest::RequestBuilder,
        access_token: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, TransportError> {
        let mut req = req.header(ACCEPT, "*/*").json(body);
        if let Some(token) = access_token {
            req = req.header(ACCESS_TOKEN_HEADER, token);
        }
        let res = req.send().await?;
        let status = res.status();
        let text = res.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)))
    }
}

#[async_trait]
impl TokenProvider for DingTalkClient {
    async fn access_token(&self) -> Result<String, TransportError> {
        let mut cached = self.token.lock().await;
        if let Some(ref t) = *cached {
            if Instant::now() < t.refresh_at {
                return Ok(t.value.clone());
            }
        }
        let fresh = self.fetch_access_token().await?;
        let lifetime = Duration::from_secs(fresh.expire_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        log::debug!("dingtalk: refreshed access token, expires in {}s", fresh.expire_in);
        *cached = Some(CachedToken {
            value: fresh.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(fresh.access_token)
    }
}

#[async_trait]
impl MediaUploader for DingTalkClient {
    /// Multipart POST to /media/upload (type=image); returns the media id.
    async fn upload_media(&self, content: Vec<u8>) -> Result<String, TransportError> {
        let token = self.access_token().await?;
        let url = format!("{}/media/upload", self.oapi_base);
        let part = reqwest::multipart::Part::bytes(content)
            .file_name("image.png")
            .mime_str("image/png")?;
        let form = reqwest::multipart::Form::new().part("media", part);
        let res = self
            .client
            .post(&url)
            .query(&[("access_token", token.as_str()), ("type", "image")])
            .multipart(form)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(TransportError::Status { status, body });
        }
        let data: MediaUploadResponse = res.json().await?;
        if data.errcode != 0 {
            return Err(TransportError::Api(format!(
                "media upload errcode={} errmsg={}",
                data.errcode, data.errmsg
            )));
        }
        data.media_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| TransportError::Api("media upload returned no media_id".to_string()))
    }
}

#[async_trait]
impl Transport for DingTalkClient {
    async fn post_json(
        &self,
        url: &str,
        access_token: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, TransportError> {
        self.send_json(self.client.post(url), access_token, body).await
    }

    async fn put_json(
        &self,
        url: &str,
        access_token: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, TransportError> {
        self.send_json(self.client.put(url), access_token, body).await
    }
}
