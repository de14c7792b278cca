//! Youdao text translation API (signType v3).
//! sign = sha256(appKey + input + salt + curtime + appSecret), where `input`
//! is the text itself up to 20 chars, otherwise first 10 + char count + last 10.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::YoudaoConfig;
use crate::error::{GraphlateError, Result};
use super::TranslationClient;

#[derive(Debug, Deserialize)]
struct YoudaoResponse {
    #[serde(rename = "errorCode")]
    error_code: String,
    #[serde(default)]
    translation: Vec<String>,
}

pub struct YoudaoClient {
    client: Client,
    endpoint: String,
    app_key: String,
    app_secret: String,
}

impl YoudaoClient {
    pub fn new(config: &YoudaoConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            app_key: config.app_key.clone(),
            app_secret: config.app_secret.clone(),
        })
    }

    fn sign(&self, text: &str, salt: &str, curtime: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.app_key.as_bytes());
        hasher.update(sign_input(text).as_bytes());
        hasher.update(salt.as_bytes());
        hasher.update(curtime.as_bytes());
        hasher.update(self.app_secret.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl TranslationClient for YoudaoClient {
    async fn translate(
        &self,
        text: &str,
        from: &str,
        to: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(GraphlateError::Cancelled);
        }

        let salt = uuid::Uuid::new_v4().to_string();
        let curtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .to_string();
        let sign = self.sign(text, &salt, &curtime);
        let from = youdao_language(from);
        let to = youdao_language(to);

        let params = [
            ("q", text),
            ("from", from),
            ("to", to),
            ("appKey", self.app_key.as_str()),
            ("salt", salt.as_str()),
            ("sign", sign.as_str()),
            ("signType", "v3"),
            ("curtime", curtime.as_str()),
        ];

        debug!(from, to, "sending Youdao translation request");
        let request = async {
            let response = self.client.post(&self.endpoint).form(&params).send().await?;
            if !response.status().is_success() {
                return Err(GraphlateError::Translation(format!(
                    "Youdao API error {}",
                    response.status()
                )));
            }
            Ok::<_, GraphlateError>(response.json::<YoudaoResponse>().await?)
        };

        let body = tokio::select! {
            body = request => body?,
            _ = cancel.cancelled() => return Err(GraphlateError::Cancelled),
        };

        parse_response(body)
    }

    fn name(&self) -> &'static str {
        "youdao"
    }
}

fn parse_response(body: YoudaoResponse) -> Result<String> {
    if body.error_code != "0" {
        return Err(GraphlateError::Translation(format!(
            "Youdao errorCode {}",
            body.error_code
        )));
    }
    if body.translation.is_empty() {
        return Err(GraphlateError::Translation("Youdao returned no translation".to_string()));
    }
    Ok(body.translation.join("\n"))
}

fn sign_input(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    if len <= 20 {
        return text.to_string();
    }
    let head: String = chars[..10].iter().collect();
    let tail: String = chars[len - 10..].iter().collect();
    format!("{}{}{}", head, len, tail)
}

/// Youdao spells simplified Chinese `zh-CHS`.
fn youdao_language(code: &str) -> &str {
    match code {
        "zh" => "zh-CHS",
        other => other,
    }
}
