//! Telegram Bot API client (sendMessage / sendPhoto)
//!
//! Text and captions are plain text; they are HTML-escaped before being sent
//! with `parse_mode: HTML`.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::TelegramConfig;

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram API error ({code}): {description}")]
    Api { code: u16, description: String },

    #[error("Missing bot token")]
    MissingToken,
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub api_base: String,
    pub token: String,
    pub timeout: Duration,
}

impl BotConfig {
    /// Build from the `[telegram]` section; the token is read from `bot_token_env`.
    pub fn from_config(config: &TelegramConfig) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: std::env::var(&config.bot_token_env).unwrap_or_default(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TelegramClient {
    client: Client,
    config: BotConfig,
}

impl TelegramClient {
    pub fn new(config: BotConfig) -> Result<Self, TelegramError> {
        if config.token.is_empty() {
            return Err(TelegramError::MissingToken);
        }
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    /// Returns Telegram's `message_id`.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<i64, TelegramError> {
        let body = json!({
            "chat_id": chat_id,
            "text": escape_html(text),
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        self.call("sendMessage", body).await.map(message_id)
    }

    pub async fn send_photo(
        &self,
        chat_id: &str,
        photo_url: &str,
        caption: Option<&str>,
    ) -> Result<i64, TelegramError> {
        let mut body = json!({
            "chat_id": chat_id,
            "photo": photo_url,
        });
        if let Some(caption) = caption {
            body["caption"] = json!(escape_html(caption));
            body["parse_mode"] = json!("HTML");
        }
        self.call("sendPhoto", body).await.map(message_id)
    }

    async fn call(&self, api_method: &str, body: Value) -> Result<Value, TelegramError> {
        let url = format!("{}/bot{}/{}", self.config.api_base, self.config.token, api_method);
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status().as_u16();

        let text = response.text().await?;
        let parsed: Option<ApiResponse> = serde_json::from_str(&text).ok();

        match parsed {
            Some(ApiResponse { ok: true, result, .. }) => Ok(result.unwrap_or(Value::Null)),
            Some(ApiResponse {
                error_code,
                description,
                ..
            }) => {
                let code = error_code.unwrap_or(status);
                let description = description.unwrap_or_else(|| "unknown error".to_string());
                tracing::warn!(method = api_method, code, description = %description, "Telegram API error");
                Err(TelegramError::Api { code, description })
            }
            None => Err(TelegramError::Api {
                code: status,
                description: text,
            }),
        }
    }
}

/// Escape the three characters Telegram's HTML parser treats as markup.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

fn message_id(result: Value) -> i64 {
    result.get("message_id").and_then(Value::as_i64).unwrap_or_default()
}
