//! LLM gateway client — seller classification, expert matching, tariff advice
//!
//! Talks to an OpenAI-compatible chat-completions endpoint. Model output is
//! free text; the JSON inside it is dug out of markdown fences or the outermost
//! braces. If nothing parseable comes back, each operation returns a fixed
//! fallback value rather than an error. Transport failures and 5xx are retried
//! with backoff; 4xx never are.

use std::collections::HashSet;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::AiConfig;
use crate::models::Expert;

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum AiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Payment required")]
    PaymentRequired,

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing API key")]
    MissingApiKey,
}

impl AiError {
    /// Message safe to show to end users.
    pub fn user_message(&self) -> &'static str {
        match self {
            AiError::RateLimited => "Rate limit exceeded, please try again later.",
            AiError::PaymentRequired => "AI credits exhausted, please top up your workspace.",
            _ => "AI service is unavailable, please try again.",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AiError::RateLimited => 429,
            AiError::PaymentRequired => 402,
            _ => 500,
        }
    }

    fn is_transient(&self) -> bool {
        match self {
            AiError::Http(_) => true,
            AiError::Api { code, .. } => *code >= 500,
            _ => false,
        }
    }
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl GatewayConfig {
    /// Build from the `[ai]` section; the key is read from `api_key_env`.
    pub fn from_config(config: &AiConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: std::env::var(&config.api_key_env).unwrap_or_default(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellerClassification {
    #[serde(default)]
    pub seller_type: String,
    #[serde(default)]
    pub niche: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub summary: String,
}

impl SellerClassification {
    pub fn fallback() -> Self {
        Self {
            seller_type: "unknown".to_string(),
            niche: "unknown".to_string(),
            confidence: 0.0,
            summary: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertMatch {
    pub expert_id: String,
    pub score: f64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TariffRecommendation {
    pub tariff: String,
    #[serde(default)]
    pub reason: String,
}

// ============================================================================
// Chat API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Debug, Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorResponse {
    error: Option<GatewayErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorDetail {
    message: String,
}

// ============================================================================
// AiClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct AiClient {
    client: Client,
    config: GatewayConfig,
}

impl AiClient {
    pub fn new(config: GatewayConfig) -> Result<Self, AiError> {
        if config.api_key.is_empty() {
            return Err(AiError::MissingApiKey);
        }

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    /// One chat completion, retried on transient failures. A reply with no
    /// choices or no content comes back as an empty string.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String, AiError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let result = RetryIf::spawn(
            retry_strategy,
            || self.complete_once(system, user),
            |e: &AiError| e.is_transient(),
        )
        .await;

        if let Err(e) = &result {
            tracing::error!(error = %e, model = %self.config.model, "AI completion failed");
        }
        result
    }

    async fn complete_once(&self, system: &str, user: &str) -> Result<String, AiError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AiError::RateLimited);
        }
        if status.as_u16() == 402 {
            return Err(AiError::PaymentRequired);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<GatewayErrorResponse>(&body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(body);
            tracing::warn!(code = status.as_u16(), message = %message, "AI gateway error");
            return Err(AiError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            tracing::warn!(model = %self.config.model, "AI completion had no content");
        }
        Ok(content)
    }

    pub async fn classify_seller(&self, description: &str) -> Result<SellerClassification, AiError> {
        let system = "You classify online sellers. Reply with JSON only: \
            {\"seller_type\": string, \"niche\": string, \"confidence\": number between 0 and 1, \"summary\": string}.";
        let text = self.complete(system, description).await?;

        let parsed = extract_json(&text)
            .and_then(|v| serde_json::from_value::<SellerClassification>(v).ok())
            .filter(|c| !c.seller_type.trim().is_empty());

        Ok(match parsed {
            Some(mut c) => {
                c.confidence = c.confidence.clamp(0.0, 1.0);
                c
            }
            None => {
                tracing::warn!("Unparseable classification — using fallback");
                SellerClassification::fallback()
            }
        })
    }

    pub async fn match_experts(
        &self,
        query: &str,
        experts: &[Expert],
        limit: usize,
    ) -> Result<Vec<ExpertMatch>, AiError> {
        if experts.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let catalogue = serde_json::to_string(experts).unwrap_or_default();
        let system = "You match a client request to experts. Reply with JSON only: \
            {\"matches\": [{\"expert_id\": string, \"score\": number between 0 and 1, \"reason\": string}]}, best first.";
        let user = format!("Request:\n{}\n\nExperts:\n{}", query, catalogue);
        let text = self.complete(system, &user).await?;

        match parse_matches(&text, experts, limit) {
            Some(matches) => Ok(matches),
            None => {
                tracing::warn!("Unparseable expert matches — using catalogue order");
                Ok(fallback_matches(experts, limit))
            }
        }
    }

    pub async fn recommend_tariff(
        &self,
        description: &str,
        answers: &Map<String, Value>,
        tariffs: &[String],
    ) -> Result<TariffRecommendation, AiError> {
        let system = format!(
            "You recommend one tariff out of: {}. Reply with JSON only: {{\"tariff\": string, \"reason\": string}}.",
            tariffs.join(", ")
        );
        let user = format!(
            "Business:\n{}\n\nAnswers:\n{}",
            description,
            Value::Object(answers.clone())
        );
        let text = self.complete(&system, &user).await?;

        let parsed = extract_json(&text)
            .and_then(|v| serde_json::from_value::<TariffRecommendation>(v).ok())
            .and_then(|r| {
                tariffs
                    .iter()
                    .find(|t| t.eq_ignore_ascii_case(r.tariff.trim()))
                    .map(|t| TariffRecommendation {
                        tariff: t.clone(),
                        reason: r.reason,
                    })
            });

        Ok(parsed.unwrap_or_else(|| {
            tracing::warn!("Unparseable or unknown tariff — using fallback");
            fallback_tariff(tariffs)
        }))
    }
}

// ============================================================================
// Parsing helpers
// ============================================================================

/// Pull a JSON value out of model output: fenced block first, then the
/// outermost `{…}`, then the whole text.
pub fn extract_json(text: &str) -> Option<Value> {
    let fence = Regex::new(r"(?s)```(?:json)?\s*(.*?)```").ok()?;
    if let Some(inner) = fence.captures(text).and_then(|c| c.get(1)) {
        if let Ok(v) = serde_json::from_str(inner.as_str().trim()) {
            return Some(v);
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(v) = serde_json::from_str(&text[start..=end]) {
                return Some(v);
            }
        }
    }

    serde_json::from_str(text.trim()).ok()
}

#[derive(Debug, Deserialize)]
struct RawMatch {
    #[serde(alias = "id")]
    expert_id: Value,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    reason: String,
}

fn parse_matches(text: &str, experts: &[Expert], limit: usize) -> Option<Vec<ExpertMatch>> {
    let value = extract_json(text)?;
    let raw = match value {
        Value::Object(mut obj) => obj.remove("matches")?,
        arr @ Value::Array(_) => arr,
        _ => return None,
    };
    let raw: Vec<RawMatch> = serde_json::from_value(raw).ok()?;

    let known: HashSet<&str> = experts.iter().map(|e| e.id.as_str()).collect();
    let mut seen = HashSet::new();
    let mut matches: Vec<ExpertMatch> = raw
        .into_iter()
        .filter_map(|m| {
            let id = crate::remote::json_text(&m.expert_id)?;
            if !known.contains(id.as_str()) || !seen.insert(id.clone()) {
                return None;
            }
            Some(ExpertMatch {
                expert_id: id,
                score: m.score.clamp(0.0, 1.0),
                reason: m.reason,
            })
        })
        .collect();

    matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    matches.truncate(limit);
    Some(matches)
}

fn fallback_matches(experts: &[Expert], limit: usize) -> Vec<ExpertMatch> {
    experts
        .iter()
        .take(limit)
        .map(|e| ExpertMatch {
            expert_id: e.id.clone(),
            score: 0.0,
            reason: String::new(),
        })
        .collect()
}

fn fallback_tariff(tariffs: &[String]) -> TariffRecommendation {
    TariffRecommendation {
        tariff: tariffs.first().cloned().unwrap_or_else(|| "standard".to_string()),
        reason: String::new(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
