//! Message delivery with a persisted status log
//!
//! Each outgoing message gets a `client_messages` row in `pending`, is sent,
//! then moves to `sent` or `failed`. If the pending row cannot be written the
//! message is not sent at all.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::models::{MessageStatus, TelegramProfile, TemplateSettings};
use crate::remote::{RemoteId, RemoteStore, Table};
use crate::telegram::TelegramClient;

/// Telegram rejects photo captions longer than this.
pub const MAX_CAPTION_CHARS: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),
    Photo { url: String, caption: String },
}

impl Outgoing {
    /// Render a template: photo with caption when the template asks for it and
    /// the text fits, plain text otherwise.
    pub fn from_template(settings: &TemplateSettings, data: &Map<String, Value>) -> Self {
        let text = settings.render(data);
        match settings.first_photo() {
            Some(photo) if settings.use_media_caption && text.chars().count() <= MAX_CAPTION_CHARS => {
                Outgoing::Photo {
                    url: photo.url.clone(),
                    caption: text,
                }
            }
            _ => Outgoing::Text(text),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Outgoing::Text(t) => t,
            Outgoing::Photo { caption, .. } => caption,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub message_id: RemoteId,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn deliver(
    remote: &dyn RemoteStore,
    telegram: &TelegramClient,
    client_id: Option<&str>,
    chat_id: &str,
    outgoing: &Outgoing,
) -> Result<DeliveryReport> {
    let row = json!({
        "client_id": client_id,
        "chat_id": chat_id,
        "text": outgoing.text(),
        "status": MessageStatus::Pending,
    });
    let message_id = remote.insert(Table::ClientMessages, row).await?;

    let sent = match outgoing {
        Outgoing::Text(text) => telegram.send_message(chat_id, text).await,
        Outgoing::Photo { url, caption } => telegram.send_photo(chat_id, url, Some(caption)).await,
    };

    let (status, error, patch) = match sent {
        Ok(_) => (
            MessageStatus::Sent,
            None,
            json!({"status": MessageStatus::Sent, "sent_at": Utc::now()}),
        ),
        Err(e) => {
            let error = e.to_string();
            tracing::warn!(message_id = %message_id, chat_id, error = %error, "Message delivery failed");
            (
                MessageStatus::Failed,
                Some(error.clone()),
                json!({"status": MessageStatus::Failed, "error": error}),
            )
        }
    };

    if let Err(e) = remote.update(Table::ClientMessages, &message_id, patch).await {
        tracing::error!(message_id = %message_id, error = %e, "Failed to record delivery status");
    }

    tracing::info!(message_id = %message_id, chat_id, ?status, "Message delivery finished");
    Ok(DeliveryReport {
        message_id,
        status,
        error,
    })
}

pub async fn upsert_profile(remote: &dyn RemoteStore, profile: &TelegramProfile) -> Result<RemoteId> {
    let mut row = serde_json::to_value(profile)?;
    row["updated_at"] = json!(Utc::now());
    remote.upsert(Table::TelegramProfiles, row, "telegram_id").await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaItem, MediaType, TemplateField};
    use crate::remote::{MemoryRemoteStore, RemoteOp};
    use crate::telegram::BotConfig;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn telegram(server: &MockServer) -> TelegramClient {
        TelegramClient::new(BotConfig {
            api_base: server.uri(),
            token: "t".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn template(use_caption: bool) -> TemplateSettings {
        TemplateSettings {
            fields: vec![TemplateField {
                key: "name".to_string(),
                label: "Name".to_string(),
                enabled: true,
                format: String::new(),
                category: "client".to_string(),
                button_text: None,
            }],
            header_text: "Lead".to_string(),
            footer_text: String::new(),
            media: vec![MediaItem {
                id: "m".to_string(),
                media_type: MediaType::Photo,
                url: "https://x/p.jpg".to_string(),
                caption: None,
            }],
            use_media_caption: use_caption,
        }
    }

    #[test]
    fn test_outgoing_from_template() {
        let data = json!({"name": "Ivan"});
        let data = data.as_object().unwrap();

        assert_eq!(
            Outgoing::from_template(&template(true), data),
            Outgoing::Photo {
                url: "https://x/p.jpg".to_string(),
                caption: "Lead\nName: Ivan".to_string()
            }
        );
        assert_eq!(
            Outgoing::from_template(&template(false), data),
            Outgoing::Text("Lead\nName: Ivan".to_string())
        );

        let long = json!({"name": "x".repeat(MAX_CAPTION_CHARS)});
        assert!(matches!(
            Outgoing::from_template(&template(true), long.as_object().unwrap()),
            Outgoing::Text(_)
        ));
    }

    #[tokio::test]
    async fn test_deliver_marks_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bott/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {"message_id": 1}})))
            .mount(&server)
            .await;

        let store = MemoryRemoteStore::new();
        let report = deliver(&store, &telegram(&server), Some("c1"), "42", &Outgoing::Text("hi".to_string()))
            .await
            .unwrap();

        assert_eq!(report.status, MessageStatus::Sent);
        let rows = store.rows(Table::ClientMessages);
        assert_eq!(rows[0]["status"], "sent");
        assert_eq!(rows[0]["client_id"], "c1");
        assert!(rows[0]["sent_at"].is_string());
        assert!(matches!(store.writes()[0], RemoteOp::Insert { .. }));
        assert!(matches!(store.writes()[1], RemoteOp::Update { .. }));
    }

    #[tokio::test]
    async fn test_deliver_marks_failed_with_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "ok": false, "error_code": 400, "description": "Bad Request: chat not found"
            })))
            .mount(&server)
            .await;

        let store = MemoryRemoteStore::new();
        let report = deliver(&store, &telegram(&server), None, "0", &Outgoing::Text("hi".to_string()))
            .await
            .unwrap();

        assert_eq!(report.status, MessageStatus::Failed);
        assert!(report.error.unwrap().contains("chat not found"));
        let rows = store.rows(Table::ClientMessages);
        assert_eq!(rows[0]["status"], "failed");
        assert!(rows[0]["error"].as_str().unwrap().contains("chat not found"));
    }

    #[tokio::test]
    async fn test_pending_row_failure_aborts_send() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}})))
            .expect(0)
            .mount(&server)
            .await;

        let store = MemoryRemoteStore::new();
        store.set_failing(true);
        let result = deliver(&store, &telegram(&server), None, "42", &Outgoing::Text("hi".to_string())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_upsert_profile_keeps_one_row() {
        let store = MemoryRemoteStore::new();
        let mut profile = TelegramProfile {
            telegram_id: "42".to_string(),
            username: Some("ivan".to_string()),
            first_name: None,
            last_name: None,
        };
        let a = upsert_profile(&store, &profile).await.unwrap();
        profile.username = Some("ivan_p".to_string());
        let b = upsert_profile(&store, &profile).await.unwrap();

        assert_eq!(a, b);
        let rows = store.rows(Table::TelegramProfiles);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["username"], "ivan_p");
    }
}
