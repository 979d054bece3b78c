use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{SessionKind, TelegramProfile, TemplateSettings};

pub const PROTOCOL: &str = "sav/1";

fn default_kind() -> SessionKind {
    SessionKind::Calculator
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SavRequest {
    Health,
    Access {
        telegram_id: Option<String>,
    },
    TrackAction {
        telegram_user_id: Option<String>,
        #[serde(default = "default_kind")]
        kind: SessionKind,
        name: String,
        #[serde(default)]
        page: Option<String>,
        #[serde(default)]
        field: Option<String>,
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        extra: Map<String, Value>,
    },
    SaveSession {
        telegram_user_id: Option<String>,
        #[serde(default = "default_kind")]
        kind: SessionKind,
        #[serde(default)]
        form_data: Map<String, Value>,
    },
    ResetSession {
        telegram_user_id: Option<String>,
        #[serde(default = "default_kind")]
        kind: SessionKind,
    },
    GetTemplate {
        template_type: String,
    },
    SaveTemplate {
        template_type: String,
        settings: TemplateSettings,
    },
    SendTemplate {
        template_type: String,
        chat_id: String,
        #[serde(default)]
        client_id: Option<String>,
        #[serde(default)]
        data: Map<String, Value>,
    },
    ClassifySeller {
        description: String,
    },
    MatchExperts {
        query: String,
        #[serde(default)]
        city: Option<String>,
        #[serde(default)]
        limit: Option<usize>,
    },
    RecommendTariff {
        description: String,
        #[serde(default)]
        answers: Map<String, Value>,
    },
    SendMessage {
        chat_id: String,
        text: String,
        #[serde(default)]
        client_id: Option<String>,
    },
    UpsertProfile {
        profile: TelegramProfile,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SavResponse {
    pub status: String,
    pub data: Option<Value>,
    pub error: Option<String>,
    /// Suggested HTTP status for errors that have a specific one (402, 429, 400).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    pub version: String,
}

impl SavResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            code: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            code: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn err_with_code(msg: impl Into<String>, code: u16) -> Self {
        Self {
            code: Some(code),
            ..Self::err(msg)
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_is_tagged_by_action() {
        let req: SavRequest = serde_json::from_value(json!({
            "action": "track_action",
            "telegram_user_id": "42",
            "kind": "ai_seller",
            "name": "step_completed",
            "page": "2"
        }))
        .unwrap();

        match req {
            SavRequest::TrackAction { kind, name, page, extra, .. } => {
                assert_eq!(kind, SessionKind::AiSeller);
                assert_eq!(name, "step_completed");
                assert_eq!(page.as_deref(), Some("2"));
                assert!(extra.is_empty());
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_kind_defaults_to_calculator() {
        let req: SavRequest = serde_json::from_value(json!({
            "action": "reset_session",
            "telegram_user_id": null
        }))
        .unwrap();
        assert!(matches!(
            req,
            SavRequest::ResetSession { kind: SessionKind::Calculator, telegram_user_id: None }
        ));
    }

    #[test]
    fn test_error_code_is_omitted_when_absent() {
        let ok = serde_json::to_value(SavResponse::ok(json!({"status": "healthy"}))).unwrap();
        assert!(ok.get("code").is_none());
        assert_eq!(ok["data"]["status"], "healthy");

        let limited = SavResponse::err_with_code("slow down", 429);
        assert!(!limited.is_ok());
        assert_eq!(serde_json::to_value(&limited).unwrap()["code"], 429);
    }
}
