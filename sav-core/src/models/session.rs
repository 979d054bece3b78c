use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Which multi-step flow a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Calculator,
    AiSeller,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Calculator => "calculator",
            SessionKind::AiSeller => "ai_seller",
        }
    }
}

impl std::str::FromStr for SessionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calculator" => Ok(SessionKind::Calculator),
            "ai_seller" => Ok(SessionKind::AiSeller),
            other => Err(format!("unknown session kind: {}", other)),
        }
    }
}

/// One entry of the action log. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEntry {
    pub action: String,
    /// ISO-8601, millisecond precision, UTC.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

pub fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in [SessionKind::Calculator, SessionKind::AiSeller] {
            assert_eq!(kind.as_str().parse::<SessionKind>().unwrap(), kind);
        }
        assert!("wizard".parse::<SessionKind>().is_err());
    }

    #[test]
    fn test_entry_omits_absent_optionals() {
        let entry = ActionEntry {
            action: "open".to_string(),
            timestamp: iso_now(),
            page: None,
            field: None,
            value: None,
        };
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["action"], "open");
        assert!(v.get("page").is_none());
        assert!(entry.timestamp.ends_with('Z'));
    }
}
