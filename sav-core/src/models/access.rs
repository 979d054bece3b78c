use serde::{Deserialize, Serialize};

/// CRM permission tier. Ordered: viewer < editor < admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Viewer,
    Editor,
    Admin,
}

impl AccessLevel {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "viewer" => Some(AccessLevel::Viewer),
            "editor" => Some(AccessLevel::Editor),
            "admin" => Some(AccessLevel::Admin),
            _ => None,
        }
    }
}
