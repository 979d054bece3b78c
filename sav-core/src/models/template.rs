use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateField {
    pub key: String,
    pub label: String,
    pub enabled: bool,
    /// Line pattern; `{label}` and `{value}` are substituted. Empty ⇒ `label: value`.
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Photo,
    Video,
    Document,
    Album,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// The editable part of a notification template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSettings {
    #[serde(default)]
    pub fields: Vec<TemplateField>,
    #[serde(default)]
    pub header_text: String,
    #[serde(default)]
    pub footer_text: String,
    #[serde(default)]
    pub media: Vec<MediaItem>,
    #[serde(default)]
    pub use_media_caption: bool,
}

impl TemplateSettings {
    /// Render message text: header, one line per enabled field that has a
    /// non-empty value in `data` (field order), footer.
    pub fn render(&self, data: &Map<String, Value>) -> String {
        let mut lines = Vec::new();

        if !self.header_text.trim().is_empty() {
            lines.push(self.header_text.clone());
        }

        for field in self.fields.iter().filter(|f| f.enabled) {
            let value = match data.get(&field.key).and_then(display_value) {
                Some(v) if !v.trim().is_empty() => v,
                _ => continue,
            };
            let line = if field.format.trim().is_empty() {
                format!("{}: {}", field.label, value)
            } else {
                field
                    .format
                    .replace("{label}", &field.label)
                    .replace("{value}", &value)
            };
            lines.push(line);
        }

        if !self.footer_text.trim().is_empty() {
            lines.push(self.footer_text.clone());
        }

        lines.join("\n")
    }

    /// First photo attachment, if any.
    pub fn first_photo(&self) -> Option<&MediaItem> {
        self.media.iter().find(|m| m.media_type == MediaType::Photo)
    }
}

fn display_value(v: &Value) -> Option<String> {
    match v {
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(crate::remote::json_text).collect();
            Some(parts.join(", "))
        }
        other => crate::remote::json_text(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(key: &str, label: &str, enabled: bool, format: &str) -> TemplateField {
        TemplateField {
            key: key.to_string(),
            label: label.to_string(),
            enabled,
            format: format.to_string(),
            category: "client".to_string(),
            button_text: None,
        }
    }

    #[test]
    fn test_render_skips_disabled_and_empty_fields() {
        let settings = TemplateSettings {
            fields: vec![
                field("name", "Name", true, ""),
                field("phone", "Phone", false, ""),
                field("budget", "Budget", true, "💰 {label}: {value} RUB"),
                field("city", "City", true, ""),
            ],
            header_text: "New lead".to_string(),
            footer_text: "—".to_string(),
            media: vec![],
            use_media_caption: false,
        };
        let data = json!({"name": "Ivan", "phone": "+7", "budget": 5000, "city": ""});
        let text = settings.render(data.as_object().unwrap());
        assert_eq!(text, "New lead\nName: Ivan\n💰 Budget: 5000 RUB\n—");
    }

    #[test]
    fn test_render_joins_arrays() {
        let settings = TemplateSettings {
            fields: vec![field("tags", "Tags", true, "")],
            header_text: String::new(),
            footer_text: String::new(),
            media: vec![],
            use_media_caption: false,
        };
        let data = json!({"tags": ["wb", "ozon"]});
        assert_eq!(settings.render(data.as_object().unwrap()), "Tags: wb, ozon");
    }

    #[test]
    fn test_settings_use_camel_case_keys() {
        let raw = json!({
            "fields": [{"key": "k", "label": "L", "enabled": true, "format": "", "category": "c", "buttonText": "Open"}],
            "headerText": "h",
            "footerText": "f",
            "media": [{"id": "m1", "type": "photo", "url": "https://x/y.png"}],
            "useMediaCaption": true
        });
        let settings: TemplateSettings = serde_json::from_value(raw).unwrap();
        assert_eq!(settings.fields[0].button_text.as_deref(), Some("Open"));
        assert_eq!(settings.first_photo().map(|m| m.id.as_str()), Some("m1"));
        assert!(settings.use_media_caption);
    }
}
