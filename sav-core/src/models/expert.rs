use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expert {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub specialization: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
}

impl Expert {
    /// Read a raw `experts` row; ids may be numeric or text.
    pub fn from_row(row: &serde_json::Value) -> Option<Self> {
        let id = row.get("id").and_then(crate::remote::json_text)?;
        let mut row = row.clone();
        row["id"] = serde_json::Value::String(id);
        match serde_json::from_value(row) {
            Ok(e) => Some(e),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed expert row");
                None
            }
        }
    }
}
