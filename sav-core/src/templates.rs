//! Template store — notification templates with a local backup tier
//!
//! Loads the active `notification_templates` row for one template type. If the
//! remote read fails, the copy mirrored under `sav-notification-template-<type>`
//! is used instead. Saves go remote first and are always mirrored locally.
//! Every outcome reports which tier served it.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;
use crate::local::{self, LocalStore};
use crate::models::session::iso_now;
use crate::models::{MediaItem, TemplateField, TemplateSettings};
use crate::remote::{Filter, RemoteId, RemoteStore, Table};
use crate::upsert::MemoizedRecord;

/// Where a load or save was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Remote,
    Local,
    None,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateLoad {
    pub source: Tier,
    pub settings: Option<TemplateSettings>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveOutcome {
    pub source: Tier,
    pub id: Option<RemoteId>,
    pub message: String,
}

/// Raw row shape. `fields` and `media` are opaque JSON blobs.
#[derive(Debug, Deserialize)]
struct TemplateRow {
    #[serde(default)]
    fields: Value,
    #[serde(default)]
    header_text: Option<String>,
    #[serde(default)]
    footer_text: Option<String>,
    #[serde(default)]
    media: Value,
    #[serde(default)]
    use_media_caption: Option<bool>,
}

fn blob<T: serde::de::DeserializeOwned>(raw: Value, what: &str) -> Vec<T> {
    if raw.is_null() {
        return Vec::new();
    }
    serde_json::from_value(raw).unwrap_or_else(|e| {
        tracing::warn!(error = %e, what, "Ignoring malformed template blob");
        Vec::new()
    })
}

fn map_row(row: &Value, default_header: &str) -> Result<TemplateSettings> {
    let raw: TemplateRow = serde_json::from_value(row.clone())?;
    Ok(TemplateSettings {
        fields: blob::<TemplateField>(raw.fields, "fields"),
        header_text: raw
            .header_text
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| default_header.to_string()),
        footer_text: raw.footer_text.unwrap_or_default(),
        media: blob::<MediaItem>(raw.media, "media"),
        use_media_caption: raw.use_media_caption.unwrap_or(false),
    })
}

struct Loaded {
    source: Tier,
    settings: Option<TemplateSettings>,
}

pub struct TemplateStore {
    template_type: String,
    default_header: String,
    remote: Arc<dyn RemoteStore>,
    local: Arc<dyn LocalStore>,
    record: MemoizedRecord,
    state: RwLock<Loaded>,
}

impl TemplateStore {
    /// Build the store and issue its initial load.
    pub async fn open(
        template_type: impl Into<String>,
        default_header: impl Into<String>,
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn LocalStore>,
    ) -> Self {
        let store = Self {
            template_type: template_type.into(),
            default_header: default_header.into(),
            remote,
            local,
            record: MemoizedRecord::new(Table::NotificationTemplates),
            state: RwLock::new(Loaded {
                source: Tier::None,
                settings: None,
            }),
        };
        store.load().await;
        store
    }

    pub fn template_type(&self) -> &str {
        &self.template_type
    }

    pub fn source(&self) -> Tier {
        self.read_state().source
    }

    pub fn settings(&self) -> Option<TemplateSettings> {
        self.read_state().settings.clone()
    }

    /// The result of the most recent load or save, without touching storage.
    pub fn current(&self) -> TemplateLoad {
        let state = self.read_state();
        TemplateLoad {
            source: state.source,
            settings: state.settings.clone(),
        }
    }

    pub async fn id(&self) -> Option<RemoteId> {
        self.record.id().await
    }

    fn local_key(&self) -> String {
        local::template_key(&self.template_type)
    }

    /// Read the active record; fall back to the local copy if the read fails.
    pub async fn load(&self) -> TemplateLoad {
        let filters = [
            Filter::eq("template_type", &self.template_type),
            Filter::eq("is_active", true),
        ];

        let remote = match self.remote.select_one(Table::NotificationTemplates, &filters).await {
            Ok(Some(row)) => map_row(&row, &self.default_header).map(|s| Some((row, s))),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };

        let loaded = match remote {
            Ok(Some((row, settings))) => {
                if let Some(id) = RemoteId::from_row(&row) {
                    self.record.remember(id).await;
                }
                tracing::debug!(template_type = %self.template_type, "Template loaded from remote");
                Loaded {
                    source: Tier::Remote,
                    settings: Some(settings),
                }
            }
            Ok(None) => {
                tracing::debug!(template_type = %self.template_type, "No active template stored");
                Loaded {
                    source: Tier::None,
                    settings: None,
                }
            }
            Err(e) => {
                tracing::warn!(
                    template_type = %self.template_type,
                    error = %e,
                    "Remote template load failed — trying local copy"
                );
                self.load_local()
            }
        };

        let result = TemplateLoad {
            source: loaded.source,
            settings: loaded.settings.clone(),
        };
        *self.write_state() = loaded;
        result
    }

    fn load_local(&self) -> Loaded {
        match local::load_json::<TemplateSettings>(self.local.as_ref(), &self.local_key()) {
            Ok(Some(settings)) => Loaded {
                source: Tier::Local,
                settings: Some(settings),
            },
            Ok(None) => Loaded {
                source: Tier::None,
                settings: None,
            },
            Err(e) => {
                tracing::warn!(template_type = %self.template_type, error = %e, "Local template copy unreadable");
                Loaded {
                    source: Tier::None,
                    settings: None,
                }
            }
        }
    }

    /// Remote first (update by cached id, else insert), then mirror locally
    /// no matter what the remote said.
    pub async fn save_template(&self, settings: TemplateSettings) -> SaveOutcome {
        let remote_result = match self.payload(&settings) {
            Ok(payload) => self.record.persist(self.remote.as_ref(), payload).await,
            Err(e) => Err(e),
        };

        let local_result = local::save_json(self.local.as_ref(), &self.local_key(), &settings);
        if let Err(e) = &local_result {
            tracing::warn!(template_type = %self.template_type, error = %e, "Failed to mirror template locally");
        }

        let outcome = match (remote_result, local_result) {
            (Ok((id, _)), _) => SaveOutcome {
                source: Tier::Remote,
                id: Some(id),
                message: "Template saved".to_string(),
            },
            (Err(e), Ok(())) => {
                tracing::warn!(template_type = %self.template_type, error = %e, "Remote template save failed — kept local copy");
                SaveOutcome {
                    source: Tier::Local,
                    id: None,
                    message: "Template saved locally; remote storage unavailable".to_string(),
                }
            }
            (Err(e), Err(_)) => {
                tracing::error!(template_type = %self.template_type, error = %e, "Template could not be saved anywhere");
                SaveOutcome {
                    source: Tier::None,
                    id: None,
                    message: "Template could not be saved".to_string(),
                }
            }
        };

        let mut state = self.write_state();
        state.settings = Some(settings);
        if outcome.source != Tier::None {
            state.source = outcome.source;
        }
        drop(state);

        outcome
    }

    fn payload(&self, settings: &TemplateSettings) -> Result<Value> {
        Ok(json!({
            "template_type": self.template_type,
            "fields": serde_json::to_value(&settings.fields)?,
            "header_text": settings.header_text,
            "footer_text": settings.footer_text,
            "media": serde_json::to_value(&settings.media)?,
            "use_media_caption": settings.use_media_caption,
            "is_active": true,
            "updated_at": iso_now(),
        }))
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, Loaded> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, Loaded> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::MemoryLocalStore;
    use crate::models::MediaType;
    use crate::remote::{MemoryRemoteStore, RemoteOp};

    fn sample_settings() -> TemplateSettings {
        TemplateSettings {
            fields: vec![TemplateField {
                key: "name".to_string(),
                label: "Name".to_string(),
                enabled: true,
                format: "👤 {value}".to_string(),
                category: "client".to_string(),
                button_text: Some("Open CRM".to_string()),
            }],
            header_text: "New request".to_string(),
            footer_text: "Reply within 24h".to_string(),
            media: vec![MediaItem {
                id: "m1".to_string(),
                media_type: MediaType::Photo,
                url: "https://cdn.example.com/a.jpg".to_string(),
                caption: None,
            }],
            use_media_caption: true,
        }
    }

    fn stores() -> (Arc<MemoryRemoteStore>, Arc<MemoryLocalStore>) {
        (Arc::new(MemoryRemoteStore::new()), Arc::new(MemoryLocalStore::new()))
    }

    #[tokio::test]
    async fn test_null_header_uses_default() {
        let (remote, local) = stores();
        remote.seed(
            Table::NotificationTemplates,
            json!({
                "id": "t-1",
                "template_type": "new_client",
                "fields": [],
                "header_text": null,
                "footer_text": "bye",
                "media": [],
                "use_media_caption": false,
                "is_active": true
            }),
        );

        let store = TemplateStore::open("new_client", "Hello", remote.clone(), local).await;
        assert_eq!(store.source(), Tier::Remote);
        let settings = store.settings().unwrap();
        assert_eq!(settings.header_text, "Hello");
        assert_eq!(settings.footer_text, "bye");
        assert_eq!(store.id().await, Some(RemoteId::new("t-1")));
    }

    #[tokio::test]
    async fn test_blank_header_uses_default() {
        let (remote, local) = stores();
        remote.seed(
            Table::NotificationTemplates,
            json!({"id": "t-1", "template_type": "new_client", "is_active": true, "header_text": "  "}),
        );

        let store = TemplateStore::open("new_client", "Hello", remote, local).await;
        assert_eq!(store.settings().unwrap().header_text, "Hello");
        assert_eq!(store.current().source, Tier::Remote);
    }

    #[tokio::test]
    async fn test_inactive_or_other_types_are_ignored() {
        let (remote, local) = stores();
        remote.seed(
            Table::NotificationTemplates,
            json!({"id": "t-1", "template_type": "new_client", "is_active": false}),
        );
        remote.seed(
            Table::NotificationTemplates,
            json!({"id": "t-2", "template_type": "payment", "is_active": true}),
        );

        let store = TemplateStore::open("new_client", "Hello", remote, local).await;
        assert_eq!(store.source(), Tier::None);
        assert!(store.settings().is_none());
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_to_local_copy() {
        let (remote, local) = stores();
        local::save_json(local.as_ref(), &local::template_key("new_client"), &sample_settings()).unwrap();
        remote.set_failing(true);

        let store = TemplateStore::open("new_client", "Hello", remote, local).await;
        assert_eq!(store.source(), Tier::Local);
        assert_eq!(store.settings(), Some(sample_settings()));
    }

    #[tokio::test]
    async fn test_remote_failure_without_local_copy_is_none() {
        let (remote, local) = stores();
        remote.set_failing(true);
        let store = TemplateStore::open("new_client", "Hello", remote, local).await;
        assert_eq!(store.source(), Tier::None);
    }

    #[tokio::test]
    async fn test_save_failure_still_mirrors_exact_settings() {
        let (remote, local) = stores();
        let store = TemplateStore::open("new_client", "Hello", remote.clone(), local.clone()).await;

        remote.set_failing(true);
        let settings = sample_settings();
        let outcome = store.save_template(settings.clone()).await;

        assert_eq!(outcome.source, Tier::Local);
        assert!(outcome.id.is_none());

        let raw = local.get(&local::template_key("new_client")).unwrap().unwrap();
        let mirrored: TemplateSettings = serde_json::from_str(&raw).unwrap();
        assert_eq!(mirrored, settings);
        assert_eq!(raw, serde_json::to_string(&settings).unwrap());
    }

    #[tokio::test]
    async fn test_save_inserts_once_then_updates() {
        let (remote, local) = stores();
        let store = TemplateStore::open("new_client", "Hello", remote.clone(), local.clone()).await;

        let first = store.save_template(sample_settings()).await;
        let mut changed = sample_settings();
        changed.footer_text = "Thanks".to_string();
        let second = store.save_template(changed).await;

        assert_eq!(first.source, Tier::Remote);
        assert_eq!(first.id, second.id);
        let writes = remote.writes();
        assert!(matches!(writes[0], RemoteOp::Insert { .. }));
        assert!(matches!(writes[1], RemoteOp::Update { .. }));

        let rows = remote.rows(Table::NotificationTemplates);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["footer_text"], "Thanks");
        assert!(local.contains(&local::template_key("new_client")));
    }

    #[tokio::test]
    async fn test_save_updates_row_found_by_load() {
        let (remote, local) = stores();
        remote.seed(
            Table::NotificationTemplates,
            json!({"id": "t-9", "template_type": "new_client", "is_active": true, "header_text": "Old"}),
        );
        let store = TemplateStore::open("new_client", "Hello", remote.clone(), local).await;

        let outcome = store.save_template(sample_settings()).await;
        assert_eq!(outcome.id, Some(RemoteId::new("t-9")));
        assert!(matches!(remote.writes()[0], RemoteOp::Update { .. }));
    }

    #[tokio::test]
    async fn test_both_tiers_failing_reports_none() {
        let (remote, local) = stores();
        let store = TemplateStore::open("new_client", "Hello", remote.clone(), local.clone()).await;
        remote.set_failing(true);
        local.set_failing(true);

        let outcome = store.save_template(sample_settings()).await;
        assert_eq!(outcome.source, Tier::None);
        // memory still reflects the latest edit
        assert_eq!(store.settings(), Some(sample_settings()));
    }

    #[tokio::test]
    async fn test_malformed_blobs_degrade_to_empty() {
        let (remote, local) = stores();
        remote.seed(
            Table::NotificationTemplates,
            json!({"id": "t-1", "template_type": "x", "is_active": true, "fields": "oops", "media": {"a": 1}}),
        );
        let store = TemplateStore::open("x", "Hi", remote, local).await;
        let settings = store.settings().unwrap();
        assert!(settings.fields.is_empty());
        assert!(settings.media.is_empty());
    }
}
