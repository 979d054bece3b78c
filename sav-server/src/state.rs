//! Shared server state
//!
//! Holds the storage backends, the upstream clients and the long-lived
//! per-user components. A session tracker lives for one
//! `(telegram_user_id, kind)` pair; a template store lives for one template type.

use std::collections::HashMap;
use std::sync::Arc;

use sav_core::ai::{AiClient, GatewayConfig};
use sav_core::models::SessionKind;
use sav_core::telegram::{BotConfig, TelegramClient};
use sav_core::templates::TemplateLoad;
use sav_core::{LocalStore, RemoteStore, RuntimeFlags, SavConfig, SessionTracker, TemplateStore};
use tokio::sync::Mutex;

/// Header used when a stored template has none.
pub const DEFAULT_TEMPLATE_HEADER: &str = "New request";

pub struct AppState {
    pub remote: Arc<dyn RemoteStore>,
    pub local: Arc<dyn LocalStore>,
    pub config: SavConfig,
    pub flags: RuntimeFlags,
    pub ai: Option<AiClient>,
    pub telegram: Option<TelegramClient>,
    trackers: Mutex<HashMap<(String, SessionKind), Arc<SessionTracker>>>,
    templates: Mutex<HashMap<String, Arc<TemplateStore>>>,
}

impl AppState {
    /// Build state and the upstream clients the config allows. A client whose
    /// secret is missing is left out and its endpoints report unavailable.
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn LocalStore>,
        config: SavConfig,
        flags: RuntimeFlags,
    ) -> Self {
        let ai = match AiClient::new(GatewayConfig::from_config(&config.ai)) {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "AI gateway disabled");
                None
            }
        };
        let telegram = match TelegramClient::new(BotConfig::from_config(&config.telegram)) {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "Telegram delivery disabled");
                None
            }
        };

        Self {
            remote,
            local,
            config,
            flags,
            ai,
            telegram,
            trackers: Mutex::new(HashMap::new()),
            templates: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_ai(mut self, ai: Option<AiClient>) -> Self {
        self.ai = ai;
        self
    }

    pub fn with_telegram(mut self, telegram: Option<TelegramClient>) -> Self {
        self.telegram = telegram;
        self
    }

    /// The tracker for this user and flow. Without an identity a detached
    /// tracker is returned; it records nothing.
    pub async fn tracker(&self, owner: Option<&str>, kind: SessionKind) -> Arc<SessionTracker> {
        let Some(owner) = owner.map(str::trim).filter(|o| !o.is_empty()) else {
            return Arc::new(SessionTracker::new(self.remote.clone(), None, kind));
        };

        let mut trackers = self.trackers.lock().await;
        trackers
            .entry((owner.to_string(), kind))
            .or_insert_with(|| {
                Arc::new(SessionTracker::new(
                    self.remote.clone(),
                    Some(owner.to_string()),
                    kind,
                ))
            })
            .clone()
    }

    /// Reset the user's session and drop its tracker; the next request for the
    /// pair starts from an empty log.
    pub async fn reset_tracker(&self, owner: Option<&str>, kind: SessionKind) {
        let tracker = self.tracker(owner, kind).await;
        tracker.reset_session().await;
        if let Some(owner) = tracker.owner() {
            self.trackers.lock().await.remove(&(owner.to_string(), kind));
        }
    }

    pub async fn tracker_count(&self) -> usize {
        self.trackers.lock().await.len()
    }

    /// The store for this template type, opened (and loaded) on first use.
    pub async fn template_store(&self, template_type: &str) -> Arc<TemplateStore> {
        self.open_template(template_type).await.0
    }

    /// Current template for this type. A store opened by this call is not
    /// read a second time.
    pub async fn template(&self, template_type: &str) -> TemplateLoad {
        let (store, opened) = self.open_template(template_type).await;
        if opened {
            store.current()
        } else {
            store.load().await
        }
    }

    /// Returns the store and whether this call opened it. The initial load
    /// runs outside the map lock; if two callers race, the first insert wins.
    async fn open_template(&self, template_type: &str) -> (Arc<TemplateStore>, bool) {
        let cached = self.templates.lock().await.get(template_type).cloned();
        if let Some(store) = cached {
            return (store, false);
        }

        let opened = Arc::new(
            TemplateStore::open(
                template_type,
                DEFAULT_TEMPLATE_HEADER,
                self.remote.clone(),
                self.local.clone(),
            )
            .await,
        );
        let mut templates = self.templates.lock().await;
        let store = templates
            .entry(template_type.to_string())
            .or_insert_with(|| opened.clone())
            .clone();
        let ours = Arc::ptr_eq(&store, &opened);
        (store, ours)
    }
}
