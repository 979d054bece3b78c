//! Viewed-set cache — which experts were already swiped, and which way
//!
//! Fully resident in the local store under `sav-viewed-experts`. Each mutation
//! rewrites the whole map at once. Storage failures are logged; a failed load
//! starts empty, a failed save leaves memory correct but unpersisted.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::local::{self, LocalStore, VIEWED_EXPERTS_KEY};
use crate::models::{SwipeDirection, ViewedExpert};

pub struct ViewedSet {
    local: Arc<dyn LocalStore>,
    entries: HashMap<String, ViewedExpert>,
}

impl ViewedSet {
    pub fn open(local: Arc<dyn LocalStore>) -> Self {
        let entries = match local::load_json::<HashMap<String, ViewedExpert>>(local.as_ref(), VIEWED_EXPERTS_KEY) {
            Ok(Some(map)) => map,
            Ok(None) => HashMap::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load viewed experts — starting empty");
                HashMap::new()
            }
        };
        Self { local, entries }
    }

    pub fn mark_as_viewed(&mut self, id: &str, direction: SwipeDirection) {
        self.entries.insert(
            id.to_string(),
            ViewedExpert {
                id: id.to_string(),
                direction,
                timestamp: Utc::now().timestamp_millis(),
            },
        );
        self.save();
    }

    /// Overwrite direction and timestamp of an existing entry; unknown ids are ignored.
    pub fn update_direction(&mut self, id: &str, direction: SwipeDirection) {
        let Some(entry) = self.entries.get_mut(id) else {
            return;
        };
        entry.direction = direction;
        entry.timestamp = Utc::now().timestamp_millis();
        self.save();
    }

    pub fn is_viewed(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get_viewed_direction(&self, id: &str) -> Option<SwipeDirection> {
        self.entries.get(id).map(|e| e.direction)
    }

    pub fn get(&self, id: &str) -> Option<&ViewedExpert> {
        self.entries.get(id)
    }

    pub fn clear_viewed(&mut self) {
        self.entries.clear();
        if let Err(e) = self.local.remove(VIEWED_EXPERTS_KEY) {
            tracing::warn!(error = %e, "Failed to remove viewed experts from local store");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries().into_iter().map(|e| e.id.as_str()).collect()
    }

    /// Entries, most recent first.
    pub fn entries(&self) -> Vec<&ViewedExpert> {
        let mut all: Vec<&ViewedExpert> = self.entries.values().collect();
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        all
    }

    fn save(&self) {
        if let Err(e) = local::save_json(self.local.as_ref(), VIEWED_EXPERTS_KEY, &self.entries) {
            tracing::warn!(error = %e, "Failed to persist viewed experts");
        }
    }
}
