//! CRM access gate
//!
//! `Loading → {NoAccess, Viewer, Editor, Admin}`. Dev mode short-circuits to
//! `Admin` at construction. Otherwise the gate waits for authentication and
//! does a single `crm_admins` lookup. Once out of `Loading` the state never
//! changes for the life of the gate.

use serde::Serialize;

use crate::config::RuntimeFlags;
use crate::models::AccessLevel;
use crate::remote::{Filter, RemoteStore, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessState {
    Loading,
    NoAccess,
    Viewer,
    Editor,
    Admin,
}

impl AccessState {
    pub fn level(&self) -> Option<AccessLevel> {
        match self {
            AccessState::Viewer => Some(AccessLevel::Viewer),
            AccessState::Editor => Some(AccessLevel::Editor),
            AccessState::Admin => Some(AccessLevel::Admin),
            AccessState::Loading | AccessState::NoAccess => None,
        }
    }

    pub fn can_view(&self) -> bool {
        self.level().is_some()
    }

    pub fn can_edit(&self) -> bool {
        self.level() >= Some(AccessLevel::Editor)
    }

    pub fn is_admin(&self) -> bool {
        self.level() == Some(AccessLevel::Admin)
    }
}

impl From<AccessLevel> for AccessState {
    fn from(level: AccessLevel) -> Self {
        match level {
            AccessLevel::Viewer => AccessState::Viewer,
            AccessLevel::Editor => AccessState::Editor,
            AccessLevel::Admin => AccessState::Admin,
        }
    }
}

#[derive(Debug)]
pub struct AccessGate {
    state: AccessState,
}

impl AccessGate {
    pub fn new(flags: &RuntimeFlags) -> Self {
        let state = if flags.dev_mode() {
            tracing::info!("Dev mode — CRM access granted as admin");
            AccessState::Admin
        } else {
            AccessState::Loading
        };
        Self { state }
    }

    pub fn state(&self) -> AccessState {
        self.state
    }

    /// Feed the authentication result. Only the first call out of `Loading`
    /// does any work.
    pub async fn authenticated(&mut self, identity: Option<&str>, remote: &dyn RemoteStore) -> AccessState {
        if self.state != AccessState::Loading {
            return self.state;
        }

        self.state = match identity.map(str::trim).filter(|id| !id.is_empty()) {
            None => AccessState::NoAccess,
            Some(id) => lookup(id, remote).await,
        };
        self.state
    }
}

async fn lookup(identity: &str, remote: &dyn RemoteStore) -> AccessState {
    let filters = [Filter::eq("telegram_id", identity)];
    match remote.select_one(Table::CrmAdmins, &filters).await {
        Ok(Some(row)) => {
            let level = row
                .get("access_level")
                .and_then(|v| v.as_str())
                .and_then(AccessLevel::parse);
            match level {
                Some(level) => {
                    tracing::info!(telegram_id = identity, ?level, "CRM access resolved");
                    level.into()
                }
                None => {
                    tracing::warn!(telegram_id = identity, "Unrecognised CRM access level");
                    AccessState::NoAccess
                }
            }
        }
        Ok(None) => AccessState::NoAccess,
        Err(e) => {
            tracing::error!(telegram_id = identity, error = %e, "CRM access lookup failed");
            AccessState::NoAccess
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemoteStore;
    use serde_json::json;

    fn store_with_admin(level: &str) -> MemoryRemoteStore {
        let store = MemoryRemoteStore::new();
        store.seed(Table::CrmAdmins, json!({"id": 1, "telegram_id": 555, "access_level": level}));
        store
    }

    #[tokio::test]
    async fn test_dev_mode_is_admin_without_lookup() {
        let store = MemoryRemoteStore::new();
        let mut gate = AccessGate::new(&RuntimeFlags::fixed(true));
        assert_eq!(gate.state(), AccessState::Admin);

        assert_eq!(gate.authenticated(None, &store).await, AccessState::Admin);
        assert!(store.ops().is_empty());
    }

    #[tokio::test]
    async fn test_no_identity_is_no_access() {
        let store = MemoryRemoteStore::new();
        let mut gate = AccessGate::new(&RuntimeFlags::fixed(false));
        assert_eq!(gate.state(), AccessState::Loading);
        assert_eq!(gate.authenticated(None, &store).await, AccessState::NoAccess);
        assert!(store.ops().is_empty());
    }

    #[tokio::test]
    async fn test_identity_resolves_stored_level() {
        let store = store_with_admin("editor");
        let mut gate = AccessGate::new(&RuntimeFlags::fixed(false));
        let state = gate.authenticated(Some("555"), &store).await;
        assert_eq!(state, AccessState::Editor);
        assert!(state.can_edit());
        assert!(!state.is_admin());
    }

    #[tokio::test]
    async fn test_unknown_identity_and_errors_are_no_access() {
        let store = store_with_admin("admin");
        let mut gate = AccessGate::new(&RuntimeFlags::fixed(false));
        assert_eq!(gate.authenticated(Some("999"), &store).await, AccessState::NoAccess);

        let failing = store_with_admin("admin");
        failing.set_failing(true);
        let mut gate = AccessGate::new(&RuntimeFlags::fixed(false));
        assert_eq!(gate.authenticated(Some("555"), &failing).await, AccessState::NoAccess);

        let odd = store_with_admin("superuser");
        let mut gate = AccessGate::new(&RuntimeFlags::fixed(false));
        assert_eq!(gate.authenticated(Some("555"), &odd).await, AccessState::NoAccess);
    }

    #[tokio::test]
    async fn test_terminal_state_is_stable() {
        let store = store_with_admin("viewer");
        let mut gate = AccessGate::new(&RuntimeFlags::fixed(false));
        assert_eq!(gate.authenticated(Some("555"), &store).await, AccessState::Viewer);

        store.seed(Table::CrmAdmins, json!({"id": 2, "telegram_id": 777, "access_level": "admin"}));
        assert_eq!(gate.authenticated(Some("777"), &store).await, AccessState::Viewer);
        assert_eq!(store.ops().len(), 1);
    }

    #[test]
    fn test_permission_helpers() {
        assert!(!AccessState::Loading.can_view());
        assert!(!AccessState::NoAccess.can_view());
        assert!(AccessState::Viewer.can_view());
        assert!(!AccessState::Viewer.can_edit());
        assert!(AccessState::Admin.can_edit());
        assert!(AccessState::Admin.is_admin());
    }
}
