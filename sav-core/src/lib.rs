pub mod access;
pub mod ai;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod local;
pub mod messaging;
pub mod models;
pub mod remote;
pub mod telegram;
pub mod templates;
pub mod tracker;
pub mod upsert;
pub mod viewed_set;

pub use access::{AccessGate, AccessState};
pub use ai::{AiClient, AiError, GatewayConfig};
pub use config::{RuntimeFlags, SavConfig};
pub use error::SavError;
pub use local::{FileLocalStore, LocalStore, MemoryLocalStore};
pub use remote::{MemoryRemoteStore, PgRemoteStore, RemoteId, RemoteStore, Table};
pub use telegram::{BotConfig, TelegramClient, TelegramError};
pub use templates::{Tier, TemplateStore};
pub use tracker::{ActionDetails, SessionTracker};
pub use viewed_set::ViewedSet;
