use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

use crate::local::{LocalStore, DEV_MODE_KEY};

/// Environment variable that overrides every other dev-mode source.
pub const DEV_MODE_ENV: &str = "SAV_DEV_MODE";

#[derive(Debug, Deserialize, Clone)]
pub struct SavConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub access: AccessConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout_seconds: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub tariffs: Vec<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://ai.gateway.lovable.dev/v1".to_string(),
            model: "google/gemini-2.5-flash".to_string(),
            api_key_env: "SAV_AI_API_KEY".to_string(),
            timeout_seconds: 60,
            max_retries: 2,
            retry_delay_ms: 500,
            tariffs: vec![
                "start".to_string(),
                "business".to_string(),
                "premium".to_string(),
            ],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub api_base: String,
    pub bot_token_env: String,
    pub timeout_seconds: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            bot_token_env: "TELEGRAM_BOT_TOKEN".to_string(),
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8770,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub local_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_dir: "~/.sav".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.local_dir).into_owned())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AccessConfig {
    #[serde(default)]
    pub dev_mode: bool,
}

impl SavConfig {
    /// Load the TOML file at `path`, then apply `SAV__SECTION__KEY` overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("SAV").separator("__"))
            .build()?;
        s.try_deserialize()
    }
}

/// Where the dev-mode flag was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagSource {
    Env,
    Local,
    Config,
}

/// Process-wide flags, resolved once at startup and immutable afterwards.
///
/// Precedence for `dev_mode`: the `SAV_DEV_MODE` environment variable, then the
/// `sav-dev-mode` local key, then `[access] dev_mode` from the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeFlags {
    dev_mode: bool,
    source: FlagSource,
}

impl RuntimeFlags {
    pub fn resolve(config: &AccessConfig, local: &dyn LocalStore) -> Self {
        let env = std::env::var(DEV_MODE_ENV).ok();
        Self::resolve_from(config, env.as_deref(), local)
    }

    pub fn resolve_from(config: &AccessConfig, env: Option<&str>, local: &dyn LocalStore) -> Self {
        if let Some(v) = env.and_then(parse_flag) {
            return Self { dev_mode: v, source: FlagSource::Env };
        }

        match local.get(DEV_MODE_KEY) {
            Ok(Some(raw)) => {
                let raw = raw.trim().trim_matches('"');
                if let Some(v) = parse_flag(raw) {
                    return Self { dev_mode: v, source: FlagSource::Local };
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to read dev-mode flag from local store"),
        }

        Self {
            dev_mode: config.dev_mode,
            source: FlagSource::Config,
        }
    }

    /// Fixed flags, bypassing every ambient source.
    pub fn fixed(dev_mode: bool) -> Self {
        Self {
            dev_mode,
            source: FlagSource::Config,
        }
    }

    pub fn dev_mode(&self) -> bool {
        self.dev_mode
    }

    pub fn source(&self) -> FlagSource {
        self.source
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
