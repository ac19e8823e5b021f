//! Server configuration.
//!
//! Loaded from a JSON file (path in `CONVOY_CONFIG`, default
//! `convoy.json`) with environment overrides on top. Unknown keys are
//! rejected so a typo fails startup instead of silently using a default.

use std::time::Duration;

use serde::Deserialize;

use crate::auth::BasicAuthUser;
use crate::error::{Error, Result};
use crate::types::{
    DefaultStrategyConfig, GroupConfig, HashAlgorithm, SignatureConfig, StrategyConfig,
};

pub const DEFAULT_CONFIG_PATH: &str = "convoy.json";

const SUPPORTED_REALMS: &[&str] = &["noop", "basic", "jwt", "native"];

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    5005
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub dsn: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    #[serde(rename = "type", default = "default_queue_type")]
    pub kind: String,
    /// Worker task count; `0` means twice the CPU count.
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

fn default_queue_type() -> String {
    "in_process".to_string()
}

fn default_queue_capacity() -> usize {
    100
}

fn default_poll_interval() -> u64 {
    2
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            kind: default_queue_type(),
            workers: 0,
            capacity: default_queue_capacity(),
            poll_interval_seconds: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JwtConfig {
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    #[serde(default = "default_realms")]
    pub realms: Vec<String>,
    #[serde(default)]
    pub basic: Vec<BasicAuthUser>,
    #[serde(default)]
    pub jwt: Option<JwtConfig>,
}

fn default_realms() -> Vec<String> {
    vec!["native".to_string()]
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            realms: default_realms(),
            basic: Vec::new(),
            jwt: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

fn default_cache_ttl() -> u64 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_response_size")]
    pub max_response_size: usize,
}

fn default_timeout() -> u64 {
    10
}

fn default_max_response_size() -> usize {
    10 * 1024
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            max_response_size: default_max_response_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Creation-time default for groups that omit a signature config.
    #[serde(default = "default_signature")]
    pub signature: SignatureConfig,
    /// Creation-time default for groups that omit a strategy config.
    #[serde(default = "default_strategy")]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

fn default_signature() -> SignatureConfig {
    SignatureConfig {
        header: "X-Convoy-Signature".to_string(),
        hash: HashAlgorithm::Sha256,
    }
}

fn default_strategy() -> StrategyConfig {
    StrategyConfig {
        kind: "default".to_string(),
        default: DefaultStrategyConfig {
            interval_seconds: 60,
            retry_limit: 5,
        },
    }
}

impl Config {
    /// Load from the file at `path`, then apply `PORT` / `DATABASE_DSN`
    /// environment overrides and validate.
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Invalid(format!("config: failed to read {}: {}", path, e)))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let mut config: Config = serde_json::from_str(raw)
            .map_err(|e| Error::Invalid(format!("config: {}", e)))?;

        if let Ok(port) = std::env::var("PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| Error::Invalid("config: PORT must be a number".to_string()))?;
        }
        if let Ok(dsn) = std::env::var("DATABASE_DSN") {
            config.database.dsn = dsn;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.queue.kind != "in_process" {
            return Err(Error::Invalid("queue.type:unsupported value".to_string()));
        }
        if self.strategy.kind != "default" {
            return Err(Error::Invalid("strategy.type:unsupported value".to_string()));
        }
        if self.cache.ttl_seconds > 60 {
            return Err(Error::Invalid(
                "cache.ttl_seconds:must be at most 60".to_string(),
            ));
        }
        for realm in &self.auth.realms {
            if !SUPPORTED_REALMS.contains(&realm.as_str()) {
                return Err(Error::Invalid(format!(
                    "auth.realms:unsupported realm {}",
                    realm
                )));
            }
            if realm == "jwt" && self.auth.jwt.is_none() {
                return Err(Error::Invalid(
                    "auth.jwt.secret:required for the jwt realm".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Group configuration applied when a create request omits its own.
    pub fn default_group_config(&self) -> GroupConfig {
        GroupConfig {
            signature: self.signature.clone(),
            strategy: self.strategy.clone(),
            disable_endpoint: false,
            replay_attacks: false,
        }
    }
}

/// Parse a duration string such as `"30s"`, `"1m"` or `"2h"`. A bare
/// number is taken as seconds.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Invalid("invalid duration: empty".to_string()));
    }
    let (digits, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => value.split_at(idx),
        None => (value, "s"),
    };
    let amount: u64 = digits
        .parse()
        .map_err(|_| Error::Invalid(format!("invalid duration: {}", value)))?;
    let seconds = match unit {
        "s" => amount,
        "m" => amount * 60,
        "h" => amount * 3600,
        _ => return Err(Error::Invalid(format!("invalid duration: {}", value))),
    };
    Ok(Duration::from_secs(seconds))
}
