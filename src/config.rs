use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Name of the env var holding the destination-chain signing key. Never
/// read from the TOML file, never logged, never persisted.
pub const PRIVATE_KEY_ENV_VAR: &str = "BRIDGECLI_PRI_KEY";

const MIN_LOG_FETCH_INTERVAL_MS: u64 = 3_000;

#[derive(Debug, Clone, Deserialize)]
struct RawConfirmerConfig {
    workers: Option<usize>,
    #[serde(rename = "confirmation-blocks")]
    confirmation_blocks: Option<u64>,
    interval: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    #[serde(rename = "in-endpoint")]
    in_endpoint: Option<String>,
    #[serde(rename = "out-endpoint")]
    out_endpoint: Option<String>,
    bank: Option<String>,
    #[serde(rename = "log-fetch-interval")]
    log_fetch_interval: Option<u64>,
    #[serde(rename = "db-path")]
    db_path: Option<String>,
    confirmer: Option<RawConfirmerConfig>,
}

#[derive(Debug, Clone)]
pub struct ConfirmerSettings {
    pub workers: usize,
    pub confirmation_blocks: u64,
    pub interval_ms: u64,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub in_endpoint: String,
    pub out_endpoint: String,
    pub bank: String,
    pub log_fetch_interval_ms: u64,
    pub db_path: PathBuf,
    pub confirmer: ConfirmerSettings,
}

impl BridgeConfig {
    /// Loads `home/config.toml`, applies `BRIDGECLI_*` environment
    /// overrides, validates, and returns the merged config. The private key
    /// is intentionally not part of this struct; callers fetch it separately
    /// via [`require_private_key`].
    pub fn load(home: &Path) -> Result<Self, ConfigError> {
        let path = home.join("config.toml");
        let text = fs::read_to_string(&path)
            .map_err(|e| ConfigError::Missing(format!("{} ({e})", path.display())))?;
        let raw: RawConfig = toml::from_str(&text)
            .map_err(|e| ConfigError::Invalid("config.toml".into(), e.to_string()))?;

        let in_endpoint = overridable_string(raw.in_endpoint, "BRIDGECLI_IN_ENDPOINT")
            .ok_or_else(|| ConfigError::Missing("in-endpoint".into()))?;
        let out_endpoint = overridable_string(raw.out_endpoint, "BRIDGECLI_OUT_ENDPOINT")
            .ok_or_else(|| ConfigError::Missing("out-endpoint".into()))?;
        let bank = overridable_string(raw.bank, "BRIDGECLI_BANK")
            .ok_or_else(|| ConfigError::Missing("bank".into()))?;
        validate_hex_address(&bank, "bank")?;

        let log_fetch_interval_ms = overridable_u64(
            raw.log_fetch_interval,
            "BRIDGECLI_LOG_FETCH_INTERVAL",
            10_000,
        )?;
        if log_fetch_interval_ms < MIN_LOG_FETCH_INTERVAL_MS {
            return Err(ConfigError::Invalid(
                "log-fetch-interval".into(),
                format!("must be >= {MIN_LOG_FETCH_INTERVAL_MS}ms"),
            ));
        }

        let db_path = overridable_string(raw.db_path, "BRIDGECLI_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("db"));

        let confirmer_raw = raw.confirmer.unwrap_or(RawConfirmerConfig {
            workers: None,
            confirmation_blocks: None,
            interval: None,
        });
        let workers = overridable_u64(
            confirmer_raw.workers.map(|w| w as u64),
            "BRIDGECLI_CONFIRMER_WORKERS",
            2,
        )? as usize;
        if workers == 0 {
            return Err(ConfigError::Invalid(
                "confirmer.workers".into(),
                "must be > 0".into(),
            ));
        }
        let confirmation_blocks = overridable_u64(
            confirmer_raw.confirmation_blocks,
            "BRIDGECLI_CONFIRMER_CONFIRMATION_BLOCKS",
            2,
        )?;
        let interval_ms = overridable_u64(
            confirmer_raw.interval,
            "BRIDGECLI_CONFIRMER_INTERVAL",
            10_000,
        )?;

        Ok(Self {
            in_endpoint,
            out_endpoint,
            bank,
            log_fetch_interval_ms,
            db_path,
            confirmer: ConfirmerSettings {
                workers,
                confirmation_blocks,
                interval_ms,
            },
        })
    }

    /// Default home directory: `$HOME/.bridgecli`.
    pub fn default_home() -> Result<PathBuf, ConfigError> {
        let home = env::var("HOME").map_err(|_| ConfigError::Missing("HOME".into()))?;
        Ok(PathBuf::from(home).join(".bridgecli"))
    }
}

/// Renders the TOML template written by `bridgecli init`.
pub fn template_toml() -> String {
    r#"in-endpoint = "http://localhost:8545"
out-endpoint = "http://localhost:8545"
bank = "0x0000000000000000000000000000000000000000"
log-fetch-interval = 10000

[confirmer]
workers = 2
confirmation-blocks = 2
interval = 10000
"#
    .to_string()
}

/// Fetches the destination-chain private key. Fatal (not recoverable) if
/// absent, and never read from any other source.
pub fn require_private_key() -> Result<String, ConfigError> {
    env::var(PRIVATE_KEY_ENV_VAR)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::Missing(PRIVATE_KEY_ENV_VAR.into()))
}

fn overridable_string(from_file: Option<String>, env_name: &str) -> Option<String> {
    match env::var(env_name) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => from_file,
    }
}

fn overridable_u64(
    from_file: Option<u64>,
    env_name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    if let Ok(v) = env::var(env_name) {
        if !v.is_empty() {
            return v
                .parse()
                .map_err(|_| ConfigError::Invalid(env_name.into(), format!("could not parse '{v}'")));
        }
    }
    Ok(from_file.unwrap_or(default))
}

fn validate_hex_address(value: &str, name: &str) -> Result<(), ConfigError> {
    let s = value.strip_prefix("0x").unwrap_or(value);
    if s.len() != 40 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ConfigError::Invalid(
            name.into(),
            "must be a 0x-prefixed 40 hex-character address".into(),
        ));
    }
    Ok(())
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(String),
    Invalid(String, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(name) => write!(f, "missing required config: {name}"),
            ConfigError::Invalid(name, reason) => write!(f, "invalid config {name}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_hex_address_accepts_well_formed() {
        assert!(validate_hex_address("0x0000000000000000000000000000000000000001", "bank").is_ok());
    }

    #[test]
    fn test_validate_hex_address_rejects_wrong_length() {
        assert!(validate_hex_address("0x1234", "bank").is_err());
    }

    #[test]
    fn test_template_toml_parses_back_into_raw_config() {
        let raw: RawConfig = toml::from_str(&template_toml()).unwrap();
        assert_eq!(raw.log_fetch_interval, Some(10_000));
        assert_eq!(raw.confirmer.unwrap().workers, Some(2));
    }
}
