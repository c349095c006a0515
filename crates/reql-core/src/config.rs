//! Configuration schema (reql.toml)

use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// SQL dialect the statements are written in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectConfig {
    /// SQLite dialect, the one the ephemeral store executes
    #[default]
    Sqlite,

    /// PostgreSQL dialect
    #[serde(alias = "pgsql")]
    Postgres,
}

impl std::str::FromStr for DialectConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "pgsql" => Ok(Self::Postgres),
            other => Err(ConfigError::InvalidValue {
                key: "dialect".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Ephemeral engine settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Memory cap in bytes; `None` means unlimited
    #[serde(default, deserialize_with = "bytes_or_string")]
    pub memory_limit: Option<u64>,
}

/// Cached result reuse
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum age of a reusable cached result in seconds; `None` accepts any age
    #[serde(default)]
    pub max_age: Option<u64>,
}

impl CacheConfig {
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age.map(Duration::from_secs)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// SQL dialect
    #[serde(default)]
    pub dialect: DialectConfig,

    /// Accept `[: :]`, `[= =]` and `[< >]` blocks
    #[serde(default = "default_macros")]
    pub macros: bool,

    /// Ephemeral engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Cached result settings
    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_macros() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dialect: DialectConfig::default(),
            macros: default_macros(),
            engine: EngineConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Self::from_toml(&contents)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Apply `REQL_*` environment overrides
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("REQL_MEMORY_LIMIT") {
            self.engine.memory_limit = parse_bytes("REQL_MEMORY_LIMIT", &value)?;
        }

        if let Some(value) = lookup("REQL_DIALECT") {
            self.dialect = value.parse()?;
        }

        if let Some(value) = lookup("REQL_CACHE_MAX_AGE") {
            let trimmed = value.trim();
            self.cache.max_age = if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "REQL_CACHE_MAX_AGE".to_string(),
                    value: value.clone(),
                })?)
            };
        }

        Ok(())
    }
}

fn parse_bytes(key: &str, value: &str) -> Result<Option<u64>, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}

/// The memory option historically arrives as a string field
fn bytes_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(text)) => {
            parse_bytes("memory_limit", &text).map_err(serde::de::Error::custom)
        }
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.dialect, DialectConfig::Sqlite);
        assert!(config.macros);
        assert_eq!(config.engine.memory_limit, None);
        assert_eq!(config.cache.max_age(), None);
    }

    #[test]
    fn memory_limit_accepts_number_or_string() {
        let config = Config::from_toml("[engine]\nmemory_limit = 4096\n").unwrap();
        assert_eq!(config.engine.memory_limit, Some(4096));

        let config = Config::from_toml("[engine]\nmemory_limit = \"8192\"\n").unwrap();
        assert_eq!(config.engine.memory_limit, Some(8192));

        let config = Config::from_toml("[engine]\nmemory_limit = \"\"\n").unwrap();
        assert_eq!(config.engine.memory_limit, None);

        assert!(Config::from_toml("[engine]\nmemory_limit = \"lots\"\n").is_err());
    }

    #[test]
    fn full_config() {
        let toml = r#"
            dialect = "pgsql"
            macros = false

            [cache]
            max_age = 60
        "#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.dialect, DialectConfig::Postgres);
        assert!(!config.macros);
        assert_eq!(config.cache.max_age(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = [
            ("REQL_MEMORY_LIMIT", "1024"),
            ("REQL_DIALECT", "postgres"),
            ("REQL_CACHE_MAX_AGE", "5"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.engine.memory_limit, Some(1024));
        assert_eq!(config.dialect, DialectConfig::Postgres);
        assert_eq!(config.cache.max_age, Some(5));
    }

    #[test]
    fn invalid_override_is_reported() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|key| (key == "REQL_DIALECT").then(|| "oracle".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("oracle"));
    }

    #[test]
    fn config_toml_roundtrip() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config, parsed);
    }
}
