//! Named string settings consulted at first use.
//!
//! # Responsibility
//! - Load settings from pairs, a TOML document or prefixed environment variables.
//! - Provide typed views for cache policy and connection strings.
//!
//! # Invariants
//! - `Settings` is immutable once built; engines read it only while building.
//! - Key lookup prefers an exact match, then falls back to ASCII case-insensitive.

use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub const DATA_ACCESS_CACHE_ENABLE: &str = "DataAccessCacheEnable";
pub const DATA_ACCESS_CACHE_EXPIRY: &str = "DataAccessCacheExpiry";
pub const DATA_ACCESS_CACHE_TYPE: &str = "DataAccessCacheType";
pub const DATA_PORTAL_CACHE_ENABLE: &str = "DataPortalCacheEnable";
pub const DATA_PORTAL_CACHE_EXPIRY: &str = "DataPortalCacheExpiry";
pub const DATA_PORTAL_CACHE_TYPE: &str = "DataPortalCacheType";
pub const DATA_PORTAL_CLIENT: &str = "DataPortalClient";
pub const DATA_PORTAL_URL: &str = "DataPortalUrl";
pub const CONNECTION_STRINGS: &str = "ConnectionStrings";
pub const DEFAULT_CONNECTION_NAME: &str = "DbConnectionString";

const DEFAULT_DATA_ACCESS_EXPIRY_SECS: u64 = 3600;
const DEFAULT_DATA_PORTAL_EXPIRY_SECS: u64 = 60;
const DEFAULT_CACHE_STORE: &str = "memory";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing setting `{0}`")]
    Missing(String),
    #[error("invalid value `{value}` for setting `{key}`: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
    #[error("failed to parse settings: {0}")]
    Parse(String),
    #[error("unknown cache store `{0}`")]
    UnknownCacheStore(String),
    #[error("entity type `{0}` is not registered")]
    UnregisteredEntity(String),
}

/// Immutable map of named string settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    /// Returns a copy with `key` set to `value`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Parses a TOML document; nested tables become dotted keys.
    ///
    /// ```toml
    /// DataPortalClient = "remote"
    /// [ConnectionStrings]
    /// DbConnectionString = "Data Source=/var/lib/app/data.db"
    /// ```
    ///
    /// # Errors
    /// - `Parse` on invalid TOML.
    /// - `Invalid` when a value is an array (no scalar form).
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = text
            .parse()
            .map_err(|err: toml::de::Error| ConfigError::Parse(err.to_string()))?;
        let mut values = BTreeMap::new();
        flatten_toml("", &table, &mut values)?;
        Ok(Self { values })
    }

    /// Collects environment variables starting with `prefix`.
    ///
    /// `__` in the remaining name becomes `.`, so
    /// `APP_ConnectionStrings__Main` maps to `ConnectionStrings.Main`.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_pairs(std::env::vars().filter_map(|(key, value)| {
            key.strip_prefix(prefix)
                .filter(|rest| !rest.is_empty())
                .map(|rest| (rest.replace("__", "."), value))
        }))
    }

    /// Returns `self` with every entry of `overrides` applied on top.
    pub fn merged(mut self, overrides: Settings) -> Self {
        self.values.extend(overrides.values);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .or_else(|| {
                self.values
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(key))
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(raw) = self.get(key) else {
            return Ok(default);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "" => Ok(default),
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(invalid(key, raw, "expected true|false")),
        }
    }

    pub fn get_secs(&self, key: &str, default: u64) -> Result<Duration, ConfigError> {
        let Some(raw) = self.get(key).map(str::trim).filter(|raw| !raw.is_empty()) else {
            return Ok(Duration::from_secs(default));
        };
        raw.parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| invalid(key, raw, "expected whole seconds"))
    }

    /// Entries under `prefix.`, keyed by the remainder of their name.
    ///
    /// Yields in name order; case-insensitive on the prefix.
    pub fn section<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.values.iter().filter_map(move |(key, value)| {
            let (head, rest) = key.split_once('.')?;
            (head.eq_ignore_ascii_case(prefix) && !rest.is_empty())
                .then_some((rest, value.as_str()))
        })
    }

    /// Resolves a connection string by name.
    ///
    /// Without a name, `DbConnectionString` is used, falling back to the first
    /// defined connection string (by name order).
    ///
    /// # Errors
    /// - `Missing` when the named (or any) connection string is absent.
    pub fn connection_string(&self, name: Option<&str>) -> Result<&str, ConfigError> {
        if let Some(name) = name {
            let key = format!("{CONNECTION_STRINGS}.{name}");
            return self.get(&key).ok_or(ConfigError::Missing(key));
        }

        let default_key = format!("{CONNECTION_STRINGS}.{DEFAULT_CONNECTION_NAME}");
        if let Some(found) = self.get(&default_key) {
            return Ok(found);
        }
        self.section(CONNECTION_STRINGS)
            .next()
            .map(|(_, value)| value)
            .ok_or(ConfigError::Missing(default_key))
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn flatten_toml(
    path: &str,
    table: &toml::Table,
    out: &mut BTreeMap<String, String>,
) -> Result<(), ConfigError> {
    for (name, value) in table {
        let key = if path.is_empty() {
            name.clone()
        } else {
            format!("{path}.{name}")
        };
        match value {
            toml::Value::Table(nested) => flatten_toml(&key, nested, out)?,
            toml::Value::String(text) => {
                out.insert(key, text.clone());
            }
            toml::Value::Integer(number) => {
                out.insert(key, number.to_string());
            }
            toml::Value::Float(number) => {
                out.insert(key, number.to_string());
            }
            toml::Value::Boolean(flag) => {
                out.insert(key, flag.to_string());
            }
            toml::Value::Datetime(at) => {
                out.insert(key, at.to_string());
            }
            toml::Value::Array(_) => {
                return Err(invalid(&key, "[..]", "arrays are not supported"));
            }
        }
    }
    Ok(())
}

/// Cache policy for one cache tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub enabled: bool,
    pub expiry: Duration,
    /// Cache store name resolved through the store registry.
    pub store: String,
}

impl CacheSettings {
    /// Data access cache: `DataAccessCache*`, default expiry one hour.
    pub fn data_access(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            enabled: settings.get_bool(DATA_ACCESS_CACHE_ENABLE, true)?,
            expiry: settings.get_secs(DATA_ACCESS_CACHE_EXPIRY, DEFAULT_DATA_ACCESS_EXPIRY_SECS)?,
            store: settings
                .get_or(DATA_ACCESS_CACHE_TYPE, DEFAULT_CACHE_STORE)
                .to_string(),
        })
    }

    /// Data portal cache: `DataPortalCache*`, default expiry one minute.
    pub fn data_portal(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            enabled: settings.get_bool(DATA_PORTAL_CACHE_ENABLE, true)?,
            expiry: settings.get_secs(DATA_PORTAL_CACHE_EXPIRY, DEFAULT_DATA_PORTAL_EXPIRY_SECS)?,
            store: settings
                .get_or(DATA_PORTAL_CACHE_TYPE, DEFAULT_CACHE_STORE)
                .to_string(),
        })
    }
}
