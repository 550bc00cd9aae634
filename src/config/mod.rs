use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::QueryError;

/// Server-process configuration (listen address only; per-datasource settings
/// arrive from the host with each request).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl AppConfig {
    /// Load configuration from file and environment variables
    pub fn load(config_path: &str) -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::File::with_name(config_path));

        // Add environment variables with prefix SNOWGATE_
        // Example: SNOWGATE_SERVER_PORT=8080
        builder = builder.add_source(
            config::Environment::with_prefix("SNOWGATE")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

/// Instance settings as supplied by the host with every request: typed
/// identity fields, an opaque JSON settings blob, and the decrypted secrets.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSettings {
    pub uid: String,
    pub name: String,
    /// Configuration revision; bumped by the host on every settings change.
    #[serde(default)]
    pub updated: i64,
    #[serde(default)]
    pub json_data: Value,
    #[serde(default)]
    pub decrypted_secure_json_data: std::collections::HashMap<String, String>,
}

pub const DEFAULT_MAX_OPEN_CONNECTIONS: i64 = 100;
pub const DEFAULT_CONNECTION_LIFETIME_MINUTES: i64 = 60;
pub const DEFAULT_CACHE_SIZE_MB: i64 = 2048;
pub const DEFAULT_CACHE_RETENTION_MINUTES: i64 = 60;

/// Raw per-datasource settings blob. Numeric options arrive as strings from
/// the host; empty string means "apply the default".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPluginConfig {
    #[serde(default)]
    account: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    warehouse: String,
    #[serde(default)]
    database: String,
    #[serde(default)]
    schema: String,
    #[serde(default)]
    extra_config: String,
    #[serde(default)]
    max_open_connections: String,
    #[serde(default)]
    connection_lifetime: String,
    #[serde(default)]
    use_caching: bool,
    #[serde(default)]
    use_cache_by_default: bool,
    #[serde(default)]
    cache_size: String,
    #[serde(default)]
    cache_retention: String,
}

/// Parsed, validated per-datasource settings. Immutable for the lifetime of
/// one instance revision.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    pub account: String,
    pub username: String,
    pub role: String,
    pub warehouse: String,
    pub database: String,
    pub schema: String,
    /// Opaque DSN tail, appended verbatim after the encoded parameters.
    pub extra_config: String,
    pub max_open_connections: i64,
    /// Per-connection maximum lifetime, in minutes.
    pub connection_lifetime: i64,
    pub use_caching: bool,
    pub use_cache_by_default: bool,
    /// Hard cache byte cap in MB; 0 means unbounded (eviction by age only).
    pub cache_size: i64,
    /// Cache entry lifetime, in minutes.
    pub cache_retention: i64,
}

impl PluginConfig {
    /// Parse the settings blob of an instance. Pure: no I/O, no defaults from
    /// the environment.
    pub fn from_settings(settings: &InstanceSettings) -> Result<Self, QueryError> {
        let raw: RawPluginConfig = if settings.json_data.is_null() {
            RawPluginConfig::default()
        } else {
            serde_json::from_value(settings.json_data.clone())
                .map_err(|e| QueryError::Config(format!("invalid settings blob: {e}")))?
        };

        let max_open_connections = parse_numeric_option(
            "maxOpenConnections",
            &raw.max_open_connections,
            DEFAULT_MAX_OPEN_CONNECTIONS,
            1,
        )?;
        let connection_lifetime = parse_numeric_option(
            "connectionLifetime",
            &raw.connection_lifetime,
            DEFAULT_CONNECTION_LIFETIME_MINUTES,
            1,
        )?;
        let cache_size =
            parse_numeric_option("cacheSize", &raw.cache_size, DEFAULT_CACHE_SIZE_MB, 0)?;
        let cache_retention = parse_numeric_option(
            "cacheRetention",
            &raw.cache_retention,
            DEFAULT_CACHE_RETENTION_MINUTES,
            1,
        )?;

        Ok(PluginConfig {
            account: raw.account,
            username: raw.username,
            role: raw.role,
            warehouse: raw.warehouse,
            database: raw.database,
            schema: raw.schema,
            extra_config: raw.extra_config,
            max_open_connections,
            connection_lifetime,
            use_caching: raw.use_caching,
            use_cache_by_default: raw.use_cache_by_default,
            cache_size,
            cache_retention,
        })
    }
}

/// Coerce a string-typed numeric option: empty selects the default, anything
/// else must be a base-10 integer within bounds.
fn parse_numeric_option(
    name: &str,
    value: &str,
    default: i64,
    min: i64,
) -> Result<i64, QueryError> {
    if value.is_empty() {
        return Ok(default);
    }
    let parsed: i64 = value
        .parse()
        .map_err(|_| QueryError::Config(format!("{name}: '{value}' is not a valid integer")))?;
    if parsed < min {
        return Err(QueryError::Config(format!(
            "{name}: {parsed} is below the minimum of {min}"
        )));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(json_data: Value) -> InstanceSettings {
        InstanceSettings {
            uid: "uid-1".to_string(),
            name: "warehouse-prod".to_string(),
            updated: 1,
            json_data,
            decrypted_secure_json_data: Default::default(),
        }
    }

    #[test]
    fn test_defaults_for_empty_strings() {
        let cfg = PluginConfig::from_settings(&settings(json!({
            "account": "acc1",
            "username": "alice",
            "maxOpenConnections": "",
            "connectionLifetime": "",
            "cacheSize": "",
            "cacheRetention": "",
        })))
        .unwrap();

        assert_eq!(cfg.max_open_connections, 100);
        assert_eq!(cfg.connection_lifetime, 60);
        assert_eq!(cfg.cache_size, 2048);
        assert_eq!(cfg.cache_retention, 60);
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let cfg = PluginConfig::from_settings(&settings(json!({}))).unwrap();
        assert_eq!(cfg.max_open_connections, 100);
        assert_eq!(cfg.connection_lifetime, 60);
        assert_eq!(cfg.cache_size, 2048);
        assert_eq!(cfg.cache_retention, 60);
        assert!(!cfg.use_caching);
    }

    #[test]
    fn test_numeric_string_coercion() {
        let cfg = PluginConfig::from_settings(&settings(json!({
            "maxOpenConnections": "7",
            "cacheSize": "512",
            "useCaching": true,
        })))
        .unwrap();
        assert_eq!(cfg.max_open_connections, 7);
        assert_eq!(cfg.cache_size, 512);
        assert!(cfg.use_caching);
    }

    #[test]
    fn test_non_numeric_value_is_config_error() {
        let err = PluginConfig::from_settings(&settings(json!({
            "maxOpenConnections": "many",
        })))
        .unwrap_err();
        assert_eq!(err.kind(), "config");
        assert!(err.to_string().contains("maxOpenConnections"));
    }

    #[test]
    fn test_bounds_are_enforced() {
        let err = PluginConfig::from_settings(&settings(json!({
            "maxOpenConnections": "0",
        })))
        .unwrap_err();
        assert_eq!(err.kind(), "config");

        // cacheSize=0 is legal: unbounded cache
        let cfg = PluginConfig::from_settings(&settings(json!({
            "cacheSize": "0",
        })))
        .unwrap();
        assert_eq!(cfg.cache_size, 0);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let cfg = PluginConfig::from_settings(&settings(json!({
            "account": "acc1",
            "somethingElse": "ignored",
            "basicAuth": true,
        })))
        .unwrap();
        assert_eq!(cfg.account, "acc1");
    }
}
