use anyhow::anyhow;
use chrono_tz::Tz;
use std::env;
use std::path::PathBuf;

use crate::error::AuditError;
use crate::services::eligibility::{DEFAULT_UNREGISTERED_MODELS, DEFAULT_UNREGISTERED_URLS};
use crate::services::formatter::{is_valid_timestamp_format, DEFAULT_TIMESTAMP_FORMAT};

const MIB: u64 = 1024 * 1024;
const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub audit: AuditConfig,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let audit = AuditConfig::from_lookup(|key| env::var(key).ok())
            .map_err(|err| anyhow!("Invalid audit configuration: {}", err))?;

        Ok(Config { bind_addr, audit })
    }
}

/// One rotating log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub file_name: String,
    pub max_bytes: u64,
    pub backup_count: usize,
}

impl ChannelConfig {
    fn new(file_name: &str, max_bytes: u64, backup_count: usize) -> Self {
        Self {
            file_name: file_name.to_string(),
            max_bytes,
            backup_count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub service_name: String,
    pub unregistered_urls: Vec<String>,
    pub registered_urls: Vec<String>,
    pub unregistered_models: Vec<String>,
    pub log_dir: PathBuf,
    pub api_log: ChannelConfig,
    pub model_log: ChannelConfig,
    pub login_log: ChannelConfig,
    pub app_log: ChannelConfig,
    pub timestamp_format: String,
    pub time_zone: Tz,
    pub max_body_bytes: usize,
    pub trust_forwarded_proto: bool,
    pub app_log_enabled: bool,
    pub app_log_level: tracing::Level,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            service_name: "default".to_string(),
            unregistered_urls: DEFAULT_UNREGISTERED_URLS
                .iter()
                .map(|pattern| pattern.to_string())
                .collect(),
            registered_urls: Vec::new(),
            unregistered_models: DEFAULT_UNREGISTERED_MODELS
                .iter()
                .map(|model| model.to_string())
                .collect(),
            log_dir: PathBuf::from("audit_logs"),
            api_log: ChannelConfig::new("api.log", 10 * MIB, 5),
            model_log: ChannelConfig::new("audit.log", 10 * MIB, 5),
            login_log: ChannelConfig::new("login.log", 5 * MIB, 5),
            app_log: ChannelConfig::new("app.log", 10 * MIB, 5),
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            time_zone: Tz::UTC,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            trust_forwarded_proto: false,
            app_log_enabled: true,
            app_log_level: tracing::Level::INFO,
        }
    }
}

impl AuditConfig {
    pub fn load() -> Result<Self, AuditError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from `lookup`, which returns the raw value of
    /// a setting or `None` when it is unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AuditError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let service_name = get("AUDIT_SERVICE_NAME").unwrap_or(defaults.service_name);

        let mut unregistered_urls = match get("AUDIT_UNREGISTERED_URLS_DEFAULT") {
            Some(raw) => parse_list("AUDIT_UNREGISTERED_URLS_DEFAULT", &raw)?,
            None => defaults.unregistered_urls,
        };
        if let Some(raw) = get("AUDIT_UNREGISTERED_URLS_EXTRA") {
            unregistered_urls.extend(parse_list("AUDIT_UNREGISTERED_URLS_EXTRA", &raw)?);
        }
        let registered_urls = match get("AUDIT_REGISTERED_URLS") {
            Some(raw) => parse_list("AUDIT_REGISTERED_URLS", &raw)?,
            None => defaults.registered_urls,
        };
        let mut unregistered_models = defaults.unregistered_models;
        if let Some(raw) = get("AUDIT_UNREGISTERED_MODELS") {
            unregistered_models.extend(parse_list("AUDIT_UNREGISTERED_MODELS", &raw)?);
        }

        let log_dir = get("AUDIT_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.log_dir);

        let api_log = channel(&get, "API", defaults.api_log)?;
        let model_log = channel(&get, "MODEL", defaults.model_log)?;
        let login_log = channel(&get, "LOGIN", defaults.login_log)?;
        let app_log = channel(&get, "APP", defaults.app_log)?;

        let timestamp_format = match get("AUDIT_TIMESTAMP_FORMAT") {
            Some(format) if is_valid_timestamp_format(&format) => format,
            Some(format) => {
                return Err(AuditError::invalid_config("AUDIT_TIMESTAMP_FORMAT", format))
            }
            None => defaults.timestamp_format,
        };
        let time_zone = match get("AUDIT_TIMEZONE") {
            Some(name) => name
                .trim()
                .parse::<Tz>()
                .map_err(|_| AuditError::invalid_config("AUDIT_TIMEZONE", name.clone()))?,
            None => defaults.time_zone,
        };

        let max_body_bytes = parse_number(&get, "AUDIT_MAX_BODY_BYTES", defaults.max_body_bytes)?;
        let trust_forwarded_proto = parse_bool(
            &get,
            "AUDIT_TRUST_FORWARDED_PROTO",
            defaults.trust_forwarded_proto,
        )?;
        let app_log_enabled = parse_bool(&get, "AUDIT_APP_LOG_ENABLED", defaults.app_log_enabled)?;
        let app_log_level = match get("AUDIT_APP_LOG_LEVEL") {
            Some(raw) => raw
                .trim()
                .parse::<tracing::Level>()
                .map_err(|_| AuditError::invalid_config("AUDIT_APP_LOG_LEVEL", raw.clone()))?,
            None => defaults.app_log_level,
        };

        Ok(Self {
            service_name,
            unregistered_urls,
            registered_urls,
            unregistered_models,
            log_dir,
            api_log,
            model_log,
            login_log,
            app_log,
            timestamp_format,
            time_zone,
            max_body_bytes,
            trust_forwarded_proto,
            app_log_enabled,
            app_log_level,
        })
    }

    pub fn path_for(&self, channel: &ChannelConfig) -> PathBuf {
        self.log_dir.join(&channel.file_name)
    }
}

fn channel<G>(get: &G, prefix: &str, defaults: ChannelConfig) -> Result<ChannelConfig, AuditError>
where
    G: Fn(&str) -> Option<String>,
{
    let file_name = get(&format!("AUDIT_{}_LOG_FILE", prefix)).unwrap_or(defaults.file_name);
    let max_bytes = parse_number(
        get,
        &format!("AUDIT_{}_LOG_MAX_BYTES", prefix),
        defaults.max_bytes,
    )?;
    let backup_count = parse_number(
        get,
        &format!("AUDIT_{}_LOG_BACKUP_COUNT", prefix),
        defaults.backup_count,
    )?;
    Ok(ChannelConfig {
        file_name,
        max_bytes,
        backup_count,
    })
}

fn parse_number<G, T>(get: &G, key: &str, default: T) -> Result<T, AuditError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AuditError::invalid_config(key, raw.clone())),
        None => Ok(default),
    }
}

fn parse_bool<G>(get: &G, key: &str, default: bool) -> Result<bool, AuditError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(AuditError::invalid_config(key, raw)),
        },
        None => Ok(default),
    }
}

/// Accepts either a JSON array of strings or a comma separated list.
fn parse_list(key: &str, raw: &str) -> Result<Vec<String>, AuditError> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str::<Vec<String>>(trimmed)
            .map_err(|_| AuditError::invalid_config(key, raw));
    }
    Ok(trimmed
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect())
}
