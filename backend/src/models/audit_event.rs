//! Audit events produced by the interceptors and the raw log records the
//! channel router hands to formatters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::services::formatter::FormatterKind;

pub const API_CHANNEL: &str = "audit.request";
pub const MODEL_CHANNEL: &str = "audit.model";
pub const LOGIN_CHANNEL: &str = "audit.login";
pub const APP_CHANNEL: &str = "app";

pub const REQUEST_TYPE_INTERNAL: &str = "internal";

/// Severity attached to every record.
///
/// The three audit levels name the record kind: `API` for request records,
/// `AUDIT` for model changes and `LOGIN` for usage events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    Api,
    Audit,
    Login,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
            Level::Api => "API",
            Level::Audit => "AUDIT",
            Level::Login => "LOGIN",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE | tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warning,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Kind of model mutation recorded in `ModelEvent::event_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelEventType {
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "BULK_CREATE")]
    BulkCreate,
    #[serde(rename = "BULK_UPDATE")]
    BulkUpdate,
    #[serde(rename = "M2M")]
    M2m,
    #[serde(rename = "PRE_CREATE")]
    PreCreate,
    #[serde(rename = "PRE_UPDATE")]
    PreUpdate,
    #[serde(rename = "PRE_DELETE")]
    PreDelete,
}

impl ModelEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelEventType::Create => "CREATE",
            ModelEventType::Update => "UPDATE",
            ModelEventType::Delete => "DELETE",
            ModelEventType::BulkCreate => "BULK_CREATE",
            ModelEventType::BulkUpdate => "BULK_UPDATE",
            ModelEventType::M2m => "M2M",
            ModelEventType::PreCreate => "PRE_CREATE",
            ModelEventType::PreUpdate => "PRE_UPDATE",
            ModelEventType::PreDelete => "PRE_DELETE",
        }
    }
}

impl fmt::Display for ModelEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audited HTTP request/response cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiEvent {
    pub service_name: String,
    pub request_type: String,
    pub protocol: String,
    pub user_id: String,
    pub user_info: Map<String, Value>,
    pub request_repr: Map<String, Value>,
    pub response_repr: Map<String, Value>,
    pub error_message: String,
    pub execution_time: f64,
}

/// One observed model mutation.
///
/// `instance_repr` may arrive as a JSON-encoded string; the model formatter
/// re-parses it before writing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEvent {
    pub model: String,
    pub event_type: ModelEventType,
    pub instance_id: String,
    pub instance_repr: Value,
    pub user_id: String,
    pub user_info: Map<String, Value>,
    pub extra: Map<String, Value>,
}

/// Login, logout and other usage events pushed by the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginEvent {
    pub user_id: String,
    pub user_info: Map<String, Value>,
    pub event: String,
    pub success: bool,
    pub error: String,
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub enum AuditPayload {
    Api(ApiEvent),
    Model(ModelEvent),
    Login(LoginEvent),
}

impl AuditPayload {
    pub fn formatter_kind(&self) -> FormatterKind {
        match self {
            AuditPayload::Api(_) => FormatterKind::Api,
            AuditPayload::Model(_) => FormatterKind::Model,
            AuditPayload::Login(_) => FormatterKind::Login,
        }
    }

    fn to_fields(&self) -> Map<String, Value> {
        let value = match self {
            AuditPayload::Api(event) => serde_json::to_value(event),
            AuditPayload::Model(event) => serde_json::to_value(event),
            AuditPayload::Login(event) => serde_json::to_value(event),
        };
        match value {
            Ok(Value::Object(fields)) => fields,
            Ok(other) => {
                let mut fields = Map::new();
                fields.insert("payload".to_string(), other);
                fields
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to serialize audit payload");
                Map::new()
            }
        }
    }
}

/// A record destined for one audit channel.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub channel: String,
    pub message: String,
    pub payload: AuditPayload,
}

impl AuditEvent {
    pub fn api(message: impl Into<String>, event: ApiEvent) -> Self {
        Self::new(Level::Api, API_CHANNEL, message, AuditPayload::Api(event))
    }

    pub fn model(message: impl Into<String>, event: ModelEvent) -> Self {
        Self::new(Level::Audit, MODEL_CHANNEL, message, AuditPayload::Model(event))
    }

    pub fn login(message: impl Into<String>, event: LoginEvent) -> Self {
        Self::new(Level::Login, LOGIN_CHANNEL, message, AuditPayload::Login(event))
    }

    fn new(
        level: Level,
        channel: &str,
        message: impl Into<String>,
        payload: AuditPayload,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            channel: channel.to_string(),
            message: message.into(),
            payload,
        }
    }

    pub fn to_record(&self) -> LogRecord {
        LogRecord {
            created: self.timestamp,
            level: self.level,
            channel: self.channel.clone(),
            message: self.message.clone(),
            fields: self.payload.to_fields(),
            location: None,
            exception: None,
        }
    }
}

impl From<AuditEvent> for LogRecord {
    fn from(event: AuditEvent) -> Self {
        event.to_record()
    }
}

/// Where an application log record was emitted from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLocation {
    pub target: String,
    pub module: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

/// Raw record travelling through the queue; formatters pick their declared
/// fields out of `fields`.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub created: DateTime<Utc>,
    pub level: Level,
    pub channel: String,
    pub message: String,
    pub fields: Map<String, Value>,
    pub location: Option<SourceLocation>,
    pub exception: Option<String>,
}

impl LogRecord {
    pub fn new(level: Level, channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            created: Utc::now(),
            level,
            channel: channel.into(),
            message: message.into(),
            fields: Map::new(),
            location: None,
            exception: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_event_type_serializes_as_upper_tags() {
        let tags: Vec<String> = [
            ModelEventType::PreCreate,
            ModelEventType::M2m,
            ModelEventType::BulkUpdate,
        ]
        .iter()
        .map(|kind| serde_json::to_value(kind).expect("serialize").to_string())
        .collect();
        assert_eq!(tags, vec!["\"PRE_CREATE\"", "\"M2M\"", "\"BULK_UPDATE\""]);
        assert_eq!(ModelEventType::PreDelete.as_str(), "PRE_DELETE");
    }

    #[test]
    fn api_event_record_carries_every_declared_field() {
        let record = AuditEvent::api("Audit Internal Request", ApiEvent::default()).to_record();
        assert_eq!(record.channel, API_CHANNEL);
        assert_eq!(record.level, Level::Api);
        for field in [
            "service_name",
            "request_type",
            "protocol",
            "user_id",
            "user_info",
            "request_repr",
            "response_repr",
            "error_message",
            "execution_time",
        ] {
            assert!(record.fields.contains_key(field), "missing {field}");
        }
    }

    #[test]
    fn login_event_defaults_to_login_channel() {
        let event = AuditEvent::login("logged in", LoginEvent::default());
        assert_eq!(event.channel, LOGIN_CHANNEL);
        assert_eq!(event.level.as_str(), "LOGIN");
    }

    #[test]
    fn tracing_levels_map_to_record_levels() {
        assert_eq!(Level::from(tracing::Level::WARN), Level::Warning);
        assert_eq!(Level::from(tracing::Level::TRACE), Level::Debug);
        assert_eq!(Level::from(tracing::Level::ERROR).to_string(), "ERROR");
    }
}
