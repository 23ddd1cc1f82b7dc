//! Single-line JSON formatters for the audit channels.
//!
//! Each formatter writes the four common keys (`timestamp`, `level`, `name`,
//! `message`) followed by its declared field list. Declared fields missing from
//! the record are written with an empty default so downstream consumers always
//! see the same schema.

pub mod value;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Duration, DurationRound, Utc};
use chrono_tz::Tz;
use serde_json::{Map, Value};
use std::fmt::Write as _;

use crate::models::audit_event::{AuditEvent, LogRecord};

pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub const API_FIELDS: &[&str] = &[
    "service_name",
    "request_type",
    "protocol",
    "user_id",
    "user_info",
    "request_repr",
    "response_repr",
    "error_message",
    "execution_time",
];

pub const MODEL_FIELDS: &[&str] = &[
    "model",
    "event_type",
    "instance_id",
    "instance_repr",
    "user_id",
    "user_info",
    "extra",
];

pub const LOGIN_FIELDS: &[&str] = &["user_id", "user_info", "event", "success", "error", "extra"];

const MAPPING_FIELDS: &[&str] = &["user_info", "request_repr", "response_repr", "extra"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatterKind {
    /// Request/response records.
    Api,
    /// Model mutation records.
    Model,
    /// Login and usage records.
    Login,
    /// The service's own diagnostics.
    Json,
}

impl FormatterKind {
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            FormatterKind::Api => API_FIELDS,
            FormatterKind::Model => MODEL_FIELDS,
            FormatterKind::Login => LOGIN_FIELDS,
            FormatterKind::Json => &[],
        }
    }
}

/// Returns true when chrono can render `format` without errors.
pub fn is_valid_timestamp_format(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

#[derive(Debug, Clone)]
pub struct RecordFormatter {
    kind: FormatterKind,
    timestamp_format: String,
    time_zone: Tz,
}

impl RecordFormatter {
    pub fn new(kind: FormatterKind) -> Self {
        Self {
            kind,
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            time_zone: Tz::UTC,
        }
    }

    pub fn with_timestamp(mut self, format: impl Into<String>, time_zone: Tz) -> Self {
        let format = format.into();
        if is_valid_timestamp_format(&format) {
            self.timestamp_format = format;
        } else {
            tracing::warn!(format = %format, "Ignoring invalid audit timestamp format");
        }
        self.time_zone = time_zone;
        self
    }

    pub fn kind(&self) -> FormatterKind {
        self.kind
    }

    /// Renders the record as one line of JSON. Never fails.
    pub fn format(&self, record: &LogRecord) -> String {
        let mut out = Map::new();
        out.insert(
            "timestamp".to_string(),
            Value::String(self.timestamp(record.created)),
        );
        out.insert(
            "level".to_string(),
            Value::String(record.level.as_str().to_string()),
        );
        out.insert("name".to_string(), Value::String(record.channel.clone()));
        out.insert("message".to_string(), Value::String(record.message.clone()));

        match self.kind {
            FormatterKind::Json => self.write_app_fields(record, &mut out),
            kind => {
                for field in kind.fields() {
                    let value = record
                        .fields
                        .get(*field)
                        .cloned()
                        .unwrap_or_else(|| default_for(field));
                    let value = if kind == FormatterKind::Model && *field == "instance_repr" {
                        value::reparse_json_string(value)
                    } else {
                        value
                    };
                    out.insert(field.to_string(), value);
                }
            }
        }

        serde_json::to_string(&Value::Object(out)).unwrap_or_else(|err| {
            tracing::error!(target: "audit.fallback", error = %err, "Failed to serialize audit record");
            format!(
                r#"{{"timestamp":{},"level":"{}","name":{},"message":{}}}"#,
                Value::String(self.timestamp(record.created)),
                record.level.as_str(),
                Value::String(record.channel.clone()),
                Value::String(record.message.clone()),
            )
        })
    }

    /// Convenience for rendering an event with the formatter of its kind.
    pub fn format_event(&self, event: &AuditEvent) -> String {
        self.format(&event.to_record())
    }

    /// Millisecond precision is taken from the value, not from the width of
    /// the rendered string.
    fn timestamp(&self, created: DateTime<Utc>) -> String {
        let truncated = created
            .duration_trunc(Duration::milliseconds(1))
            .unwrap_or(created);
        let local = truncated.with_timezone(&self.time_zone);
        let mut rendered = String::new();
        if write!(rendered, "{}", local.format(&self.timestamp_format)).is_err() {
            rendered.clear();
            let _ = write!(rendered, "{}", local.format(DEFAULT_TIMESTAMP_FORMAT));
        }
        rendered
    }

    fn write_app_fields(&self, record: &LogRecord, out: &mut Map<String, Value>) {
        let location = record.location.clone().unwrap_or_default();
        out.insert(
            "path".to_string(),
            Value::String(location.file.unwrap_or_default()),
        );
        out.insert(
            "module".to_string(),
            Value::String(location.module.unwrap_or_else(|| location.target.clone())),
        );
        out.insert("function".to_string(), Value::String(location.target));
        out.insert(
            "line".to_string(),
            location
                .line
                .map(Value::from)
                .unwrap_or_else(|| Value::String(String::new())),
        );
        out.insert(
            "exception".to_string(),
            Value::String(record.exception.clone().unwrap_or_default()),
        );
        out.insert("extra".to_string(), Value::Object(record.fields.clone()));
    }
}

fn default_for(field: &str) -> Value {
    if MAPPING_FIELDS.contains(&field) {
        Value::Object(Map::new())
    } else {
        Value::String(String::new())
    }
}

/// Formats an event with the default formatter for its kind.
pub fn format_event(event: &AuditEvent) -> String {
    RecordFormatter::new(event.payload.formatter_kind()).format_event(event)
}
