//! Forwards the service's own `tracing` events to the `app` channel.

use serde_json::{Map, Number, Value};
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::models::audit_event::{Level, LogRecord, SourceLocation, APP_CHANNEL};
use crate::services::router::AuditLogger;

/// Targets under this prefix belong to the audit pipeline itself and are never
/// fed back into it.
const AUDIT_TARGET_PREFIX: &str = "audit.";

pub struct AppLogLayer {
    logger: AuditLogger,
    min_level: tracing::Level,
}

impl AppLogLayer {
    pub fn new(logger: AuditLogger) -> Self {
        Self {
            logger,
            min_level: tracing::Level::INFO,
        }
    }

    pub fn with_min_level(mut self, level: tracing::Level) -> Self {
        self.min_level = level;
        self
    }

    fn accepts(&self, metadata: &tracing::Metadata<'_>) -> bool {
        metadata.level() <= &self.min_level && !metadata.target().starts_with(AUDIT_TARGET_PREFIX)
    }
}

impl<S> Layer<S> for AppLogLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !self.accepts(metadata) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut record = LogRecord::new(
            Level::from(*metadata.level()),
            APP_CHANNEL,
            visitor.message.unwrap_or_default(),
        );
        record.fields = visitor.fields;
        record.exception = visitor.exception;
        record.location = Some(SourceLocation {
            target: metadata.target().to_string(),
            module: metadata.module_path().map(str::to_string),
            file: metadata.file().map(str::to_string),
            line: metadata.line(),
        });

        // A closed queue means shutdown is under way.
        let _ = self.logger.log(record);
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    exception: Option<String>,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "exception" => self.exception = Some(value.to_string()),
            _ => self.insert(field, Value::String(value.to_string())),
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        let mut text = value.to_string();
        let mut source = value.source();
        while let Some(cause) = source {
            text.push_str(": ");
            text.push_str(&cause.to_string());
            source = cause.source();
        }
        if field.name() == "exception" {
            self.exception = Some(text);
        } else {
            self.insert(field, Value::String(text));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let formatted = format!("{:?}", value);
        match field.name() {
            "message" => self.message = Some(formatted),
            "exception" => self.exception = Some(formatted),
            _ => self.insert(field, Value::String(formatted)),
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(number) = Number::from_f64(value) {
            self.insert(field, Value::Number(number));
        }
    }
}
