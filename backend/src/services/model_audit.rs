//! Turns storage lifecycle events into `audit.model` records.

use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::context;
use crate::models::audit_event::{AuditEvent, ModelEvent, ModelEventType};
use crate::repositories::events::{InstanceSnapshot, LifecycleEvent, LifecycleKind, ModelListener};
use crate::services::eligibility::AuditFilter;
use crate::services::router::AuditLogger;

/// Instance id recorded before the store has assigned one.
pub const PENDING_INSTANCE_ID: &str = "pending";

pub struct ModelAuditListener {
    logger: AuditLogger,
    filter: Arc<AuditFilter>,
}

impl ModelAuditListener {
    pub fn new(logger: AuditLogger, filter: Arc<AuditFilter>) -> Self {
        Self { logger, filter }
    }

    /// Builds the record for `event`, or `None` when the event is not
    /// audited.
    pub fn build_event(&self, event: &LifecycleEvent) -> Option<AuditEvent> {
        if !self.filter.should_audit_meta(&event.model) {
            return None;
        }
        let model = event.model.name();

        let (event_type, message, snapshot, instance_id, extra) = match &event.kind {
            LifecycleKind::PreCreate(snapshot) => {
                let id = snapshot
                    .id
                    .clone()
                    .unwrap_or_else(|| PENDING_INSTANCE_ID.to_string());
                single(ModelEventType::PreCreate, model, snapshot, id)
            }
            LifecycleKind::PostCreate(snapshot) => {
                single(ModelEventType::Create, model, snapshot, id_of(snapshot))
            }
            LifecycleKind::PreUpdate(snapshot) => {
                single(ModelEventType::PreUpdate, model, snapshot, id_of(snapshot))
            }
            LifecycleKind::PostUpdate(snapshot) => {
                single(ModelEventType::Update, model, snapshot, id_of(snapshot))
            }
            LifecycleKind::PreDelete(snapshot) => {
                single(ModelEventType::PreDelete, model, snapshot, id_of(snapshot))
            }
            LifecycleKind::PostDelete(snapshot) => {
                single(ModelEventType::Delete, model, snapshot, id_of(snapshot))
            }
            LifecycleKind::BulkCreate(instances) => {
                let first = instances.first()?;
                let id = id_of(first);
                let mut extra = Map::new();
                extra.insert("total_count".to_string(), json!(instances.len()));
                (
                    ModelEventType::BulkCreate,
                    format!("BULK_CREATE event for {} (id: {})", model, id),
                    first,
                    id,
                    extra,
                )
            }
            LifecycleKind::BulkUpdate { instances, fields } => {
                let first = instances.first()?;
                let mut extra = Map::new();
                extra.insert("total_count".to_string(), json!(instances.len()));
                extra.insert("fields".to_string(), json!(fields));
                (
                    ModelEventType::BulkUpdate,
                    format!("BULK_UPDATE event for {}", model),
                    first,
                    id_of(first),
                    extra,
                )
            }
            LifecycleKind::RelationChanged {
                instance,
                field,
                action,
                related_ids,
            } => {
                if !action.is_post() {
                    return None;
                }
                let id = id_of(instance);
                let mut extra = Map::new();
                extra.insert("field_name".to_string(), Value::String(field.clone()));
                extra.insert(
                    "related_ids".to_string(),
                    if related_ids.is_empty() {
                        Value::Null
                    } else {
                        json!(related_ids)
                    },
                );
                (
                    ModelEventType::M2m,
                    format!("M2M {} event for {} (id: {})", action.as_str(), model, id),
                    instance,
                    id,
                    extra,
                )
            }
        };

        let (user_id, user_info) = context::get_user_details();
        Some(AuditEvent::model(
            message,
            ModelEvent {
                model: model.to_string(),
                event_type,
                instance_id,
                instance_repr: snapshot.repr.clone(),
                user_id,
                user_info,
                extra,
            },
        ))
    }
}

impl ModelListener for ModelAuditListener {
    fn on_event(&self, event: &LifecycleEvent) {
        let Some(record) = self.build_event(event) else {
            return;
        };
        if let Err(err) = self.logger.emit(record) {
            tracing::error!(
                error = %err,
                model = event.model.identity,
                "Failed to write audit log"
            );
        }
    }
}

fn id_of(snapshot: &InstanceSnapshot) -> String {
    snapshot.id.clone().unwrap_or_default()
}

fn single<'a>(
    event_type: ModelEventType,
    model: &str,
    snapshot: &'a InstanceSnapshot,
    id: String,
) -> (
    ModelEventType,
    String,
    &'a InstanceSnapshot,
    String,
    Map<String, Value>,
) {
    let message = format!("{} event for {} (id: {})", event_type, model, id);
    (event_type, message, snapshot, id, Map::new())
}
