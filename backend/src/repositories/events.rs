//! Typed lifecycle events published by the storage layer.
//!
//! Repositories announce every mutation to the listeners registered on a
//! [`ModelEventBus`]; the model audit listener is one of them.

use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use crate::services::formatter::value::to_value_lossy;

/// A storage model whose mutations can be audited.
pub trait AuditModel: Serialize + Debug + Clone + Send + Sync + 'static {
    /// `"<app_label>.<ModelName>"`.
    const IDENTITY: &'static str;
    /// Identities this model derives from; denylisting a parent excludes it.
    const LINEAGE: &'static [&'static str] = &[];

    fn model_name() -> &'static str {
        Self::meta().name()
    }

    fn instance_id(&self) -> Option<String>;

    /// Called by repositories that assign keys on insert.
    fn assign_id(&mut self, _sequence: u64) {}

    fn to_repr(&self) -> Value {
        to_value_lossy(self)
    }

    fn meta() -> ModelMeta {
        ModelMeta {
            identity: Self::IDENTITY,
            lineage: Self::LINEAGE,
        }
    }

    fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            id: self.instance_id(),
            repr: self.to_repr(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelMeta {
    pub identity: &'static str,
    pub lineage: &'static [&'static str],
}

impl ModelMeta {
    /// The class name part of the identity.
    pub fn name(&self) -> &'static str {
        self.identity
            .rsplit_once('.')
            .map(|(_, name)| name)
            .unwrap_or(self.identity)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSnapshot {
    pub id: Option<String>,
    pub repr: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationAction {
    PreAdd,
    PostAdd,
    PreRemove,
    PostRemove,
    PreClear,
    PostClear,
}

impl RelationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationAction::PreAdd => "pre_add",
            RelationAction::PostAdd => "post_add",
            RelationAction::PreRemove => "pre_remove",
            RelationAction::PostRemove => "post_remove",
            RelationAction::PreClear => "pre_clear",
            RelationAction::PostClear => "post_clear",
        }
    }

    pub fn is_post(&self) -> bool {
        matches!(
            self,
            RelationAction::PostAdd | RelationAction::PostRemove | RelationAction::PostClear
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleKind {
    PreCreate(InstanceSnapshot),
    PostCreate(InstanceSnapshot),
    PreUpdate(InstanceSnapshot),
    PostUpdate(InstanceSnapshot),
    PreDelete(InstanceSnapshot),
    PostDelete(InstanceSnapshot),
    BulkCreate(Vec<InstanceSnapshot>),
    BulkUpdate {
        instances: Vec<InstanceSnapshot>,
        fields: Vec<String>,
    },
    RelationChanged {
        instance: InstanceSnapshot,
        field: String,
        action: RelationAction,
        related_ids: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEvent {
    pub model: ModelMeta,
    pub kind: LifecycleKind,
}

impl LifecycleEvent {
    pub fn new<M: AuditModel>(kind: LifecycleKind) -> Self {
        Self {
            model: M::meta(),
            kind,
        }
    }
}

pub trait ModelListener: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent);
}

/// Ordered set of listeners shared by the repositories of one service.
#[derive(Clone, Default)]
pub struct ModelEventBus {
    listeners: Arc<RwLock<Vec<Arc<dyn ModelListener>>>>,
}

impl ModelEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn ModelListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Delivers `event` to every listener in subscription order. A panicking
    /// listener is logged and skipped; the storage operation carries on.
    pub fn publish(&self, event: &LifecycleEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
                tracing::error!(
                    model = event.model.identity,
                    "Model lifecycle listener panicked"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<LifecycleEvent>>);

    impl ModelListener for Recorder {
        fn on_event(&self, event: &LifecycleEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    struct Exploding;

    impl ModelListener for Exploding {
        fn on_event(&self, _event: &LifecycleEvent) {
            panic!("listener failure");
        }
    }

    fn snapshot() -> InstanceSnapshot {
        InstanceSnapshot {
            id: Some("1".to_string()),
            repr: json!({"id": 1}),
        }
    }

    #[test]
    fn meta_name_is_the_class_part() {
        let meta = ModelMeta {
            identity: "publications.Author",
            lineage: &[],
        };
        assert_eq!(meta.name(), "Author");
        let bare = ModelMeta {
            identity: "Author",
            lineage: &[],
        };
        assert_eq!(bare.name(), "Author");
    }

    #[test]
    fn publish_survives_panicking_listener() {
        let bus = ModelEventBus::new();
        let recorder = Arc::new(Recorder::default());
        bus.subscribe(Arc::new(Exploding));
        bus.subscribe(recorder.clone());

        let event = LifecycleEvent {
            model: ModelMeta {
                identity: "publications.Author",
                lineage: &[],
            },
            kind: LifecycleKind::PostCreate(snapshot()),
        };
        bus.publish(&event);

        assert_eq!(bus.listener_count(), 2);
        assert_eq!(recorder.0.lock().unwrap().as_slice(), &[event]);
    }

    #[test]
    fn relation_actions_render_signal_names() {
        assert_eq!(RelationAction::PostClear.as_str(), "post_clear");
        assert!(RelationAction::PostAdd.is_post());
        assert!(!RelationAction::PreRemove.is_post());
    }
}
