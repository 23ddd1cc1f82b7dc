pub mod events;
pub mod memory;
pub mod repository;

pub use events::{
    AuditModel, InstanceSnapshot, LifecycleEvent, LifecycleKind, ModelEventBus, ModelListener,
    ModelMeta, RelationAction,
};
pub use memory::MemoryRepository;
pub use repository::Repository;
