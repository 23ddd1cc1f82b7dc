use axum::extract::FromRef;
use std::sync::Arc;

use crate::{
    config::{AuditConfig, Config},
    error::AuditError,
    models::{author::Author, book::Book},
    repositories::{MemoryRepository, ModelEventBus},
    services::{
        router::{AuditLogger, ChannelRouter, RouterHandle},
        user_directory::UserResolver,
        AuditFilter, ModelAuditListener,
    },
};

/// Knobs the request middleware reads on every call.
#[derive(Debug, Clone)]
pub struct RequestAuditSettings {
    pub service_name: String,
    pub max_body_bytes: usize,
    pub trust_forwarded_proto: bool,
}

impl From<&AuditConfig> for RequestAuditSettings {
    fn from(config: &AuditConfig) -> Self {
        Self {
            service_name: config.service_name.clone(),
            max_body_bytes: config.max_body_bytes,
            trust_forwarded_proto: config.trust_forwarded_proto,
        }
    }
}

/// Everything the interceptors share: the channel logger and the filter.
#[derive(Clone)]
pub struct AuditState {
    pub logger: AuditLogger,
    pub filter: Arc<AuditFilter>,
    pub settings: Arc<RequestAuditSettings>,
}

impl AuditState {
    /// Compiles the filter, opens the channels and starts the writer thread.
    ///
    /// The returned handle owns the writer; dropping it flushes and stops it.
    pub fn start(config: &AuditConfig) -> Result<(Self, RouterHandle), AuditError> {
        let filter = Arc::new(AuditFilter::from_config(config)?);
        let (logger, handle) = ChannelRouter::from_config(config).start()?;
        let state = Self {
            logger,
            filter,
            settings: Arc::new(RequestAuditSettings::from(config)),
        };
        Ok((state, handle))
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub audit: AuditState,
    pub bus: ModelEventBus,
    pub authors: Arc<MemoryRepository<Author>>,
    pub books: Arc<MemoryRepository<Book>>,
    pub users: Arc<dyn UserResolver>,
}

impl AppState {
    /// Wires the repositories to a shared event bus with the model audit
    /// listener subscribed.
    pub fn new(config: Config, audit: AuditState, users: Arc<dyn UserResolver>) -> Self {
        let bus = ModelEventBus::new();
        bus.subscribe(Arc::new(ModelAuditListener::new(
            audit.logger.clone(),
            audit.filter.clone(),
        )));
        Self {
            config,
            audit,
            authors: Arc::new(MemoryRepository::new(bus.clone())),
            books: Arc::new(MemoryRepository::new(bus.clone())),
            bus,
            users,
        }
    }
}

impl FromRef<AppState> for AuditState {
    fn from_ref(state: &AppState) -> Self {
        state.audit.clone()
    }
}

impl FromRef<AppState> for Arc<dyn UserResolver> {
    fn from_ref(state: &AppState) -> Self {
        state.users.clone()
    }
}
