//! Decides which URLs and models produce audit records.

use regex::Regex;

use crate::config::AuditConfig;
use crate::error::AuditError;
use crate::repositories::events::{AuditModel, ModelMeta};

/// URL patterns excluded unless a deployment replaces them.
pub const DEFAULT_UNREGISTERED_URLS: &[&str] = &["^/admin/", "^/static/", "^/favicon.ico$"];

/// Framework bookkeeping models that are never audited.
pub const DEFAULT_UNREGISTERED_MODELS: &[&str] = &[
    "sessions.Session",
    "auth.Permission",
    "contenttypes.ContentType",
    "migrations.Migration",
    "admin.LogEntry",
];

#[derive(Debug, Clone)]
pub struct AuditFilter {
    excluded_urls: Vec<Regex>,
    included_urls: Vec<Regex>,
    excluded_models: Vec<String>,
}

impl AuditFilter {
    /// Compiles the URL patterns. Every pattern matches from the start of the
    /// path.
    pub fn new<E, I, M>(excluded_urls: E, included_urls: I, excluded_models: M) -> Result<Self, AuditError>
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        I: IntoIterator,
        I::Item: AsRef<str>,
        M: IntoIterator,
        M::Item: Into<String>,
    {
        Ok(Self {
            excluded_urls: compile_all(excluded_urls)?,
            included_urls: compile_all(included_urls)?,
            excluded_models: excluded_models.into_iter().map(Into::into).collect(),
        })
    }

    pub fn from_config(config: &AuditConfig) -> Result<Self, AuditError> {
        Self::new(
            &config.unregistered_urls,
            &config.registered_urls,
            config.unregistered_models.iter().cloned(),
        )
    }

    /// Exclusion wins over inclusion; a non-empty include list turns the
    /// filter into an allowlist.
    pub fn should_audit_url(&self, path: &str) -> bool {
        if self.excluded_urls.iter().any(|pattern| pattern.is_match(path)) {
            return false;
        }
        if self.included_urls.is_empty() {
            return true;
        }
        self.included_urls.iter().any(|pattern| pattern.is_match(path))
    }

    /// False when `identity` or any identity it derives from is denylisted.
    pub fn should_audit_model(&self, identity: &str, lineage: &[&str]) -> bool {
        !std::iter::once(identity)
            .chain(lineage.iter().copied())
            .any(|candidate| self.excluded_models.iter().any(|model| model == candidate))
    }

    pub fn should_audit_meta(&self, meta: &ModelMeta) -> bool {
        self.should_audit_model(meta.identity, meta.lineage)
    }

    pub fn should_audit<M: AuditModel>(&self) -> bool {
        self.should_audit_meta(&M::meta())
    }
}

fn compile_all<P>(patterns: P) -> Result<Vec<Regex>, AuditError>
where
    P: IntoIterator,
    P::Item: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|pattern| {
            let pattern = pattern.as_ref();
            Regex::new(&format!("^(?:{})", pattern)).map_err(|source| AuditError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
        })
        .collect()
}
