//! Login, logout and other usage events pushed explicitly by the host.

use serde_json::{Map, Value};

use crate::context;
use crate::error::AuditError;
use crate::models::audit_event::{AuditEvent, LoginEvent};
use crate::services::router::AuditLogger;

/// Records one usage event on the login channel, tagged with whoever is the
/// current user.
pub fn push_usage_log(
    logger: &AuditLogger,
    message: impl Into<String>,
    event: impl Into<String>,
    success: bool,
    error: impl Into<String>,
    extra: Map<String, Value>,
) -> Result<(), AuditError> {
    let (user_id, user_info) = context::get_user_details();
    logger.emit(AuditEvent::login(
        message,
        LoginEvent {
            user_id,
            user_info,
            event: event.into(),
            success,
            error: error.into(),
            extra,
        },
    ))
}
