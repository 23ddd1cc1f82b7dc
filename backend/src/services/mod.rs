pub mod app_log;
pub mod eligibility;
pub mod formatter;
pub mod login_audit;
pub mod model_audit;
pub mod router;
pub mod sink;
pub mod user_directory;

pub use eligibility::AuditFilter;
pub use login_audit::push_usage_log;
pub use model_audit::ModelAuditListener;
pub use router::{AuditLogger, ChannelRouter, RouterHandle};
