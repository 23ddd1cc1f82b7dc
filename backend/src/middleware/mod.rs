pub mod audit_log;
pub mod auth;

pub use audit_log::*;
pub use auth::*;
