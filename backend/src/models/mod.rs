//! Audit records plus the data models of the publications service.

pub mod audit_event;
pub mod author;
pub mod book;
pub mod user;
