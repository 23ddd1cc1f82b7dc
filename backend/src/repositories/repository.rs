//! Repository trait and common functionality
//!
//! This module defines the standard repository trait that all repository modules
//! should implement.

use crate::error::AppError;

/// Standard repository trait for storage operations
///
/// Every mutation goes through an implementation of this trait so lifecycle
/// listeners observe it.
#[allow(async_fn_in_trait)]
pub trait Repository<T> {
    /// Find all records of type T
    async fn find_all(&self) -> Result<Vec<T>, AppError>;

    /// Find a single record by ID
    async fn find_by_id(&self, id: &str) -> Result<T, AppError>;

    /// Create a new record
    async fn create(&self, item: T) -> Result<T, AppError>;

    /// Update an existing record
    async fn update(&self, item: T) -> Result<T, AppError>;

    /// Delete a record by ID, returning what was removed
    async fn delete(&self, id: &str) -> Result<T, AppError>;
}
