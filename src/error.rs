//! Error taxonomy for the record store and its derived indexes.
//!
//! Mutation paths (`append`, `update`, `delete`) propagate every variant to
//! the caller. Search paths degrade instead: provider and index errors are
//! turned into a keyword fallback by [`crate::search`], while
//! [`StoreError::InvalidInput`] and [`StoreError::CorruptLog`] always surface.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("corrupt log at line {line}: {message}")]
    CorruptLog { line: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("vector has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("embedding provider error: {0}")]
    Provider(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("record id already exists: {0}")]
    DuplicateId(String),

    #[error("corrupt vector index: {0}")]
    CorruptIndex(String),

    #[error("index error: {0}")]
    Index(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("lock poisoned")]
    Lock,
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// True when the requested record id is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Acquire a shared guard, converting a poisoned lock into `StoreError::Lock`.
pub fn read_lock<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| StoreError::Lock)
}

/// Acquire an exclusive guard, converting a poisoned lock into `StoreError::Lock`.
pub fn write_lock<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| StoreError::Lock)
}
