//! Registry error types

use thiserror::Error;

/// Error type for registry operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No entry matches the key
    #[error("key not found")]
    NotFound,
    /// An entry with the same key already exists
    #[error("key already exists")]
    Duplicate,
}
