//! Request-level errors.
//!
//! Only document-level failures surface as `Err`. A single bad operation is
//! never an error: it becomes a [`crate::ManualFixEntry`] and the batch
//! continues.

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// The input could not be treated as an HTML document at all.
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("document is {actual} bytes, limit is {limit}")]
    DocumentTooLarge { actual: usize, limit: usize },

    /// The generated diff does not reproduce the modified document.
    #[error("diff is not applicable: {0}")]
    DiffInapplicable(String),

    #[error("invalid patch plan: {0}")]
    InvalidPlan(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<serde_json::Error> for PatchError {
    fn from(err: serde_json::Error) -> Self {
        PatchError::InvalidPlan(err.to_string())
    }
}
