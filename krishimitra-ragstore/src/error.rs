use thiserror::Error;

/// Errors surfaced by [`crate::VectorStore`] and [`crate::EmbeddingFunction`]
/// implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("collection '{name}' not found")]
    NotFound { name: String },

    #[error("collection '{name}' already exists with dimension {existing}, cannot recreate with dimension {requested}")]
    DimensionConflict {
        name: String,
        existing: usize,
        requested: usize,
    },

    #[error("embedding of length {got} does not match collection '{name}' dimension {expected}")]
    ShapeMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("invalid filter: {0}")]
    InvalidArgument(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}
