//! Engine error type. One enum, surfaced by every public fallible operation.

use crate::types::NodeId;

#[derive(Debug, thiserror::Error)]
pub enum ChittaError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("index corrupt: {0}")]
    IndexCorrupt(String),

    #[error("out of capacity: {0} slots in use")]
    OutOfCapacity(usize),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no embedding model attached; text operations unavailable")]
    EmbedderUnavailable,
}

impl ChittaError {
    pub fn node_not_found(id: &NodeId) -> Self {
        ChittaError::NotFound(format!("node {id}"))
    }
}

pub type Result<T> = std::result::Result<T, ChittaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = ChittaError::InvalidArgument("confidence out of range".into());
        assert!(err.to_string().contains("confidence out of range"));
    }
}
