use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GroupError>;

/// Errors produced by groups, sinks and the peer transport.
///
/// `Clone` so that a single coalesced outcome can be handed to every waiter.
#[derive(Error, Debug, Clone)]
pub enum GroupError {
    #[error("empty key")]
    EmptyKey,

    #[error("duplicate registration of group {0}")]
    DuplicateGroup(String),

    /// The caller-supplied loader failed; displayed verbatim.
    #[error("{0}")]
    Loader(Arc<anyhow::Error>),

    #[error("peer error: {0}")]
    Peer(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("sink already populated")]
    SinkAlreadySet,

    #[error("sink was not populated by the loader")]
    SinkNotSet,

    #[error("batch length mismatch: expected {expected}, got {actual}")]
    BatchLength { expected: usize, actual: usize },

    #[error("load abandoned before completion")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl GroupError {
    pub(crate) fn loader(err: anyhow::Error) -> Self {
        GroupError::Loader(Arc::new(err))
    }
}

impl From<bincode::Error> for GroupError {
    fn from(err: bincode::Error) -> Self {
        GroupError::Codec(err.to_string())
    }
}

impl From<reqwest::Error> for GroupError {
    fn from(err: reqwest::Error) -> Self {
        GroupError::Peer(err.to_string())
    }
}
