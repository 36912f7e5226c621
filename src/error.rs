//! Error types for caravel-node

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timed out waiting for batch assembly")]
    AddTimeout,

    #[error("Batch processor is shutting down")]
    ProcessorClosed,

    #[error("No dispatcher registered for batch type '{0}'")]
    NoDispatcher(String),

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Blob not found for hash {0}")]
    BlobNotFound(String),

    #[error("Group not found: {0}")]
    GroupNotFound(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Content store error: {0}")]
    ContentStore(String),

    #[error("Blockchain error: {0}")]
    Blockchain(String),

    #[error("Peer exchange error: {0}")]
    PeerExchange(String),

    #[error("App channel error: {0}")]
    AppChannel(String),

    #[error("Event stream error: {0}")]
    EventStream(String),

    #[error("Trade rejected: {0}")]
    TradeRejected(String),

    #[error("Timed out waiting for trade response")]
    TradeTimeout,

    #[error("Timed out waiting for trade authorization")]
    AuthorizationTimeout,

    #[error("Timed out waiting for document transfer")]
    DocumentTransferTimeout,

    #[error("Schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, NodeError>;
