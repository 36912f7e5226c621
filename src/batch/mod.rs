//! Batch assembly: per-(author, type) processors and the registry that owns
//! their lifecycle.

pub mod manager;
pub mod processor;

pub use manager::BatchManager;
pub use processor::{BatchDispatcher, BatchProcessor};
