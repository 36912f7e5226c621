//! caravel-node: persistent batch assembly and dispatch for a federated
//! messaging node
//!
//! Records submitted by synchronous callers are grouped into batches bound
//! to an (author, batch type) pair, persisted as they are accepted, then
//! dispatched through a pluggable transport (broadcast to public storage
//! or private peer-to-peer transfer) with indefinite retry and an on-chain
//! pin committing to content and order. A coupled off-chain trade protocol
//! governs how peers request and deliver private asset content.
//!
//! ## Architecture
//!
//! - **batch**: per-(author, type) assembler actors and their registry;
//!   callers block until their record is durably batched
//! - **dispatch**: broadcast and private fan-out, one Operation row per
//!   external side effect, pin submission last
//! - **events**: long-lived consumers of plugin event streams turning
//!   receipts into Operation updates
//! - **trade**: request/response + authorization for private asset content
//! - **store** / **plugins**: the contracts the node's collaborators
//!   implement; `MemoryStore` is the in-process reference store

pub mod batch;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod hash;
pub mod plugins;
pub mod store;
pub mod trade;
pub mod types;

pub use batch::{BatchDispatcher, BatchManager, BatchProcessor};
pub use config::{BatchOptions, EventStreamConfig, IdentityConfig, NodeConfig, TradeConfig};
pub use dispatch::{BatchPinSubmitter, BroadcastDispatcher, PinSubmitter, PrivateDispatcher};
pub use error::{NodeError, Result};
pub use events::{EventCallbacks, EventLoop, NodeEventHandler, WsTransport};
pub use store::{BatchUpdate, MemoryStore, Store};
pub use trade::{PendingDeliveries, TradeCoordinator, TradeMessage};
pub use types::{
    AssetDefinition, AssetInstance, Batch, BatchType, DataItem, Member, Message, NodeInfo,
    OpStatus, OpType, Operation, Record,
};
