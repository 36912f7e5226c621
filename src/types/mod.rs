//! Core data model: batches and their records, durable operation markers,
//! directory identities, and private asset shapes.

pub mod asset;
pub mod batch;
pub mod identity;
pub mod operation;

pub use asset::{AssetDefinition, AssetInstance, Blob};
pub use batch::{
    Batch, BatchPayload, BatchType, BlobRef, DataItem, DataRef, Message, Record, TransactionRef,
};
pub use identity::{Group, GroupMember, Member, NodeInfo, Transaction};
pub use operation::{OpStatus, OpType, Operation};
