//! Store contract and in-memory reference implementation
//!
//! The node depends on a transactional store through the `Store` trait; the
//! multi-row updates in the dispatchers run inside `run_as_group`. The
//! `MemoryStore` here is the reference implementation used by embedders and
//! tests; a real deployment substitutes a database-backed one.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::error::{NodeError, Result};
use crate::types::{
    AssetDefinition, AssetInstance, Batch, BatchType, Blob, Group, Member, NodeInfo, OpStatus,
    Operation, Transaction,
};

/// Partial update applied to a persisted batch row.
#[derive(Debug, Clone, Default)]
pub struct BatchUpdate {
    pub payload_ref: Option<String>,
}

/// Work executed inside one store transaction.
pub type GroupWork<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_batch(&self, batch: &Batch) -> Result<()>;

    /// Batches persisted but never completed, ordered by `created`.
    async fn retrieve_incomplete_batches(
        &self,
        author: &str,
        batch_type: BatchType,
    ) -> Result<Vec<Batch>>;

    async fn update_batch(&self, id: Uuid, update: BatchUpdate) -> Result<()>;

    async fn upsert_transaction(&self, tx: &Transaction) -> Result<()>;

    async fn upsert_operation(&self, op: &Operation) -> Result<()>;

    /// Move an operation out of `pending`. Terminal states are final.
    async fn update_operation(
        &self,
        id: Uuid,
        status: OpStatus,
        error: Option<String>,
    ) -> Result<()>;

    async fn retrieve_member_by_address(&self, address: &str) -> Result<Option<Member>>;

    async fn retrieve_asset_instance_by_id(&self, id: Uuid) -> Result<Option<AssetInstance>>;

    async fn retrieve_asset_definition_by_id(&self, id: Uuid) -> Result<Option<AssetDefinition>>;

    async fn set_asset_instance_private_content(
        &self,
        id: Uuid,
        content: Option<Value>,
        filename: Option<String>,
    ) -> Result<()>;

    async fn get_group_by_hash(&self, hash: &str) -> Result<Option<Group>>;

    async fn get_node_by_id(&self, id: Uuid) -> Result<Option<NodeInfo>>;

    async fn get_blob_matching_hash(&self, hash: &str) -> Result<Option<Blob>>;

    /// Run `work` with multi-row atomicity. Any error aborts the whole group.
    async fn run_as_group(&self, work: GroupWork<'_>) -> Result<()>;
}

/// DashMap-backed store. Atomicity of `run_as_group` is trivial in-process;
/// the interesting contracts it enforces are `(plugin, backend_id)`
/// uniqueness and the pending-to-terminal operation status rule.
#[derive(Default)]
pub struct MemoryStore {
    batches: DashMap<Uuid, Batch>,
    transactions: DashMap<Uuid, Transaction>,
    operations: DashMap<Uuid, Operation>,
    members: DashMap<String, Member>,
    groups: DashMap<String, Group>,
    nodes: DashMap<Uuid, NodeInfo>,
    blobs: DashMap<String, Blob>,
    definitions: DashMap<Uuid, AssetDefinition>,
    instances: DashMap<Uuid, AssetInstance>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Directory seeding, for embedders and tests.

    pub fn add_member(&self, member: Member) {
        self.members.insert(member.address.clone(), member);
    }

    pub fn add_group(&self, group: Group) {
        self.groups.insert(group.hash.clone(), group);
    }

    pub fn add_node(&self, node: NodeInfo) {
        self.nodes.insert(node.id, node);
    }

    pub fn add_blob(&self, blob: Blob) {
        self.blobs.insert(blob.hash.clone(), blob);
    }

    pub fn add_asset_definition(&self, def: AssetDefinition) {
        self.definitions.insert(def.id, def);
    }

    pub fn add_asset_instance(&self, instance: AssetInstance) {
        self.instances.insert(instance.id, instance);
    }

    // Inspection, for tests and diagnostics.

    pub fn batch(&self, id: Uuid) -> Option<Batch> {
        self.batches.get(&id).map(|e| e.value().clone())
    }

    pub fn all_batches(&self) -> Vec<Batch> {
        self.batches.iter().map(|e| e.value().clone()).collect()
    }

    pub fn all_operations(&self) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self.operations.iter().map(|e| e.value().clone()).collect();
        ops.sort_by_key(|o| o.created);
        ops
    }

    pub fn all_transactions(&self) -> Vec<Transaction> {
        self.transactions.iter().map(|e| e.value().clone()).collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_batch(&self, batch: &Batch) -> Result<()> {
        self.batches.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn retrieve_incomplete_batches(
        &self,
        author: &str,
        batch_type: BatchType,
    ) -> Result<Vec<Batch>> {
        let mut found: Vec<Batch> = self
            .batches
            .iter()
            .filter(|e| {
                let b = e.value();
                b.author == author && b.batch_type == batch_type && b.completed.is_none()
            })
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|b| b.created);
        Ok(found)
    }

    async fn update_batch(&self, id: Uuid, update: BatchUpdate) -> Result<()> {
        let mut entry = self
            .batches
            .get_mut(&id)
            .ok_or_else(|| NodeError::Store(format!("batch {id} not found")))?;
        if let Some(payload_ref) = update.payload_ref {
            entry.payload_ref = Some(payload_ref);
        }
        Ok(())
    }

    async fn upsert_transaction(&self, tx: &Transaction) -> Result<()> {
        self.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn upsert_operation(&self, op: &Operation) -> Result<()> {
        if !op.backend_id.is_empty() {
            // (plugin, backend_id) is a unique key once the tracking id is
            // known; a re-upsert replaces the previous row.
            let existing: Vec<Uuid> = self
                .operations
                .iter()
                .filter(|e| {
                    let o = e.value();
                    o.id != op.id && o.plugin == op.plugin && o.backend_id == op.backend_id
                })
                .map(|e| *e.key())
                .collect();
            for id in existing {
                self.operations.remove(&id);
            }
        }
        self.operations.insert(op.id, op.clone());
        Ok(())
    }

    async fn update_operation(
        &self,
        id: Uuid,
        status: OpStatus,
        error: Option<String>,
    ) -> Result<()> {
        let Some(mut entry) = self.operations.get_mut(&id) else {
            warn!(op = %id, "Receipt for unknown operation");
            return Ok(());
        };
        if !entry.status.can_transition_to(status) {
            warn!(op = %id, from = ?entry.status, to = ?status, "Ignoring invalid operation status transition");
            return Ok(());
        }
        entry.status = status;
        entry.error = error;
        entry.updated = Some(Utc::now());
        Ok(())
    }

    async fn retrieve_member_by_address(&self, address: &str) -> Result<Option<Member>> {
        Ok(self.members.get(address).map(|e| e.value().clone()))
    }

    async fn retrieve_asset_instance_by_id(&self, id: Uuid) -> Result<Option<AssetInstance>> {
        Ok(self.instances.get(&id).map(|e| e.value().clone()))
    }

    async fn retrieve_asset_definition_by_id(&self, id: Uuid) -> Result<Option<AssetDefinition>> {
        Ok(self.definitions.get(&id).map(|e| e.value().clone()))
    }

    async fn set_asset_instance_private_content(
        &self,
        id: Uuid,
        content: Option<Value>,
        filename: Option<String>,
    ) -> Result<()> {
        let mut entry = self
            .instances
            .get_mut(&id)
            .ok_or_else(|| NodeError::Store(format!("asset instance {id} not found")))?;
        entry.content = content;
        if filename.is_some() {
            entry.filename = filename;
        }
        Ok(())
    }

    async fn get_group_by_hash(&self, hash: &str) -> Result<Option<Group>> {
        Ok(self.groups.get(hash).map(|e| e.value().clone()))
    }

    async fn get_node_by_id(&self, id: Uuid) -> Result<Option<NodeInfo>> {
        Ok(self.nodes.get(&id).map(|e| e.value().clone()))
    }

    async fn get_blob_matching_hash(&self, hash: &str) -> Result<Option<Blob>> {
        Ok(self.blobs.get(hash).map(|e| e.value().clone()))
    }

    async fn run_as_group(&self, work: GroupWork<'_>) -> Result<()> {
        work.await
    }
}
