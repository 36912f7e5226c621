//! Private dispatch
//!
//! A sealed private batch travels to every node of its recipient group:
//! first every referenced blob, then the batch envelope, then the pin. The
//! order is a contract: receivers rely on blobs being present when they
//! process the envelope, and on the pin as the authoritative ordering
//! signal. The fan-out here is strictly sequential.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::batch::BatchDispatcher;
use crate::error::{NodeError, Result};
use crate::plugins::PeerExchange;
use crate::store::Store;
use crate::types::{Batch, Message, NodeInfo, OpType, Operation, Transaction};

use super::pin::PinSubmitter;

pub struct PrivateDispatcher {
    store: Arc<dyn Store>,
    exchange: Arc<dyn PeerExchange>,
    pin: Arc<dyn PinSubmitter>,
}

impl PrivateDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        exchange: Arc<dyn PeerExchange>,
        pin: Arc<dyn PinSubmitter>,
    ) -> Self {
        Self {
            store,
            exchange,
            pin,
        }
    }

    /// Resolve the recipient node set from the batch's group, deduplicated
    /// by node id.
    async fn resolve_nodes(&self, group_hash: &str) -> Result<Vec<NodeInfo>> {
        let group = self
            .store
            .get_group_by_hash(group_hash)
            .await?
            .ok_or_else(|| NodeError::GroupNotFound(group_hash.to_string()))?;

        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for member in &group.members {
            if !seen.insert(member.node) {
                continue;
            }
            let node = self
                .store
                .get_node_by_id(member.node)
                .await?
                .ok_or_else(|| NodeError::NodeNotFound(member.node.to_string()))?;
            nodes.push(node);
        }
        Ok(nodes)
    }

    /// Every blob referenced by the batch goes to every recipient node,
    /// with one operation per transfer. A blob we cannot resolve locally
    /// fails the whole dispatch.
    async fn transfer_blobs(&self, batch: &Batch, nodes: &[NodeInfo]) -> Result<()> {
        for item in &batch.payload.data {
            let Some(blob_ref) = item.blob.as_ref() else {
                continue;
            };
            let blob = self
                .store
                .get_blob_matching_hash(&blob_ref.hash)
                .await?
                .ok_or_else(|| NodeError::BlobNotFound(blob_ref.hash.clone()))?;

            let owner = owning_message(batch, item.id);
            for node in nodes {
                let tracking = self
                    .exchange
                    .transfer_blob(&node.peer, &blob.payload_ref)
                    .await?;
                debug!(data = %item.id, peer = %node.peer, tracking = %tracking,
                    "Blob transfer started");
                let op = match owner {
                    Some(msg) => Operation::for_message_data(
                        self.exchange.name(),
                        &tracking,
                        msg,
                        item.id,
                        OpType::DataExchangeBlobSend,
                        Some(&node.peer),
                    ),
                    None => {
                        let mut op = Operation::for_transaction(
                            self.exchange.name(),
                            &tracking,
                            batch.payload.tx.id,
                            OpType::DataExchangeBlobSend,
                        );
                        op.data = Some(item.id);
                        op.recipient = Some(node.peer.clone());
                        op
                    }
                };
                self.store.upsert_operation(&op).await?;
            }
        }
        Ok(())
    }

    async fn send_envelopes(&self, batch: &Batch, nodes: &[NodeInfo]) -> Result<()> {
        let envelope = serde_json::to_vec(batch)?;
        for node in nodes {
            let tracking = self
                .exchange
                .send_message(&node.peer, envelope.clone())
                .await?;
            debug!(batch = %batch.id, peer = %node.peer, tracking = %tracking,
                "Batch envelope sent");
            let mut op = Operation::for_transaction(
                self.exchange.name(),
                &tracking,
                batch.payload.tx.id,
                OpType::DataExchangeBatchSend,
            );
            op.namespace = Some(batch.namespace.clone());
            op.recipient = Some(node.peer.clone());
            self.store.upsert_operation(&op).await?;
        }
        Ok(())
    }
}

fn owning_message(batch: &Batch, data_id: uuid::Uuid) -> Option<&Message> {
    batch
        .payload
        .messages
        .iter()
        .find(|m| m.data.iter().any(|r| r.id == data_id))
}

#[async_trait]
impl BatchDispatcher for PrivateDispatcher {
    async fn dispatch(&self, batch: &mut Batch) -> Result<()> {
        let group_hash = batch
            .group
            .clone()
            .ok_or_else(|| NodeError::Validation("private batch has no group".to_string()))?;
        let nodes = self.resolve_nodes(&group_hash).await?;

        self.transfer_blobs(batch, &nodes).await?;
        self.send_envelopes(batch, &nodes).await?;

        let store = &self.store;
        let pin = &self.pin;
        let batch_ref: &Batch = batch;
        store
            .run_as_group(Box::pin(async move {
                store
                    .upsert_transaction(&Transaction::for_batch(
                        batch_ref.payload.tx.id,
                        batch_ref.id,
                    ))
                    .await?;
                pin.submit_pinned_batch(batch_ref).await
            }))
            .await?;

        info!(batch = %batch.id, group = %group_hash, recipients = nodes.len(),
            "Private batch dispatched");
        Ok(())
    }
}
