//! Broadcast dispatch
//!
//! A sealed broadcast batch is serialized and published to the public
//! content store. Inside one store transaction the batch row then gets its
//! `payload_ref`, the broadcast Operation is recorded, and (for locally
//! authored batches) the Transaction row is written and the pin submitted.
//!
//! A foreign-author batch reaching this dispatcher is a loopback
//! observation: the publish and the Operation are still recorded, but this
//! node must not sign for another author, so no Transaction and no pin.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::batch::BatchDispatcher;
use crate::error::Result;
use crate::plugins::ContentStore;
use crate::store::{BatchUpdate, Store};
use crate::types::{Batch, OpType, Operation, Transaction};

use super::pin::PinSubmitter;

pub struct BroadcastDispatcher {
    store: Arc<dyn Store>,
    content_store: Arc<dyn ContentStore>,
    pin: Arc<dyn PinSubmitter>,
    /// Author identity this node signs for.
    local_identity: String,
}

impl BroadcastDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        content_store: Arc<dyn ContentStore>,
        pin: Arc<dyn PinSubmitter>,
        local_identity: String,
    ) -> Self {
        Self {
            store,
            content_store,
            pin,
            local_identity,
        }
    }
}

#[async_trait]
impl BatchDispatcher for BroadcastDispatcher {
    async fn dispatch(&self, batch: &mut Batch) -> Result<()> {
        let payload = serde_json::to_vec(&batch.payload)?;
        let backend_id = self.content_store.publish_data(payload).await?;
        debug!(batch = %batch.id, backend_id = %backend_id, "Batch payload published");
        batch.payload_ref = Some(backend_id.clone());

        let mut op = Operation::for_transaction(
            self.content_store.name(),
            &backend_id,
            batch.payload.tx.id,
            OpType::PublicStorageBatchBroadcast,
        );
        op.namespace = Some(batch.namespace.clone());

        let store = &self.store;
        let pin = &self.pin;
        let local = batch.author == self.local_identity;
        let batch_ref: &Batch = batch;
        store
            .run_as_group(Box::pin(async move {
                store
                    .update_batch(
                        batch_ref.id,
                        BatchUpdate {
                            payload_ref: Some(backend_id.clone()),
                        },
                    )
                    .await?;
                if local {
                    store
                        .upsert_transaction(&Transaction::for_batch(
                            batch_ref.payload.tx.id,
                            batch_ref.id,
                        ))
                        .await?;
                    store.upsert_operation(&op).await?;
                    pin.submit_pinned_batch(batch_ref).await?;
                } else {
                    // Loopback observation of another author's batch: the
                    // publish is recorded, nothing is signed.
                    store.upsert_operation(&op).await?;
                    debug!(batch = %batch_ref.id, author = %batch_ref.author,
                        "Foreign-author batch, skipping pin");
                }
                Ok(())
            }))
            .await?;

        info!(batch = %batch.id, records = batch.record_count(), local,
            "Broadcast batch dispatched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeError;
    use crate::plugins::{BatchPin, Blockchain};
    use crate::store::MemoryStore;
    use crate::types::BatchType;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct MockContentStore {
        fail: bool,
    }

    #[async_trait]
    impl ContentStore for MockContentStore {
        fn name(&self) -> &str {
            "ut_publicstorage"
        }
        async fn publish_data(&self, _payload: Vec<u8>) -> Result<String> {
            if self.fail {
                return Err(NodeError::ContentStore("pop".to_string()));
            }
            Ok("ipfs_id".to_string())
        }
    }

    struct MockChain {
        pins: Mutex<Vec<BatchPin>>,
    }

    #[async_trait]
    impl Blockchain for MockChain {
        fn name(&self) -> &str {
            "ut_blockchain"
        }
        fn verify_identity_syntax(&self, _identity: &str) -> Result<()> {
            Ok(())
        }
        async fn submit_batch_pin(&self, _identity: &str, pin: &BatchPin) -> Result<String> {
            self.pins.lock().unwrap().push(pin.clone());
            Ok("txid1".to_string())
        }
    }

    struct FailingPin {
        called: AtomicBool,
    }

    #[async_trait]
    impl PinSubmitter for FailingPin {
        async fn submit_pinned_batch(&self, _batch: &Batch) -> Result<()> {
            self.called.store(true, Ordering::SeqCst);
            Err(NodeError::Blockchain("pop".to_string()))
        }
    }

    fn dispatcher(
        store: Arc<MemoryStore>,
        fail_publish: bool,
    ) -> (BroadcastDispatcher, Arc<MockChain>) {
        let chain = Arc::new(MockChain {
            pins: Mutex::new(Vec::new()),
        });
        let pin = Arc::new(crate::dispatch::BatchPinSubmitter::new(
            store.clone(),
            chain.clone(),
            "0x12345".to_string(),
        ));
        (
            BroadcastDispatcher::new(
                store,
                Arc::new(MockContentStore { fail: fail_publish }),
                pin,
                "org1".to_string(),
            ),
            chain,
        )
    }

    #[tokio::test]
    async fn test_dispatch_publishes_then_pins() {
        let store = Arc::new(MemoryStore::new());
        let (dispatcher, chain) = dispatcher(store.clone(), false);

        let mut batch = Batch::new("org1", BatchType::Broadcast, "ns1", None);
        store.upsert_batch(&batch).await.unwrap();
        batch.completed = Some(chrono::Utc::now());
        batch.seal().unwrap();

        dispatcher.dispatch(&mut batch).await.unwrap();

        assert_eq!(batch.payload_ref.as_deref(), Some("ipfs_id"));
        assert_eq!(
            store.batch(batch.id).unwrap().payload_ref.as_deref(),
            Some("ipfs_id")
        );

        let ops = store.all_operations();
        assert_eq!(ops.len(), 2);
        let broadcast = ops
            .iter()
            .find(|o| o.op_type == OpType::PublicStorageBatchBroadcast)
            .unwrap();
        assert_eq!(broadcast.plugin, "ut_publicstorage");
        assert_eq!(broadcast.backend_id, "ipfs_id");
        assert_eq!(broadcast.transaction, Some(batch.payload.tx.id));
        assert!(ops.iter().any(|o| o.op_type == OpType::BlockchainBatchPin));

        assert_eq!(store.all_transactions().len(), 1);
        assert_eq!(chain.pins.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_propagates() {
        let store = Arc::new(MemoryStore::new());
        let (dispatcher, chain) = dispatcher(store.clone(), true);

        let mut batch = Batch::new("org1", BatchType::Broadcast, "ns1", None);
        assert!(dispatcher.dispatch(&mut batch).await.is_err());
        assert!(store.all_operations().is_empty());
        assert!(chain.pins.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_author_skips_pin() {
        let store = Arc::new(MemoryStore::new());
        let (dispatcher, chain) = dispatcher(store.clone(), false);

        let mut batch = Batch::new("org2", BatchType::Broadcast, "ns1", None);
        store.upsert_batch(&batch).await.unwrap();
        batch.seal().unwrap();

        dispatcher.dispatch(&mut batch).await.unwrap();

        // Publish observed, nothing signed.
        let ops = store.all_operations();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op_type, OpType::PublicStorageBatchBroadcast);
        assert!(store.all_transactions().is_empty());
        assert!(chain.pins.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pin_failure_propagates() {
        let store = Arc::new(MemoryStore::new());
        let pin = Arc::new(FailingPin {
            called: AtomicBool::new(false),
        });
        let dispatcher = BroadcastDispatcher::new(
            store.clone(),
            Arc::new(MockContentStore { fail: false }),
            pin.clone(),
            "org1".to_string(),
        );

        let mut batch = Batch::new("org1", BatchType::Broadcast, "ns1", None);
        store.upsert_batch(&batch).await.unwrap();
        batch.seal().unwrap();

        assert!(dispatcher.dispatch(&mut batch).await.is_err());
        assert!(pin.called.load(Ordering::SeqCst));
    }
}
