//! Batch pin submission
//!
//! Both dispatchers finish by committing the sealed batch to chain. The
//! submitter records a `BlockchainBatchPin` Operation, verifies the signing
//! identity, and hands the pin to the blockchain plugin. The batch hash is
//! re-sealed per dispatch attempt, so each submission is unique.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::plugins::{BatchPin, Blockchain};
use crate::store::Store;
use crate::types::{Batch, OpType, Operation};

#[async_trait]
pub trait PinSubmitter: Send + Sync {
    async fn submit_pinned_batch(&self, batch: &Batch) -> Result<()>;
}

pub struct BatchPinSubmitter {
    store: Arc<dyn Store>,
    blockchain: Arc<dyn Blockchain>,
    /// Identity pins are signed under.
    signing_identity: String,
}

impl BatchPinSubmitter {
    pub fn new(
        store: Arc<dyn Store>,
        blockchain: Arc<dyn Blockchain>,
        signing_identity: String,
    ) -> Self {
        Self {
            store,
            blockchain,
            signing_identity,
        }
    }
}

#[async_trait]
impl PinSubmitter for BatchPinSubmitter {
    async fn submit_pinned_batch(&self, batch: &Batch) -> Result<()> {
        let pin = BatchPin {
            batch_id: batch.id,
            batch_hash: batch.hash.clone().unwrap_or_default(),
            contexts: batch.contexts(),
        };

        let mut op = Operation::for_transaction(
            self.blockchain.name(),
            "",
            batch.payload.tx.id,
            OpType::BlockchainBatchPin,
        );
        op.namespace = Some(batch.namespace.clone());
        self.store.upsert_operation(&op).await?;

        self.blockchain.verify_identity_syntax(&self.signing_identity)?;
        let protocol_tx = self
            .blockchain
            .submit_batch_pin(&self.signing_identity, &pin)
            .await?;

        // Re-upsert with the tracking id so the receipt can correlate.
        op.backend_id = protocol_tx;
        self.store.upsert_operation(&op).await?;

        info!(batch = %batch.id, tx = %batch.payload.tx.id, "Batch pin submitted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeError;
    use crate::store::MemoryStore;
    use crate::types::BatchType;
    use std::sync::Mutex;

    struct MockBlockchain {
        pins: Mutex<Vec<BatchPin>>,
        fail: bool,
    }

    #[async_trait]
    impl Blockchain for MockBlockchain {
        fn name(&self) -> &str {
            "ut_blockchain"
        }
        fn verify_identity_syntax(&self, identity: &str) -> Result<()> {
            if identity.starts_with('!') {
                return Err(NodeError::Blockchain("bad identity".to_string()));
            }
            Ok(())
        }
        async fn submit_batch_pin(&self, _identity: &str, pin: &BatchPin) -> Result<String> {
            if self.fail {
                return Err(NodeError::Blockchain("pop".to_string()));
            }
            self.pins.lock().unwrap().push(pin.clone());
            Ok("txid1".to_string())
        }
    }

    #[tokio::test]
    async fn test_submit_records_operation_with_tracking_id() {
        let store = Arc::new(MemoryStore::new());
        let chain = Arc::new(MockBlockchain {
            pins: Mutex::new(Vec::new()),
            fail: false,
        });
        let submitter =
            BatchPinSubmitter::new(store.clone(), chain.clone(), "0x12345".to_string());

        let mut batch = Batch::new("org1", BatchType::Broadcast, "ns1", None);
        batch.seal().unwrap();
        submitter.submit_pinned_batch(&batch).await.unwrap();

        let ops = store.all_operations();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op_type, OpType::BlockchainBatchPin);
        assert_eq!(ops[0].plugin, "ut_blockchain");
        assert_eq!(ops[0].backend_id, "txid1");
        assert_eq!(ops[0].transaction, Some(batch.payload.tx.id));

        let pins = chain.pins.lock().unwrap();
        assert_eq!(pins[0].batch_hash, batch.hash.clone().unwrap());
    }

    #[tokio::test]
    async fn test_submit_failure_propagates() {
        let store = Arc::new(MemoryStore::new());
        let chain = Arc::new(MockBlockchain {
            pins: Mutex::new(Vec::new()),
            fail: true,
        });
        let submitter = BatchPinSubmitter::new(store, chain, "0x12345".to_string());

        let mut batch = Batch::new("org1", BatchType::Broadcast, "ns1", None);
        batch.seal().unwrap();
        assert!(submitter.submit_pinned_batch(&batch).await.is_err());
    }
}
