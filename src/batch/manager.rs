//! Processor registry
//!
//! Owns every batch processor in the node, keyed by (author, batch type).
//! Authors range over an unbounded identity space, so processors are created
//! lazily on first use and torn down again when they report idle. Creation
//! replays any batches the previous run persisted but never completed.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BatchOptions;
use crate::error::{NodeError, Result};
use crate::store::Store;
use crate::types::{BatchType, Record};

use super::processor::{BatchDispatcher, BatchProcessor};

type ProcessorKey = (String, BatchType);

struct DispatcherEntry {
    dispatcher: Arc<dyn BatchDispatcher>,
    options: BatchOptions,
}

struct ProcessorHandle {
    processor: BatchProcessor,
    join: JoinHandle<()>,
}

pub struct BatchManager {
    store: Arc<dyn Store>,
    dispatchers: HashMap<BatchType, DispatcherEntry>,
    processors: Arc<Mutex<HashMap<ProcessorKey, ProcessorHandle>>>,
    idle_tx: mpsc::UnboundedSender<ProcessorKey>,
    reaper: JoinHandle<()>,
}

impl BatchManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let processors: Arc<Mutex<HashMap<ProcessorKey, ProcessorHandle>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (idle_tx, mut idle_rx) = mpsc::unbounded_channel::<ProcessorKey>();

        // Idle processors unregister through this task; dropping the handle
        // closes the processor channel and the actor winds itself down.
        let reaper_map = Arc::clone(&processors);
        let reaper = tokio::spawn(async move {
            while let Some(key) = idle_rx.recv().await {
                if let Some(handle) = reaper_map.lock().await.remove(&key) {
                    handle.processor.shutdown();
                    debug!(author = %key.0, batch_type = %key.1, "Unregistered idle batch processor");
                }
            }
        });

        Self {
            store,
            dispatchers: HashMap::new(),
            processors,
            idle_tx,
            reaper,
        }
    }

    /// Register the dispatcher (and its assembly options) handling one batch
    /// type. Must be called before records of that type are added.
    pub fn register_dispatcher(
        &mut self,
        batch_type: BatchType,
        dispatcher: Arc<dyn BatchDispatcher>,
        options: BatchOptions,
    ) {
        self.dispatchers.insert(
            batch_type,
            DispatcherEntry {
                dispatcher,
                options,
            },
        );
    }

    /// Route a record to its processor; resolves once the record is
    /// persisted in a batch, with that batch's id.
    pub async fn add(&self, record: Record) -> Result<Uuid> {
        // An idle processor can shut down between lookup and send; one
        // retry against a freshly created processor covers that race.
        for _ in 0..2 {
            let processor = self
                .processor_for(&record.author, record.batch_type)
                .await?;
            match processor.add(record.clone()).await {
                Err(NodeError::ProcessorClosed) => {
                    warn!(author = %record.author, batch_type = %record.batch_type,
                        "Batch processor closed mid-add, retrying");
                    self.remove(&(record.author.clone(), record.batch_type)).await;
                    continue;
                }
                other => return other,
            }
        }
        Err(NodeError::ProcessorClosed)
    }

    /// Ensure the processor for a key exists, replaying any incomplete
    /// batches it left behind. Called for the node's own identities at
    /// startup so recovery does not wait for new traffic.
    pub async fn recover(&self, author: &str, batch_type: BatchType) -> Result<()> {
        self.processor_for(author, batch_type).await?;
        Ok(())
    }

    /// Drain every processor: close their channels and wait for each actor
    /// (and its in-flight dispatch) to settle.
    pub async fn wait_stop(&self) {
        let handles: Vec<ProcessorHandle> = {
            let mut map = self.processors.lock().await;
            map.drain().map(|(_, h)| h).collect()
        };
        info!(count = handles.len(), "Stopping batch processors");
        for handle in &handles {
            handle.processor.shutdown();
        }
        for handle in handles {
            let _ = handle.join.await;
        }
        self.reaper.abort();
    }

    async fn processor_for(&self, author: &str, batch_type: BatchType) -> Result<BatchProcessor> {
        let entry = self
            .dispatchers
            .get(&batch_type)
            .ok_or_else(|| NodeError::NoDispatcher(batch_type.to_string()))?;

        let key = (author.to_string(), batch_type);
        let mut map = self.processors.lock().await;
        if let Some(handle) = map.get(&key) {
            return Ok(handle.processor.clone());
        }

        let recovered = self
            .store
            .retrieve_incomplete_batches(author, batch_type)
            .await?;
        if !recovered.is_empty() {
            info!(author, batch_type = %batch_type, count = recovered.len(),
                "Recovering incomplete batches");
        }
        let (processor, join) = BatchProcessor::spawn(
            author.to_string(),
            batch_type,
            entry.options.clone(),
            Arc::clone(&self.store),
            Arc::clone(&entry.dispatcher),
            recovered,
            self.idle_tx.clone(),
        );
        debug!(author, batch_type = %batch_type, "Created batch processor");
        map.insert(
            key,
            ProcessorHandle {
                processor: processor.clone(),
                join,
            },
        );
        Ok(processor)
    }

    async fn remove(&self, key: &ProcessorKey) {
        self.processors.lock().await.remove(key);
    }
}
