//! Per-(author, type) batch processor
//!
//! A processor is a single-writer actor: callers hand it records over a
//! channel and wait on a oneshot until their record is durably persisted
//! into some batch. The actor owns the assembly queue, the batch being
//! filled, the seal timer, and the handle of the one dispatch allowed to be
//! in flight ahead of assembly. Because one task owns all of that state,
//! there is no window between deciding to dispatch and clearing the
//! current-batch slot in which anything else can run.
//!
//! Dispatch retries forever with capped exponential backoff; a batch has
//! already been acknowledged to its callers by the time it dispatches, so
//! there is no dead-letter path.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BatchOptions;
use crate::error::{NodeError, Result};
use crate::store::Store;
use crate::types::{Batch, BatchType, Record};

/// Receives each sealed batch (the broadcast or private dispatcher).
#[async_trait]
pub trait BatchDispatcher: Send + Sync {
    async fn dispatch(&self, batch: &mut Batch) -> Result<()>;
}

pub(crate) enum ProcessorMsg {
    Add(PendingAdd),
    DispatchDone(Uuid),
    Shutdown,
}

pub(crate) struct PendingAdd {
    queued_at: Instant,
    record: Record,
    resolver: oneshot::Sender<Result<Uuid>>,
}

/// Caller-side handle to an assembler actor.
#[derive(Clone)]
pub struct BatchProcessor {
    tx: mpsc::UnboundedSender<ProcessorMsg>,
}

impl BatchProcessor {
    /// Spawn an assembler for one (author, type) pair.
    ///
    /// `recovered` holds batches persisted but not completed by a previous
    /// run, ordered by creation; they are re-dispatched before any new
    /// record is accepted. `idle_tx` is told when the processor has nothing
    /// queued, nothing assembling and nothing in flight.
    pub fn spawn(
        author: String,
        batch_type: BatchType,
        options: BatchOptions,
        store: Arc<dyn Store>,
        dispatcher: Arc<dyn BatchDispatcher>,
        recovered: Vec<Batch>,
        idle_tx: mpsc::UnboundedSender<(String, BatchType)>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let assembler = Assembler {
            author,
            batch_type,
            options,
            store,
            dispatcher,
            rx,
            self_tx: tx.clone(),
            idle_tx,
            queue: VecDeque::new(),
            current: None,
            seal_deadline: None,
            in_flight: None,
            in_flight_id: None,
        };
        let join = tokio::spawn(assembler.run(recovered));
        (Self { tx }, join)
    }

    /// Queue a record for assembly; resolves with the id of the batch the
    /// record was persisted into. Fails only on queue timeout, on a failed
    /// persist of the attempt that included this record, or if the
    /// processor has shut down.
    pub async fn add(&self, record: Record) -> Result<Uuid> {
        let (resolver, rx) = oneshot::channel();
        self.tx
            .send(ProcessorMsg::Add(PendingAdd {
                queued_at: Instant::now(),
                record,
                resolver,
            }))
            .map_err(|_| NodeError::ProcessorClosed)?;
        rx.await.map_err(|_| NodeError::ProcessorClosed)?
    }

    /// Ask the assembler to stop. It settles its in-flight dispatch and
    /// rejects anything still queued; the spawn join handle completes when
    /// it is done.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ProcessorMsg::Shutdown);
    }
}

struct Assembler {
    author: String,
    batch_type: BatchType,
    options: BatchOptions,
    store: Arc<dyn Store>,
    dispatcher: Arc<dyn BatchDispatcher>,
    rx: mpsc::UnboundedReceiver<ProcessorMsg>,
    self_tx: mpsc::UnboundedSender<ProcessorMsg>,
    idle_tx: mpsc::UnboundedSender<(String, BatchType)>,
    queue: VecDeque<PendingAdd>,
    current: Option<Batch>,
    seal_deadline: Option<Instant>,
    in_flight: Option<JoinHandle<()>>,
    in_flight_id: Option<Uuid>,
}

impl Assembler {
    async fn run(mut self, recovered: Vec<Batch>) {
        for batch in recovered {
            info!(author = %self.author, batch_type = %self.batch_type, batch = %batch.id,
                "Replaying incomplete batch");
            self.current = Some(batch);
            self.dispatch_batch().await;
        }

        loop {
            // Far-future placeholder keeps the select arm well-formed when
            // no seal timer is armed.
            let wake_at = self
                .seal_deadline
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                msg = self.rx.recv() => {
                    let Some(msg) = msg else { break };
                    let mut stopping = self.handle(msg);
                    // Take the whole backlog so concurrent submitters land
                    // in one assembly iteration.
                    while !stopping {
                        match self.rx.try_recv() {
                            Ok(more) => stopping = self.handle(more),
                            Err(_) => break,
                        }
                    }
                    if stopping {
                        break;
                    }
                    self.assemble().await;
                }
                _ = tokio::time::sleep_until(wake_at), if self.seal_deadline.is_some() => {
                    debug!(author = %self.author, batch_type = %self.batch_type,
                        "Seal timer fired");
                    self.dispatch_batch().await;
                }
            }
        }

        // Stop accepting traffic, settle the in-flight dispatch, fail
        // anything left waiting. An uncompleted current batch stays
        // persisted and is recovered by the next processor for this key.
        self.rx.close();
        if let Some(handle) = self.in_flight.take() {
            let _ = handle.await;
        }
        for add in self.queue.drain(..) {
            let _ = add.resolver.send(Err(NodeError::ProcessorClosed));
        }
        while let Ok(msg) = self.rx.try_recv() {
            if let ProcessorMsg::Add(add) = msg {
                let _ = add.resolver.send(Err(NodeError::ProcessorClosed));
            }
        }
        debug!(author = %self.author, batch_type = %self.batch_type, "Assembler stopped");
    }

    /// Returns true when the processor should stop.
    fn handle(&mut self, msg: ProcessorMsg) -> bool {
        match msg {
            ProcessorMsg::Add(add) => self.queue.push_back(add),
            ProcessorMsg::DispatchDone(batch_id) => self.dispatch_done(batch_id),
            ProcessorMsg::Shutdown => return true,
        }
        false
    }

    fn dispatch_done(&mut self, batch_id: Uuid) {
        // A newer dispatch may already have replaced this one.
        if self.in_flight_id != Some(batch_id) {
            return;
        }
        self.in_flight = None;
        self.in_flight_id = None;
        if self.queue.is_empty() && self.current.is_none() {
            let _ = self
                .idle_tx
                .send((self.author.clone(), self.batch_type));
        }
    }

    /// Reject queue entries older than the add timeout. The queue is FIFO
    /// by arrival, so only the front needs checking.
    fn evict_expired(&mut self) {
        let timeout = Duration::from_millis(self.options.add_timeout_ms);
        let now = Instant::now();
        while let Some(front) = self.queue.front() {
            if now.duration_since(front.queued_at) < timeout {
                break;
            }
            if let Some(add) = self.queue.pop_front() {
                warn!(author = %self.author, batch_type = %self.batch_type,
                    message = %add.record.message.id, "Evicting record from assembly queue");
                let _ = add.resolver.send(Err(NodeError::AddTimeout));
            }
        }
    }

    async fn assemble(&mut self) {
        loop {
            self.evict_expired();
            if self.queue.is_empty() {
                return;
            }

            if self.current.is_none() {
                let first = &self.queue[0].record;
                let batch = Batch::new(
                    &first.author,
                    first.batch_type,
                    &first.namespace,
                    first.group.clone(),
                );
                debug!(batch = %batch.id, author = %self.author, "Opened new batch");
                self.current = Some(batch);
            }

            let max_records = self.options.batch_max_records.max(1);
            let room = {
                let filled = self.current.as_ref().map(Batch::record_count).unwrap_or(0);
                max_records.saturating_sub(filled)
            };
            let take = room.min(self.queue.len());
            let taken: Vec<PendingAdd> = self.queue.drain(..take).collect();

            let (batch_id, full) = {
                let Some(batch) = self.current.as_mut() else { return };
                for add in &taken {
                    batch.append(&add.record);
                }
                (batch.id, batch.record_count() >= max_records)
            };

            if let Err(e) = self.persist_current().await {
                // The records of this iteration never became durable; pull
                // them back out so they cannot surface in a later persist.
                if let Some(batch) = self.current.as_mut() {
                    batch.truncate_records(taken.len());
                    if batch.record_count() == 0 {
                        self.current = None;
                    }
                }
                warn!(batch = %batch_id, error = %e, "Failed to persist batch");
                let msg = e.to_string();
                for add in taken {
                    let _ = add.resolver.send(Err(NodeError::Store(msg.clone())));
                }
                continue;
            }

            if full {
                self.dispatch_batch().await;
            } else if let Some(batch) = self.current.as_ref() {
                self.seal_deadline = Some(self.seal_deadline_for(batch));
            }

            for add in taken {
                let _ = add.resolver.send(Ok(batch_id));
            }
        }
    }

    async fn persist_current(&mut self) -> Result<()> {
        match self.current.as_ref() {
            Some(batch) => self.store.upsert_batch(batch).await,
            None => Ok(()),
        }
    }

    /// Next seal instant: the arrival window, clamped so the first record
    /// never waits past the overall timeout.
    fn seal_deadline_for(&self, batch: &Batch) -> Instant {
        let arrival = Duration::from_millis(self.options.batch_timeout_arrival_ms);
        let overall = Duration::from_millis(self.options.batch_timeout_overall_ms);
        let age = (Utc::now() - batch.created)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let remaining = overall.saturating_sub(age);
        Instant::now() + arrival.min(remaining)
    }

    /// Move the current batch into flight. At most one dispatched batch may
    /// be unfinished ahead of assembly, so this first settles the previous
    /// one. Whoever finds the slot already empty just returns.
    async fn dispatch_batch(&mut self) {
        if self.current.is_none() {
            return;
        }
        if let Some(prev) = self.in_flight.take() {
            debug!(author = %self.author, batch_type = %self.batch_type,
                "Waiting for in-flight dispatch before sealing next batch");
            let _ = prev.await;
        }
        self.seal_deadline = None;
        let Some(batch) = self.current.take() else { return };

        let store = Arc::clone(&self.store);
        let dispatcher = Arc::clone(&self.dispatcher);
        let options = self.options.clone();
        let done_tx = self.self_tx.clone();
        self.in_flight_id = Some(batch.id);
        self.in_flight = Some(tokio::spawn(process_batch(
            store, dispatcher, options, batch, done_tx,
        )));
    }
}

/// Dispatch one sealed batch, retrying until it lands.
///
/// Every attempt re-stamps `completed` and re-seals, so each pin submission
/// hashes uniquely.
async fn process_batch(
    store: Arc<dyn Store>,
    dispatcher: Arc<dyn BatchDispatcher>,
    options: BatchOptions,
    mut batch: Batch,
    done_tx: mpsc::UnboundedSender<ProcessorMsg>,
) {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        batch.completed = Some(Utc::now());

        let result = dispatch_attempt(&store, &dispatcher, &mut batch).await;
        match result {
            Ok(()) => {
                info!(batch = %batch.id, records = batch.record_count(), attempt,
                    "Batch dispatched");
                break;
            }
            Err(e) => {
                let delay = retry_delay(&options, attempt);
                warn!(batch = %batch.id, attempt, delay_ms = delay.as_millis() as u64,
                    error = %e, "Batch dispatch failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
    let _ = done_tx.send(ProcessorMsg::DispatchDone(batch.id));
}

async fn dispatch_attempt(
    store: &Arc<dyn Store>,
    dispatcher: &Arc<dyn BatchDispatcher>,
    batch: &mut Batch,
) -> Result<()> {
    batch.seal()?;
    dispatcher.dispatch(batch).await?;
    store.upsert_batch(batch).await
}

fn retry_delay(options: &BatchOptions, attempt: u32) -> Duration {
    let initial = options.retry_initial_delay_ms as f64;
    let factor = options.retry_multiplier.powi(attempt.saturating_sub(1) as i32);
    let capped = (initial * factor).min(options.retry_max_delay_ms as f64);
    Duration::from_millis(capped as u64)
}
