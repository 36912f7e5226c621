//! Plugin event streams
//!
//! Long-lived consumers of plugin event streams. Each stream gets an
//! `EventLoop` fed by an `EventTransport`; the supervisor reconnects with
//! capped backoff whenever a loop dies for any reason other than shutdown.

pub mod stream;
pub mod transport;

pub use stream::{EventCallbacks, EventLoop, ExitReason, TokenPoolAnnouncement};
pub use transport::{EventTransport, WsTransport};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::EventStreamConfig;
use crate::error::Result;
use crate::store::Store;
use crate::types::{OpStatus, OpType, Operation, Transaction};

/// Lifecycle of one supervised stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Draining,
    Closed,
}

/// Run one plugin event stream until shutdown, reconnecting on failure.
///
/// `connect` is called for every (re)connection attempt; connect failures
/// and loop failures both back off exponentially up to the configured cap,
/// resetting after a successful connection.
pub async fn supervise_event_stream<T, C, F, Fut>(
    plugin: &str,
    config: EventStreamConfig,
    connect: F,
    callbacks: Arc<C>,
    mut shutdown: mpsc::Receiver<()>,
) where
    T: EventTransport,
    C: EventCallbacks,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let initial = Duration::from_millis(config.reconnect_initial_delay_ms.max(1));
    let max = Duration::from_millis(config.reconnect_max_delay_ms.max(1));
    let mut delay = initial;
    let mut state = ConnectionState::Disconnected;
    let transition = |state: &mut ConnectionState, next: ConnectionState| {
        tracing::debug!(plugin, from = ?*state, to = ?next, "Event stream state");
        *state = next;
    };

    loop {
        transition(&mut state, ConnectionState::Connecting);
        let transport = match connect().await {
            Ok(t) => t,
            Err(e) => {
                transition(&mut state, ConnectionState::Disconnected);
                warn!(plugin, error = %e, delay_ms = delay.as_millis() as u64,
                    "Event stream connect failed, backing off");
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = (delay * 2).min(max);
                continue;
            }
        };

        transition(&mut state, ConnectionState::Connected);
        info!(plugin, "Event stream connected");
        delay = initial;

        let event_loop = EventLoop::new(plugin, Arc::clone(&callbacks));
        match event_loop.run(transport, &mut shutdown).await {
            Ok(ExitReason::Shutdown) => {
                transition(&mut state, ConnectionState::Draining);
                break;
            }
            Ok(ExitReason::StreamClosed) => {
                transition(&mut state, ConnectionState::Disconnected);
                warn!(plugin, "Event stream closed, reconnecting");
            }
            Err(e) => {
                transition(&mut state, ConnectionState::Disconnected);
                error!(plugin, error = %e, "Event loop failed, reconnecting");
            }
        }

        tokio::select! {
            _ = shutdown.recv() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(max);
    }

    transition(&mut state, ConnectionState::Closed);
    info!(plugin, "Event stream supervisor stopped");
}

/// Store-backed event callbacks: receipts resolve Operations, confirmed
/// token pools are recorded against their originating transaction.
pub struct NodeEventHandler {
    store: Arc<dyn Store>,
    token_plugin_name: String,
}

impl NodeEventHandler {
    pub fn new(store: Arc<dyn Store>, token_plugin_name: impl Into<String>) -> Self {
        Self {
            store,
            token_plugin_name: token_plugin_name.into(),
        }
    }
}

#[async_trait]
impl EventCallbacks for NodeEventHandler {
    async fn op_update(
        &self,
        operation_id: Uuid,
        status: OpStatus,
        message: String,
        _data: Value,
    ) -> Result<()> {
        let error = match status {
            OpStatus::Failed => Some(message),
            _ => None,
        };
        self.store.update_operation(operation_id, status, error).await
    }

    async fn token_pool_created(&self, pool: TokenPoolAnnouncement) -> Result<()> {
        info!(pool = %pool.protocol_id, tx = %pool.tx_id, tx_hash = %pool.tx_hash,
            "Token pool confirmed");
        self.store
            .upsert_transaction(&Transaction {
                id: pool.tx_id,
                batch: None,
                created: Utc::now(),
            })
            .await?;
        let mut op = Operation::for_transaction(
            &self.token_plugin_name,
            &pool.tx_hash,
            pool.tx_id,
            OpType::TokensCreatePool,
        );
        op.status = OpStatus::Succeeded;
        self.store.upsert_operation(&op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::Message;
    use serde_json::json;

    #[tokio::test]
    async fn test_receipt_resolves_pending_operation() {
        let store = Arc::new(MemoryStore::new());
        let msg = Message::new("ns1", "org1");
        let op = Operation::for_message("ut_dx", "t1", &msg, OpType::DataExchangeBatchSend, None);
        store.upsert_operation(&op).await.unwrap();

        let handler = NodeEventHandler::new(store.clone(), "ut_tokens");
        handler
            .op_update(op.id, OpStatus::Succeeded, String::new(), json!({}))
            .await
            .unwrap();

        let ops = store.all_operations();
        assert_eq!(ops[0].status, OpStatus::Succeeded);
        assert!(ops[0].updated.is_some());
    }

    #[tokio::test]
    async fn test_failed_receipt_records_error() {
        let store = Arc::new(MemoryStore::new());
        let msg = Message::new("ns1", "org1");
        let op = Operation::for_message("ut_dx", "t1", &msg, OpType::DataExchangeBlobSend, None);
        store.upsert_operation(&op).await.unwrap();

        let handler = NodeEventHandler::new(store.clone(), "ut_tokens");
        handler
            .op_update(op.id, OpStatus::Failed, "pop".to_string(), json!({}))
            .await
            .unwrap();

        let ops = store.all_operations();
        assert_eq!(ops[0].status, OpStatus::Failed);
        assert_eq!(ops[0].error.as_deref(), Some("pop"));
    }

    #[tokio::test]
    async fn test_token_pool_records_operation() {
        let store = Arc::new(MemoryStore::new());
        let handler = NodeEventHandler::new(store.clone(), "ut_tokens");
        let tx_id = Uuid::new_v4();
        handler
            .token_pool_created(TokenPoolAnnouncement {
                pool_type: "fungible".to_string(),
                protocol_id: "pool1".to_string(),
                tx_id,
                operator: "0x12345".to_string(),
                tx_hash: "0xabc".to_string(),
                transaction: json!({"transactionHash": "0xabc"}),
            })
            .await
            .unwrap();

        let ops = store.all_operations();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op_type, OpType::TokensCreatePool);
        assert_eq!(ops[0].status, OpStatus::Succeeded);
        assert_eq!(ops[0].transaction, Some(tx_id));
    }
}
