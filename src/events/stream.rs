//! Plugin event loop
//!
//! One loop runs per plugin event stream (peer exchange, token plugin, ...).
//! Envelopes are `{event, id, data}`. Receipts become operation status
//! updates and are never acked; other events are acked back only after they
//! processed successfully. Almost nothing terminates the loop: decode
//! failures, unknown events and invalid payloads are logged and swallowed.
//! The exceptions are an ack send failure and a `token_pool_created`
//! callback error, which signals an unrecoverable local state.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{NodeError, Result};
use crate::types::OpStatus;

use super::transport::EventTransport;

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Shutdown was requested; do not reconnect.
    Shutdown,
    /// The stream closed from the far side; reconnect.
    StreamClosed,
}

/// A validated token-pool creation event.
#[derive(Debug, Clone)]
pub struct TokenPoolAnnouncement {
    pub pool_type: String,
    pub protocol_id: String,
    pub tx_id: Uuid,
    pub operator: String,
    pub tx_hash: String,
    pub transaction: Value,
}

/// Callbacks the node registers with each event loop.
#[async_trait]
pub trait EventCallbacks: Send + Sync {
    /// A receipt arrived for an operation. Errors are logged and swallowed.
    async fn op_update(
        &self,
        operation_id: Uuid,
        status: OpStatus,
        message: String,
        data: Value,
    ) -> Result<()>;

    /// A token pool was confirmed. An error here terminates the loop.
    async fn token_pool_created(&self, pool: TokenPoolAnnouncement) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct WsEvent {
    event: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    data: Value,
}

/// Whether an event earned an ack.
enum Disposition {
    Ack,
    NoAck,
}

pub struct EventLoop<C> {
    plugin: String,
    callbacks: Arc<C>,
}

impl<C: EventCallbacks> EventLoop<C> {
    pub fn new(plugin: impl Into<String>, callbacks: Arc<C>) -> Self {
        Self {
            plugin: plugin.into(),
            callbacks,
        }
    }

    /// Consume the stream until shutdown, close, or a fatal error.
    pub async fn run<T: EventTransport>(
        &self,
        mut transport: T,
        shutdown: &mut mpsc::Receiver<()>,
    ) -> Result<ExitReason> {
        loop {
            let text = tokio::select! {
                _ = shutdown.recv() => {
                    debug!(plugin = %self.plugin, "Event loop exiting (shutdown)");
                    return Ok(ExitReason::Shutdown);
                }
                msg = transport.recv() => match msg? {
                    Some(text) => text,
                    None => {
                        debug!(plugin = %self.plugin, "Event loop exiting (stream closed)");
                        return Ok(ExitReason::StreamClosed);
                    }
                },
            };

            let msg: WsEvent = match serde_json::from_str(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    error!(plugin = %self.plugin, error = %e,
                        "Event cannot be parsed as JSON, skipping");
                    continue;
                }
            };
            debug!(plugin = %self.plugin, event = %msg.event, id = %msg.id, "Received event");

            let disposition = match msg.event.as_str() {
                "receipt" => {
                    self.handle_receipt(&msg.data).await;
                    // Receipts are never acked.
                    Disposition::NoAck
                }
                "token-pool" => self.handle_token_pool(&msg.data).await?,
                other => {
                    error!(plugin = %self.plugin, event = %other, "Unexpected event, skipping");
                    Disposition::NoAck
                }
            };

            if matches!(disposition, Disposition::Ack) && !msg.id.is_empty() {
                debug!(plugin = %self.plugin, id = %msg.id, "Sending ack");
                let ack = json!({"event": "ack", "data": {"id": msg.id}});
                transport.send(ack.to_string()).await?;
            }
        }
    }

    async fn handle_receipt(&self, data: &Value) {
        let request_id = data["id"].as_str().unwrap_or_default();
        if request_id.is_empty() {
            error!(plugin = %self.plugin, "Receipt cannot be processed - missing fields");
            return;
        }
        let Ok(operation_id) = Uuid::parse_str(request_id) else {
            error!(plugin = %self.plugin, id = %request_id, "Receipt cannot be processed - bad id");
            return;
        };
        let success = data["success"].as_bool().unwrap_or(false);
        let message = data["message"].as_str().unwrap_or_default().to_string();
        let status = if success {
            OpStatus::Succeeded
        } else {
            OpStatus::Failed
        };
        info!(plugin = %self.plugin, op = %operation_id, ?status, "Receipt");
        if let Err(e) = self
            .callbacks
            .op_update(operation_id, status, message, data.clone())
            .await
        {
            warn!(plugin = %self.plugin, op = %operation_id, error = %e,
                "Operation update failed, skipping receipt");
        }
    }

    async fn handle_token_pool(&self, data: &Value) -> Result<Disposition> {
        let pool_type = data["type"].as_str().unwrap_or_default();
        let protocol_id = data["poolId"].as_str().unwrap_or_default();
        let tracking_id = data["trackingId"].as_str().unwrap_or_default();
        let operator = data["operator"].as_str().unwrap_or_default();
        let transaction = data["transaction"].clone();
        let tx_hash = transaction["transactionHash"].as_str().unwrap_or_default();

        if pool_type.is_empty()
            || protocol_id.is_empty()
            || tracking_id.is_empty()
            || operator.is_empty()
            || tx_hash.is_empty()
        {
            error!(plugin = %self.plugin, "Token pool event is not valid - missing data, skipping");
            return Ok(Disposition::NoAck);
        }

        let Ok(tx_id) = Uuid::parse_str(tracking_id) else {
            error!(plugin = %self.plugin, tracking_id = %tracking_id,
                "Token pool event is not valid - bad tracking id, skipping");
            return Ok(Disposition::NoAck);
        };

        let announcement = TokenPoolAnnouncement {
            pool_type: pool_type.to_string(),
            protocol_id: protocol_id.to_string(),
            tx_id,
            operator: operator.to_string(),
            tx_hash: tx_hash.to_string(),
            transaction,
        };

        // A failure dispatching the pool event means the node cannot make
        // local progress; the loop must die and reconnect.
        self.callbacks
            .token_pool_created(announcement)
            .await
            .map_err(|e| NodeError::EventStream(format!("token pool dispatch failed: {e}")))?;

        Ok(Disposition::Ack)
    }
}
