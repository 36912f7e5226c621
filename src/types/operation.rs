//! Durable operation markers
//!
//! An Operation records one out-of-process side effect (a publish, a blob
//! transfer, a pin submission) so that asynchronous receipts can be
//! correlated back after a restart via the plugin-supplied tracking id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::batch::Message;

/// Mechanical step kinds that have results in back-end systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpType {
    BlockchainBatchPin,
    PublicStorageBatchBroadcast,
    DataExchangeBatchSend,
    DataExchangeBlobSend,
    TokensCreatePool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpStatus {
    Pending,
    Succeeded,
    Failed,
}

impl OpStatus {
    /// Status only ever moves from pending to a terminal state.
    pub fn can_transition_to(self, next: OpStatus) -> bool {
        matches!(
            (self, next),
            (OpStatus::Pending, OpStatus::Succeeded) | (OpStatus::Pending, OpStatus::Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Owning message, if the side effect is message-scoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Uuid>,
    /// Owning data item, if the side effect is data-scoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Uuid>,
    /// Transaction this operation belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<Uuid>,
    #[serde(rename = "type")]
    pub op_type: OpType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub status: OpStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub plugin: String,
    /// Transport-supplied tracking id (content-store object id, peer
    /// exchange tracking token, ...). Empty until the transport returns one.
    pub backend_id: String,
    pub created: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

impl Operation {
    /// Operation scoped to a whole message.
    pub fn for_message(
        plugin: &str,
        backend_id: &str,
        msg: &Message,
        op_type: OpType,
        recipient: Option<&str>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace: Some(msg.namespace.clone()),
            message: Some(msg.id),
            data: None,
            transaction: None,
            op_type,
            recipient: recipient.map(str::to_string),
            status: OpStatus::Pending,
            error: None,
            plugin: plugin.to_string(),
            backend_id: backend_id.to_string(),
            created: Utc::now(),
            updated: None,
        }
    }

    /// Operation scoped to one data item of a message.
    pub fn for_message_data(
        plugin: &str,
        backend_id: &str,
        msg: &Message,
        data_id: Uuid,
        op_type: OpType,
        recipient: Option<&str>,
    ) -> Self {
        let mut op = Self::for_message(plugin, backend_id, msg, op_type, recipient);
        op.data = Some(data_id);
        op
    }

    /// Operation not tied to any particular message (e.g. a batch pin or a
    /// whole-batch publish). `backend_id` may be empty until the transport
    /// returns a tracking id.
    pub fn for_transaction(plugin: &str, backend_id: &str, tx_id: Uuid, op_type: OpType) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace: None,
            message: None,
            data: None,
            transaction: Some(tx_id),
            op_type,
            recipient: None,
            status: OpStatus::Pending,
            error: None,
            plugin: plugin.to_string(),
            backend_id: backend_id.to_string(),
            created: Utc::now(),
            updated: None,
        }
    }
}
