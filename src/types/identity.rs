//! Directory identities: members of the federation, their nodes, and the
//! recipient groups private batches are addressed to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A member of the federation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// Stable identity string (the batch `author` value).
    pub identity: String,
    /// On-chain signing address.
    pub address: String,
    /// This member's identity within the federation.
    pub asset_trail_instance_id: String,
    /// App-to-app channel destination for trade traffic.
    pub app_destination: String,
    /// Document-exchange destination for private file delivery.
    pub doc_exchange_destination: String,
}

/// A node operated by a member: the peer-exchange endpoint batches travel to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub id: Uuid,
    pub peer: String,
    #[serde(default)]
    pub endpoint: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub identity: String,
    pub node: Uuid,
}

/// Recipient set for a private batch, identified by content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub members: Vec<GroupMember>,
}

/// Durable transaction row grouping the operations of one user-visible event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    /// Owning batch, when the event is a batch dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<Uuid>,
    pub created: DateTime<Utc>,
}

impl Transaction {
    pub fn for_batch(tx_id: Uuid, batch_id: Uuid) -> Self {
        Self {
            id: tx_id,
            batch: Some(batch_id),
            created: Utc::now(),
        }
    }
}
