//! Batches and the records they assemble
//!
//! A record is one message plus the data items it references, contributed by
//! a single caller. Records are grouped into batches bound to an
//! (author, batch type) pair; a sealed batch travels as one transport
//! payload committed to by one on-chain pin.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::Result;
use crate::hash;

/// How a sealed batch leaves the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchType {
    /// Publish to the public content store, then pin.
    Broadcast,
    /// Transfer blobs and envelope to each recipient node, then pin.
    Private,
}

impl BatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchType::Broadcast => "broadcast",
            BatchType::Private => "private",
        }
    }
}

impl std::fmt::Display for BatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference from a message to a data item it carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRef {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Reference to an out-of-band blob, by content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobRef {
    pub hash: String,
}

/// A data item: inline JSON value, blob reference, or both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataItem {
    pub id: Uuid,
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob: Option<BlobRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl DataItem {
    pub fn inline(namespace: &str, value: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace: namespace.to_string(),
            value: Some(value),
            blob: None,
            hash: None,
        }
    }

    pub fn blob(namespace: &str, blob_hash: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace: namespace.to_string(),
            value: None,
            blob: Some(BlobRef {
                hash: blob_hash.to_string(),
            }),
            hash: None,
        }
    }

    /// Compute and store the seal hash; the item is immutable afterwards.
    pub fn seal(&mut self) -> Result<()> {
        let blob_hash = self.blob.as_ref().map(|b| b.hash.as_str());
        self.hash = Some(hash::seal_hash(self.value.as_ref(), blob_hash)?);
        Ok(())
    }

    /// Seal hash without mutating; errors if the item has nothing to hash.
    pub fn calc_hash(&self) -> Result<String> {
        let blob_hash = self.blob.as_ref().map(|b| b.hash.as_str());
        hash::seal_hash(self.value.as_ref(), blob_hash)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub namespace: String,
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<DataRef>,
}

impl Message {
    pub fn new(namespace: &str, author: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace: namespace.to_string(),
            author: author.to_string(),
            tag: None,
            cid: None,
            data: Vec::new(),
        }
    }
}

/// One caller's contribution: a message plus the data items it references.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub author: String,
    pub batch_type: BatchType,
    pub namespace: String,
    /// Recipient group for private records; ignored for broadcast.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub message: Message,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<DataItem>,
}

impl Record {
    /// Seal every data item and back-fill the message data refs.
    pub fn seal(&mut self) -> Result<()> {
        for item in &mut self.data {
            item.seal()?;
        }
        self.message.data = self
            .data
            .iter()
            .map(|d| DataRef {
                id: d.id,
                hash: d.hash.clone(),
            })
            .collect();
        Ok(())
    }
}

/// Reference to the transaction grouping a batch's operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRef {
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPayload {
    pub tx: TransactionRef,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub data: Vec<DataItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: Uuid,
    pub author: String,
    pub batch_type: BatchType,
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub created: DateTime<Utc>,
    /// Stamped at the end of each dispatch attempt; re-stamping keeps the
    /// pin input unique per attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
    pub payload: BatchPayload,
    /// Content-store handle, set after publication (broadcast only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl Batch {
    pub fn new(author: &str, batch_type: BatchType, namespace: &str, group: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            author: author.to_string(),
            batch_type,
            namespace: namespace.to_string(),
            group,
            created: Utc::now(),
            completed: None,
            payload: BatchPayload {
                tx: TransactionRef { id: Uuid::new_v4() },
                messages: Vec::new(),
                data: Vec::new(),
            },
            payload_ref: None,
            hash: None,
        }
    }

    /// Number of records in the batch. One record = one message.
    pub fn record_count(&self) -> usize {
        self.payload.messages.len()
    }

    /// Append a record's message and data in insertion order.
    pub fn append(&mut self, record: &Record) {
        self.payload.messages.push(record.message.clone());
        self.payload.data.extend(record.data.iter().cloned());
    }

    /// Remove the last `count` records (used to roll back a failed persist).
    pub fn truncate_records(&mut self, count: usize) {
        for _ in 0..count {
            if let Some(msg) = self.payload.messages.pop() {
                let ids: Vec<Uuid> = msg.data.iter().map(|r| r.id).collect();
                self.payload.data.retain(|d| !ids.contains(&d.id));
            }
        }
    }

    /// Recompute the batch hash over identity, timestamps and payload.
    ///
    /// `completed` participates, so a re-stamped dispatch attempt hashes
    /// differently from the previous one.
    pub fn seal(&mut self) -> Result<()> {
        let input = json!({
            "id": self.id,
            "author": self.author,
            "group": self.group,
            "created": self.created,
            "completed": self.completed,
            "payload": serde_json::to_value(&self.payload)?,
        });
        self.hash = Some(hash::json_hash(&input)?);
        Ok(())
    }

    /// Pin contexts: the sealed hash of every message's data set, in order.
    pub fn contexts(&self) -> Vec<String> {
        self.payload
            .messages
            .iter()
            .flat_map(|m| m.data.iter().filter_map(|r| r.hash.clone()))
            .collect()
    }
}
