//! Private asset shapes for the off-chain trade protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A locally stored blob, addressed by content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub hash: String,
    /// Local storage path, as understood by the peer-exchange plugin.
    pub payload_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDefinition {
    pub id: Uuid,
    pub author: String,
    pub is_content_private: bool,
    /// JSON schema instances must conform to; absent for file-backed assets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_schema_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetInstance {
    pub id: Uuid,
    pub asset_definition_id: Uuid,
    pub author: String,
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}
