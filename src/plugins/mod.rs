//! Plugin contracts
//!
//! Every out-of-process collaborator sits behind one of these traits: the
//! public content store, the blockchain driver, the peer exchange, the
//! app-to-app message channel, and the token interface. Implementations are
//! injected at wiring time; the crate ships none (the drivers live in their
//! own processes).
//!
//! Inbound fan-out (app-channel traffic, document-transfer completions) is
//! exposed as `tokio::broadcast` subscriptions; listeners filter for the
//! traffic they care about and drop the receiver when done.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::Result;

/// On-chain marker committing to a batch's content and ordering.
#[derive(Debug, Clone)]
pub struct BatchPin {
    pub batch_id: Uuid,
    /// Sealed batch hash for this dispatch attempt.
    pub batch_hash: String,
    /// Ordered per-message context hashes.
    pub contexts: Vec<String>,
}

/// Opaque blob upload to the public content store.
#[async_trait]
pub trait ContentStore: Send + Sync {
    fn name(&self) -> &str;

    /// Publish a payload; returns the store's tracking id for the object.
    async fn publish_data(&self, payload: Vec<u8>) -> Result<String>;
}

#[async_trait]
pub trait Blockchain: Send + Sync {
    fn name(&self) -> &str;

    fn verify_identity_syntax(&self, identity: &str) -> Result<()>;

    /// Submit a batch pin; returns the protocol transaction id.
    async fn submit_batch_pin(&self, identity: &str, pin: &BatchPin) -> Result<String>;
}

/// Events a blockchain driver raises back into the node.
#[async_trait]
pub trait BlockchainCallbacks: Send + Sync {
    /// A pin this node (or a peer) submitted has been sequenced on chain.
    async fn batch_pin_complete(
        &self,
        batch: BatchPin,
        signing_identity: String,
        protocol_tx_id: String,
        additional_info: Value,
    ) -> Result<()>;
}

/// A completed inbound document transfer on the peer exchange.
#[derive(Debug, Clone)]
pub struct TransferEvent {
    pub from: String,
    pub path: String,
}

/// Point-to-point transport between federated nodes.
#[async_trait]
pub trait PeerExchange: Send + Sync {
    fn name(&self) -> &str;

    /// Send an envelope to a peer; returns a tracking id.
    async fn send_message(&self, peer: &str, payload: Vec<u8>) -> Result<String>;

    /// Transfer a locally stored blob to a peer; returns a tracking id.
    async fn transfer_blob(&self, peer: &str, path: &str) -> Result<String>;

    /// Push a document to another member's document-exchange destination.
    async fn transfer_document(&self, destination: &str, path: &str) -> Result<()>;

    /// This node's own transport endpoint, as registered with peers.
    async fn get_endpoint_info(&self) -> Result<Value>;

    /// Stream of completed inbound transfers.
    fn subscribe_transfers(&self) -> broadcast::Receiver<TransferEvent>;
}

/// A message observed on the app-to-app channel.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub from: String,
    pub body: Value,
}

/// Best-effort application-layer message channel between members.
#[async_trait]
pub trait AppChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn dispatch_message(&self, destination: &str, body: Value) -> Result<()>;

    /// Stream of inbound channel traffic.
    fn subscribe(&self) -> broadcast::Receiver<ChannelMessage>;
}

#[derive(Debug, Clone)]
pub struct TokenPool {
    pub pool_type: String,
    pub tx_id: Uuid,
    pub config: Value,
}

#[async_trait]
pub trait TokenPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn create_token_pool(
        &self,
        operation_id: Uuid,
        identity: &str,
        pool: &TokenPool,
    ) -> Result<()>;
}
