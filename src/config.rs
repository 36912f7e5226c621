//! Node configuration

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    pub identity: IdentityConfig,
    #[serde(default)]
    pub batching: BatchOptions,
    #[serde(default)]
    pub trade: TradeConfig,
    #[serde(default)]
    pub events: EventStreamConfig,
}

/// This node's identity within the federation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IdentityConfig {
    /// Author identity batches are signed under.
    pub org_identity: String,

    /// On-chain signing address.
    pub address: String,

    /// Identity within the federation (asset trail instance).
    pub asset_trail_instance_id: String,

    /// App-channel destination of the operator client that answers
    /// trade authorization requests.
    pub client_destination: String,

    /// Document-exchange destination private files are delivered to.
    pub doc_exchange_destination: String,
}

/// Assembly and dispatch tuning for one batch processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Maximum time a record may wait in the assembly queue.
    #[serde(default = "default_add_timeout")]
    pub add_timeout_ms: u64,

    /// Seal the batch when no new record arrives within this window.
    #[serde(default = "default_arrival_timeout")]
    pub batch_timeout_arrival_ms: u64,

    /// Hard cap on how long the first record in a batch may wait.
    #[serde(default = "default_overall_timeout")]
    pub batch_timeout_overall_ms: u64,

    /// Seal immediately at this record count.
    #[serde(default = "default_max_records")]
    pub batch_max_records: usize,

    #[serde(default = "default_retry_initial")]
    pub retry_initial_delay_ms: u64,

    #[serde(default = "default_retry_max")]
    pub retry_max_delay_ms: u64,

    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            add_timeout_ms: default_add_timeout(),
            batch_timeout_arrival_ms: default_arrival_timeout(),
            batch_timeout_overall_ms: default_overall_timeout(),
            batch_max_records: default_max_records(),
            retry_initial_delay_ms: default_retry_initial(),
            retry_max_delay_ms: default_retry_max(),
            retry_multiplier: default_retry_multiplier(),
        }
    }
}

/// Timeouts for the private asset trade protocol, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeConfig {
    /// Wait for the peer trade response.
    #[serde(default = "default_trade_timeout")]
    pub trade_timeout_secs: u64,

    /// Wait for the human-in-the-loop authorization answer.
    #[serde(default = "default_authorization_timeout")]
    pub authorization_timeout_secs: u64,

    /// Wait for the out-of-band document transfer to land.
    #[serde(default = "default_document_timeout")]
    pub document_transfer_timeout_secs: u64,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            trade_timeout_secs: default_trade_timeout(),
            authorization_timeout_secs: default_authorization_timeout(),
            document_transfer_timeout_secs: default_document_timeout(),
        }
    }
}

/// Reconnection tuning for plugin event streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventStreamConfig {
    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_delay_ms: u64,

    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_delay_ms: u64,
}

impl Default for EventStreamConfig {
    fn default() -> Self {
        Self {
            reconnect_initial_delay_ms: default_reconnect_initial(),
            reconnect_max_delay_ms: default_reconnect_max(),
        }
    }
}

// Defaults
fn default_add_timeout() -> u64 { 30_000 }
fn default_arrival_timeout() -> u64 { 500 }
fn default_overall_timeout() -> u64 { 30_000 }
fn default_max_records() -> usize { 500 }
fn default_retry_initial() -> u64 { 250 }
fn default_retry_max() -> u64 { 30_000 }
fn default_retry_multiplier() -> f64 { 2.0 }
fn default_trade_timeout() -> u64 { 30 }
fn default_authorization_timeout() -> u64 { 300 }
fn default_document_timeout() -> u64 { 300 }
fn default_reconnect_initial() -> u64 { 500 }
fn default_reconnect_max() -> u64 { 30_000 }
