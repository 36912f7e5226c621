//! Pending private deliveries
//!
//! A push can arrive before the matching asset-instance row has been
//! observed locally. The content parks here, keyed by instance id, and is
//! drained when the row appears. In-memory only: a restart between push and
//! observation loses the parked content, and the author re-pushes.

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PendingPrivateDelivery {
    pub content: Option<Value>,
    pub filename: Option<String>,
    /// Channel destination the push came from; validated against the
    /// author's member row at drain time.
    pub from_destination: String,
}

#[derive(Default)]
pub struct PendingDeliveries {
    deliveries: DashMap<Uuid, PendingPrivateDelivery>,
}

impl PendingDeliveries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a delivery; a second push for the same instance replaces the
    /// first.
    pub fn park(&self, asset_instance_id: Uuid, delivery: PendingPrivateDelivery) {
        debug!(instance = %asset_instance_id, "Parking private delivery until instance appears");
        self.deliveries.insert(asset_instance_id, delivery);
    }

    /// Remove and return the delivery parked for an instance, if any.
    pub fn take(&self, asset_instance_id: Uuid) -> Option<PendingPrivateDelivery> {
        self.deliveries
            .remove(&asset_instance_id)
            .map(|(_, delivery)| delivery)
    }

    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }
}
