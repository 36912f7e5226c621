//! Off-chain private asset trade
//!
//! A two-phase request/response protocol over the app-to-app channel, with
//! a human-gated authorization hop on the author side and an optional
//! out-of-band document transfer for file-backed assets.

pub mod coordinator;
pub mod messages;
pub mod pending;

pub use coordinator::TradeCoordinator;
pub use messages::{TradeMessage, TradeRequester};
pub use pending::{PendingDeliveries, PendingPrivateDelivery};
