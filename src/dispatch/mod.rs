//! Dispatch fan-out: turning a sealed batch into transport work, with an
//! Operation row for every asynchronous step.

pub mod broadcast;
pub mod pin;
pub mod private;

pub use broadcast::BroadcastDispatcher;
pub use pin::{BatchPinSubmitter, PinSubmitter};
pub use private::PrivateDispatcher;
