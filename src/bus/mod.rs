//! Event broadcast bus
//!
//! Application events (score updates, cards, match clock, ...) travel from
//! the host to every viewer out-of-band from media frames. Delivery is
//! at-most-once and in order per viewer connection; events published with no
//! session running are dropped.

pub mod consumer;
pub mod event;
pub mod publisher;

pub use consumer::{Callback, ConsumerSlot};
pub use event::Event;
pub use publisher::{EventBus, PublishReport};
