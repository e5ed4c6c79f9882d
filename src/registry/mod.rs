//! Session registry
//!
//! The registry tracks the one session this process may run (host or viewer),
//! its lifecycle phase and its connected peers. It is the only shared mutable
//! state between the per-connection tasks, the capture path and the control
//! façade.
//!
//! # Architecture
//!
//! ```text
//!                         Arc<SessionRegistry>
//!                     ┌──────────────────────────┐
//!                     │ current: Option<Entry {  │
//!                     │   state: SessionState,   │
//!                     │   peers: HashMap<Id,     │
//!                     │     Peer { outbound }>,  │
//!                     │   cancel: Token,         │
//!                     │ }>                       │
//!                     └────────────┬─────────────┘
//!                                  │
//!         ┌────────────────────────┼────────────────────────┐
//!         │                        │                        │
//!         ▼                        ▼                        ▼
//!   [Control façade]        [Capture / Bus]          [Peer tasks]
//!   begin / stop            fan_out(try_send)        add / remove / touch
//! ```
//!
//! Fan-out never blocks: each peer has bounded outbound queues and a full
//! queue drops the item for that peer only.

pub mod entry;
pub mod error;
pub mod store;

pub use entry::{FanOut, SessionEntry, SessionSnapshot, StopOutcome, Transition};
pub use error::RegistryError;
pub use store::SessionRegistry;
