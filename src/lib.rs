//! LAN live-session coordinator
//!
//! A host captures a live match and serves it to viewers on the same local
//! network; viewers discover the host by live match id, join, and receive
//! media frames and application events (score updates, cards, ...).
//!
//! ```no_run
//! use locallive_rs::{ControllerConfig, LiveController};
//!
//! # async fn example() -> locallive_rs::Result<()> {
//! let host = LiveController::new(ControllerConfig::default());
//! host.start_host("L1", "M1", "LM1").await?;
//!
//! let viewer = LiveController::new(ControllerConfig::default());
//! viewer.on_event(|event| println!("{:?}", event.event_type()));
//! viewer.join_viewer("LM1").await?;
//! # Ok(())
//! # }
//! ```
//!
//! One session (host or viewer) runs per process; see [`registry`] for the
//! lifecycle and [`transport`] for the wire protocol.

pub mod bus;
pub mod control;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod stats;
pub mod transport;

pub use bus::Event;
pub use control::{Command, ControlEvent, ControllerConfig, LiveController, Response};
pub use error::{Error, Result};
pub use lifecycle::{ForegroundNotice, Platform};
pub use pipeline::{CaptureSource, StreamFrame};
pub use session::{MatchInfo, Role, SessionPhase};
pub use transport::TransportConfig;
