//! Transport layer
//!
//! ```text
//!   Viewer                                   Host
//!   ──────                                   ────
//!   discover() ── UDP Probe (broadcast) ──► DiscoveryResponder
//!              ◄── UDP Announce (port) ────
//!   ViewerConnection::connect ── TCP ─────► HostListener
//!              ── Hello ─────────────────►  admission check
//!              ◄── Accept / Reject ───────
//!              ◄── Event / Frame ─────────  per-viewer writer task
//!              ── Heartbeat ─────────────►  per-viewer reader task
//!              ◄──────── Bye ───────────►
//! ```

pub mod config;
pub mod connection;
pub mod connector;
pub mod discovery;
pub mod listener;

pub use config::TransportConfig;
pub use connection::{PacketReader, PacketWriter};
pub use connector::{ViewerConnection, ViewerSinks};
pub use discovery::{discover, DiscoveryResponder};
pub use listener::HostListener;
