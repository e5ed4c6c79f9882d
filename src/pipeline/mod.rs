//! Stream pipeline
//!
//! ```text
//! Host:   CaptureSource ──push──► FrameSink ──► StreamForwarder
//!                                                  │ try_send (depth 2 per viewer)
//!                                                  ▼
//!                                         peer writer tasks ──► TCP
//!
//! Viewer: TCP ──► connection task ──offer──► InboundFrames ──► consumer
//! ```
//!
//! Frames are never retained beyond the hand-off to the next stage.

pub mod capture;
pub mod forwarder;
pub mod frame;

pub use capture::{CaptureFeed, CaptureSource, ChannelCapture, NullCapture};
pub use forwarder::{FrameDispatcher, FrameSink, InboundFrames, StreamForwarder};
pub use frame::{FrameKind, StreamFrame};
