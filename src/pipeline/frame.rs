//! Stream frame types
//!
//! This module defines the media unit that flows from capture on the host to
//! the rendering consumer on each viewer.

use bytes::Bytes;

/// Type of stream frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Video frame
    Video,
    /// Audio frame
    Audio,
    /// Stream metadata (resolution, codec parameters, ...)
    Metadata,
}

impl FrameKind {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(FrameKind::Video),
            2 => Some(FrameKind::Audio),
            3 => Some(FrameKind::Metadata),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            FrameKind::Video => 1,
            FrameKind::Audio => 2,
            FrameKind::Metadata => 3,
        }
    }
}

/// A timestamped media unit
///
/// This is designed to be cheap to clone due to `Bytes` reference counting,
/// so fanning one captured frame out to many viewers shares one allocation.
/// The payload is opaque: encoding is the capture source's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    /// Type of frame
    pub kind: FrameKind,
    /// Timestamp in milliseconds, source-defined origin
    pub timestamp: u32,
    /// Frame data (zero-copy via reference counting)
    pub data: Bytes,
    /// Whether this is a keyframe (video only)
    pub is_keyframe: bool,
}

impl StreamFrame {
    /// Create a video frame
    pub fn video(timestamp: u32, data: Bytes, is_keyframe: bool) -> Self {
        Self {
            kind: FrameKind::Video,
            timestamp,
            data,
            is_keyframe,
        }
    }

    /// Create an audio frame
    pub fn audio(timestamp: u32, data: Bytes) -> Self {
        Self {
            kind: FrameKind::Audio,
            timestamp,
            data,
            is_keyframe: false,
        }
    }

    /// Create a metadata frame
    pub fn metadata(data: Bytes) -> Self {
        Self {
            kind: FrameKind::Metadata,
            timestamp: 0,
            data,
            is_keyframe: false,
        }
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
