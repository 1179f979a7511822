//! Shared types for the backend boundary

use serde::{Deserialize, Serialize};

/// Delivery mode for a data send.
///
/// Each class has a distinct payload size ceiling; see [`SendLimits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reliability {
    /// Ordered, guaranteed delivery. Larger size ceiling.
    Reliable,
    /// Best-effort, may be dropped. Small size ceiling, low latency.
    Lossy,
}

/// Role requested at connect time.
///
/// Determines which media paths the backend engages; a
/// `Publisher`-only connection never delivers inbound audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Let the backend pick based on server hints.
    Auto,
    /// Publish only; the subscribe path is never engaged.
    Publisher,
    /// Subscribe only.
    Subscriber,
    /// Publish and subscribe.
    Both,
}

impl Default for Role {
    fn default() -> Self {
        Role::Both
    }
}

/// Connection state as the backend reports it.
///
/// The session layers an `Idle` state on top of these; the backend
/// itself only speaks once a connect has been issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendConnectionState {
    /// Handshake in progress.
    Connecting,
    /// Connected and ready for publish/send.
    Connected,
    /// Transient backend-initiated reconnect; advisory only.
    Reconnecting,
    /// Clean close (backend- or host-initiated).
    Disconnected,
    /// Unrecoverable failure; terminal until a new connect.
    Failed,
}

/// Encoder tuning applied to the publish path. Set once per
/// connection, before the first publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioPublishOptions {
    /// Target encoder bitrate in bits per second.
    pub bitrate_bps: u32,
    /// Enable discontinuous transmission during silence.
    pub dtx: bool,
    /// Publish stereo instead of mono.
    pub stereo: bool,
}

impl Default for AudioPublishOptions {
    fn default() -> Self {
        Self {
            bitrate_bps: 32_000,
            dtx: false,
            stereo: false,
        }
    }
}

/// Configuration for a dedicated publisher audio track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackConfig {
    /// Track label as published to remote peers.
    pub track_name: String,
    /// Sample rate in Hz.
    pub sample_rate: i32,
    /// Channel count (interleaved).
    pub channels: i32,
    /// Desired ring buffer depth in milliseconds (0 = backend default).
    pub buffer_ms: i32,
}

/// Payload size ceilings per reliability class, in bytes.
///
/// These are backend-defined; the defaults mirror the documented
/// values but a connection reports its own via
/// [`crate::BackendConnection::send_limits`], and callers should
/// validate against the reported values rather than assuming these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendLimits {
    /// Maximum lossy payload size.
    pub lossy_max: usize,
    /// Maximum reliable payload size.
    pub reliable_max: usize,
}

impl Default for SendLimits {
    fn default() -> Self {
        Self {
            lossy_max: 1300,
            reliable_max: 15 * 1024,
        }
    }
}

impl SendLimits {
    /// Ceiling for the given reliability class.
    pub fn max_for(&self, reliability: Reliability) -> usize {
        match reliability {
            Reliability::Reliable => self.reliable_max,
            Reliability::Lossy => self.lossy_max,
        }
    }
}

/// Cumulative data-send counters, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataStats {
    /// Total bytes accepted on the reliable class.
    pub reliable_sent_bytes: i64,
    /// Reliable sends rejected or dropped.
    pub reliable_dropped: i64,
    /// Total bytes accepted on the lossy class.
    pub lossy_sent_bytes: i64,
    /// Lossy sends rejected or dropped.
    pub lossy_dropped: i64,
}

/// Audio pipeline counters, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioStats {
    /// Negotiated sample rate (0 before first publish).
    pub sample_rate: i32,
    /// Negotiated channel count.
    pub channels: i32,
    /// Frames accepted for publish.
    pub published_frames: i64,
    /// Publishes rejected.
    pub publish_errors: i64,
}
