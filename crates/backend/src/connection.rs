//! Backend connection contract
//!
//! The transport/codec engine behind roomlink is a black box. This
//! module pins down the only two things the core is allowed to know
//! about it: imperative entry points returning a [`BackendResult`],
//! and a small set of registerable event handlers that may fire on
//! unspecified background threads until the connection is torn down.
//!
//! Handlers are typed closures registered per connection, replacing
//! the untyped `void* user` + static-thunk pattern of a raw C
//! boundary. Payload references handed to a handler are only valid
//! for the duration of the call; anything kept past that point must
//! be copied inside the handler.

use crate::result::BackendResult;
use crate::types::{
    AudioPublishOptions, AudioStats, BackendConnectionState, DataStats, Reliability, Role,
    SendLimits, TrackConfig,
};

/// Identity of the remote source of an audio frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSource {
    /// Remote participant name.
    pub participant: String,
    /// Name of the track the frame arrived on.
    pub track: String,
}

/// One connection-state transition as reported by the backend.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    /// New state.
    pub state: BackendConnectionState,
    /// Error/disconnect reason (0 if normal).
    pub reason_code: i32,
    /// Optional human-readable detail.
    pub message: Option<String>,
}

/// One inbound data message. Borrowed; copy before the handler returns.
#[derive(Debug, Clone, Copy)]
pub struct DataEvent<'a> {
    /// Channel label, if the backend knows it.
    pub label: Option<&'a str>,
    /// Delivery class the message arrived on.
    pub reliability: Reliability,
    /// Payload bytes, valid only for the duration of the call.
    pub bytes: &'a [u8],
}

/// One inbound audio frame. Borrowed; copy before the handler returns.
#[derive(Debug, Clone, Copy)]
pub struct AudioEvent<'a> {
    /// Interleaved PCM samples, valid only for the duration of the call.
    pub pcm: &'a [i16],
    /// Frames per channel in `pcm`.
    pub frames_per_channel: usize,
    /// Channel count.
    pub channels: i32,
    /// Sample rate in Hz.
    pub sample_rate: i32,
    /// Remote source identity, when the backend provides it.
    pub source: Option<&'a AudioSource>,
}

/// Handler for connection-state transitions.
pub type ConnectionHandler = Box<dyn Fn(&ConnectionEvent) + Send + Sync>;
/// Handler for inbound data messages.
pub type DataHandler = Box<dyn Fn(&DataEvent<'_>) + Send + Sync>;
/// Handler for inbound audio frames.
pub type AudioHandler = Box<dyn Fn(&AudioEvent<'_>) + Send + Sync>;

/// A dedicated publisher audio track.
///
/// Dropping the track stops publishing it and releases the backend
/// sub-handle.
pub trait BackendTrack: Send + Sync {
    /// Publish one PCM buffer to this track. Format is fixed by the
    /// [`TrackConfig`] the track was created with.
    fn publish_pcm_i16(&self, pcm: &[i16], frames_per_channel: usize) -> BackendResult;
}

/// One logical connection to the remote media/data service.
///
/// # Threading
///
/// All methods are callable from any thread. Registered handlers may
/// fire on arbitrary backend threads, concurrently with each other
/// and with method calls. After [`disconnect`](Self::disconnect)
/// returns, no further handler invocation occurs for this connection.
pub trait BackendConnection: Send + Sync {
    /// Connect, blocking until the backend reports success or failure.
    fn connect(&self, url: &str, token: &str, role: Role) -> BackendResult;

    /// Start connecting and return immediately. The outcome is
    /// delivered through the connection handler.
    fn connect_async(&self, url: &str, token: &str, role: Role) -> BackendResult;

    /// Disconnect. Blocks until the backend round-trip completes and
    /// all in-flight handler invocations have returned. Idempotent:
    /// disconnecting an already-disconnected connection succeeds.
    fn disconnect(&self) -> BackendResult;

    /// True once the connection is established and accepting
    /// publish/send operations.
    fn is_ready(&self) -> bool;

    /// Publish one interleaved PCM buffer on the default audio path.
    fn publish_pcm_i16(
        &self,
        pcm: &[i16],
        frames_per_channel: usize,
        channels: i32,
        sample_rate: i32,
    ) -> BackendResult;

    /// Create a dedicated publisher audio track.
    ///
    /// On success the second element is `Some`; on failure it is
    /// `None` and the result carries the reason.
    fn create_track(&self, config: &TrackConfig) -> (BackendResult, Option<Box<dyn BackendTrack>>);

    /// Send a data payload on the default channel for `reliability`.
    fn send_data(&self, bytes: &[u8], reliability: Reliability) -> BackendResult;

    /// Send with explicit ordering flag and channel label.
    fn send_data_ex(
        &self,
        bytes: &[u8],
        reliability: Reliability,
        ordered: bool,
        label: Option<&str>,
    ) -> BackendResult;

    /// Payload size ceilings this backend enforces.
    fn send_limits(&self) -> SendLimits {
        SendLimits::default()
    }

    /// Apply encoder tuning to the publish path. Must be called
    /// before the first publish to take effect; backends without an
    /// adjustable encoder accept and ignore it.
    fn set_audio_publish_options(&self, _options: AudioPublishOptions) -> BackendResult {
        BackendResult::ok()
    }

    /// Replace the connection-state handler. At most one is active;
    /// the last registration wins.
    fn set_connection_handler(&self, handler: Option<ConnectionHandler>);

    /// Replace the inbound-data handler. Last registration wins.
    fn set_data_handler(&self, handler: Option<DataHandler>);

    /// Replace the inbound-audio handler. Last registration wins.
    fn set_audio_handler(&self, handler: Option<AudioHandler>);

    /// Refresh the auth token at runtime. Backends that cannot do
    /// this return code 501; the fallback is disconnect + reconnect.
    fn refresh_token(&self, _token: &str) -> BackendResult {
        BackendResult::err(
            crate::result::codes::UNSUPPORTED,
            "token refresh not supported; use disconnect + reconnect",
        )
    }

    /// Switch role at runtime. Backends that cannot do this return
    /// code 501; the fallback is disconnect + reconnect.
    fn set_role(&self, _role: Role, _auto_subscribe: bool) -> BackendResult {
        BackendResult::err(
            crate::result::codes::UNSUPPORTED,
            "dynamic role switching not supported; use disconnect + reconnect with the new role",
        )
    }

    /// Cumulative data-send counters.
    fn data_stats(&self) -> DataStats {
        DataStats::default()
    }

    /// Audio pipeline counters.
    fn audio_stats(&self) -> AudioStats {
        AudioStats::default()
    }
}
