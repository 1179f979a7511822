//! Scripted in-process backend
//!
//! A backend implementation with no transport behind it, used by
//! tests and by hosts that want to exercise the session layer without
//! network access. Beyond the bare stub behavior (connect toggles
//! readiness, everything else succeeds) it is scriptable: tests can
//! inject failures, emit inbound events from threads of their own
//! choosing, and read back counters and recorded calls.
//!
//! The threading contract matches the real boundary: emitted events
//! invoke the registered handlers synchronously on the emitting
//! thread, and `disconnect` blocks until every in-flight handler
//! invocation has returned, after which no handler fires again until
//! a new connect.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::connection::{
    AudioEvent, AudioHandler, AudioSource, BackendConnection, BackendTrack, ConnectionEvent,
    ConnectionHandler, DataEvent, DataHandler,
};
use crate::result::{codes, BackendResult};
use crate::types::{
    AudioPublishOptions, AudioStats, BackendConnectionState, DataStats, Reliability, Role,
    SendLimits, TrackConfig,
};

/// One data send recorded by the scripted backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSend {
    /// Payload bytes as handed to the backend.
    pub bytes: Vec<u8>,
    /// Requested delivery class.
    pub reliability: Reliability,
    /// Ordering flag (`true` for the basic send path).
    pub ordered: bool,
    /// Channel label, when the extended path was used.
    pub label: Option<String>,
}

/// One audio publish recorded by the scripted backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPublish {
    /// Frames per channel in the published buffer.
    pub frames_per_channel: usize,
    /// Channel count.
    pub channels: i32,
    /// Sample rate in Hz.
    pub sample_rate: i32,
    /// Track name for dedicated-track publishes, `None` for the
    /// default path.
    pub track: Option<String>,
}

#[derive(Default)]
struct Handlers {
    connection: Option<ConnectionHandler>,
    data: Option<DataHandler>,
    audio: Option<AudioHandler>,
}

struct GateState {
    closed: bool,
    in_flight: usize,
}

/// Tracks handler invocations in flight so `disconnect` can drain
/// them before returning.
struct CallbackGate {
    state: Mutex<GateState>,
    drained: Condvar,
}

impl CallbackGate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                closed: true,
                in_flight: 0,
            }),
            drained: Condvar::new(),
        }
    }

    /// Enter the gate for one handler invocation. Returns `None` if
    /// the gate is closed (event must be dropped).
    fn enter(self: &Arc<Self>) -> Option<GateGuard> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.in_flight += 1;
        Some(GateGuard {
            gate: Arc::clone(self),
        })
    }

    fn open(&self) {
        self.state.lock().closed = false;
    }

    /// Close the gate and block until in-flight invocations return.
    fn close_and_drain(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        while state.in_flight > 0 {
            self.drained.wait(&mut state);
        }
    }
}

struct GateGuard {
    gate: Arc<CallbackGate>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        state.in_flight -= 1;
        if state.in_flight == 0 {
            self.gate.drained.notify_all();
        }
    }
}

struct ScriptedState {
    connected: bool,
    role: Role,
    limits: SendLimits,
    connect_delay: Duration,
    fail_next_connect: Option<(i32, String)>,
    fail_next_send: Option<(i32, String)>,
    publish_options: Option<AudioPublishOptions>,
    sends: Vec<RecordedSend>,
    publishes: Vec<RecordedPublish>,
    data_stats: DataStats,
    audio_stats: AudioStats,
}

struct Inner {
    state: Mutex<ScriptedState>,
    handlers: Mutex<Handlers>,
    gate: Arc<CallbackGate>,
}

/// Scriptable in-process backend. Clone-cheap via internal `Arc`.
#[derive(Clone)]
pub struct ScriptedBackend {
    inner: Arc<Inner>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    /// Create a scripted backend with default send limits and no
    /// async connect delay.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ScriptedState {
                    connected: false,
                    role: Role::Both,
                    limits: SendLimits::default(),
                    connect_delay: Duration::ZERO,
                    fail_next_connect: None,
                    fail_next_send: None,
                    publish_options: None,
                    sends: Vec::new(),
                    publishes: Vec::new(),
                    data_stats: DataStats::default(),
                    audio_stats: AudioStats::default(),
                }),
                handlers: Mutex::new(Handlers::default()),
                gate: Arc::new(CallbackGate::new()),
            }),
        }
    }

    /// Override the send limits this backend reports and enforces.
    pub fn with_limits(self, limits: SendLimits) -> Self {
        self.inner.state.lock().limits = limits;
        self
    }

    /// Delay applied between `connect_async` returning and the
    /// `Connected` event firing.
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.inner.state.lock().connect_delay = delay;
        self
    }

    /// Fail the next connect attempt with the given code/message.
    pub fn fail_next_connect(&self, code: i32, message: impl Into<String>) {
        self.inner.state.lock().fail_next_connect = Some((code, message.into()));
    }

    /// Fail the next send with the given code/message.
    pub fn fail_next_send(&self, code: i32, message: impl Into<String>) {
        self.inner.state.lock().fail_next_send = Some((code, message.into()));
    }

    /// Emit a connection event to the registered handler, as if from
    /// a backend thread. Returns `false` if the event was suppressed
    /// (gate closed or no handler).
    pub fn emit_connection(
        &self,
        state: BackendConnectionState,
        reason_code: i32,
        message: Option<&str>,
    ) -> bool {
        let _guard = match self.inner.gate.enter() {
            Some(g) => g,
            None => return false,
        };
        // Keep internal readiness in step with what we report.
        {
            let mut s = self.inner.state.lock();
            match state {
                BackendConnectionState::Connected => s.connected = true,
                BackendConnectionState::Disconnected | BackendConnectionState::Failed => {
                    s.connected = false
                }
                _ => {}
            }
        }
        let handlers = self.inner.handlers.lock();
        if let Some(cb) = handlers.connection.as_ref() {
            cb(&ConnectionEvent {
                state,
                reason_code,
                message: message.map(str::to_owned),
            });
            true
        } else {
            false
        }
    }

    /// Emit an inbound data message. Returns `false` if suppressed.
    pub fn emit_data(
        &self,
        bytes: &[u8],
        reliability: Reliability,
        label: Option<&str>,
    ) -> bool {
        let _guard = match self.inner.gate.enter() {
            Some(g) => g,
            None => return false,
        };
        let handlers = self.inner.handlers.lock();
        if let Some(cb) = handlers.data.as_ref() {
            cb(&DataEvent {
                label,
                reliability,
                bytes,
            });
            true
        } else {
            false
        }
    }

    /// Emit an inbound audio frame. Suppressed (returns `false`) when
    /// the connection role never engaged the subscribe path.
    pub fn emit_audio(
        &self,
        pcm: &[i16],
        frames_per_channel: usize,
        channels: i32,
        sample_rate: i32,
        source: Option<&AudioSource>,
    ) -> bool {
        if self.inner.state.lock().role == Role::Publisher {
            trace!("suppressing inbound audio: publisher-only role");
            return false;
        }
        let _guard = match self.inner.gate.enter() {
            Some(g) => g,
            None => return false,
        };
        let handlers = self.inner.handlers.lock();
        if let Some(cb) = handlers.audio.as_ref() {
            cb(&AudioEvent {
                pcm,
                frames_per_channel,
                channels,
                sample_rate,
                source,
            });
            true
        } else {
            false
        }
    }

    /// Encoder options last applied via `set_audio_publish_options`.
    pub fn recorded_publish_options(&self) -> Option<AudioPublishOptions> {
        self.inner.state.lock().publish_options
    }

    /// Data sends recorded so far, oldest first.
    pub fn recorded_sends(&self) -> Vec<RecordedSend> {
        self.inner.state.lock().sends.clone()
    }

    /// Audio publishes recorded so far, oldest first.
    pub fn recorded_publishes(&self) -> Vec<RecordedPublish> {
        self.inner.state.lock().publishes.clone()
    }

    fn do_connect(&self, role: Role) -> BackendResult {
        let mut state = self.inner.state.lock();
        if let Some((code, msg)) = state.fail_next_connect.take() {
            return BackendResult::err(code, msg);
        }
        if state.connected {
            return BackendResult::err(codes::ALREADY_CONNECTED, "already connected");
        }
        state.connected = true;
        state.role = role;
        drop(state);
        self.inner.gate.open();
        BackendResult::ok()
    }

    fn do_send(
        &self,
        bytes: &[u8],
        reliability: Reliability,
        ordered: bool,
        label: Option<&str>,
    ) -> BackendResult {
        let mut state = self.inner.state.lock();
        if let Some((code, msg)) = state.fail_next_send.take() {
            match reliability {
                Reliability::Reliable => state.data_stats.reliable_dropped += 1,
                Reliability::Lossy => state.data_stats.lossy_dropped += 1,
            }
            return BackendResult::err(code, msg);
        }
        if !state.connected {
            return BackendResult::err(codes::SEND_REJECTED, "not connected");
        }
        let max = state.limits.max_for(reliability);
        if bytes.len() > max {
            let (code, class) = match reliability {
                Reliability::Lossy => {
                    state.data_stats.lossy_dropped += 1;
                    (codes::LOSSY_TOO_LARGE, "lossy")
                }
                Reliability::Reliable => {
                    state.data_stats.reliable_dropped += 1;
                    (codes::RELIABLE_TOO_LARGE, "reliable")
                }
            };
            return BackendResult::err(
                code,
                format!("{} data size {} exceeds limit {}", class, bytes.len(), max),
            );
        }
        match reliability {
            Reliability::Reliable => state.data_stats.reliable_sent_bytes += bytes.len() as i64,
            Reliability::Lossy => state.data_stats.lossy_sent_bytes += bytes.len() as i64,
        }
        state.sends.push(RecordedSend {
            bytes: bytes.to_vec(),
            reliability,
            ordered,
            label: label.map(str::to_owned),
        });
        BackendResult::ok()
    }
}

impl BackendConnection for ScriptedBackend {
    fn connect(&self, url: &str, _token: &str, role: Role) -> BackendResult {
        debug!(url, ?role, "scripted connect");
        self.do_connect(role)
    }

    fn connect_async(&self, url: &str, _token: &str, role: Role) -> BackendResult {
        debug!(url, ?role, "scripted connect_async");
        let (delay, already) = {
            let state = self.inner.state.lock();
            (state.connect_delay, state.connected)
        };
        if already {
            return BackendResult::err(codes::ALREADY_CONNECTED, "already connected");
        }
        // A scripted connect failure is still delivered asynchronously,
        // through the Failed event below.
        self.inner.gate.open();
        let this = self.clone();
        std::thread::spawn(move || {
            this.emit_connection(BackendConnectionState::Connecting, 0, None);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            let failure = this.inner.state.lock().fail_next_connect.take();
            match failure {
                Some((code, msg)) => {
                    this.emit_connection(BackendConnectionState::Failed, code, Some(&msg));
                }
                None => {
                    this.inner.state.lock().role = role;
                    this.emit_connection(BackendConnectionState::Connected, 0, None);
                }
            }
        });
        BackendResult::ok()
    }

    fn disconnect(&self) -> BackendResult {
        let was_connected = {
            let mut state = self.inner.state.lock();
            let was = state.connected;
            state.connected = false;
            was
        };
        // Drop in-flight callbacks before returning, whether or not
        // we were connected; a half-open async connect may still be
        // emitting.
        self.inner.gate.close_and_drain();
        if was_connected {
            debug!("scripted disconnect");
        }
        BackendResult::ok()
    }

    fn is_ready(&self) -> bool {
        self.inner.state.lock().connected
    }

    fn publish_pcm_i16(
        &self,
        pcm: &[i16],
        frames_per_channel: usize,
        channels: i32,
        sample_rate: i32,
    ) -> BackendResult {
        if channels <= 0 || sample_rate <= 0 || pcm.len() < frames_per_channel * channels as usize {
            return BackendResult::err(codes::INTERNAL, "bad publish params");
        }
        let mut state = self.inner.state.lock();
        if !state.connected {
            state.audio_stats.publish_errors += 1;
            return BackendResult::err(codes::PUBLISH_NOT_CONNECTED, "not connected");
        }
        state.audio_stats.sample_rate = sample_rate;
        state.audio_stats.channels = channels;
        state.audio_stats.published_frames += frames_per_channel as i64;
        state.publishes.push(RecordedPublish {
            frames_per_channel,
            channels,
            sample_rate,
            track: None,
        });
        BackendResult::ok()
    }

    fn create_track(&self, config: &TrackConfig) -> (BackendResult, Option<Box<dyn BackendTrack>>) {
        if config.sample_rate <= 0 || config.channels <= 0 {
            return (
                BackendResult::err(codes::INTERNAL, "invalid audio track parameters"),
                None,
            );
        }
        if !self.inner.state.lock().connected {
            return (
                BackendResult::err(codes::PUBLISH_NOT_CONNECTED, "not connected"),
                None,
            );
        }
        let track = ScriptedTrack {
            inner: Arc::clone(&self.inner),
            config: config.clone(),
        };
        (BackendResult::ok(), Some(Box::new(track)))
    }

    fn send_data(&self, bytes: &[u8], reliability: Reliability) -> BackendResult {
        self.do_send(bytes, reliability, true, None)
    }

    fn send_data_ex(
        &self,
        bytes: &[u8],
        reliability: Reliability,
        ordered: bool,
        label: Option<&str>,
    ) -> BackendResult {
        self.do_send(bytes, reliability, ordered, label)
    }

    fn send_limits(&self) -> SendLimits {
        self.inner.state.lock().limits
    }

    fn set_audio_publish_options(&self, options: AudioPublishOptions) -> BackendResult {
        debug!(
            bitrate_bps = options.bitrate_bps,
            dtx = options.dtx,
            stereo = options.stereo,
            "scripted publish options"
        );
        self.inner.state.lock().publish_options = Some(options);
        BackendResult::ok()
    }

    fn set_connection_handler(&self, handler: Option<ConnectionHandler>) {
        self.inner.handlers.lock().connection = handler;
    }

    fn set_data_handler(&self, handler: Option<DataHandler>) {
        self.inner.handlers.lock().data = handler;
    }

    fn set_audio_handler(&self, handler: Option<AudioHandler>) {
        self.inner.handlers.lock().audio = handler;
    }

    fn data_stats(&self) -> DataStats {
        self.inner.state.lock().data_stats
    }

    fn audio_stats(&self) -> AudioStats {
        self.inner.state.lock().audio_stats
    }
}

struct ScriptedTrack {
    inner: Arc<Inner>,
    config: TrackConfig,
}

impl BackendTrack for ScriptedTrack {
    fn publish_pcm_i16(&self, pcm: &[i16], frames_per_channel: usize) -> BackendResult {
        if pcm.len() < frames_per_channel * self.config.channels as usize {
            return BackendResult::err(codes::INTERNAL, "bad publish params");
        }
        let mut state = self.inner.state.lock();
        if !state.connected {
            state.audio_stats.publish_errors += 1;
            return BackendResult::err(codes::PUBLISH_NOT_CONNECTED, "not connected");
        }
        state.audio_stats.published_frames += frames_per_channel as i64;
        state.publishes.push(RecordedPublish {
            frames_per_channel,
            channels: self.config.channels,
            sample_rate: self.config.sample_rate,
            track: Some(self.config.track_name.clone()),
        });
        BackendResult::ok()
    }
}
