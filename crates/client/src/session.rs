//! Connection session
//!
//! One [`Session`] owns one backend connection and everything scoped
//! to its lifetime: the named resource registries, the callback
//! marshaller, and the cached last error. The session is bound to the
//! host's designated consumer thread; the only cross-thread traffic
//! is event capture inside the marshaller and the [`LastError`]
//! cache.
//!
//! # Blocking
//!
//! Three operations deliberately block the host thread: synchronous
//! [`connect`](Session::connect), [`disconnect`](Session::disconnect)
//! (which additionally waits for callback quiescence), and drop.
//! Everything else returns immediately; host-visible side effects
//! flow through [`tick`](Session::tick).

use std::mem;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use roomlink_backend::{
    codes, AudioSource, BackendConnection, BackendConnectionState, BackendResult, Reliability,
    Role, TrackConfig,
};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::dispatch::{Marshaller, Notification};
use crate::error::{Error, OpKind, Result};
use crate::registry::{
    AudioTrackConfig, DataChannelConfig, NamedAudioTrack, NamedDataChannel, NamedRegistry,
};

/// Host-visible connection state.
///
/// Owned exclusively by the session: transitions are driven only by
/// backend notifications (observed during [`Session::tick`]) or by
/// host-initiated connect/disconnect calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connect has been issued.
    Idle,
    /// Connect in flight.
    Connecting,
    /// Connected and ready.
    Connected,
    /// Transient backend-initiated reconnect; advisory only, there is
    /// no cancel path.
    Reconnecting,
    /// Cleanly closed.
    Disconnected,
    /// Unrecoverable failure; terminal until a new connect.
    Failed,
}

impl From<BackendConnectionState> for ConnectionState {
    fn from(state: BackendConnectionState) -> Self {
        match state {
            BackendConnectionState::Connecting => ConnectionState::Connecting,
            BackendConnectionState::Connected => ConnectionState::Connected,
            BackendConnectionState::Reconnecting => ConnectionState::Reconnecting,
            BackendConnectionState::Disconnected => ConnectionState::Disconnected,
            BackendConnectionState::Failed => ConnectionState::Failed,
        }
    }
}

/// Most recent non-success backend outcome. Advisory and polled;
/// overwritten on every failure, cleared on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    /// Backend result code.
    pub code: i32,
    /// Backend-supplied reason.
    pub message: String,
}

/// One-shot milestones delivered at most once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Milestone {
    /// First audio buffer accepted for publish.
    AudioPublishReady {
        /// Sample rate of the first published buffer.
        sample_rate: i32,
        /// Channel count of the first published buffer.
        channels: i32,
    },
    /// First inbound audio frame observed.
    FirstAudioReceived {
        /// Sample rate of the first frame.
        sample_rate: i32,
        /// Channel count of the first frame.
        channels: i32,
        /// Frames per channel in the first frame.
        frames_per_channel: usize,
    },
}

/// One inbound data message as delivered to the host.
#[derive(Debug, Clone, Copy)]
pub struct InboundData<'a> {
    /// Payload bytes.
    pub bytes: &'a [u8],
    /// Delivery class the message arrived on.
    pub reliability: Reliability,
    /// Channel label, if known.
    pub label: Option<&'a str>,
}

/// One inbound audio frame as delivered to the host.
#[derive(Debug, Clone, Copy)]
pub struct InboundAudio<'a> {
    /// Interleaved PCM samples.
    pub pcm: &'a [i16],
    /// Frames per channel.
    pub frames_per_channel: usize,
    /// Channel count.
    pub channels: i32,
    /// Sample rate in Hz.
    pub sample_rate: i32,
    /// Remote source identity, if known.
    pub source: Option<&'a AudioSource>,
}

/// Handler for connection-state transitions.
pub type ConnectionChangeHandler = Box<dyn FnMut(ConnectionState, i32, Option<&str>)>;
/// Handler for inbound data messages.
pub type DataReceivedHandler = Box<dyn FnMut(InboundData<'_>)>;
/// Handler for inbound audio frames.
pub type AudioReceivedHandler = Box<dyn FnMut(InboundAudio<'_>)>;
/// Handler for one-shot milestones.
pub type MilestoneHandler = Box<dyn FnMut(&Milestone)>;

/// Deferred task run once the session becomes ready.
type ReadyTask = Box<dyn FnOnce(&mut Session)>;

/// State shared with the backend capture path. The last-error cache
/// is the only mutable state touched by both the host thread (read,
/// host-call writes) and backend callback threads (error-event
/// writes); it is guarded at whole-pair granularity.
struct Shared {
    last_error: Mutex<Option<LastError>>,
}

impl Shared {
    fn record(&self, code: i32, message: &str) {
        *self.last_error.lock() = Some(LastError {
            code,
            message: message.to_string(),
        });
    }

    fn clear(&self) {
        *self.last_error.lock() = None;
    }
}

/// One logical connection and everything scoped to its lifetime.
///
/// Bound to the host's designated consumer thread (`!Send` by
/// construction); create it, tick it, and drop it on that thread.
pub struct Session {
    config: SessionConfig,
    backend: Box<dyn BackendConnection>,
    marshaller: Marshaller,
    shared: Arc<Shared>,
    state: ConnectionState,
    torn_down: bool,

    tracks: NamedRegistry<NamedAudioTrack>,
    channels: NamedRegistry<NamedDataChannel>,

    on_connection: Option<ConnectionChangeHandler>,
    on_data: Option<DataReceivedHandler>,
    on_audio: Option<AudioReceivedHandler>,
    on_milestone: Option<MilestoneHandler>,

    deferred: Vec<ReadyTask>,
    next_ready_poll: Option<Instant>,
    connect_deadline: Option<Instant>,

    publish_ready_seen: bool,
    first_audio_seen: bool,
}

impl Session {
    /// Create a session over the given backend connection.
    ///
    /// Registers the capture handlers with the backend; no connect is
    /// issued yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` fails validation.
    pub fn new(config: SessionConfig, backend: Box<dyn BackendConnection>) -> Result<Self> {
        config.validate()?;

        let marshaller = Marshaller::new();
        let shared = Arc::new(Shared {
            last_error: Mutex::new(None),
        });

        // Connection events double as the backend-thread write path
        // for the last-error cache; payload capture itself always
        // copies before the backend call returns.
        let capture = marshaller.capture_handle();
        let err_cache = Arc::clone(&shared);
        backend.set_connection_handler(Some(Box::new(move |ev| {
            if ev.reason_code != 0 {
                err_cache.record(
                    ev.reason_code,
                    ev.message.as_deref().unwrap_or("connection error"),
                );
            }
            capture.capture_connection(ev);
        })));

        let capture = marshaller.capture_handle();
        backend.set_data_handler(Some(Box::new(move |ev| capture.capture_data(ev))));

        let capture = marshaller.capture_handle();
        backend.set_audio_handler(Some(Box::new(move |ev| capture.capture_audio(ev))));

        Ok(Self {
            config,
            backend,
            marshaller,
            shared,
            state: ConnectionState::Idle,
            torn_down: false,
            tracks: NamedRegistry::new("audio track"),
            channels: NamedRegistry::new("data channel"),
            on_connection: None,
            on_data: None,
            on_audio: None,
            on_milestone: None,
            deferred: Vec::new(),
            next_ready_poll: None,
            connect_deadline: None,
            publish_ready_seen: false,
            first_audio_seen: false,
        })
    }

    /// Register the connection-transition handler. At most one per
    /// kind; re-registering replaces the previous handler.
    pub fn set_connection_handler(&mut self, handler: Option<ConnectionChangeHandler>) {
        self.on_connection = handler;
    }

    /// Register the inbound-data handler. Last registration wins.
    pub fn set_data_handler(&mut self, handler: Option<DataReceivedHandler>) {
        self.on_data = handler;
    }

    /// Register the inbound-audio handler. Last registration wins.
    pub fn set_audio_handler(&mut self, handler: Option<AudioReceivedHandler>) {
        self.on_audio = handler;
    }

    /// Register the milestone handler. Last registration wins.
    pub fn set_milestone_handler(&mut self, handler: Option<MilestoneHandler>) {
        self.on_milestone = handler;
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True once connected and accepting publish/send operations.
    pub fn is_ready(&self) -> bool {
        !self.torn_down && self.backend.is_ready()
    }

    /// The most recent non-success backend outcome, if any.
    pub fn last_error(&self) -> Option<LastError> {
        self.shared.last_error.lock().clone()
    }

    /// The configuration this session was created with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connect, blocking until the backend reports success or
    /// failure.
    ///
    /// # Errors
    ///
    /// [`Error::Lifecycle`] after teardown; [`Error::Connection`]
    /// with code 104 while a connection is already live (state is
    /// left untouched); [`Error::Connection`] on backend-reported
    /// failure (state moves to `Failed`, terminal until a new
    /// connect).
    pub fn connect(&mut self) -> Result<()> {
        self.guard()?;
        self.guard_not_connected()?;
        info!(url = %self.config.url, role = ?self.config.role, "connecting");
        self.apply_audio_options();
        self.state = ConnectionState::Connecting;
        let result = self
            .backend
            .connect(&self.config.url, &self.config.token, self.config.role);
        match self.check(OpKind::Connect, result) {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                info!(url = %self.config.url, "connected");
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Failed;
                warn!(url = %self.config.url, error = %e, "connect failed");
                Err(e)
            }
        }
    }

    /// Start connecting and return immediately in `Connecting`.
    ///
    /// Readiness is observed through the connection handler during
    /// [`tick`](Session::tick). When `connect_timeout` is configured,
    /// an observational deadline is armed: if readiness has not been
    /// seen by then, a warning is logged once. The connect itself is
    /// never cancelled — only backend notifications and explicit
    /// [`disconnect`](Session::disconnect) move the state machine.
    pub fn connect_async(&mut self) -> Result<()> {
        self.guard()?;
        self.guard_not_connected()?;
        info!(url = %self.config.url, role = ?self.config.role, "connecting (async)");
        self.apply_audio_options();
        self.state = ConnectionState::Connecting;
        let result =
            self.backend
                .connect_async(&self.config.url, &self.config.token, self.config.role);
        match self.check(OpKind::Connect, result) {
            Ok(()) => {
                if let Some(timeout) = self.config.connect_timeout {
                    self.connect_deadline = Some(Instant::now() + timeout);
                }
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Failed;
                Err(e)
            }
        }
    }

    /// Disconnect and tear the session down. Valid from any state and
    /// idempotent: the second call is a no-op success with no second
    /// round of notifications.
    ///
    /// Blocks until the backend round-trip completes and every
    /// in-flight callback has drained; after this returns, no
    /// host-visible handler for this session runs again. All named
    /// resources are destroyed (best effort) before the connection is
    /// released.
    pub fn disconnect(&mut self) -> Result<()> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;
        info!("disconnecting");

        // Resources must not outlive the connection they reference.
        self.tracks.clear();
        self.channels.clear();
        self.deferred.clear();
        self.next_ready_poll = None;
        self.connect_deadline = None;

        let result = self.backend.disconnect();
        if !result.is_ok() {
            let (code, message) = result.take_message();
            let message = message.unwrap_or_else(|| "unknown".to_string());
            // Teardown is best-effort; the failure is recorded and
            // logged but never escalated.
            warn!(code, %message, "backend disconnect reported failure");
            self.shared.record(code, &message);
        }

        // Quiesce: nothing captured before or during the backend
        // round-trip may reach the host after this point.
        self.marshaller.close_and_drain();

        self.state = ConnectionState::Disconnected;
        if let Some(cb) = self.on_connection.as_mut() {
            cb(ConnectionState::Disconnected, 0, None);
        }
        Ok(())
    }

    /// Publish one interleaved PCM buffer on the default audio path.
    ///
    /// The first successful publish emits
    /// [`Milestone::AudioPublishReady`] exactly once per session.
    pub fn publish_pcm(
        &mut self,
        pcm: &[i16],
        frames_per_channel: usize,
        channels: i32,
        sample_rate: i32,
    ) -> Result<()> {
        self.guard()?;
        let result = self
            .backend
            .publish_pcm_i16(pcm, frames_per_channel, channels, sample_rate);
        self.check(OpKind::Publish, result)?;
        self.note_publish_ready(sample_rate, channels);
        Ok(())
    }

    /// Publish one PCM buffer to a named audio track.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no track named `name` is live.
    pub fn publish_to_track(
        &mut self,
        name: &str,
        pcm: &[i16],
        frames_per_channel: usize,
    ) -> Result<()> {
        self.guard()?;
        let track = self
            .tracks
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        let (sample_rate, channels) = (track.config().sample_rate, track.config().channels);
        let result = track.handle().publish_pcm_i16(pcm, frames_per_channel);
        self.check(OpKind::Publish, result)?;
        self.note_publish_ready(sample_rate, channels);
        Ok(())
    }

    /// Send a data payload on the default channel for `reliability`.
    ///
    /// The payload is validated against the backend-reported size
    /// ceilings before the call; an oversized payload fails with the
    /// matching size error and leaves the session fully usable.
    pub fn send(&self, bytes: &[u8], reliability: Reliability) -> Result<()> {
        self.guard()?;
        self.check_size(bytes.len(), reliability)?;
        let label = match reliability {
            Reliability::Reliable => self.config.reliable_label.as_deref(),
            Reliability::Lossy => self.config.lossy_label.as_deref(),
        };
        let result = match label {
            Some(label) => {
                let ordered = reliability == Reliability::Reliable;
                self.backend
                    .send_data_ex(bytes, reliability, ordered, Some(label))
            }
            None => self.backend.send_data(bytes, reliability),
        };
        self.check(OpKind::Send, result)
    }

    /// Send a data payload on a named data channel, using the
    /// reliability, ordering, and label captured at channel creation.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no channel named `name` is live.
    pub fn send_on_channel(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.guard()?;
        let channel = self
            .channels
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        let cfg = channel.config();
        self.check_size(bytes.len(), cfg.reliability)?;
        let result =
            self.backend
                .send_data_ex(bytes, cfg.reliability, cfg.ordered, Some(&cfg.label));
        self.check(OpKind::Send, result)
    }

    /// Create a named audio track.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyExists`] if `name` resolves to a live track;
    /// [`Error::InvalidConfig`] for a structurally invalid name or
    /// config; backend failures per their code range.
    pub fn create_audio_track(&mut self, name: &str, config: AudioTrackConfig) -> Result<()> {
        self.guard()?;
        config.validate()?;
        if name.is_empty() {
            return Err(Error::InvalidConfig(
                "audio track name cannot be empty".to_string(),
            ));
        }
        if self.tracks.contains(name) {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        let track_config = TrackConfig {
            track_name: name.to_string(),
            sample_rate: config.sample_rate,
            channels: config.channels,
            buffer_ms: config.buffer_ms,
        };
        let (result, handle) = self.backend.create_track(&track_config);
        self.check(OpKind::Publish, result)?;
        let handle = handle.ok_or_else(|| Error::Internal {
            code: codes::INTERNAL,
            message: "backend reported success without a track handle".to_string(),
        })?;
        self.tracks.insert(name, NamedAudioTrack::new(config, handle))
    }

    /// Destroy a named audio track, releasing its backend sub-handle.
    /// Returns `false` if `name` is absent (or the session is torn
    /// down), leaving the registry unchanged.
    pub fn destroy_audio_track(&mut self, name: &str) -> bool {
        if self.torn_down {
            return false;
        }
        self.tracks.remove(name)
    }

    /// Non-mutating lookup of a live audio track.
    pub fn audio_track(&self, name: &str) -> Option<&NamedAudioTrack> {
        self.tracks.get(name)
    }

    /// Names of all live audio tracks.
    pub fn audio_track_names(&self) -> Vec<String> {
        self.tracks.names()
    }

    /// Create a named data channel. The channel owns no backend
    /// handle; its parameters are supplied per-send.
    pub fn create_data_channel(&mut self, name: &str, config: DataChannelConfig) -> Result<()> {
        self.guard()?;
        config.validate()?;
        self.channels.insert(name, NamedDataChannel::new(config))
    }

    /// Destroy a named data channel. Returns `false` if `name` is
    /// absent (or the session is torn down).
    pub fn destroy_data_channel(&mut self, name: &str) -> bool {
        if self.torn_down {
            return false;
        }
        self.channels.remove(name)
    }

    /// Non-mutating lookup of a live data channel.
    pub fn data_channel(&self, name: &str) -> Option<&NamedDataChannel> {
        self.channels.get(name)
    }

    /// Names of all live data channels.
    pub fn data_channel_names(&self) -> Vec<String> {
        self.channels.names()
    }

    /// Refresh the auth token at runtime.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] when the backend declines, with the
    /// disconnect + reconnect fallback in the message.
    pub fn refresh_token(&self, token: &str) -> Result<()> {
        self.guard()?;
        let result = self.backend.refresh_token(token);
        self.check(OpKind::Other, result)
    }

    /// Switch role at runtime.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] when the backend declines, with the
    /// disconnect + reconnect fallback in the message.
    pub fn set_role(&self, role: Role) -> Result<()> {
        self.guard()?;
        let result = self.backend.set_role(role, self.config.auto_subscribe);
        self.check(OpKind::Other, result)
    }

    /// Cumulative data-send counters from the backend.
    pub fn data_stats(&self) -> roomlink_backend::DataStats {
        self.backend.data_stats()
    }

    /// Audio pipeline counters from the backend.
    pub fn audio_stats(&self) -> roomlink_backend::AudioStats {
        self.backend.audio_stats()
    }

    /// Defer `task` until the session is ready.
    ///
    /// If the session is ready now the task runs immediately;
    /// otherwise it is retried from [`tick`](Session::tick) every
    /// `readiness_retry` until the session becomes ready or is torn
    /// down. Waiting for readiness is never surfaced as an error.
    pub fn run_when_ready(&mut self, task: impl FnOnce(&mut Session) + 'static) {
        if self.torn_down {
            return;
        }
        if self.is_ready() {
            task(self);
        } else {
            debug!("deferring task until session is ready");
            self.deferred.push(Box::new(task));
        }
    }

    /// Host-tick driver. Call once per host tick on the consumer
    /// thread.
    ///
    /// Drains queued notifications into the registered handlers (per
    /// kind, in capture order), runs tasks whose readiness wait is
    /// over, and checks the observational connect deadline. Returns
    /// the number of notifications dispatched.
    pub fn tick(&mut self, now: Instant) -> usize {
        if self.torn_down {
            return 0;
        }

        let notes = self.marshaller.pump();
        let dispatched = notes.len();
        for note in notes {
            self.apply(note);
        }

        self.run_ready_tasks(now);
        self.check_connect_deadline(now);

        dispatched
    }

    fn apply(&mut self, note: Notification) {
        match note {
            Notification::Connection {
                state,
                reason_code,
                message,
            } => {
                let new_state = ConnectionState::from(state);
                if new_state != self.state {
                    info!(from = ?self.state, to = ?new_state, reason_code, "connection state");
                    self.state = new_state;
                }
                if let Some(cb) = self.on_connection.as_mut() {
                    cb(new_state, reason_code, message.as_deref());
                }
            }
            Notification::Data {
                bytes,
                reliability,
                label,
            } => {
                if let Some(cb) = self.on_data.as_mut() {
                    cb(InboundData {
                        bytes: &bytes,
                        reliability,
                        label: label.as_deref(),
                    });
                }
            }
            Notification::Audio {
                pcm,
                frames_per_channel,
                channels,
                sample_rate,
                source,
            } => {
                if !self.first_audio_seen {
                    self.first_audio_seen = true;
                    info!(sample_rate, channels, frames_per_channel, "first inbound audio frame");
                    self.emit_milestone(Milestone::FirstAudioReceived {
                        sample_rate,
                        channels,
                        frames_per_channel,
                    });
                }
                if let Some(cb) = self.on_audio.as_mut() {
                    cb(InboundAudio {
                        pcm: &pcm,
                        frames_per_channel,
                        channels,
                        sample_rate,
                        source: source.as_ref(),
                    });
                }
            }
        }
    }

    fn run_ready_tasks(&mut self, now: Instant) {
        if self.deferred.is_empty() {
            return;
        }
        if let Some(at) = self.next_ready_poll {
            if now < at {
                return;
            }
        }
        if self.is_ready() {
            self.next_ready_poll = None;
            let tasks = mem::take(&mut self.deferred);
            debug!(count = tasks.len(), "session ready, running deferred tasks");
            for task in tasks {
                task(self);
            }
        } else {
            self.next_ready_poll = Some(now + self.config.readiness_retry);
        }
    }

    fn check_connect_deadline(&mut self, now: Instant) {
        let Some(deadline) = self.connect_deadline else {
            return;
        };
        if self.state == ConnectionState::Connected {
            self.connect_deadline = None;
        } else if now >= deadline {
            // Observational only: the in-flight connect keeps going
            // until the backend reports an outcome or the host
            // disconnects.
            warn!(
                timeout_ms = self.config.connect_timeout.map(|t| t.as_millis() as u64),
                state = ?self.state,
                "connect readiness not observed within the configured timeout"
            );
            self.connect_deadline = None;
        }
    }

    fn note_publish_ready(&mut self, sample_rate: i32, channels: i32) {
        if !self.publish_ready_seen {
            self.publish_ready_seen = true;
            info!(sample_rate, channels, "audio publish pipeline active");
            self.emit_milestone(Milestone::AudioPublishReady {
                sample_rate,
                channels,
            });
        }
    }

    fn emit_milestone(&mut self, milestone: Milestone) {
        if let Some(cb) = self.on_milestone.as_mut() {
            cb(&milestone);
        }
    }

    fn guard(&self) -> Result<()> {
        if self.torn_down {
            Err(Error::Lifecycle(
                "session has been torn down".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    /// A new connect is only legal while no connection is live; the
    /// current state must survive a rejected attempt untouched.
    fn guard_not_connected(&self) -> Result<()> {
        if matches!(
            self.state,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Reconnecting
        ) {
            let message = "a connection is already live; disconnect first";
            self.shared.record(codes::ALREADY_CONNECTED, message);
            return Err(Error::from_backend(
                OpKind::Connect,
                codes::ALREADY_CONNECTED,
                Some(message.to_string()),
            ));
        }
        Ok(())
    }

    /// Encoder tuning is advisory; a rejection is logged but never
    /// blocks the connect.
    fn apply_audio_options(&self) {
        let result = self.backend.set_audio_publish_options(self.config.audio);
        if !result.is_ok() {
            let (code, message) = result.take_message();
            warn!(
                code,
                message = message.as_deref().unwrap_or("unknown"),
                "audio publish options rejected"
            );
        }
    }

    fn check_size(&self, len: usize, reliability: Reliability) -> Result<()> {
        let limits = self.backend.send_limits();
        let max = limits.max_for(reliability);
        if len <= max {
            return Ok(());
        }
        let (code, class) = match reliability {
            Reliability::Lossy => (codes::LOSSY_TOO_LARGE, "lossy"),
            Reliability::Reliable => (codes::RELIABLE_TOO_LARGE, "reliable"),
        };
        let message = format!("{} payload size {} exceeds limit {}", class, len, max);
        self.shared.record(code, &message);
        Err(Error::from_backend(OpKind::Send, code, Some(message)))
    }

    /// Map a backend result, maintaining the last-error cache: every
    /// failure overwrites it, every success clears it. Advisory
    /// messages on success are logged and discarded here — the one
    /// place the message leaves the result.
    fn check(&self, op: OpKind, result: BackendResult) -> Result<()> {
        if result.is_ok() {
            let (_, message) = result.take_message();
            if let Some(message) = message {
                debug!(%message, "backend advisory");
            }
            self.shared.clear();
            Ok(())
        } else {
            let (code, message) = result.take_message();
            self.shared
                .record(code, message.as_deref().unwrap_or("unknown"));
            Err(Error::from_backend(op, code, message))
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.torn_down {
            let _ = self.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomlink_backend::{AudioPublishOptions, ScriptedBackend};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn session_with(backend: ScriptedBackend) -> Session {
        let config = SessionConfig {
            token: "tok".to_string(),
            ..SessionConfig::default()
        };
        Session::new(config, Box::new(backend)).unwrap()
    }

    #[test]
    fn test_sync_connect_transitions_to_connected() {
        let backend = ScriptedBackend::new();
        let mut session = session_with(backend);
        assert_eq!(session.state(), ConnectionState::Idle);
        session.connect().unwrap();
        assert_eq!(session.state(), ConnectionState::Connected);
        assert!(session.is_ready());
        assert!(session.last_error().is_none());
    }

    #[test]
    fn test_failed_connect_is_terminal_until_reconnect() {
        let backend = ScriptedBackend::new();
        backend.fail_next_connect(101, "bad token");
        let mut session = session_with(backend);
        let err = session.connect().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(session.state(), ConnectionState::Failed);
        assert_eq!(session.last_error().unwrap().code, 101);

        // A new connect is allowed from Failed.
        session.connect().unwrap();
        assert_eq!(session.state(), ConnectionState::Connected);
        assert!(session.last_error().is_none());
    }

    #[test]
    fn test_connect_while_connected_is_rejected_without_state_change() {
        let backend = ScriptedBackend::new();
        let mut session = session_with(backend);
        session.connect().unwrap();

        let err = session.connect().unwrap_err();
        assert_eq!(err.code(), Some(codes::ALREADY_CONNECTED));
        assert_eq!(session.state(), ConnectionState::Connected);
        assert!(session.is_ready());
        assert_eq!(
            session.last_error().unwrap().code,
            codes::ALREADY_CONNECTED
        );

        let err = session.connect_async().unwrap_err();
        assert_eq!(err.code(), Some(codes::ALREADY_CONNECTED));
        assert_eq!(session.state(), ConnectionState::Connected);

        // Still fully usable after the rejected attempts.
        session
            .send(b"after rejected connect", Reliability::Reliable)
            .unwrap();
        assert!(session.last_error().is_none());
    }

    #[test]
    fn test_connect_applies_audio_publish_options() {
        let backend = ScriptedBackend::new();
        let options = AudioPublishOptions {
            bitrate_bps: 96_000,
            dtx: true,
            stereo: true,
        };
        let config = SessionConfig {
            token: "tok".to_string(),
            audio: options,
            ..SessionConfig::default()
        };
        let mut session = Session::new(config, Box::new(backend.clone())).unwrap();
        assert!(backend.recorded_publish_options().is_none());
        session.connect().unwrap();
        assert_eq!(backend.recorded_publish_options(), Some(options));
    }

    #[test]
    fn test_default_label_ordering_follows_reliability() {
        let backend = ScriptedBackend::new();
        let config = SessionConfig {
            token: "tok".to_string(),
            reliable_label: Some("bulk".to_string()),
            lossy_label: Some("pose".to_string()),
            ..SessionConfig::default()
        };
        let mut session = Session::new(config, Box::new(backend.clone())).unwrap();
        session.connect().unwrap();
        session.send(b"r", Reliability::Reliable).unwrap();
        session.send(b"l", Reliability::Lossy).unwrap();

        let sends = backend.recorded_sends();
        assert_eq!(sends[0].label.as_deref(), Some("bulk"));
        assert!(sends[0].ordered);
        assert_eq!(sends[1].label.as_deref(), Some("pose"));
        assert!(!sends[1].ordered);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let backend = ScriptedBackend::new();
        let mut session = session_with(backend);
        session.connect().unwrap();

        let transitions = Rc::new(RefCell::new(Vec::new()));
        let t = Rc::clone(&transitions);
        session.set_connection_handler(Some(Box::new(move |state, _, _| {
            t.borrow_mut().push(state);
        })));

        session.disconnect().unwrap();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        session.disconnect().unwrap();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        // One notification round, not two.
        assert_eq!(&*transitions.borrow(), &[ConnectionState::Disconnected]);
    }

    #[test]
    fn test_operations_after_teardown_fail_soft() {
        let backend = ScriptedBackend::new();
        let mut session = session_with(backend);
        session.connect().unwrap();
        session.disconnect().unwrap();

        assert!(matches!(session.connect(), Err(Error::Lifecycle(_))));
        assert!(matches!(
            session.send(b"x", Reliability::Reliable),
            Err(Error::Lifecycle(_))
        ));
        assert!(!session.destroy_audio_track("any"));
        assert_eq!(session.tick(Instant::now()), 0);
    }

    #[test]
    fn test_track_lifecycle_round_trip() {
        let backend = ScriptedBackend::new();
        let mut session = session_with(backend);
        session.connect().unwrap();

        let cfg = AudioTrackConfig::default();
        session.create_audio_track("mic", cfg).unwrap();
        let err = session.create_audio_track("mic", cfg).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert_eq!(session.audio_track_names(), vec!["mic".to_string()]);

        assert!(session.destroy_audio_track("mic"));
        assert!(!session.destroy_audio_track("mic"));
        session.create_audio_track("mic", cfg).unwrap();
    }

    #[test]
    fn test_publish_to_missing_track_is_not_found() {
        let backend = ScriptedBackend::new();
        let mut session = session_with(backend);
        session.connect().unwrap();
        let pcm = vec![0i16; 480];
        assert!(matches!(
            session.publish_to_track("ghost", &pcm, 480),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_channel_send_uses_captured_parameters() {
        let backend = ScriptedBackend::new();
        let mut session = session_with(backend.clone());
        session.connect().unwrap();

        session
            .create_data_channel(
                "mocap",
                DataChannelConfig {
                    label: "mocap-v1".to_string(),
                    reliability: Reliability::Lossy,
                    ordered: false,
                },
            )
            .unwrap();
        session.send_on_channel("mocap", b"pose").unwrap();

        let sends = backend.recorded_sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].label.as_deref(), Some("mocap-v1"));
        assert_eq!(sends[0].reliability, Reliability::Lossy);
        assert!(!sends[0].ordered);
    }

    #[test]
    fn test_oversized_send_fails_and_session_stays_usable() {
        let backend = ScriptedBackend::new();
        let mut session = session_with(backend);
        session.connect().unwrap();

        let big = vec![0u8; 2000];
        let err = session.send(&big, Reliability::Lossy).unwrap_err();
        assert!(err.is_payload_too_large());
        assert_eq!(session.last_error().unwrap().code, codes::LOSSY_TOO_LARGE);

        // Still connected and usable afterwards.
        assert!(session.is_ready());
        session.send(b"small", Reliability::Lossy).unwrap();
        assert!(session.last_error().is_none());
    }

    #[test]
    fn test_unsupported_operations_recommend_reconnect() {
        let backend = ScriptedBackend::new();
        let mut session = session_with(backend);
        session.connect().unwrap();

        let err = session.refresh_token("new-tok").unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        assert!(err.to_string().contains("disconnect + reconnect"));

        let err = session.set_role(Role::Subscriber).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_publish_milestone_fires_once() {
        let backend = ScriptedBackend::new();
        let mut session = session_with(backend);
        session.connect().unwrap();

        let milestones = Rc::new(RefCell::new(Vec::new()));
        let m = Rc::clone(&milestones);
        session.set_milestone_handler(Some(Box::new(move |ms| {
            m.borrow_mut().push(ms.clone());
        })));

        let pcm = vec![0i16; 480];
        session.publish_pcm(&pcm, 480, 1, 48000).unwrap();
        session.publish_pcm(&pcm, 480, 1, 48000).unwrap();
        assert_eq!(
            &*milestones.borrow(),
            &[Milestone::AudioPublishReady {
                sample_rate: 48000,
                channels: 1
            }]
        );
    }

    #[test]
    fn test_run_when_ready_defers_until_connected() {
        let backend = ScriptedBackend::new();
        let mut session = session_with(backend);

        let ran = Rc::new(RefCell::new(false));
        let r = Rc::clone(&ran);
        session.run_when_ready(move |_| *r.borrow_mut() = true);
        assert!(!*ran.borrow());

        let now = Instant::now();
        session.tick(now);
        assert!(!*ran.borrow());

        session.connect().unwrap();
        // Next poll is due one retry interval after the first tick.
        session.tick(now + session.config().readiness_retry);
        assert!(*ran.borrow());
    }

    #[test]
    fn test_run_when_ready_runs_immediately_when_connected() {
        let backend = ScriptedBackend::new();
        let mut session = session_with(backend);
        session.connect().unwrap();

        let ran = Rc::new(RefCell::new(false));
        let r = Rc::clone(&ran);
        session.run_when_ready(move |_| *r.borrow_mut() = true);
        assert!(*ran.borrow());
    }

    #[test]
    fn test_inbound_data_reaches_handler_via_tick() {
        let backend = ScriptedBackend::new();
        let mut session = session_with(backend.clone());
        session.connect().unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        session.set_data_handler(Some(Box::new(move |ev| {
            s.borrow_mut().push(ev.bytes.to_vec());
        })));

        backend.emit_data(b"hello", Reliability::Reliable, None);
        assert_eq!(session.tick(Instant::now()), 1);
        assert_eq!(&*seen.borrow(), &[b"hello".to_vec()]);
    }

    #[test]
    fn test_first_audio_milestone_fires_once() {
        let backend = ScriptedBackend::new();
        let mut session = session_with(backend.clone());
        session.connect().unwrap();

        let milestones = Rc::new(RefCell::new(Vec::new()));
        let m = Rc::clone(&milestones);
        session.set_milestone_handler(Some(Box::new(move |ms| {
            m.borrow_mut().push(ms.clone());
        })));

        let pcm = vec![0i16; 960];
        backend.emit_audio(&pcm, 480, 2, 48000, None);
        backend.emit_audio(&pcm, 480, 2, 48000, None);
        session.tick(Instant::now());
        assert_eq!(
            &*milestones.borrow(),
            &[Milestone::FirstAudioReceived {
                sample_rate: 48000,
                channels: 2,
                frames_per_channel: 480
            }]
        );
    }
}
