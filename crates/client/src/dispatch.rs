//! Callback marshalling: backend threads -> host consumer thread
//!
//! The backend fires handlers on unspecified threads at unspecified
//! rates. The host requires every side effect on one designated
//! consumer thread, in order, without blocking that thread. This
//! module converts between the two worlds:
//!
//! - **Capture** runs on the backend thread: the event payload is
//!   copied into an owned [`Notification`] immediately (no pointer
//!   into backend memory survives the originating call) and pushed
//!   onto the queue for its kind.
//! - **Dispatch** runs on the host thread: [`Marshaller::pump`]
//!   drains each per-kind queue in FIFO order. Per-kind dispatch
//!   order equals capture order; ordering across kinds is not
//!   guaranteed and must not be assumed.
//! - **Quiescence**: [`Marshaller::close_and_drain`] blocks until
//!   every in-flight capture has returned, then permanently drops all
//!   queued and future notifications. After it returns, nothing
//!   captured for this session is ever observed again.
//!
//! One unbounded queue per notification kind keeps the ordering and
//! backpressure story auditable instead of hiding it behind an
//! opaque "schedule on host thread" primitive.

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use roomlink_backend::{
    AudioEvent, AudioSource, BackendConnectionState, ConnectionEvent, DataEvent, Reliability,
};
use tracing::trace;

/// A self-contained snapshot of one backend event, queued for
/// host-thread dispatch. Holds no references into backend-owned or
/// thread-local memory; all payload bytes are copied at capture time.
#[derive(Debug, Clone)]
pub enum Notification {
    /// Connection-state transition.
    Connection {
        /// New backend-reported state.
        state: BackendConnectionState,
        /// Reason code (0 if normal).
        reason_code: i32,
        /// Optional backend-supplied detail.
        message: Option<String>,
    },
    /// One inbound data message.
    Data {
        /// Payload bytes, copied at capture time.
        bytes: Vec<u8>,
        /// Delivery class the message arrived on.
        reliability: Reliability,
        /// Channel label, if known.
        label: Option<String>,
    },
    /// One inbound audio frame.
    Audio {
        /// Interleaved PCM samples, copied at capture time.
        pcm: Vec<i16>,
        /// Frames per channel.
        frames_per_channel: usize,
        /// Channel count.
        channels: i32,
        /// Sample rate in Hz.
        sample_rate: i32,
        /// Remote source identity, if known.
        source: Option<AudioSource>,
    },
}

struct GateState {
    closed: bool,
    in_flight: usize,
}

/// Counts captures in flight so teardown can drain them, and refuses
/// new captures once closed.
struct Gate {
    state: Mutex<GateState>,
    drained: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                closed: false,
                in_flight: 0,
            }),
            drained: Condvar::new(),
        }
    }

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

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn close_and_drain(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        while state.in_flight > 0 {
            self.drained.wait(&mut state);
        }
    }
}

struct GateGuard {
    gate: Arc<Gate>,
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

struct Queues {
    connection_tx: Sender<Notification>,
    data_tx: Sender<Notification>,
    audio_tx: Sender<Notification>,
}

/// Capture side of the marshaller. Cheap to clone; handed to the
/// backend's handler closures and safe to use from any thread.
#[derive(Clone)]
pub struct CaptureHandle {
    queues: Arc<Queues>,
    gate: Arc<Gate>,
}

impl CaptureHandle {
    /// Capture a connection-state transition. No-op after teardown
    /// has begun.
    pub fn capture_connection(&self, event: &ConnectionEvent) {
        let _guard = match self.gate.enter() {
            Some(g) => g,
            None => return,
        };
        let _ = self.queues.connection_tx.send(Notification::Connection {
            state: event.state,
            reason_code: event.reason_code,
            message: event.message.clone(),
        });
    }

    /// Capture one inbound data message, copying the payload before
    /// the originating backend call returns. No-op after teardown.
    pub fn capture_data(&self, event: &DataEvent<'_>) {
        let _guard = match self.gate.enter() {
            Some(g) => g,
            None => return,
        };
        let _ = self.queues.data_tx.send(Notification::Data {
            bytes: event.bytes.to_vec(),
            reliability: event.reliability,
            label: event.label.map(str::to_owned),
        });
    }

    /// Capture one inbound audio frame, copying the samples before
    /// the originating backend call returns. No-op after teardown.
    pub fn capture_audio(&self, event: &AudioEvent<'_>) {
        let _guard = match self.gate.enter() {
            Some(g) => g,
            None => return,
        };
        let _ = self.queues.audio_tx.send(Notification::Audio {
            pcm: event.pcm.to_vec(),
            frames_per_channel: event.frames_per_channel,
            channels: event.channels,
            sample_rate: event.sample_rate,
            source: event.source.cloned(),
        });
    }
}

/// Host-side marshaller: owns the per-kind queues and the teardown
/// gate. Lives on the host's designated consumer thread; only
/// [`CaptureHandle`]s cross threads.
pub struct Marshaller {
    queues: Arc<Queues>,
    gate: Arc<Gate>,
    connection_rx: Receiver<Notification>,
    data_rx: Receiver<Notification>,
    audio_rx: Receiver<Notification>,
}

impl Default for Marshaller {
    fn default() -> Self {
        Self::new()
    }
}

impl Marshaller {
    /// Create a marshaller with empty queues.
    pub fn new() -> Self {
        let (connection_tx, connection_rx) = unbounded();
        let (data_tx, data_rx) = unbounded();
        let (audio_tx, audio_rx) = unbounded();
        Self {
            queues: Arc::new(Queues {
                connection_tx,
                data_tx,
                audio_tx,
            }),
            gate: Arc::new(Gate::new()),
            connection_rx,
            data_rx,
            audio_rx,
        }
    }

    /// Capture handle for backend handler closures.
    pub fn capture_handle(&self) -> CaptureHandle {
        CaptureHandle {
            queues: Arc::clone(&self.queues),
            gate: Arc::clone(&self.gate),
        }
    }

    /// True once teardown has begun; captures and pumps are no-ops.
    pub fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }

    /// Drain all queues, returning the pending notifications in
    /// per-kind FIFO order (connection transitions first, then data,
    /// then audio). A closed marshaller returns nothing and discards
    /// anything still queued.
    pub fn pump(&mut self) -> Vec<Notification> {
        if self.gate.is_closed() {
            Self::discard(&self.connection_rx);
            Self::discard(&self.data_rx);
            Self::discard(&self.audio_rx);
            return Vec::new();
        }
        let mut drained = Vec::new();
        drained.extend(self.connection_rx.try_iter());
        drained.extend(self.data_rx.try_iter());
        drained.extend(self.audio_rx.try_iter());
        if !drained.is_empty() {
            trace!(count = drained.len(), "pumped notifications");
        }
        drained
    }

    /// Begin teardown: block until in-flight captures finish, then
    /// drop everything queued. After this returns, no notification
    /// captured for this marshaller is ever observed.
    pub fn close_and_drain(&mut self) {
        self.gate.close_and_drain();
        Self::discard(&self.connection_rx);
        Self::discard(&self.data_rx);
        Self::discard(&self.audio_rx);
    }

    fn discard(rx: &Receiver<Notification>) {
        while rx.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_bytes(n: &Notification) -> &[u8] {
        match n {
            Notification::Data { bytes, .. } => bytes,
            other => panic!("expected data notification, got {:?}", other),
        }
    }

    #[test]
    fn test_pump_preserves_per_kind_order() {
        let mut m = Marshaller::new();
        let handle = m.capture_handle();
        for payload in [b"e1".as_ref(), b"e2".as_ref(), b"e3".as_ref()] {
            handle.capture_data(&DataEvent {
                label: None,
                reliability: Reliability::Reliable,
                bytes: payload,
            });
        }
        let drained = m.pump();
        assert_eq!(drained.len(), 3);
        assert_eq!(data_bytes(&drained[0]), b"e1");
        assert_eq!(data_bytes(&drained[1]), b"e2");
        assert_eq!(data_bytes(&drained[2]), b"e3");
    }

    #[test]
    fn test_no_dispatch_after_close() {
        let mut m = Marshaller::new();
        let handle = m.capture_handle();
        handle.capture_data(&DataEvent {
            label: None,
            reliability: Reliability::Reliable,
            bytes: b"queued before close",
        });
        m.close_and_drain();
        // Captures after close are silent no-ops.
        handle.capture_data(&DataEvent {
            label: None,
            reliability: Reliability::Reliable,
            bytes: b"after close",
        });
        assert!(m.pump().is_empty());
        assert!(m.is_closed());
    }

    #[test]
    fn test_capture_copies_payload() {
        let mut m = Marshaller::new();
        let handle = m.capture_handle();
        {
            let transient = vec![7i16; 96];
            handle.capture_audio(&AudioEvent {
                pcm: &transient,
                frames_per_channel: 48,
                channels: 2,
                sample_rate: 48000,
                source: None,
            });
            // `transient` is dropped here; the queued copy must survive.
        }
        let drained = m.pump();
        match &drained[0] {
            Notification::Audio {
                pcm,
                frames_per_channel,
                channels,
                ..
            } => {
                assert_eq!(pcm.as_slice(), vec![7i16; 96].as_slice());
                assert_eq!(*frames_per_channel, 48);
                assert_eq!(*channels, 2);
            }
            other => panic!("expected audio notification, got {:?}", other),
        }
    }

    #[test]
    fn test_cross_thread_capture_order() {
        let mut m = Marshaller::new();
        let handle = m.capture_handle();
        let t = std::thread::spawn(move || {
            for i in 0..10u8 {
                handle.capture_data(&DataEvent {
                    label: None,
                    reliability: Reliability::Lossy,
                    bytes: &[i],
                });
            }
        });
        t.join().unwrap();
        let drained = m.pump();
        let seen: Vec<u8> = drained.iter().map(|n| data_bytes(n)[0]).collect();
        assert_eq!(seen, (0..10).collect::<Vec<u8>>());
    }

    #[test]
    fn test_connection_capture_carries_reason() {
        let mut m = Marshaller::new();
        let handle = m.capture_handle();
        handle.capture_connection(&ConnectionEvent {
            state: BackendConnectionState::Failed,
            reason_code: 103,
            message: Some("token expired".to_string()),
        });
        let drained = m.pump();
        match &drained[0] {
            Notification::Connection {
                state,
                reason_code,
                message,
            } => {
                assert_eq!(*state, BackendConnectionState::Failed);
                assert_eq!(*reason_code, 103);
                assert_eq!(message.as_deref(), Some("token expired"));
            }
            other => panic!("expected connection notification, got {:?}", other),
        }
    }
}
