//! # roomlink-client
//!
//! Client-side session layer for a real-time media/data endpoint.
//! One [`Session`] owns one backend connection and mediates between
//! the backend's threading model (callbacks on arbitrary background
//! threads) and a host that requires every side effect on a single
//! designated consumer thread.
//!
//! ```text
//! host thread                         backend threads
//! -----------                         ---------------
//! Session::connect ────────────────▶ backend
//! Session::tick ◀── Marshaller ◀──── connection / data / audio
//!   │                                 callbacks (captured, copied,
//!   ├─ registered handlers            queued per kind)
//!   ├─ deferred-start tasks
//!   └─ generators (optional)
//! ```
//!
//! The building blocks:
//!
//! - [`Session`] — connection state machine, publish/send operations,
//!   named audio tracks and data channels, last-error cache
//! - [`Marshaller`](dispatch::Marshaller) — backend-to-host callback
//!   marshalling with teardown quiescence
//! - [`ToneGenerator`] / [`TestDataGenerator`] — optional periodic
//!   producers for exercising a live session end to end
//!
//! Backends implement
//! [`BackendConnection`](roomlink_backend::BackendConnection); the
//! `roomlink-backend` crate ships a scripted in-process backend for
//! tests and offline use.
//!
//! # Example
//!
//! ```no_run
//! use roomlink_backend::{Reliability, ScriptedBackend};
//! use roomlink_client::{Session, SessionConfig};
//! use std::time::Instant;
//!
//! # fn main() -> roomlink_client::Result<()> {
//! let config = SessionConfig {
//!     url: "wss://example.test:7880".to_string(),
//!     token: "<token>".to_string(),
//!     ..SessionConfig::default()
//! };
//! let mut session = Session::new(config, Box::new(ScriptedBackend::new()))?;
//! session.set_data_handler(Some(Box::new(|msg| {
//!     println!("received {} bytes", msg.bytes.len());
//! })));
//! session.connect()?;
//! session.send(b"hello", Reliability::Reliable)?;
//! loop {
//!     session.tick(Instant::now());
//!     # break;
//! }
//! session.disconnect()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod session;
pub mod signal;

pub use config::{AudioPublishOptions, SessionConfig};
pub use error::{Error, OpKind, Result};
pub use registry::{AudioTrackConfig, DataChannelConfig, NamedAudioTrack, NamedDataChannel};
pub use session::{
    AudioReceivedHandler, ConnectionChangeHandler, ConnectionState, DataReceivedHandler,
    InboundAudio, InboundData, LastError, Milestone, MilestoneHandler, Session,
};
pub use signal::{
    now_micros, ProbeConfig, ProbePayload, TestDataGenerator, ToneConfig, ToneGenerator,
};

/// Crate version string.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
