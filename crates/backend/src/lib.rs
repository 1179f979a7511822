//! Backend boundary contract for roomlink
//!
//! The transport/codec engine roomlink wraps is external and opaque.
//! This crate pins down the contract the session core is allowed to
//! rely on:
//!
//! - [`BackendResult`] — the uniform (code, optional message) outcome
//!   every boundary call returns, with message lifetime handled by
//!   ownership.
//! - [`BackendConnection`] / [`BackendTrack`] — the imperative entry
//!   points and typed event-handler registration slots.
//! - [`ScriptedBackend`] — an in-process implementation for tests and
//!   offline hosts, scriptable from caller-chosen threads.
//!
//! # Threading
//!
//! Handlers registered on a connection may fire on arbitrary backend
//! threads. After `disconnect` returns, no handler fires again until
//! a new connect. Payload references passed to handlers are valid
//! only for the duration of the call.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod result;
pub mod scripted;
pub mod types;

pub use connection::{
    AudioEvent, AudioHandler, AudioSource, BackendConnection, BackendTrack, ConnectionEvent,
    ConnectionHandler, DataEvent, DataHandler,
};
pub use result::{codes, BackendResult};
pub use scripted::{RecordedPublish, RecordedSend, ScriptedBackend};
pub use types::{
    AudioPublishOptions, AudioStats, BackendConnectionState, DataStats, Reliability, Role,
    SendLimits, TrackConfig,
};
