//! Named resource registries
//!
//! A session owns two keyed collections of sub-resources: outbound
//! audio tracks and data channels. Both share the same generic
//! behavior — uniqueness of names, existence checks, ownership of
//! whatever backend sub-handle the resource type carries — and both
//! are only ever mutated on the host thread, so no locking is needed
//! here by construction.

use std::collections::HashMap;

use roomlink_backend::{BackendTrack, Reliability};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Keyed collection of named resources.
///
/// Enforces name uniqueness and clean create/destroy semantics
/// independent of session state.
pub struct NamedRegistry<R> {
    kind: &'static str,
    entries: HashMap<String, R>,
}

impl<R> NamedRegistry<R> {
    /// Create an empty registry. `kind` names the resource type in
    /// logs ("audio track", "data channel").
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    /// Insert a resource under `name`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if `name` is empty
    /// - [`Error::AlreadyExists`] if `name` resolves to a live resource
    pub fn insert(&mut self, name: &str, resource: R) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "{} name cannot be empty",
                self.kind
            )));
        }
        if self.entries.contains_key(name) {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        debug!(kind = self.kind, name, "registered resource");
        self.entries.insert(name.to_string(), resource);
        Ok(())
    }

    /// Remove the resource under `name`, releasing whatever it owns.
    /// Returns `false` if the name is absent, leaving the registry
    /// unchanged.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.entries.remove(name) {
            Some(_) => {
                debug!(kind = self.kind, name, "destroyed resource");
                true
            }
            None => false,
        }
    }

    /// Non-mutating lookup. The reference must not be used to extend
    /// the resource's lifetime beyond its synchronous use.
    pub fn get(&self, name: &str) -> Option<&R> {
        self.entries.get(name)
    }

    /// True if `name` currently resolves to a live resource.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of live resources.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no resources are live.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of all live resources, in no particular order.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Destroy every live entry. Used once at session teardown;
    /// proceeds best-effort so teardown cannot fail on a single bad
    /// entry.
    pub fn clear(&mut self) {
        let count = self.entries.len();
        if count > 0 {
            warn!(kind = self.kind, count, "clearing live resources at teardown");
        }
        self.entries.clear();
    }
}

/// Immutable configuration for a named audio track, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTrackConfig {
    /// Sample rate in Hz.
    pub sample_rate: i32,
    /// Channel count (interleaved).
    pub channels: i32,
    /// Target ring buffer depth in milliseconds (0 = backend default).
    pub buffer_ms: i32,
}

impl Default for AudioTrackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 1,
            buffer_ms: 0,
        }
    }
}

impl AudioTrackConfig {
    /// Validate structural invariants (positive rate and channels,
    /// non-negative buffer depth).
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate <= 0 {
            return Err(Error::InvalidConfig(format!(
                "sample_rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.channels <= 0 {
            return Err(Error::InvalidConfig(format!(
                "channels must be positive, got {}",
                self.channels
            )));
        }
        if self.buffer_ms < 0 {
            return Err(Error::InvalidConfig(format!(
                "buffer_ms must be non-negative, got {}",
                self.buffer_ms
            )));
        }
        Ok(())
    }
}

/// A live named audio track: immutable config plus the owned backend
/// sub-handle. Dropping the track releases the handle.
pub struct NamedAudioTrack {
    config: AudioTrackConfig,
    handle: Box<dyn BackendTrack>,
}

impl NamedAudioTrack {
    pub(crate) fn new(config: AudioTrackConfig, handle: Box<dyn BackendTrack>) -> Self {
        Self { config, handle }
    }

    /// The configuration this track was created with.
    pub fn config(&self) -> &AudioTrackConfig {
        &self.config
    }

    pub(crate) fn handle(&self) -> &dyn BackendTrack {
        self.handle.as_ref()
    }
}

/// Immutable configuration for a named data channel, fixed at
/// creation. The channel owns no backend handle; these parameters are
/// supplied per-send to the shared connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataChannelConfig {
    /// Wire label for the channel.
    pub label: String,
    /// Delivery class for sends on this channel.
    pub reliability: Reliability,
    /// Preserve ordering of sends on this channel.
    pub ordered: bool,
}

impl DataChannelConfig {
    /// Validate structural invariants (non-empty label).
    pub fn validate(&self) -> Result<()> {
        if self.label.is_empty() {
            return Err(Error::InvalidConfig(
                "data channel label cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// A live named data channel: captured send parameters only.
#[derive(Debug, Clone)]
pub struct NamedDataChannel {
    config: DataChannelConfig,
}

impl NamedDataChannel {
    pub(crate) fn new(config: DataChannelConfig) -> Self {
        Self { config }
    }

    /// The configuration this channel was created with.
    pub fn config(&self) -> &DataChannelConfig {
        &self.config
    }
}
