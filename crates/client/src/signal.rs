//! Test signal generators
//!
//! Two periodic producers used to exercise a live session end to end:
//! a sine tone published over the audio path and a structured probe
//! payload sent over the data path. Both are layered purely on the
//! public [`Session`] operations and are driven from the host tick,
//! so they live on the consumer thread like everything else.
//!
//! Both defer their own start until the session reports readiness,
//! then wait one settle delay before the first payload so session
//! negotiation can finish. Stopping is idempotent and safe to call
//! during teardown; a stopped generator holds no pending work.

use std::f64::consts::TAU;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use roomlink_backend::Reliability;
use tracing::{debug, info, warn};

use crate::session::Session;

/// Probe payload header length: `[u64 time_us][u64 seq]`.
const PROBE_HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Stopped,
    /// Waiting for session readiness; re-polled every readiness
    /// retry interval.
    WaitingReady { next_poll: Option<Instant> },
    /// Ready, waiting out the settle delay before the first payload.
    Settling { until: Instant },
    Running { next_fire: Instant },
}

/// Tone generator parameters.
#[derive(Debug, Clone, Copy)]
pub struct ToneConfig {
    /// Tone frequency in Hz.
    pub frequency_hz: f64,
    /// Peak amplitude in [0.0, 1.0]; clamped at synthesis time.
    pub amplitude: f32,
    /// Sample rate of the synthesized buffers.
    pub sample_rate: i32,
    /// Channel count (the same sample is written to every channel).
    pub channels: i32,
    /// Synthesis period; each firing produces one period's worth of
    /// frames.
    pub period: Duration,
    /// Extra delay between readiness and the first published buffer.
    pub settle_delay: Duration,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 440.0,
            amplitude: 0.2,
            sample_rate: 48_000,
            channels: 1,
            period: Duration::from_millis(10),
            settle_delay: Duration::from_millis(500),
        }
    }
}

/// Periodic sine tone published through the ordinary audio path.
///
/// The running phase accumulator wraps modulo one full cycle so long
/// runs neither overflow nor lose precision.
pub struct ToneGenerator {
    config: ToneConfig,
    phase: Phase,
    tone_phase: f64,
    published_buffers: u64,
}

impl ToneGenerator {
    /// Create a stopped generator.
    pub fn new(config: ToneConfig) -> Self {
        Self {
            config,
            phase: Phase::Stopped,
            tone_phase: 0.0,
            published_buffers: 0,
        }
    }

    /// Request a start. Publishing begins only after the session is
    /// ready and the settle delay has passed; until then the
    /// generator polls readiness from [`tick`](ToneGenerator::tick).
    pub fn start(&mut self) {
        if self.phase == Phase::Stopped {
            info!(
                frequency_hz = self.config.frequency_hz,
                amplitude = self.config.amplitude,
                sample_rate = self.config.sample_rate,
                channels = self.config.channels,
                "starting tone generator"
            );
            self.phase = Phase::WaitingReady { next_poll: None };
        }
    }

    /// Stop the generator, clearing any pending retry or firing.
    /// Idempotent; safe to call during session teardown.
    pub fn stop(&mut self) {
        if self.phase != Phase::Stopped {
            info!("stopped tone generator");
            self.phase = Phase::Stopped;
        }
    }

    /// True once started and not yet stopped.
    pub fn is_active(&self) -> bool {
        self.phase != Phase::Stopped
    }

    /// Buffers published since creation.
    pub fn published_buffers(&self) -> u64 {
        self.published_buffers
    }

    /// Drive the generator from the host tick. Returns `true` if a
    /// publish was attempted during this call.
    pub fn tick(&mut self, session: &mut Session, now: Instant) -> bool {
        match self.phase {
            Phase::Stopped => false,
            Phase::WaitingReady { next_poll } => {
                if next_poll.is_some_and(|at| now < at) {
                    return false;
                }
                if session.is_ready() {
                    debug!("session ready, settling before first tone buffer");
                    self.phase = Phase::Settling {
                        until: now + self.config.settle_delay,
                    };
                } else {
                    self.phase = Phase::WaitingReady {
                        next_poll: Some(now + session.config().readiness_retry),
                    };
                }
                false
            }
            Phase::Settling { until } => {
                if now >= until {
                    self.phase = Phase::Running { next_fire: now };
                    self.tick(session, now)
                } else {
                    false
                }
            }
            Phase::Running { next_fire } => {
                if now < next_fire {
                    return false;
                }
                let buffer = self.synthesize();
                let frames_per_channel = buffer.len() / self.config.channels as usize;
                match session.publish_pcm(
                    &buffer,
                    frames_per_channel,
                    self.config.channels,
                    self.config.sample_rate,
                ) {
                    Ok(()) => self.published_buffers += 1,
                    Err(e) => warn!(error = %e, "tone publish failed"),
                }
                // A stalled host tick schedules from now rather than
                // bursting to catch up.
                let mut next = next_fire + self.config.period;
                if next <= now {
                    next = now + self.config.period;
                }
                self.phase = Phase::Running { next_fire: next };
                true
            }
        }
    }

    /// One period's worth of interleaved frames, continuing the
    /// running phase.
    fn synthesize(&mut self) -> Vec<i16> {
        let frames = ((self.config.sample_rate as u128 * self.config.period.as_micros())
            / 1_000_000) as usize;
        let frames = frames.max(1);
        let channels = self.config.channels.max(1) as usize;
        let phase_inc = TAU * self.config.frequency_hz / self.config.sample_rate as f64;
        let amp = f64::from(self.config.amplitude.clamp(0.0, 1.0)) * 32767.0;

        let mut buffer = vec![0i16; frames * channels];
        for frame in buffer.chunks_exact_mut(channels) {
            let s = (self.tone_phase.sin() * amp).round() as i32;
            let s = s.clamp(-32767, 32767) as i16;
            frame.fill(s);
            self.tone_phase += phase_inc;
            if self.tone_phase > TAU {
                self.tone_phase -= TAU;
            }
        }
        buffer
    }
}

/// Structured test-data generator parameters.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Interval between probe sends.
    pub period: Duration,
    /// Total payload size in bytes. Payloads of at least 16 bytes
    /// carry the decodable `[u64 time_us][u64 seq]` header.
    pub payload_bytes: usize,
    /// Delivery class for probe sends.
    pub reliability: Reliability,
    /// Named data channel to send on, or `None` for the default path.
    pub channel: Option<String>,
    /// Extra delay between readiness and the first probe.
    pub settle_delay: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(500),
            payload_bytes: 64,
            reliability: Reliability::Lossy,
            channel: None,
            settle_delay: Duration::from_millis(500),
        }
    }
}

/// Decoded header of one probe payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePayload {
    /// Sender capture timestamp, microseconds since the Unix epoch.
    pub time_us: u64,
    /// Monotonically increasing sequence counter.
    pub seq: u64,
}

impl ProbePayload {
    /// Decode the header from a received payload. Returns `None` for
    /// payloads too short to carry one.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < PROBE_HEADER_LEN {
            return None;
        }
        let time_us = u64::from_le_bytes(bytes[0..8].try_into().ok()?);
        let seq = u64::from_le_bytes(bytes[8..16].try_into().ok()?);
        Some(Self { time_us, seq })
    }

    /// One-way latency against a local receipt timestamp, saturating
    /// to zero when clocks disagree.
    pub fn latency(&self, received_at_us: u64) -> Duration {
        Duration::from_micros(received_at_us.saturating_sub(self.time_us))
    }
}

/// Current wall clock in microseconds since the Unix epoch, as
/// embedded in probe payloads.
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Periodic structured payloads sent through the ordinary data path,
/// for validating end-to-end delivery and measuring latency.
pub struct TestDataGenerator {
    config: ProbeConfig,
    phase: Phase,
    seq: u64,
    sent: u64,
}

impl TestDataGenerator {
    /// Create a stopped generator.
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            phase: Phase::Stopped,
            seq: 0,
            sent: 0,
        }
    }

    /// Request a start; same deferred-readiness pattern as the tone
    /// generator.
    pub fn start(&mut self) {
        if self.phase == Phase::Stopped {
            info!(
                period_ms = self.config.period.as_millis() as u64,
                payload_bytes = self.config.payload_bytes,
                reliability = ?self.config.reliability,
                "starting test data generator"
            );
            self.phase = Phase::WaitingReady { next_poll: None };
        }
    }

    /// Stop the generator. Idempotent; safe during teardown.
    pub fn stop(&mut self) {
        if self.phase != Phase::Stopped {
            info!("stopped test data generator");
            self.phase = Phase::Stopped;
        }
    }

    /// True once started and not yet stopped.
    pub fn is_active(&self) -> bool {
        self.phase != Phase::Stopped
    }

    /// Probes sent successfully since creation.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Next sequence number to be embedded.
    pub fn next_seq(&self) -> u64 {
        self.seq
    }

    /// Drive the generator from the host tick. Returns `true` if a
    /// probe send was attempted during this call.
    pub fn tick(&mut self, session: &Session, now: Instant) -> bool {
        match self.phase {
            Phase::Stopped => false,
            Phase::WaitingReady { next_poll } => {
                if next_poll.is_some_and(|at| now < at) {
                    return false;
                }
                if session.is_ready() {
                    debug!("session ready, settling before first probe");
                    self.phase = Phase::Settling {
                        until: now + self.config.settle_delay,
                    };
                } else {
                    self.phase = Phase::WaitingReady {
                        next_poll: Some(now + session.config().readiness_retry),
                    };
                }
                false
            }
            Phase::Settling { until } => {
                if now >= until {
                    self.phase = Phase::Running { next_fire: now };
                    self.tick(session, now)
                } else {
                    false
                }
            }
            Phase::Running { next_fire } => {
                if now < next_fire {
                    return false;
                }
                let payload = self.build_payload();
                let seq = self.seq;
                // The counter advances whether or not the send lands;
                // receivers detect loss through gaps.
                self.seq += 1;
                let result = match self.config.channel.as_deref() {
                    Some(name) => session.send_on_channel(name, &payload),
                    None => session.send(&payload, self.config.reliability),
                };
                match result {
                    Ok(()) => {
                        self.sent += 1;
                        debug!(seq, size = payload.len(), "sent probe");
                    }
                    Err(e) => warn!(seq, error = %e, "probe send failed"),
                }
                let mut next = next_fire + self.config.period;
                if next <= now {
                    next = now + self.config.period;
                }
                self.phase = Phase::Running { next_fire: next };
                true
            }
        }
    }

    /// `[u64 time_us][u64 seq][index padding]`; payloads too small
    /// for the header fall back to a fixed recognizable pattern.
    fn build_payload(&self) -> Vec<u8> {
        let n = self.config.payload_bytes.max(1);
        let mut payload = vec![0u8; n];
        if n >= PROBE_HEADER_LEN {
            payload[0..8].copy_from_slice(&now_micros().to_le_bytes());
            payload[8..16].copy_from_slice(&self.seq.to_le_bytes());
            for (i, byte) in payload.iter_mut().enumerate().skip(PROBE_HEADER_LEN) {
                *byte = (i & 0xFF) as u8;
            }
        } else {
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte = (i as u8) ^ 0x5A;
            }
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use roomlink_backend::ScriptedBackend;

    fn session_with(backend: ScriptedBackend) -> Session {
        let config = SessionConfig {
            token: "tok".to_string(),
            ..SessionConfig::default()
        };
        Session::new(config, Box::new(backend)).unwrap()
    }

    #[test]
    fn test_tone_defers_until_ready() {
        let backend = ScriptedBackend::new();
        let mut session = session_with(backend.clone());
        let mut tone = ToneGenerator::new(ToneConfig {
            settle_delay: Duration::ZERO,
            ..ToneConfig::default()
        });
        tone.start();

        let t0 = Instant::now();
        assert!(!tone.tick(&mut session, t0));
        assert!(backend.recorded_publishes().is_empty());

        session.connect().unwrap();
        // First poll after connect observes readiness; the next tick
        // publishes (settle delay is zero here).
        let retry = session.config().readiness_retry;
        assert!(!tone.tick(&mut session, t0 + retry));
        assert!(tone.tick(&mut session, t0 + retry));
        assert_eq!(backend.recorded_publishes().len(), 1);
        assert_eq!(tone.published_buffers(), 1);
    }

    #[test]
    fn test_tone_waits_out_settle_delay() {
        let backend = ScriptedBackend::new();
        let mut session = session_with(backend.clone());
        session.connect().unwrap();
        let mut tone = ToneGenerator::new(ToneConfig {
            settle_delay: Duration::from_millis(500),
            ..ToneConfig::default()
        });
        tone.start();

        let t0 = Instant::now();
        assert!(!tone.tick(&mut session, t0)); // observes ready, starts settling
        assert!(!tone.tick(&mut session, t0 + Duration::from_millis(100)));
        assert!(backend.recorded_publishes().is_empty());
        assert!(tone.tick(&mut session, t0 + Duration::from_millis(500)));
        assert_eq!(backend.recorded_publishes().len(), 1);
    }

    #[test]
    fn test_tone_buffer_shape() {
        let backend = ScriptedBackend::new();
        let mut session = session_with(backend.clone());
        session.connect().unwrap();
        let mut tone = ToneGenerator::new(ToneConfig {
            sample_rate: 48_000,
            channels: 2,
            period: Duration::from_millis(10),
            settle_delay: Duration::ZERO,
            ..ToneConfig::default()
        });
        tone.start();
        let t0 = Instant::now();
        tone.tick(&mut session, t0); // ready
        tone.tick(&mut session, t0); // publish

        let publishes = backend.recorded_publishes();
        assert_eq!(publishes.len(), 1);
        // 10ms at 48kHz
        assert_eq!(publishes[0].frames_per_channel, 480);
        assert_eq!(publishes[0].channels, 2);
        assert_eq!(publishes[0].sample_rate, 48_000);
    }

    #[test]
    fn test_tone_respects_period() {
        let backend = ScriptedBackend::new();
        let mut session = session_with(backend.clone());
        session.connect().unwrap();
        let mut tone = ToneGenerator::new(ToneConfig {
            period: Duration::from_millis(10),
            settle_delay: Duration::ZERO,
            ..ToneConfig::default()
        });
        tone.start();
        let t0 = Instant::now();
        tone.tick(&mut session, t0); // ready
        assert!(tone.tick(&mut session, t0));
        // Too early for the next buffer.
        assert!(!tone.tick(&mut session, t0 + Duration::from_millis(5)));
        assert!(tone.tick(&mut session, t0 + Duration::from_millis(10)));
        assert_eq!(backend.recorded_publishes().len(), 2);
    }

    #[test]
    fn test_stop_is_idempotent_and_clears_pending() {
        let backend = ScriptedBackend::new();
        let mut session = session_with(backend.clone());
        session.connect().unwrap();
        let mut tone = ToneGenerator::new(ToneConfig {
            settle_delay: Duration::ZERO,
            ..ToneConfig::default()
        });
        tone.start();
        assert!(tone.is_active());
        tone.stop();
        tone.stop();
        assert!(!tone.is_active());
        assert!(!tone.tick(&mut session, Instant::now()));
        assert!(backend.recorded_publishes().is_empty());
    }

    #[test]
    fn test_probe_payload_round_trip() {
        let backend = ScriptedBackend::new();
        let mut session = session_with(backend.clone());
        session.connect().unwrap();
        let mut gen = TestDataGenerator::new(ProbeConfig {
            payload_bytes: 64,
            settle_delay: Duration::ZERO,
            ..ProbeConfig::default()
        });
        gen.start();
        let t0 = Instant::now();
        gen.tick(&session, t0); // ready
        assert!(gen.tick(&session, t0));

        let sends = backend.recorded_sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].bytes.len(), 64);
        let probe = ProbePayload::decode(&sends[0].bytes).unwrap();
        assert_eq!(probe.seq, 0);
        let latency = probe.latency(now_micros());
        assert!(latency < Duration::from_secs(5));
        // Padding pattern after the header.
        assert_eq!(sends[0].bytes[16], 16);
        assert_eq!(sends[0].bytes[63], 63);
    }

    #[test]
    fn test_probe_sequence_increments() {
        let backend = ScriptedBackend::new();
        let mut session = session_with(backend.clone());
        session.connect().unwrap();
        let mut gen = TestDataGenerator::new(ProbeConfig {
            period: Duration::from_millis(100),
            settle_delay: Duration::ZERO,
            ..ProbeConfig::default()
        });
        gen.start();
        let t0 = Instant::now();
        gen.tick(&session, t0); // ready
        gen.tick(&session, t0);
        gen.tick(&session, t0 + Duration::from_millis(100));
        gen.tick(&session, t0 + Duration::from_millis(200));

        let seqs: Vec<u64> = backend
            .recorded_sends()
            .iter()
            .map(|s| ProbePayload::decode(&s.bytes).unwrap().seq)
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(gen.sent(), 3);
    }

    #[test]
    fn test_probe_uses_named_channel() {
        let backend = ScriptedBackend::new();
        let mut session = session_with(backend.clone());
        session.connect().unwrap();
        session
            .create_data_channel(
                "probe",
                crate::registry::DataChannelConfig {
                    label: "probe-v1".to_string(),
                    reliability: Reliability::Reliable,
                    ordered: true,
                },
            )
            .unwrap();
        let mut gen = TestDataGenerator::new(ProbeConfig {
            channel: Some("probe".to_string()),
            settle_delay: Duration::ZERO,
            ..ProbeConfig::default()
        });
        gen.start();
        let t0 = Instant::now();
        gen.tick(&session, t0);
        gen.tick(&session, t0);
        let sends = backend.recorded_sends();
        assert_eq!(sends[0].label.as_deref(), Some("probe-v1"));
        assert_eq!(sends[0].reliability, Reliability::Reliable);
    }

    #[test]
    fn test_tiny_payload_uses_fallback_pattern() {
        let gen = TestDataGenerator::new(ProbeConfig {
            payload_bytes: 4,
            ..ProbeConfig::default()
        });
        let payload = gen.build_payload();
        assert_eq!(payload, vec![0x5A, 0x5B, 0x58, 0x59]);
        assert!(ProbePayload::decode(&payload).is_none());
    }

    #[test]
    fn test_phase_accumulator_wraps() {
        let mut tone = ToneGenerator::new(ToneConfig {
            frequency_hz: 12_000.0,
            sample_rate: 48_000,
            period: Duration::from_millis(10),
            ..ToneConfig::default()
        });
        for _ in 0..1000 {
            let _ = tone.synthesize();
        }
        assert!(tone.tone_phase >= 0.0);
        assert!(tone.tone_phase <= TAU + f64::EPSILON);
    }

    #[test]
    fn test_decode_short_payload_is_none() {
        assert!(ProbePayload::decode(&[0u8; 15]).is_none());
        assert!(ProbePayload::decode(&[0u8; 16]).is_some());
    }

    #[test]
    fn test_latency_saturates_on_clock_skew() {
        let probe = ProbePayload {
            time_us: 1_000,
            seq: 0,
        };
        assert_eq!(probe.latency(500), Duration::ZERO);
        assert_eq!(probe.latency(3_500), Duration::from_micros(2_500));
    }
}
