//! Audio multiplexer.
//!
//! Drains the engine's audio queue into `OPUS`/`AUDI` messages on the
//! shared transport, independently of graphics frame boundaries. The
//! loop is cheap while audio flows and backs off in tiers during
//! silence:
//!
//! ```text
//! empty polls    sleep
//! ───────────    ───────
//!   0 ..  100    100 µs
//! 100 .. 1000      1 ms
//! 1000 ..          5 ms
//! ```
//!
//! Read errors never end the connection by themselves; only a failed
//! send does.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::{SessionError, WireError};
use crate::session::{AudioFormat, SessionHandle};
use crate::transport::TransportSink;
use crate::wire::{AudioCodec, AudioFrame};

// ── AudioConfig ──────────────────────────────────────────────────

/// Runtime knobs for [`AudioMultiplexer`].
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Which wire family to emit.
    pub codec: AudioCodec,
    /// Scratch buffer handed to the engine for each read.
    pub read_buffer_size: usize,
    /// Hard cap on frames forwarded per iteration.
    pub max_frames_per_batch: usize,
    /// Sleep schedule while the engine has nothing queued.
    pub idle: IdleBackoff,
    /// Silence longer than this (after audio has flowed) is a stall.
    pub stall_threshold: Duration,
    /// Empty polls required before a stall is reported.
    pub stall_empty_polls: u32,
    /// Delay after a read error below the backoff threshold.
    pub error_retry_delay: Duration,
    /// Delay once consecutive errors reach the threshold.
    pub error_backoff: Duration,
    pub error_backoff_threshold: u32,
    /// When to log the engine's buffer state if nothing was sent yet.
    pub startup_check_after: Duration,
}

impl AudioConfig {
    /// Defaults sized for `codec`: one Opus packet fits in 4 KiB, PCM
    /// reads use 8 KiB.
    pub fn for_codec(codec: AudioCodec) -> Self {
        let read_buffer_size = match codec {
            AudioCodec::Opus => 4096,
            AudioCodec::Pcm => 8192,
        };
        Self {
            codec,
            read_buffer_size,
            max_frames_per_batch: 10,
            idle: IdleBackoff::default(),
            stall_threshold: Duration::from_secs(2),
            stall_empty_polls: 500,
            error_retry_delay: Duration::from_millis(1),
            error_backoff: Duration::from_millis(100),
            error_backoff_threshold: 10,
            startup_check_after: Duration::from_secs(3),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self::for_codec(AudioCodec::Opus)
    }
}

// ── IdleBackoff ──────────────────────────────────────────────────

/// Three-tier sleep schedule keyed on consecutive empty polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleBackoff {
    pub active: Duration,
    pub idle: Duration,
    pub deep_idle: Duration,
    /// Empty polls before `idle` applies.
    pub idle_after: u32,
    /// Empty polls before `deep_idle` applies.
    pub deep_idle_after: u32,
}

impl Default for IdleBackoff {
    fn default() -> Self {
        Self {
            active: Duration::from_micros(100),
            idle: Duration::from_millis(1),
            deep_idle: Duration::from_millis(5),
            idle_after: 100,
            deep_idle_after: 1000,
        }
    }
}

impl IdleBackoff {
    pub fn delay(&self, empty_polls: u32) -> Duration {
        if empty_polls < self.idle_after {
            self.active
        } else if empty_polls < self.deep_idle_after {
            self.idle
        } else {
            self.deep_idle
        }
    }
}

// ── StallDetector ────────────────────────────────────────────────

/// Tracks silence after audio has started and reports each stall once.
#[derive(Debug)]
pub struct StallDetector {
    threshold: Duration,
    min_empty_polls: u32,
    frames_seen: u64,
    last_frame_at: Option<Instant>,
    empty_polls: u32,
    reported: bool,
}

impl StallDetector {
    pub fn new(threshold: Duration, min_empty_polls: u32) -> Self {
        Self {
            threshold,
            min_empty_polls,
            frames_seen: 0,
            last_frame_at: None,
            empty_polls: 0,
            reported: false,
        }
    }

    pub fn empty_polls(&self) -> u32 {
        self.empty_polls
    }

    /// Record an empty poll at `now`. Returns the silence duration the
    /// first time a stall episode qualifies, `None` otherwise.
    pub fn record_empty_at(&mut self, now: Instant) -> Option<Duration> {
        self.empty_polls = self.empty_polls.saturating_add(1);
        if self.reported || self.frames_seen == 0 || self.empty_polls < self.min_empty_polls {
            return None;
        }
        let silent_for = now.saturating_duration_since(self.last_frame_at?);
        if silent_for <= self.threshold {
            return None;
        }
        self.reported = true;
        Some(silent_for)
    }

    /// Record forwarded frames at `now`. Returns `true` when this ends a
    /// reported stall.
    pub fn record_frames_at(&mut self, count: u64, now: Instant) -> bool {
        let resumed = self.reported;
        self.empty_polls = 0;
        self.reported = false;
        if count > 0 {
            self.frames_seen += count;
            self.last_frame_at = Some(now);
        }
        resumed
    }
}

// ── AudioMultiplexer ─────────────────────────────────────────────

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioStats {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub read_errors: u64,
    pub stalls: u64,
}

/// What one [`AudioMultiplexer::pump`] call did, and how long the
/// caller should wait before the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pump {
    /// Nothing queued.
    Idle(Duration),
    /// Forwarded this many frames; yield before pumping again.
    Sent(usize),
    /// A read failed.
    Failed(Duration),
}

/// Per-connection audio loop state.
pub struct AudioMultiplexer {
    config: AudioConfig,
    buf: Vec<u8>,
    format: AudioFormat,
    stall: StallDetector,
    consecutive_errors: u32,
    started_at: Instant,
    startup_checked: bool,
    stats: AudioStats,
}

impl AudioMultiplexer {
    pub fn new(config: AudioConfig) -> Self {
        let stall = StallDetector::new(config.stall_threshold, config.stall_empty_polls);
        Self {
            buf: vec![0u8; config.read_buffer_size],
            format: AudioFormat::default(),
            stall,
            consecutive_errors: 0,
            started_at: Instant::now(),
            startup_checked: false,
            stats: AudioStats::default(),
            config,
        }
    }

    pub fn stats(&self) -> AudioStats {
        self.stats
    }

    /// Run until `cancel` fires or the transport fails.
    pub async fn run(
        &mut self,
        session: &dyn SessionHandle,
        sink: &dyn TransportSink,
        cancel: &CancellationToken,
    ) -> Result<AudioStats, WireError> {
        info!(codec = ?self.config.codec, "audio streaming started");
        self.started_at = Instant::now();

        while !cancel.is_cancelled() {
            let step = tokio::select! {
                _ = cancel.cancelled() => break,
                step = self.pump(session, sink) => step?,
            };
            let delay = match step {
                Pump::Sent(_) => {
                    tokio::task::yield_now().await;
                    continue;
                }
                Pump::Idle(delay) | Pump::Failed(delay) => delay,
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(frames_sent = self.stats.frames_sent, "audio streaming ended");
        Ok(self.stats)
    }

    /// One iteration: forward up to a batch of frames, or report how
    /// long to back off.
    pub async fn pump(
        &mut self,
        session: &dyn SessionHandle,
        sink: &dyn TransportSink,
    ) -> Result<Pump, WireError> {
        if !session.has_audio() {
            return Ok(Pump::Idle(self.on_empty(session)));
        }
        self.startup_checked = true;
        if let Some(format) = session.audio_format() {
            self.format = format;
        }

        let mut sent = 0;
        while sent < self.config.max_frames_per_batch && session.has_audio() {
            let len = match session.read_audio_frame(&mut self.buf) {
                Ok(0) => break,
                Ok(len) => len,
                Err(e) => return Ok(Pump::Failed(self.on_error(&e))),
            };
            let frame = AudioFrame {
                codec: self.config.codec,
                sample_rate: self.format.sample_rate,
                channels: self.format.channels,
                data: Bytes::copy_from_slice(&self.buf[..len]),
            };
            let bytes = match frame.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(len, error = %e, "dropping oversized audio frame");
                    continue;
                }
            };
            sink.send_binary(bytes).await?;
            sent += 1;
            self.stats.frames_sent += 1;
            self.stats.bytes_sent += len as u64;
            if self.stats.frames_sent == 1 {
                info!(
                    sample_rate = self.format.sample_rate,
                    channels = self.format.channels,
                    "audio stream started"
                );
            }
        }

        if sent == 0 {
            // The engine claimed audio but produced none; back off as if idle.
            return Ok(Pump::Idle(self.on_empty(session)));
        }
        self.consecutive_errors = 0;
        if self.stall.record_frames_at(sent as u64, Instant::now()) {
            info!(frames_sent = self.stats.frames_sent, "audio stream resumed after stall");
        }
        trace!(sent, "audio batch forwarded");
        Ok(Pump::Sent(sent))
    }

    fn on_empty(&mut self, session: &dyn SessionHandle) -> Duration {
        let now = Instant::now();

        if !self.startup_checked
            && now.saturating_duration_since(self.started_at) >= self.config.startup_check_after
        {
            self.startup_checked = true;
            match session.audio_stats() {
                Some(s) if s.initialized => info!(
                    frames_sent = self.stats.frames_sent,
                    buffered = s.available(),
                    "audio startup check: initialized"
                ),
                Some(_) => warn!(
                    after = ?self.config.startup_check_after,
                    "audio startup check: engine audio not initialized"
                ),
                None => debug!("audio startup check: engine exposes no buffer stats"),
            }
        }

        if let Some(silent_for) = self.stall.record_empty_at(now) {
            self.stats.stalls += 1;
            warn!(
                silent_for = ?silent_for,
                frames_sent = self.stats.frames_sent,
                "audio stream may be stalled"
            );
            if let Some(s) = session.audio_stats() {
                warn!(
                    initialized = s.initialized,
                    write_pos = s.write_pos,
                    read_pos = s.read_pos,
                    buffer_size = s.buffer_size,
                    available = s.available(),
                    "audio buffer diagnostics"
                );
            }
        }

        self.config.idle.delay(self.stall.empty_polls())
    }

    fn on_error(&mut self, e: &SessionError) -> Duration {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.stats.read_errors += 1;
        let n = self.consecutive_errors;
        if n <= 3 || n % 100 == 0 {
            error!(count = n, error = %e, "audio read failed");
        }
        if n >= self.config.error_backoff_threshold {
            if n == self.config.error_backoff_threshold {
                warn!(count = n, "repeated audio read errors, backing off");
            }
            self.config.error_backoff
        } else {
            self.config.error_retry_delay
        }
    }
}
