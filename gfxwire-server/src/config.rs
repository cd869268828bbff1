//! Configuration for the bridge service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use gfxwire_core::codec::DEFAULT_MAX_FRAME_SIZE;
use gfxwire_core::pipeline::{AudioConfig, IdleBackoff, StreamConfig};
use gfxwire_core::wire::{AudioCodec, AudioFrame};
use serde::{Deserialize, Serialize};

use crate::registry::MaxSessions;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Listener settings.
    pub network: NetworkConfig,
    /// Session capacity.
    pub sessions: SessionsConfig,
    /// Destination allowlist.
    pub security: SecurityConfig,
    /// Graphics streaming.
    pub streaming: StreamingConfig,
    /// Audio streaming.
    pub audio: AudioSettings,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the bridge listens on.
    pub listen_address: String,
    /// Largest transport frame accepted or sent, in bytes.
    pub max_frame_size: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Concurrent sessions (2..=1000). Invalid values fall back to 100.
    pub max_sessions: MaxSessions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// JSON allowlist. Empty means no policy: every destination is
    /// allowed.
    pub policy_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Upper bound on one blocking engine poll, in milliseconds.
    pub poll_timeout_ms: u64,
    /// Pass receiver frame acknowledgments on to the engine.
    pub forward_frame_acks: bool,
    /// Close-reason length limit, in bytes.
    pub close_reason_limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodecSetting {
    Opus,
    Pcm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub enabled: bool,
    pub codec: AudioCodecSetting,
    /// Engine read buffer in bytes; unset picks a size for the codec.
    pub read_buffer_size: Option<usize>,
    pub max_frames_per_batch: usize,
    pub stall_threshold_ms: u64,
    pub stall_empty_polls: u32,
    pub error_backoff_threshold: u32,
    /// Idle sleep while recently active, in microseconds.
    pub idle_active_us: u64,
    /// Idle sleep after 100 empty polls, in milliseconds.
    pub idle_ms: u64,
    /// Idle sleep after 1000 empty polls, in milliseconds.
    pub deep_idle_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8765".into(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 16,
            forward_frame_acks: false,
            close_reason_limit: 120,
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            codec: AudioCodecSetting::Opus,
            read_buffer_size: None,
            max_frames_per_batch: 10,
            stall_threshold_ms: 2000,
            stall_empty_polls: 500,
            error_backoff_threshold: 10,
            idle_active_us: 100,
            idle_ms: 1,
            deep_idle_ms: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl BridgeConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn to_toml(&self) -> Result<String, crate::BridgeError> {
        toml::to_string_pretty(self).map_err(|e| crate::BridgeError::Config(e.to_string()))
    }

    pub fn policy_path(&self) -> Option<PathBuf> {
        let path = self.security.policy_file.trim();
        (!path.is_empty()).then(|| PathBuf::from(path))
    }

    /// Runtime settings for one streaming connection.
    pub fn to_stream_config(&self) -> StreamConfig {
        let s = &self.streaming;
        StreamConfig {
            poll_timeout: Duration::from_millis(s.poll_timeout_ms.clamp(1, 1000)),
            forward_frame_acks: s.forward_frame_acks,
            // WebSocket close reasons cap out at 123 bytes.
            close_reason_limit: s.close_reason_limit.clamp(1, 123),
            audio: self.audio.enabled.then(|| self.to_audio_config()),
        }
    }

    pub fn to_audio_config(&self) -> AudioConfig {
        let a = &self.audio;
        let codec = match a.codec {
            AudioCodecSetting::Opus => AudioCodec::Opus,
            AudioCodecSetting::Pcm => AudioCodec::Pcm,
        };
        let defaults = AudioConfig::for_codec(codec);
        AudioConfig {
            read_buffer_size: a
                .read_buffer_size
                .unwrap_or(defaults.read_buffer_size)
                .clamp(256, AudioFrame::MAX_PAYLOAD),
            max_frames_per_batch: a.max_frames_per_batch.clamp(1, 100),
            idle: IdleBackoff {
                active: Duration::from_micros(a.idle_active_us.clamp(1, 10_000)),
                idle: Duration::from_millis(a.idle_ms.clamp(1, 100)),
                deep_idle: Duration::from_millis(a.deep_idle_ms.clamp(1, 100)),
                ..IdleBackoff::default()
            },
            stall_threshold: Duration::from_millis(a.stall_threshold_ms.max(100)),
            stall_empty_polls: a.stall_empty_polls.max(1),
            error_backoff_threshold: a.error_backoff_threshold.max(1),
            ..defaults
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
