//! Parsing and range checks for inbound commands and configuration values

use crate::audio::CaptureSchedule;
use crate::error::{NodeError, NodeResult};

pub const MIN_TONE_HZ: u32 = 20;
pub const MAX_TONE_HZ: u32 = 20_000;
pub const MAX_TONE_MS: u32 = 10_000;
pub const MIN_CAPTURE_MS: u64 = 100;
pub const MAX_CAPTURE_MS: u64 = 10_000;
pub const MAX_CAPTURE_INTERVAL_MS: u64 = 3_600_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Status,
    StartAudio,
    StartAudioData,
    StopAudio,
    AudioStatus,
    Restart,
    Unknown(String),
}

impl Command {
    /// Case-insensitive; surrounding whitespace is ignored
    pub fn parse(text: &str) -> Self {
        let command = text.trim();
        match command.to_ascii_lowercase().as_str() {
            "ping" => Self::Ping,
            "status" => Self::Status,
            "start_audio" => Self::StartAudio,
            "start_audio_data" => Self::StartAudioData,
            "stop_audio" => Self::StopAudio,
            "audio_status" => Self::AudioStatus,
            "restart" => Self::Restart,
            _ => Self::Unknown(command.to_string()),
        }
    }
}

/// A validated value for one of the `config/<key>` topics
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigUpdate {
    Debug(bool),
    VolumeThreshold(f32),
    PlayTone { frequency_hz: u32, duration_ms: u32 },
    CaptureDurationMs(u64),
    CaptureIntervalMs(u64),
}

fn invalid(key: &str, reason: impl std::fmt::Display) -> NodeError {
    NodeError::Validation(format!("invalid {}: {}", key, reason))
}

impl ConfigUpdate {
    /// Parse and range-check `value` for `key`.
    ///
    /// `capture_interval_ms` is checked against the capture duration in
    /// `current`, so a rejected value never leaves the interval shorter
    /// than the window it schedules.
    pub fn parse(key: &str, value: &str, current: CaptureSchedule) -> NodeResult<Self> {
        let value = value.trim();
        match key {
            "debug" => parse_bool(value)
                .map(Self::Debug)
                .ok_or_else(|| invalid(key, format!("expected true/false, got {:?}", value))),

            "volume_threshold" => {
                let threshold: f32 = value
                    .parse()
                    .map_err(|_| invalid(key, format!("not a number: {:?}", value)))?;
                if !(threshold > 0.0 && threshold < 1.0) {
                    return Err(invalid(key, format!("{} is outside (0, 1)", threshold)));
                }
                Ok(Self::VolumeThreshold(threshold))
            }

            "play_tone" => {
                let (freq, duration) = value
                    .split_once(',')
                    .ok_or_else(|| invalid(key, "expected \"<freq>,<duration_ms>\""))?;
                let frequency_hz: u32 = freq
                    .trim()
                    .parse()
                    .map_err(|_| invalid(key, format!("bad frequency {:?}", freq.trim())))?;
                let duration_ms: u32 = duration
                    .trim()
                    .parse()
                    .map_err(|_| invalid(key, format!("bad duration {:?}", duration.trim())))?;
                if !(MIN_TONE_HZ..=MAX_TONE_HZ).contains(&frequency_hz) {
                    return Err(invalid(
                        key,
                        format!("frequency {} Hz outside [{}, {}]", frequency_hz, MIN_TONE_HZ, MAX_TONE_HZ),
                    ));
                }
                if !(1..=MAX_TONE_MS).contains(&duration_ms) {
                    return Err(invalid(
                        key,
                        format!("duration {} ms outside [1, {}]", duration_ms, MAX_TONE_MS),
                    ));
                }
                Ok(Self::PlayTone {
                    frequency_hz,
                    duration_ms,
                })
            }

            "capture_duration_ms" => {
                let duration = parse_ms(key, value)?;
                if !(MIN_CAPTURE_MS..=MAX_CAPTURE_MS).contains(&duration) {
                    return Err(invalid(
                        key,
                        format!("{} outside [{}, {}]", duration, MIN_CAPTURE_MS, MAX_CAPTURE_MS),
                    ));
                }
                Ok(Self::CaptureDurationMs(duration))
            }

            "capture_interval_ms" => {
                let interval = parse_ms(key, value)?;
                if !(current.duration_ms..=MAX_CAPTURE_INTERVAL_MS).contains(&interval) {
                    return Err(invalid(
                        key,
                        format!(
                            "{} outside [{}, {}]",
                            interval, current.duration_ms, MAX_CAPTURE_INTERVAL_MS
                        ),
                    ));
                }
                Ok(Self::CaptureIntervalMs(interval))
            }

            _ => Err(NodeError::Validation(format!("unknown config key: {}", key))),
        }
    }
}

fn parse_ms(key: &str, value: &str) -> NodeResult<u64> {
    value
        .parse()
        .map_err(|_| invalid(key, format!("not a whole number of milliseconds: {:?}", value)))
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" => Some(true),
        "false" | "0" | "off" => Some(false),
        _ => None,
    }
}
