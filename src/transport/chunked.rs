//! Chunked transfer of binary payloads over a size-limited pub/sub channel
//!
//! A payload of `S` bytes is cut into frames of at most `max_chunk` bytes and
//! published in index order on `base/audio/<key>/<index>`. At most
//! `max_frames` frames are sent; anything past `max_frames * max_chunk` bytes
//! is dropped. A summary `key:size:succeeded:attempted` on `base/audio/info`
//! closes every transfer, including aborted ones, so a receiver can tell a
//! complete transfer from a partial one.

use super::bus::MessageBus;
use super::topics::Topics;
use crate::config::TransportConfig;
use crate::error::NodeError;
use crate::link::LinkStateMachine;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a payload is cut into frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub payload_len: usize,
    pub max_chunk: usize,
    pub frame_count: usize,
    /// Bytes covered by the frames
    pub sendable_len: usize,
}

impl ChunkPlan {
    pub fn new(payload_len: usize, max_chunk: usize, max_frames: usize) -> Self {
        let max_chunk = max_chunk.max(1);
        let needed = payload_len.div_ceil(max_chunk);
        let frame_count = needed.min(max_frames);
        let sendable_len = payload_len.min(frame_count * max_chunk);

        Self {
            payload_len,
            max_chunk,
            frame_count,
            sendable_len,
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.sendable_len < self.payload_len
    }

    /// Byte range of frame `index`
    pub fn frame_range(&self, index: usize) -> Range<usize> {
        let start = (index * self.max_chunk).min(self.sendable_len);
        let end = (start + self.max_chunk).min(self.sendable_len);
        start..end
    }
}

/// Completion record published after every transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    pub key: u64,
    /// Size of the original payload, before any truncation
    pub size: usize,
    pub succeeded: usize,
    pub attempted: usize,
}

impl TransferSummary {
    pub fn is_complete(&self) -> bool {
        self.succeeded == self.attempted
    }
}

impl fmt::Display for TransferSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.key, self.size, self.succeeded, self.attempted)
    }
}

impl FromStr for TransferSummary {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || NodeError::Validation(format!("malformed transfer summary: {:?}", s));
        let mut parts = s.trim().split(':');
        let mut next = || parts.next().ok_or_else(invalid);

        let key = next()?.parse().map_err(|_| invalid())?;
        let size = next()?.parse().map_err(|_| invalid())?;
        let succeeded = next()?.parse().map_err(|_| invalid())?;
        let attempted = next()?.parse().map_err(|_| invalid())?;

        if parts.next().is_some() || succeeded > attempted {
            return Err(invalid());
        }

        Ok(Self {
            key,
            size,
            succeeded,
            attempted,
        })
    }
}

/// Outcome of one `ChunkedTransport::send`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub summary: TransferSummary,
    pub truncated: bool,
    /// The link was found down before all planned frames were attempted
    pub aborted: bool,
    pub summary_published: bool,
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub max_chunk: usize,
    pub max_frames: usize,
    pub inter_frame_delay: Duration,
    pub link_check_every: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::from(&TransportConfig::default())
    }
}

impl From<&TransportConfig> for TransportOptions {
    fn from(cfg: &TransportConfig) -> Self {
        Self {
            max_chunk: cfg.max_chunk,
            max_frames: cfg.max_frames,
            inter_frame_delay: Duration::from_millis(cfg.inter_frame_delay_ms),
            link_check_every: cfg.link_check_every,
        }
    }
}

pub struct ChunkedTransport {
    options: TransportOptions,
    topics: Topics,
}

impl ChunkedTransport {
    pub fn new(options: TransportOptions, topics: Topics) -> Self {
        Self { options, topics }
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    pub fn plan(&self, payload_len: usize) -> ChunkPlan {
        ChunkPlan::new(payload_len, self.options.max_chunk, self.options.max_frames)
    }

    /// Send `payload` as frames grouped under `key`, then publish the summary.
    ///
    /// Frames are attempted once each. A failed frame is counted and skipped;
    /// the link is re-checked every `link_check_every` frames and the rest of
    /// the transfer is abandoned once it is down.
    pub async fn send<B: MessageBus>(
        &self,
        link: &mut LinkStateMachine<B>,
        key: u64,
        payload: &[u8],
    ) -> TransferReport {
        let plan = self.plan(payload.len());
        if plan.is_truncated() {
            warn!(
                "Transfer {}: {} bytes exceed {} frames of {} bytes; sending the first {} bytes",
                key, plan.payload_len, self.options.max_frames, plan.max_chunk, plan.sendable_len
            );
        }

        let check_every = self.options.link_check_every.max(1);
        let mut attempted = 0;
        let mut succeeded = 0;
        let mut aborted = false;

        if !link.refresh().is_connected() {
            warn!("Transfer {}: link down, nothing sent", key);
            aborted = plan.frame_count > 0;
        } else {
            for index in 0..plan.frame_count {
                if index > 0 && index % check_every == 0 && !link.refresh().is_connected() {
                    warn!(
                        "Transfer {}: link lost after {} of {} frames; abandoning the rest",
                        key, attempted, plan.frame_count
                    );
                    aborted = true;
                    break;
                }

                if index > 0 && !self.options.inter_frame_delay.is_zero() {
                    tokio::time::sleep(self.options.inter_frame_delay).await;
                }

                attempted += 1;
                let frame = payload[plan.frame_range(index)].to_vec();
                let topic = self.topics.audio_chunk(key, index);
                if link.publish(&topic, frame, false).await {
                    succeeded += 1;
                } else {
                    debug!("Transfer {}: frame {} not published", key, index);
                }
            }
        }

        let summary = TransferSummary {
            key,
            size: payload.len(),
            succeeded,
            attempted,
        };

        let summary_published = link
            .publish(&self.topics.audio_info(), summary.to_string().into_bytes(), false)
            .await;

        if summary.is_complete() && !aborted {
            info!("Transfer {} complete: {} frames, {} bytes", key, succeeded, plan.sendable_len);
        } else {
            warn!("Transfer {} partial: {}", key, summary);
        }

        TransferReport {
            summary,
            truncated: plan.is_truncated(),
            aborted,
            summary_published,
        }
    }
}
