use crate::error::{NodeError, NodeResult};
use crate::transport::TransferSummary;
use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Transfers kept open at once; the oldest key is evicted beyond this
const MAX_PENDING: usize = 8;

/// Frame cap assumed until the sender's `transport.max_frames` is given
pub const DEFAULT_MAX_FRAMES: usize = 50;

/// A transfer put back together from its frames
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledSnapshot {
    pub summary: TransferSummary,
    /// Frames received, concatenated in index order
    pub data: Vec<u8>,
    /// Indices below `summary.attempted` that never arrived
    pub missing: Vec<usize>,
    pub sample_rate: u32,
}

impl AssembledSnapshot {
    pub fn key(&self) -> u64 {
        self.summary.key
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.summary.is_complete() && self.data.len() == self.summary.size
    }

    /// Write the PCM data as `snapshot-<key>.wav` (16-bit mono) under `dir`
    pub fn write_wav(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        let path = dir.join(format!("snapshot-{}.wav", self.key()));

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(&path, spec)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        for pair in self.data.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        writer.finalize()?;

        Ok(path)
    }
}

/// Collects frames per grouping key until the transfer's summary arrives
pub struct SnapshotAssembler {
    sample_rate: u32,
    max_frames: usize,
    pending: HashMap<u64, BTreeMap<usize, Vec<u8>>>,
}

impl SnapshotAssembler {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            max_frames: DEFAULT_MAX_FRAMES,
            pending: HashMap::new(),
        }
    }

    /// Frame indices at or above `max_frames` are never expected from a sender
    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// Transfers with frames but no summary yet
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn ingest_chunk(&mut self, key: u64, index: usize, bytes: Vec<u8>) {
        if index >= self.max_frames {
            warn!("Transfer {}: frame {} beyond the {} frame cap", key, index, self.max_frames);
            return;
        }

        if !self.pending.contains_key(&key) && self.pending.len() >= MAX_PENDING {
            if let Some(&oldest) = self.pending.keys().min() {
                warn!("Dropping incomplete transfer {} without summary", oldest);
                self.pending.remove(&oldest);
            }
        }

        let frames = self.pending.entry(key).or_default();
        if frames.insert(index, bytes).is_some() {
            debug!("Transfer {}: duplicate frame {}", key, index);
        }
    }

    /// Close the transfer named by a `key:size:succeeded:attempted` summary
    pub fn ingest_summary(&mut self, text: &str) -> NodeResult<AssembledSnapshot> {
        let summary: TransferSummary = text.parse()?;
        if summary.attempted > self.max_frames {
            return Err(NodeError::Validation(format!(
                "summary for transfer {} claims {} frames, cap is {}",
                summary.key, summary.attempted, self.max_frames
            )));
        }

        // A transfer whose every frame failed leaves nothing pending
        let frames = match self.pending.remove(&summary.key) {
            Some(frames) => frames,
            None if summary.succeeded == 0 => BTreeMap::new(),
            None => {
                return Err(NodeError::Validation(format!(
                    "summary for unknown transfer {}",
                    summary.key
                )))
            }
        };

        let missing: Vec<usize> = (0..summary.attempted)
            .filter(|index| !frames.contains_key(index))
            .collect();
        if frames.len() != summary.succeeded {
            warn!(
                "Transfer {}: summary reports {} frames, received {}",
                summary.key,
                summary.succeeded,
                frames.len()
            );
        }

        let data: Vec<u8> = frames.into_values().flatten().collect();

        Ok(AssembledSnapshot {
            summary,
            data,
            missing,
            sample_rate: self.sample_rate,
        })
    }
}
