use super::source::PcmBlock;

/// Raw PCM captured over one capture window
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSnapshot {
    /// Milliseconds on the pipeline's monotonic clock when capture finished;
    /// doubles as the grouping key of the transfer
    pub timestamp_ms: u64,
    /// Little-endian 16-bit mono PCM
    pub data: Vec<u8>,
    pub sample_rate: u32,
}

impl AudioSnapshot {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Capture window settings, read once per block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSchedule {
    pub duration_ms: u64,
    pub interval_ms: u64,
}

enum Phase {
    /// Waiting for the stream clock to reach `next_start_ms`
    Idle { next_start_ms: u64 },
    Capturing { started_ms: u64, buffer: Vec<u8> },
}

/// Interleaves capture and idle phases on the acquisition loop.
///
/// Time is measured in stream milliseconds (samples consumed / sample rate),
/// so capture length matches the audio actually accumulated regardless of
/// how the reads are scheduled.
pub struct SnapshotCapture {
    phase: Phase,
    samples_seen: u64,
    sample_rate: u32,
}

impl SnapshotCapture {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            phase: Phase::Idle { next_start_ms: 0 },
            samples_seen: 0,
            sample_rate,
        }
    }

    fn stream_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples_seen * 1000 / self.sample_rate as u64
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self.phase, Phase::Capturing { .. })
    }

    /// Abandon any partial capture; the next enabled block starts a new window
    pub fn reset(&mut self) {
        self.phase = Phase::Idle {
            next_start_ms: self.stream_ms(),
        };
    }

    /// Advance the stream clock past a block while snapshots are disabled.
    /// A partial capture is dropped and the next window may open immediately.
    pub fn skip(&mut self, block: &PcmBlock) {
        self.samples_seen += block.len() as u64;
        self.reset();
    }

    /// Feed one block. Returns the finished capture bytes once the window
    /// has accumulated `duration_ms` of audio.
    pub fn push(&mut self, block: &PcmBlock, schedule: CaptureSchedule) -> Option<Vec<u8>> {
        let block_start_ms = self.stream_ms();
        self.samples_seen += block.len() as u64;
        let block_end_ms = self.stream_ms();

        if let Phase::Idle { next_start_ms } = self.phase {
            if block_start_ms < next_start_ms {
                return None;
            }
            let expected = (schedule.duration_ms as usize * self.sample_rate as usize / 1000) * 2;
            self.phase = Phase::Capturing {
                started_ms: block_start_ms,
                buffer: Vec::with_capacity(expected),
            };
        }

        let Phase::Capturing { started_ms, buffer } = &mut self.phase else {
            return None;
        };
        buffer.extend(block.samples.iter().flat_map(|s| s.to_le_bytes()));

        if block_end_ms.saturating_sub(*started_ms) < schedule.duration_ms {
            return None;
        }

        let data = std::mem::take(buffer);
        let next_start_ms = *started_ms + schedule.interval_ms.max(schedule.duration_ms);
        self.phase = Phase::Idle { next_start_ms };
        Some(data)
    }
}
