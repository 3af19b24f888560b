use crate::error::{NodeError, NodeResult};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use hound::WavReader;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::info;

/// One fixed-length block of signed 16-bit mono samples
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBlock {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl PcmBlock {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Little-endian PCM bytes, the layout snapshots are transferred in
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Block duration in milliseconds
    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 * 1000.0 / self.sample_rate as f64
    }
}

/// Blocking supplier of PCM blocks, read from the acquisition thread.
///
/// Implementations:
/// - `ChannelSource`: blocks pushed from another thread (capture callbacks, tests)
/// - `SignalSource`: generated input paced in real time
/// - `WavFileSource`: a WAV file replayed in a loop
pub trait SampleSource: Send {
    /// Check the device is usable before an acquisition thread is spawned
    fn prepare(&mut self) -> NodeResult<()>;

    /// Wait at most `timeout` for the next block.
    ///
    /// Timeouts and single failed reads are reported as `TransientIo`.
    fn read_block(&mut self, timeout: Duration) -> NodeResult<PcmBlock>;

    fn sample_rate(&self) -> u32;

    fn name(&self) -> &str;
}

/// Source fed through a crossbeam channel
pub struct ChannelSource {
    rx: Receiver<PcmBlock>,
    sample_rate: u32,
}

impl ChannelSource {
    pub fn new(rx: Receiver<PcmBlock>, sample_rate: u32) -> Self {
        Self { rx, sample_rate }
    }

    /// Create a source together with the sender that feeds it
    pub fn bounded(capacity: usize, sample_rate: u32) -> (crossbeam_channel::Sender<PcmBlock>, Self) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (tx, Self::new(rx, sample_rate))
    }
}

impl SampleSource for ChannelSource {
    fn prepare(&mut self) -> NodeResult<()> {
        Ok(())
    }

    fn read_block(&mut self, timeout: Duration) -> NodeResult<PcmBlock> {
        match self.rx.recv_timeout(timeout) {
            Ok(block) => Ok(block),
            Err(RecvTimeoutError::Timeout) => {
                Err(NodeError::TransientIo("read timed out".to_string()))
            }
            Err(RecvTimeoutError::Disconnected) => {
                // Nothing will ever arrive; behave like an idle device
                std::thread::sleep(timeout);
                Err(NodeError::TransientIo("block producer disconnected".to_string()))
            }
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// Waveform produced by `SignalSource`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    Silence,
    /// Alternating +amplitude / -amplitude samples
    Square { amplitude: i16 },
    Sine { frequency_hz: f32, amplitude: i16 },
}

/// Synthetic input that releases one block per block duration
pub struct SignalSource {
    signal: Signal,
    block_size: usize,
    sample_rate: u32,
    position: u64,
    pacer: Pacer,
}

impl SignalSource {
    pub fn new(signal: Signal, block_size: usize, sample_rate: u32) -> Self {
        Self {
            signal,
            block_size,
            sample_rate,
            position: 0,
            pacer: Pacer::new(block_size, sample_rate),
        }
    }

    fn generate(&mut self) -> Vec<i16> {
        let start = self.position;
        self.position += self.block_size as u64;
        (0..self.block_size as u64)
            .map(|i| {
                let n = start + i;
                match self.signal {
                    Signal::Silence => 0,
                    Signal::Square { amplitude } => {
                        if n % 2 == 0 {
                            amplitude
                        } else {
                            amplitude.saturating_neg()
                        }
                    }
                    Signal::Sine {
                        frequency_hz,
                        amplitude,
                    } => {
                        let t = n as f32 / self.sample_rate as f32;
                        let v = (2.0 * std::f32::consts::PI * frequency_hz * t).sin();
                        (v * amplitude as f32) as i16
                    }
                }
            })
            .collect()
    }
}

impl SampleSource for SignalSource {
    fn prepare(&mut self) -> NodeResult<()> {
        if self.block_size == 0 || self.sample_rate == 0 {
            return Err(NodeError::HardwareInit(
                "signal source needs a non-zero block size and sample rate".to_string(),
            ));
        }
        self.pacer.reset();
        Ok(())
    }

    fn read_block(&mut self, timeout: Duration) -> NodeResult<PcmBlock> {
        self.pacer.wait_turn(timeout)?;
        Ok(PcmBlock::new(self.generate(), self.sample_rate))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        "signal"
    }
}

/// Replays a 16-bit WAV file forever, one block per block duration.
/// Multi-channel files are folded to mono by taking the first channel.
pub struct WavFileSource {
    path: String,
    samples: Vec<i16>,
    block_size: usize,
    sample_rate: u32,
    cursor: usize,
    pacer: Pacer,
}

/// Releases reads at the real-time rate of the block size
struct Pacer {
    block_period: Duration,
    next_due: Option<Instant>,
}

impl Pacer {
    fn new(block_size: usize, sample_rate: u32) -> Self {
        let block_period = if sample_rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(block_size as f64 / sample_rate as f64)
        };
        Self {
            block_period,
            next_due: None,
        }
    }

    fn reset(&mut self) {
        self.next_due = None;
    }

    fn wait_turn(&mut self, timeout: Duration) -> NodeResult<()> {
        let now = Instant::now();
        let due = *self.next_due.get_or_insert(now);

        if due > now {
            let wait = due - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return Err(NodeError::TransientIo("read timed out".to_string()));
            }
            std::thread::sleep(wait);
        }

        self.next_due = Some(due + self.block_period);
        Ok(())
    }
}

impl WavFileSource {
    pub fn open(path: impl AsRef<Path>, block_size: usize) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;
        let interleaved: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;
        let samples: Vec<i16> = interleaved.into_iter().step_by(channels).collect();

        info!(
            "Audio file loaded: {}Hz, {} channels, {} mono samples",
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            samples,
            block_size,
            sample_rate: spec.sample_rate,
            cursor: 0,
            pacer: Pacer::new(block_size, spec.sample_rate),
        })
    }
}

impl SampleSource for WavFileSource {
    fn prepare(&mut self) -> NodeResult<()> {
        if self.samples.is_empty() || self.block_size == 0 || self.sample_rate == 0 {
            return Err(NodeError::HardwareInit(format!(
                "{} has no samples to replay",
                self.path
            )));
        }
        self.pacer.reset();
        Ok(())
    }

    fn read_block(&mut self, timeout: Duration) -> NodeResult<PcmBlock> {
        self.pacer.wait_turn(timeout)?;

        let mut block = Vec::with_capacity(self.block_size);
        while block.len() < self.block_size {
            let take = (self.block_size - block.len()).min(self.samples.len() - self.cursor);
            block.extend_from_slice(&self.samples[self.cursor..self.cursor + take]);
            self.cursor = (self.cursor + take) % self.samples.len();
        }

        Ok(PcmBlock::new(block, self.sample_rate))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        &self.path
    }
}
