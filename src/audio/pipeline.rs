//! Continuous acquisition and analysis on a dedicated thread
//!
//! One `AudioPipeline` owns at most one acquisition thread. The thread pulls
//! blocks from a `SampleSource`, computes loudness, gates the spectral
//! snapshot on the volume threshold and, when snapshot mode is on,
//! accumulates raw PCM windows. Callbacks run synchronously on that thread,
//! so they must return quickly.
//!
//! Settings live in `PipelineSettings`, a set of independent atomics that
//! the control loop may change at any time (last write wins).

use super::analysis::{loudness, SpectrumAnalyzer};
use super::snapshot::{AudioSnapshot, CaptureSchedule, SnapshotCapture};
use super::source::{PcmBlock, SampleSource};
use crate::config::AudioConfig;
use crate::error::NodeError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Called with (loudness, spectrum) for every block above the threshold
pub type LevelCallback = Arc<dyn Fn(f32, &[f32]) + Send + Sync>;

/// Called with each completed snapshot; ownership passes to the callback
pub type SnapshotCallback = Arc<dyn Fn(AudioSnapshot) + Send + Sync>;

/// Lifecycle of one acquisition thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Idle = 0,
    Running = 1,
    StopRequested = 2,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::StopRequested,
            _ => Self::Idle,
        }
    }
}

/// Shared between the controller and exactly one acquisition thread
struct RunControl {
    state: AtomicU8,
}

impl RunControl {
    fn running() -> Self {
        Self {
            state: AtomicU8::new(RunState::Running as u8),
        }
    }

    fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn request_stop(&self) {
        self.state
            .store(RunState::StopRequested as u8, Ordering::Release);
    }
}

/// Scalar settings shared with the command handler
pub struct PipelineSettings {
    volume_threshold: AtomicU32,
    debug: AtomicBool,
    snapshots_enabled: AtomicBool,
    capture_duration_ms: AtomicU64,
    capture_interval_ms: AtomicU64,
    current_loudness: AtomicU32,
}

impl PipelineSettings {
    pub fn new(volume_threshold: f32, capture_duration_ms: u64, capture_interval_ms: u64) -> Self {
        Self {
            volume_threshold: AtomicU32::new(volume_threshold.to_bits()),
            debug: AtomicBool::new(false),
            snapshots_enabled: AtomicBool::new(false),
            capture_duration_ms: AtomicU64::new(capture_duration_ms),
            capture_interval_ms: AtomicU64::new(capture_interval_ms),
            current_loudness: AtomicU32::new(0f32.to_bits()),
        }
    }

    pub fn volume_threshold(&self) -> f32 {
        f32::from_bits(self.volume_threshold.load(Ordering::Relaxed))
    }

    pub fn set_volume_threshold(&self, threshold: f32) {
        self.volume_threshold
            .store(threshold.to_bits(), Ordering::Relaxed);
    }

    pub fn debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    pub fn set_debug(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
    }

    pub fn snapshots_enabled(&self) -> bool {
        self.snapshots_enabled.load(Ordering::Relaxed)
    }

    pub fn set_snapshots_enabled(&self, enabled: bool) {
        self.snapshots_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn capture_schedule(&self) -> CaptureSchedule {
        CaptureSchedule {
            duration_ms: self.capture_duration_ms.load(Ordering::Relaxed),
            interval_ms: self.capture_interval_ms.load(Ordering::Relaxed),
        }
    }

    pub fn set_capture_duration_ms(&self, duration_ms: u64) {
        self.capture_duration_ms
            .store(duration_ms, Ordering::Relaxed);
    }

    pub fn set_capture_interval_ms(&self, interval_ms: u64) {
        self.capture_interval_ms
            .store(interval_ms, Ordering::Relaxed);
    }

    /// Loudness of the most recent block
    pub fn current_loudness(&self) -> f32 {
        f32::from_bits(self.current_loudness.load(Ordering::Relaxed))
    }

    fn store_loudness(&self, value: f32) {
        self.current_loudness
            .store(value.to_bits(), Ordering::Relaxed);
    }
}

impl From<&AudioConfig> for PipelineSettings {
    fn from(cfg: &AudioConfig) -> Self {
        Self::new(
            cfg.volume_threshold,
            cfg.capture_duration_ms,
            cfg.capture_interval_ms,
        )
    }
}

/// Fixed parameters of the acquisition loop
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub fft_size: usize,
    pub spectral_bins: usize,
    pub read_timeout: Duration,
    /// How long `stop()` waits for the thread before detaching it
    pub stop_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&AudioConfig::default())
    }
}

impl From<&AudioConfig> for PipelineOptions {
    fn from(cfg: &AudioConfig) -> Self {
        Self {
            fft_size: cfg.fft_size,
            spectral_bins: cfg.spectral_bins,
            read_timeout: Duration::from_millis(cfg.read_timeout_ms),
            stop_timeout: Duration::from_millis(cfg.stop_timeout_ms),
        }
    }
}

struct Worker {
    control: Arc<RunControl>,
    exited: Receiver<()>,
    handle: JoinHandle<()>,
}

/// Signals the controller when the acquisition thread unwinds or returns
struct ExitSignal(Sender<()>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.0.try_send(());
    }
}

/// Audio acquisition and analysis pipeline
pub struct AudioPipeline {
    source: Arc<Mutex<Box<dyn SampleSource>>>,
    settings: Arc<PipelineSettings>,
    options: PipelineOptions,
    level_callback: Option<LevelCallback>,
    snapshot_callback: Option<SnapshotCallback>,
    worker: Option<Worker>,
    /// Origin of snapshot timestamps
    epoch: Instant,
    contexts_spawned: usize,
}

impl AudioPipeline {
    pub fn new(
        source: Box<dyn SampleSource>,
        settings: Arc<PipelineSettings>,
        options: PipelineOptions,
    ) -> Self {
        info!(
            "Audio pipeline created: source={}, {}Hz, fft={}, bins={}",
            source.name(),
            source.sample_rate(),
            options.fft_size,
            options.spectral_bins
        );

        Self {
            source: Arc::new(Mutex::new(source)),
            settings,
            options,
            level_callback: None,
            snapshot_callback: None,
            worker: None,
            epoch: Instant::now(),
            contexts_spawned: 0,
        }
    }

    pub fn settings(&self) -> Arc<PipelineSettings> {
        Arc::clone(&self.settings)
    }

    /// Register the loudness/spectrum callback. Takes effect on the next `start()`.
    pub fn set_level_callback(&mut self, callback: impl Fn(f32, &[f32]) + Send + Sync + 'static) {
        self.level_callback = Some(Arc::new(callback));
    }

    /// Register the snapshot callback. Takes effect on the next `start()`.
    pub fn set_snapshot_callback(
        &mut self,
        callback: impl Fn(AudioSnapshot) + Send + Sync + 'static,
    ) {
        self.snapshot_callback = Some(Arc::new(callback));
    }

    pub fn state(&self) -> RunState {
        match &self.worker {
            Some(worker) => worker.control.state(),
            None => RunState::Idle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Number of acquisition threads this pipeline has spawned
    pub fn contexts_spawned(&self) -> usize {
        self.contexts_spawned
    }

    /// Start acquisition. Returns `true` if a thread is running afterwards.
    ///
    /// Calling this while already running is a no-op that returns `true`.
    pub fn start(&mut self) -> bool {
        let alive = self.worker.as_ref().map(|worker| {
            worker.control.state() == RunState::Running && !worker.handle.is_finished()
        });
        match alive {
            Some(true) => {
                debug!("Audio pipeline already running");
                return true;
            }
            // The previous thread died on its own; reap it before respawning
            Some(false) => self.stop(),
            None => {}
        }

        if let Err(e) = self.prepare_source() {
            error!("Audio pipeline cannot start: {}", e);
            return false;
        }

        let control = Arc::new(RunControl::running());
        let (exit_tx, exit_rx) = crossbeam_channel::bounded(1);
        let mut acquisition = Acquisition {
            control: Arc::clone(&control),
            settings: Arc::clone(&self.settings),
            level_callback: self.level_callback.clone(),
            snapshot_callback: self.snapshot_callback.clone(),
            read_timeout: self.options.read_timeout,
            fft_size: self.options.fft_size,
            spectral_bins: self.options.spectral_bins,
            epoch: self.epoch,
            throttle: DebugThrottle::default(),
        };
        let source = Arc::clone(&self.source);

        let spawned = std::thread::Builder::new()
            .name("audio-acquisition".into())
            .spawn(move || {
                let _exit = ExitSignal(exit_tx);
                let mut source = match source.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                acquisition.run(source.as_mut());
            });

        match spawned {
            Ok(handle) => {
                self.contexts_spawned += 1;
                self.worker = Some(Worker {
                    control,
                    exited: exit_rx,
                    handle,
                });
                info!("Audio acquisition started");
                true
            }
            Err(e) => {
                let err = NodeError::ResourceExhaustion(e.to_string());
                error!("Failed to spawn acquisition thread: {}", err);
                false
            }
        }
    }

    /// Validate the source while no thread holds it
    fn prepare_source(&self) -> Result<(), NodeError> {
        let mut source = match self.source.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                return Err(NodeError::HardwareInit(
                    "sample source still held by a detached acquisition thread".to_string(),
                ))
            }
        };
        source.prepare()
    }

    /// Stop acquisition, waiting at most `stop_timeout` for the thread.
    ///
    /// A thread that has not exited by then is detached; its run state stays
    /// `StopRequested`, so it leaves at the top of its next cycle.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        worker.control.request_stop();

        match worker.exited.recv_timeout(self.options.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    error!("Audio acquisition thread panicked");
                }
                info!("Audio acquisition stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Audio acquisition thread did not exit within {:?}; detaching it",
                    self.options.stop_timeout
                );
            }
        }

        self.settings.store_loudness(0.0);
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Per-instance counters that keep debug output to a trickle
#[derive(Default)]
struct DebugThrottle {
    blocks: u64,
    read_errors: u64,
}

impl DebugThrottle {
    const BLOCK_EVERY: u64 = 50;
    const READ_ERROR_EVERY: u64 = 100;

    fn block_due(&mut self) -> bool {
        self.blocks += 1;
        self.blocks % Self::BLOCK_EVERY == 1
    }

    fn read_error_due(&mut self) -> bool {
        self.read_errors += 1;
        self.read_errors % Self::READ_ERROR_EVERY == 1
    }
}

/// State owned by the acquisition thread
struct Acquisition {
    control: Arc<RunControl>,
    settings: Arc<PipelineSettings>,
    level_callback: Option<LevelCallback>,
    snapshot_callback: Option<SnapshotCallback>,
    read_timeout: Duration,
    fft_size: usize,
    spectral_bins: usize,
    epoch: Instant,
    throttle: DebugThrottle,
}

impl Acquisition {
    fn run(&mut self, source: &mut dyn SampleSource) {
        let mut analyzer = SpectrumAnalyzer::new(self.fft_size, self.spectral_bins);
        let mut capture = SnapshotCapture::new(source.sample_rate());

        debug!("Acquisition loop running on {}", source.name());

        while self.control.state() == RunState::Running {
            match source.read_block(self.read_timeout) {
                Ok(block) => self.process(&block, &mut analyzer, &mut capture),
                Err(e) => {
                    if self.throttle.read_error_due() {
                        if e.is_transient() {
                            debug!("Skipping block: {} ({} so far)", e, self.throttle.read_errors);
                        } else {
                            warn!("Skipping block: {} ({} so far)", e, self.throttle.read_errors);
                        }
                    }
                }
            }
        }

        debug!("Acquisition loop exiting");
    }

    fn process(
        &mut self,
        block: &PcmBlock,
        analyzer: &mut SpectrumAnalyzer,
        capture: &mut SnapshotCapture,
    ) {
        let level = loudness(&block.samples);
        self.settings.store_loudness(level);

        let threshold = self.settings.volume_threshold();
        if level > threshold {
            if let Some(callback) = &self.level_callback {
                let spectrum = analyzer.magnitudes(&block.samples);
                callback(level, &spectrum);
            }
        }

        if self.settings.debug() && self.throttle.block_due() {
            debug!("Loudness {:.3} (threshold {:.3})", level, threshold);
        }

        if self.settings.snapshots_enabled() {
            if let Some(data) = capture.push(block, self.settings.capture_schedule()) {
                let snapshot = AudioSnapshot {
                    timestamp_ms: self.epoch.elapsed().as_millis() as u64,
                    data,
                    sample_rate: block.sample_rate,
                };
                if self.settings.debug() {
                    debug!(
                        "Snapshot ready: ts={} bytes={}",
                        snapshot.timestamp_ms,
                        snapshot.size()
                    );
                }
                if let Some(callback) = &self.snapshot_callback {
                    callback(snapshot);
                }
            }
        } else {
            capture.skip(block);
        }
    }
}
