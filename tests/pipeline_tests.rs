// Acquisition thread lifecycle and per-block callbacks

use edge_audio_node::audio::{
    AudioPipeline, AudioSnapshot, ChannelSource, PcmBlock, PipelineOptions, PipelineSettings,
    RunState, SampleSource,
};
use edge_audio_node::error::{NodeError, NodeResult};
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(2);

fn alternating(len: usize, amplitude: i16) -> Vec<i16> {
    (0..len)
        .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
        .collect()
}

fn pipeline_with(
    source: impl SampleSource + 'static,
    settings: Arc<PipelineSettings>,
) -> AudioPipeline {
    AudioPipeline::new(Box::new(source), settings, PipelineOptions::default())
}

/// Blocks every read far beyond any stop timeout
struct StuckSource;

impl SampleSource for StuckSource {
    fn prepare(&mut self) -> NodeResult<()> {
        Ok(())
    }

    fn read_block(&mut self, _timeout: Duration) -> NodeResult<PcmBlock> {
        std::thread::sleep(Duration::from_millis(1500));
        Err(NodeError::TransientIo("stuck".to_string()))
    }

    fn sample_rate(&self) -> u32 {
        16000
    }

    fn name(&self) -> &str {
        "stuck"
    }
}

struct BrokenSource;

impl SampleSource for BrokenSource {
    fn prepare(&mut self) -> NodeResult<()> {
        Err(NodeError::HardwareInit("no device".to_string()))
    }

    fn read_block(&mut self, _timeout: Duration) -> NodeResult<PcmBlock> {
        Err(NodeError::TransientIo("no device".to_string()))
    }

    fn sample_rate(&self) -> u32 {
        16000
    }

    fn name(&self) -> &str {
        "broken"
    }
}

#[test]
fn test_start_is_idempotent() {
    let (_tx, source) = ChannelSource::bounded(4, 16000);
    let mut pipeline = pipeline_with(source, Arc::new(PipelineSettings::new(0.1, 500, 5000)));

    assert!(pipeline.start());
    assert!(pipeline.start());
    assert_eq!(pipeline.contexts_spawned(), 1);
    assert_eq!(pipeline.state(), RunState::Running);

    pipeline.stop();
    assert_eq!(pipeline.state(), RunState::Idle);

    // Stopping again is a no-op
    pipeline.stop();
    assert_eq!(pipeline.state(), RunState::Idle);

    assert!(pipeline.start());
    assert_eq!(pipeline.contexts_spawned(), 2);
}

#[test]
fn test_stop_without_start_is_noop() {
    let (_tx, source) = ChannelSource::bounded(4, 16000);
    let mut pipeline = pipeline_with(source, Arc::new(PipelineSettings::new(0.1, 500, 5000)));

    pipeline.stop();
    assert_eq!(pipeline.state(), RunState::Idle);
    assert_eq!(pipeline.contexts_spawned(), 0);
}

#[test]
fn test_failed_prepare_spawns_nothing() {
    let mut pipeline = pipeline_with(BrokenSource, Arc::new(PipelineSettings::new(0.1, 500, 5000)));

    assert!(!pipeline.start());
    assert_eq!(pipeline.contexts_spawned(), 0);
    assert!(!pipeline.is_running());
}

#[test]
fn test_stop_is_bounded_when_thread_is_stuck() {
    let options = PipelineOptions {
        stop_timeout: Duration::from_millis(100),
        ..PipelineOptions::default()
    };
    let mut pipeline = AudioPipeline::new(
        Box::new(StuckSource),
        Arc::new(PipelineSettings::new(0.1, 500, 5000)),
        options,
    );

    assert!(pipeline.start());
    std::thread::sleep(Duration::from_millis(20));

    let started = Instant::now();
    pipeline.stop();
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(pipeline.state(), RunState::Idle);

    // The detached thread still holds the source
    assert!(!pipeline.start());
    assert_eq!(pipeline.contexts_spawned(), 1);
}

#[test]
fn test_level_callback_gated_by_threshold() {
    let (tx, source) = ChannelSource::bounded(4, 16000);
    let settings = Arc::new(PipelineSettings::new(0.1, 500, 5000));
    let mut pipeline = pipeline_with(source, Arc::clone(&settings));

    let (events_tx, events) = crossbeam_channel::unbounded();
    pipeline.set_level_callback(move |loudness, spectrum| {
        let _ = events_tx.send((loudness, spectrum.to_vec()));
    });
    assert!(pipeline.start());

    tx.send(PcmBlock::new(vec![0; 1024], 16000)).unwrap();
    tx.send(PcmBlock::new(alternating(1024, 16000), 16000)).unwrap();

    let (loudness, spectrum) = events.recv_timeout(WAIT).expect("no level event");
    assert!((loudness - 0.488).abs() < 1e-3);
    assert_eq!(spectrum.len(), 10);

    // The silent block produced nothing
    assert!(events.try_recv().is_err());
    assert!((settings.current_loudness() - 0.488).abs() < 1e-3);

    pipeline.stop();
    assert_eq!(settings.current_loudness(), 0.0);
}

#[test]
fn test_threshold_change_applies_to_next_block() {
    let (tx, source) = ChannelSource::bounded(4, 16000);
    let settings = Arc::new(PipelineSettings::new(0.1, 500, 5000));
    let mut pipeline = pipeline_with(source, Arc::clone(&settings));

    let (events_tx, events) = crossbeam_channel::unbounded();
    pipeline.set_level_callback(move |loudness, _| {
        let _ = events_tx.send(loudness);
    });
    assert!(pipeline.start());

    settings.set_volume_threshold(0.9);
    tx.send(PcmBlock::new(alternating(1024, 16000), 16000)).unwrap();
    assert!(events.recv_timeout(Duration::from_millis(300)).is_err());

    settings.set_volume_threshold(0.2);
    tx.send(PcmBlock::new(alternating(1024, 16000), 16000)).unwrap();
    assert!(events.recv_timeout(WAIT).is_ok());

    pipeline.stop();
}

#[test]
fn test_snapshot_mode_captures_window() {
    let (tx, source) = ChannelSource::bounded(8, 16000);
    let settings = Arc::new(PipelineSettings::new(0.1, 128, 256));
    settings.set_snapshots_enabled(true);
    let mut pipeline = pipeline_with(source, Arc::clone(&settings));

    let (snapshots_tx, snapshots) = crossbeam_channel::unbounded::<AudioSnapshot>();
    pipeline.set_snapshot_callback(move |snapshot| {
        let _ = snapshots_tx.send(snapshot);
    });
    assert!(pipeline.start());

    // 1024 samples at 16 kHz = 64 ms, so two blocks fill the window
    tx.send(PcmBlock::new(vec![7; 1024], 16000)).unwrap();
    tx.send(PcmBlock::new(vec![7; 1024], 16000)).unwrap();

    let snapshot = snapshots.recv_timeout(WAIT).expect("no snapshot");
    assert_eq!(snapshot.size(), 4096);
    assert_eq!(snapshot.sample_rate, 16000);
    assert_eq!(&snapshot.data[..2], &7i16.to_le_bytes());

    pipeline.stop();
}

#[test]
fn test_no_snapshot_when_disabled() {
    let (tx, source) = ChannelSource::bounded(8, 16000);
    let settings = Arc::new(PipelineSettings::new(0.1, 128, 256));
    let mut pipeline = pipeline_with(source, settings);

    let (snapshots_tx, snapshots) = crossbeam_channel::unbounded::<AudioSnapshot>();
    pipeline.set_snapshot_callback(move |snapshot| {
        let _ = snapshots_tx.send(snapshot);
    });
    assert!(pipeline.start());

    for _ in 0..4 {
        tx.send(PcmBlock::new(vec![7; 1024], 16000)).unwrap();
    }
    assert!(snapshots.recv_timeout(Duration::from_millis(300)).is_err());

    pipeline.stop();
}
