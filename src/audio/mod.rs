pub mod analysis;
pub mod pipeline;
pub mod snapshot;
pub mod source;

pub use analysis::{loudness, SpectrumAnalyzer};
pub use pipeline::{
    AudioPipeline, LevelCallback, PipelineOptions, PipelineSettings, RunState, SnapshotCallback,
};
pub use snapshot::{AudioSnapshot, CaptureSchedule, SnapshotCapture};
pub use source::{ChannelSource, PcmBlock, SampleSource, Signal, SignalSource, WavFileSource};
