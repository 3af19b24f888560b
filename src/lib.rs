pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod link;
pub mod node;
pub mod receiver;
pub mod transport;

pub use audio::{
    AudioPipeline, AudioSnapshot, ChannelSource, PcmBlock, PipelineOptions, PipelineSettings,
    RunState, SampleSource, Signal, SignalSource, WavFileSource,
};
pub use config::Config;
pub use error::{NodeError, NodeResult};
pub use http::{create_router, AppState, HttpServer};
pub use link::{AlwaysAssociated, HostNetwork, LinkState, LinkStateMachine, NetworkAssociation};
pub use node::{LogToneOutput, LoopExit, NodeContext, NodeStatus, ToneOutput};
pub use receiver::{AssembledSnapshot, SnapshotAssembler};
pub use transport::{
    ChunkedTransport, MemoryBus, MemoryBusHandle, MessageBus, NatsBus, Topics, TransferSummary,
};
