//! Owning context of the node and the dispatch between its subsystems

pub mod commands;
pub mod context;
pub mod tone;

pub use commands::{parse_bool, Command, ConfigUpdate};
pub use context::{AnalysisEvent, LocalCommand, LoopExit, NodeContext, NodeStatus};
pub use tone::{LogToneOutput, ToneOutput};
