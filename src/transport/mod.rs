pub mod bus;
pub mod chunked;
pub mod memory;
pub mod nats;
pub mod topics;

pub use bus::{cause, InboundMessage, MessageBus};
pub use chunked::{ChunkPlan, ChunkedTransport, TransferReport, TransferSummary, TransportOptions};
pub use memory::{MemoryBus, MemoryBusHandle, PublishedMessage};
pub use nats::NatsBus;
pub use topics::Topics;
