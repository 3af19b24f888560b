//! Two-tier connectivity: network association underneath, messaging
//! session state machine on top

pub mod network;
pub mod state;

pub use network::{AlwaysAssociated, HostNetwork, NetworkAssociation, ReachabilityProbe, RouteProbe};
pub use state::{LinkOptions, LinkState, LinkStateMachine, LinkStatus};
