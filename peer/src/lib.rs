//! Peer-side core of a ringfire arena session.
//!
//! This module exposes the coordinator and its building blocks for use in
//! tests and the headless peer binary.

pub mod bot;
pub mod channel;
pub mod clock;
mod combat;
pub mod config;
pub mod coordinator;
pub mod entity;
pub mod match_state;
pub mod output;
pub mod pool;
pub mod projectile;
pub mod scheduler;
pub mod spatial;
pub mod transport;

pub use channel::{BroadcastChannel, RateTier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ChannelConfig, PeerConfig};
pub use coordinator::{CoordinatorStats, PeerCoordinator};
pub use entity::PeerId;
pub use match_state::{InvalidTransition, MatchState, MatchStateMachine};
pub use output::{ImpulseRequest, PeerOutput};
pub use projectile::CastRequest;
pub use transport::{LocalHub, LocalTransport, Transport, TransportError, WsTransport};
