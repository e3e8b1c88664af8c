//! Wire protocol and gameplay tuning shared by ringfire peers and the relay.

pub mod config;
pub mod protocol;
pub mod vec2;

pub use config::ArenaConfig;
pub use protocol::{Envelope, FireballKind, GameEvent};
pub use vec2::Vec2;
