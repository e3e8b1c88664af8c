//! Requests the coordinator hands to the renderer / physics layer.
//!
//! Nothing here feeds back into the core; the embedding loop drains them
//! every tick and acts on whichever it cares about.

use ringfire_shared::Vec2;

use crate::projectile::{ImpulseProfile, ShakeProfile};

/// Velocity kick for the local body, plus a temporary drag and max-speed
/// override restored after `duration_ms`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpulseRequest {
    pub dx: f64,
    pub dy: f64,
    pub duration_ms: u64,
    pub drag: f64,
    pub max_multiplier: f64,
}

impl ImpulseRequest {
    pub fn new(vector: Vec2, profile: ImpulseProfile) -> Self {
        Self {
            dx: vector.x,
            dy: vector.y,
            duration_ms: profile.duration_ms,
            drag: profile.drag,
            max_multiplier: profile.max_multiplier,
        }
    }

    pub fn magnitude(&self) -> f64 {
        self.dx.hypot(self.dy)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeerOutput {
    Impulse(ImpulseRequest),
    CameraShake { duration_ms: u64, intensity: f64 },
    CameraFlash { duration_ms: u64 },
    Explosion { position: Vec2 },
    RoundEnded { next_round: u32, start_at: u64 },
    RoundStarted { round: u32 },
}

impl PeerOutput {
    pub fn shake(profile: ShakeProfile) -> Self {
        PeerOutput::CameraShake {
            duration_ms: profile.duration_ms,
            intensity: profile.intensity,
        }
    }
}
