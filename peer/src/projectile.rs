//! Fireball variants and the pooled combat objects.

use ringfire_shared::vec2::{add, scale};
use ringfire_shared::{FireballKind, Vec2};

use crate::entity::PeerId;

/// Temporary physics override requested on the hit body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpulseProfile {
    pub duration_ms: u64,
    pub drag: f64,
    /// Max-speed multiplier while the impulse lasts
    pub max_multiplier: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShakeProfile {
    pub duration_ms: u64,
    pub intensity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectileSpec {
    /// Speed as a fraction of the world's smaller dimension, per second
    pub speed_factor: f64,
    pub size_factor: f64,
    pub damage: f64,
    pub lifetime_ms: u64,
    pub knockback_multiplier: f64,
    /// Speed retained (or gained) when bouncing off the world edge
    pub bounce: f64,
    pub mana_cost: f64,
    pub impulse: ImpulseProfile,
    pub shake: ShakeProfile,
}

const NORMAL: ProjectileSpec = ProjectileSpec {
    speed_factor: 0.8,
    size_factor: 1.0,
    damage: 15.0,
    lifetime_ms: 5000,
    knockback_multiplier: 2.5,
    bounce: 0.9,
    mana_cost: 10.0,
    impulse: ImpulseProfile {
        duration_ms: 500,
        drag: 35.0,
        max_multiplier: 4.0,
    },
    shake: ShakeProfile {
        duration_ms: 300,
        intensity: 0.04,
    },
};

const FAST: ProjectileSpec = ProjectileSpec {
    speed_factor: 1.2,
    size_factor: 0.7,
    damage: 12.0,
    lifetime_ms: 3000,
    knockback_multiplier: 2.0,
    bounce: 0.5,
    mana_cost: 20.0,
    impulse: ImpulseProfile {
        duration_ms: 300,
        drag: 35.0,
        max_multiplier: 4.0,
    },
    shake: ShakeProfile {
        duration_ms: 200,
        intensity: 0.03,
    },
};

const HEAVY: ProjectileSpec = ProjectileSpec {
    speed_factor: 0.5,
    size_factor: 1.5,
    damage: 25.0,
    lifetime_ms: 7000,
    knockback_multiplier: 4.0,
    bounce: 1.2,
    mana_cost: 35.0,
    impulse: ImpulseProfile {
        duration_ms: 700,
        drag: 20.0,
        max_multiplier: 6.0,
    },
    shake: ShakeProfile {
        duration_ms: 500,
        intensity: 0.08,
    },
};

pub fn spec(kind: FireballKind) -> &'static ProjectileSpec {
    match kind {
        FireballKind::Normal => &NORMAL,
        FireballKind::Fast => &FAST,
        FireballKind::Heavy => &HEAVY,
    }
}

/// Full charge time; the charge level is elapsed time over this.
pub const FULL_CHARGE_MS: u64 = 2000;

pub fn kind_for_charge(elapsed_ms: u64) -> FireballKind {
    let level = (elapsed_ms as f64 / FULL_CHARGE_MS as f64).min(1.0);
    if level < 0.33 {
        FireballKind::Normal
    } else if level < 0.66 {
        FireballKind::Fast
    } else {
        FireballKind::Heavy
    }
}

/// One cast, whoever performed it.
#[derive(Debug, Clone, PartialEq)]
pub struct CastRequest {
    pub origin: Vec2,
    /// Unit vector
    pub direction: Vec2,
    pub kind: FireballKind,
    pub caster: PeerId,
}

#[derive(Debug, Clone, Default)]
pub struct Projectile {
    pub kind: FireballKind,
    pub caster: Option<PeerId>,
    pub origin: Vec2,
    pub position: Vec2,
    pub direction: Vec2,
    pub velocity: Vec2,
    pub spawned_at_ms: u64,
    pub active: bool,
}

impl Projectile {
    pub fn launch(&mut self, request: &CastRequest, reference_size: f64, now_ms: u64) {
        let speed = reference_size * spec(request.kind).speed_factor;
        self.kind = request.kind;
        self.caster = Some(request.caster.clone());
        self.origin = request.origin;
        self.position = request.origin;
        self.direction = request.direction;
        self.velocity = scale(request.direction, speed);
        self.spawned_at_ms = now_ms;
        self.active = true;
    }

    pub fn spec(&self) -> &'static ProjectileSpec {
        spec(self.kind)
    }

    /// Collision radius for a base projectile radius.
    pub fn radius(&self, base_radius: f64) -> f64 {
        base_radius * self.spec().size_factor
    }

    /// Move by `velocity * dt`, reflecting off the world rectangle.
    pub fn advance(&mut self, dt: f64, width: f64, height: f64, radius: f64) {
        self.position = add(self.position, scale(self.velocity, dt));
        let bounce = self.spec().bounce;

        if self.position.x - radius < 0.0 {
            self.position.x = radius;
            self.velocity.x = self.velocity.x.abs() * bounce;
        } else if self.position.x + radius > width {
            self.position.x = width - radius;
            self.velocity.x = -self.velocity.x.abs() * bounce;
        }
        if self.position.y - radius < 0.0 {
            self.position.y = radius;
            self.velocity.y = self.velocity.y.abs() * bounce;
        } else if self.position.y + radius > height {
            self.position.y = height - radius;
            self.velocity.y = -self.velocity.y.abs() * bounce;
        }
    }

    pub fn reset(&mut self) {
        *self = Projectile::default();
    }
}

#[derive(Debug, Clone, Default)]
pub struct Explosion {
    pub position: Vec2,
    pub started_at_ms: u64,
    pub active: bool,
}

impl Explosion {
    pub fn reset(&mut self) {
        *self = Explosion::default();
    }
}
