//! Bot input source and a toy body for headless peers.
//!
//! Bots are lightweight state machines that:
//! - Wander inside the ring, heading back toward the centre near its edge
//! - Charge and release casts at the nearest other entity
//! - Never touch the coordinator directly; they return a [`BotInput`]

use rand::Rng;
use ringfire_shared::vec2::{add, distance, from_angle, length, scale, sub, try_normalize};
use ringfire_shared::Vec2;

use crate::coordinator::PeerCoordinator;
use crate::output::ImpulseRequest;
use crate::transport::Transport;

/// Bot personality affects cast cadence and movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BotPersonality {
    /// Casts often with short charges (0.4-1.2s between casts)
    Eager,
    /// Takes its time and prefers heavy casts (2.0-5.0s)
    Relaxed,
    /// Unpredictable timing and wandering (0.2-6.0s)
    Chaotic,
}

impl BotPersonality {
    /// Delay range between casts (min, max) in seconds
    fn cast_delay_range(&self) -> (f64, f64) {
        match self {
            BotPersonality::Eager => (0.4, 1.2),
            BotPersonality::Relaxed => (2.0, 5.0),
            BotPersonality::Chaotic => (0.2, 6.0),
        }
    }

    /// How long the cast button is held, in seconds
    fn charge_range(&self) -> (f64, f64) {
        match self {
            BotPersonality::Eager => (0.0, 0.5),
            BotPersonality::Relaxed => (1.2, 2.0),
            BotPersonality::Chaotic => (0.0, 2.0),
        }
    }

    /// Seconds between heading changes
    fn wander_interval(&self) -> f64 {
        match self {
            BotPersonality::Eager => 1.5,
            BotPersonality::Relaxed => 3.0,
            BotPersonality::Chaotic => 0.5,
        }
    }

    fn random_in(range: (f64, f64), rng: &mut impl Rng) -> f64 {
        let (min, max) = range;
        min + rng.gen::<f64>() * (max - min)
    }

    /// Select a random personality
    pub fn random(rng: &mut impl Rng) -> Self {
        match rng.gen_range(0..3) {
            0 => BotPersonality::Eager,
            1 => BotPersonality::Relaxed,
            _ => BotPersonality::Chaotic,
        }
    }
}

/// What the bot can see of the arena this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BotView {
    pub position: Vec2,
    pub center: Vec2,
    pub boundary: f64,
    pub mana: f64,
    /// Nearest other entity, if any
    pub target: Option<Vec2>,
}

impl BotView {
    /// Snapshot the coordinator from the local entity's point of view.
    /// None while the local peer has no body (spectating, between rounds).
    pub fn observe<T: Transport>(peer: &PeerCoordinator<T>, center: Vec2) -> Option<Self> {
        let local = peer.local_entity()?;
        let target = peer
            .entities()
            .iter()
            .filter(|e| e.id != local.id)
            .map(|e| e.position)
            .min_by(|a, b| {
                distance(*a, local.position).total_cmp(&distance(*b, local.position))
            });
        Some(Self {
            position: local.position,
            center,
            boundary: peer.boundary_radius(),
            mana: peer.mana(),
            target,
        })
    }
}

/// Inputs produced for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BotInput {
    pub movement: Vec2,
    pub press: Option<Vec2>,
    pub release: Option<Vec2>,
}

#[derive(Debug)]
pub struct BotPlayer {
    pub personality: BotPersonality,
    /// Time until the next cast starts charging
    cast_delay: f64,
    /// Remaining hold time while charging
    charging: Option<f64>,
    heading: Vec2,
    retarget_in: f64,
}

/// Fraction of the boundary beyond which the bot heads home
const RETREAT_FRACTION: f64 = 0.8;

/// Minimum mana before a bot bothers charging
const MIN_CAST_MANA: f64 = 10.0;

impl BotPlayer {
    pub fn new(personality: BotPersonality, rng: &mut impl Rng) -> Self {
        Self {
            personality,
            cast_delay: BotPersonality::random_in(personality.cast_delay_range(), rng),
            charging: None,
            heading: Vec2::ZERO,
            retarget_in: 0.0,
        }
    }

    pub fn is_charging(&self) -> bool {
        self.charging.is_some()
    }

    /// Tick the bot and decide this frame's inputs.
    pub fn tick(&mut self, dt: f64, view: &BotView, rng: &mut impl Rng) -> BotInput {
        let mut input = BotInput {
            movement: self.steer(dt, view, rng),
            ..Default::default()
        };

        if let Some(hold) = self.charging.as_mut() {
            *hold -= dt;
            if *hold <= 0.0 {
                self.charging = None;
                self.cast_delay = BotPersonality::random_in(self.personality.cast_delay_range(), rng);
                input.release = Some(view.target.unwrap_or_else(|| add(view.position, self.heading)));
            }
            return input;
        }

        self.cast_delay -= dt;
        if self.cast_delay <= 0.0 {
            if let Some(target) = view.target {
                if view.mana >= MIN_CAST_MANA {
                    self.charging = Some(BotPersonality::random_in(self.personality.charge_range(), rng));
                    input.press = Some(target);
                }
            }
        }
        input
    }

    fn steer(&mut self, dt: f64, view: &BotView, rng: &mut impl Rng) -> Vec2 {
        let offset = sub(view.position, view.center);
        if length(offset) > view.boundary * RETREAT_FRACTION {
            return try_normalize(scale(offset, -1.0)).unwrap_or(Vec2::ZERO);
        }

        self.retarget_in -= dt;
        if self.retarget_in <= 0.0 {
            self.retarget_in = self.personality.wander_interval();
            let idle = self.personality == BotPersonality::Relaxed && rng.gen_bool(0.5);
            self.heading = match (self.personality, view.target) {
                (BotPersonality::Eager, Some(target)) => {
                    try_normalize(sub(target, view.position)).unwrap_or(Vec2::ZERO)
                }
                _ if idle => Vec2::ZERO,
                _ => from_angle(rng.gen_range(0.0..std::f64::consts::TAU)),
            };
        }
        self.heading
    }
}

/// Minimal kinematic body for the local entity.
///
/// Impulses kick the velocity and temporarily override drag and the speed
/// cap; the base values come back once the override's duration elapses.
#[derive(Debug, Clone)]
pub struct KinematicBody {
    pub position: Vec2,
    pub velocity: Vec2,
    pub max_speed: f64,
    /// Per-second damping rate when no impulse is active
    pub drag: f64,
    override_remaining_ms: f64,
    override_drag: f64,
    override_max_speed: f64,
}

/// Impulse drag values are expressed in tenths of a per-second rate
const IMPULSE_DRAG_SCALE: f64 = 0.1;

/// Share of the requested impulse that reaches the velocity
const IMPULSE_GAIN: f64 = 0.1;

impl KinematicBody {
    pub fn new(position: Vec2, max_speed: f64) -> Self {
        Self {
            position,
            velocity: Vec2::ZERO,
            max_speed,
            drag: 6.0,
            override_remaining_ms: 0.0,
            override_drag: 0.0,
            override_max_speed: 0.0,
        }
    }

    pub fn reset(&mut self, position: Vec2) {
        self.position = position;
        self.velocity = Vec2::ZERO;
        self.override_remaining_ms = 0.0;
    }

    pub fn impulse_active(&self) -> bool {
        self.override_remaining_ms > 0.0
    }

    pub fn speed_cap(&self) -> f64 {
        if self.impulse_active() {
            self.override_max_speed
        } else {
            self.max_speed
        }
    }

    pub fn apply_impulse(&mut self, impulse: &ImpulseRequest) {
        self.velocity = add(
            self.velocity,
            Vec2::new(impulse.dx * IMPULSE_GAIN, impulse.dy * IMPULSE_GAIN),
        );
        self.override_remaining_ms = impulse.duration_ms as f64;
        self.override_drag = impulse.drag * IMPULSE_DRAG_SCALE;
        self.override_max_speed = self.max_speed * impulse.max_multiplier;
        self.clamp_speed();
    }

    /// Integrate one step, steering toward `intent` and staying in the world.
    pub fn step(&mut self, dt: f64, intent: Vec2, width: f64, height: f64) {
        let drag = if self.impulse_active() {
            self.override_remaining_ms -= dt * 1000.0;
            self.override_drag
        } else {
            let desired = scale(intent, self.max_speed);
            let blend = (self.drag * dt).min(1.0);
            self.velocity = add(self.velocity, scale(sub(desired, self.velocity), blend));
            0.0
        };

        self.velocity = scale(self.velocity, (-drag * dt).exp());
        self.clamp_speed();
        self.position = add(self.position, scale(self.velocity, dt));
        self.position.x = self.position.x.clamp(0.0, width);
        self.position.y = self.position.y.clamp(0.0, height);
    }

    fn clamp_speed(&mut self) {
        let speed = length(self.velocity);
        let cap = self.speed_cap();
        if speed > cap && speed > 0.0 {
            self.velocity = scale(self.velocity, cap / speed);
        }
    }
}
