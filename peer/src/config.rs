use std::time::Duration;

use ringfire_shared::ArenaConfig;

/// Outbound cadence of non-immediate broadcasts.
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    /// Minimum interval between throttled publishes while standing still
    pub idle_interval_ms: u64,
    pub moving_interval_ms: u64,
    pub combat_interval_ms: u64,
    /// Position change (world units) that counts as movement
    pub movement_epsilon: f64,
    pub connect_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            idle_interval_ms: 100,  // 10 Hz
            moving_interval_ms: 50, // 20 Hz
            combat_interval_ms: 16, // ~60 Hz
            movement_epsilon: 1.0,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.combat_interval_ms > self.moving_interval_ms
            || self.moving_interval_ms > self.idle_interval_ms
        {
            return Err("rate tiers must satisfy combat <= moving <= idle".to_string());
        }
        if !self.movement_epsilon.is_finite() || self.movement_epsilon < 0.0 {
            return Err("movement_epsilon must be finite and >= 0".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be > 0".to_string());
        }
        Ok(())
    }
}

/// Everything a coordinator needs besides its transport and clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerConfig {
    pub arena: ArenaConfig,
    pub channel: ChannelConfig,
}

impl PeerConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.arena.validate()?;
        self.channel.validate()
    }
}
