/// Gameplay tuning shared by every peer in a session.
///
/// Peers never negotiate these values; a mesh only behaves consistently when
/// every participant runs with the same configuration.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[ts(export, export_to = "../bindings/")]
#[serde(rename_all = "camelCase")]
pub struct ArenaConfig {
    pub world_width: f64,
    pub world_height: f64,
    /// Boundary radius at round start (world units)
    pub ring_radius: f64,
    /// The boundary never shrinks below `ring_radius * ring_floor_fraction`
    pub ring_floor_fraction: f64,
    /// World units per second
    pub ring_shrink_rate: f64,
    pub ring_damage: f64,
    pub ring_damage_cooldown_ms: u64,
    pub entity_radius: f64,
    pub projectile_radius: f64,
    /// Extra query padding around a projectile to catch nearby entities
    pub projectile_query_padding: f64,
    pub max_health: f64,
    pub max_mana: f64,
    pub mana_regen_amount: f64,
    pub mana_regen_interval_ms: u64,
    /// Delay between the round-end decision and the synchronized restart
    pub round_restart_delay_ms: u64,
    pub knockback_base_factor: f64,
    pub bump_overlap_factor: f64,
    pub bump_force_factor: f64,
    pub bump_cooldown_ms: u64,
    /// How long a hit keeps the local entity in the combat rate tier
    pub combat_linger_ms: u64,
    pub explosion_duration_ms: u64,
    /// Remote entities silent for longer than this are dropped
    pub peer_timeout_ms: u64,
    pub grid_cell_size: f64,
    pub projectile_pool_size: usize,
    pub explosion_pool_size: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            world_width: 1000.0,
            world_height: 1000.0,
            ring_radius: 400.0,
            ring_floor_fraction: 0.08,
            ring_shrink_rate: 2.0,
            ring_damage: 20.0,
            ring_damage_cooldown_ms: 500,
            entity_radius: 15.0,
            projectile_radius: 8.0,
            projectile_query_padding: 20.0,
            max_health: 100.0,
            max_mana: 100.0,
            mana_regen_amount: 2.0,
            mana_regen_interval_ms: 200,
            round_restart_delay_ms: 3000,
            knockback_base_factor: 3.2,
            bump_overlap_factor: 0.55,
            bump_force_factor: 4.5,
            bump_cooldown_ms: 350,
            combat_linger_ms: 2000,
            explosion_duration_ms: 200,
            peer_timeout_ms: 5000,
            grid_cell_size: 100.0,
            projectile_pool_size: 30,
            explosion_pool_size: 20,
        }
    }
}

impl ArenaConfig {
    /// Center of the world, which is also the center of the boundary.
    pub fn world_center(&self) -> (f64, f64) {
        (self.world_width / 2.0, self.world_height / 2.0)
    }

    /// Smallest radius the boundary may reach.
    pub fn ring_floor(&self) -> f64 {
        self.ring_radius * self.ring_floor_fraction
    }

    /// Reference length used to scale knockback and bump forces.
    pub fn reference_size(&self) -> f64 {
        self.world_width.min(self.world_height)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.world_width.is_finite() || self.world_width <= 0.0 {
            return Err("world_width must be finite and > 0".to_string());
        }
        if !self.world_height.is_finite() || self.world_height <= 0.0 {
            return Err("world_height must be finite and > 0".to_string());
        }
        if !self.ring_radius.is_finite() || self.ring_radius <= 0.0 {
            return Err("ring_radius must be finite and > 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.ring_floor_fraction) {
            return Err("ring_floor_fraction must be within [0, 1]".to_string());
        }
        if !self.ring_shrink_rate.is_finite() || self.ring_shrink_rate < 0.0 {
            return Err("ring_shrink_rate must be finite and >= 0".to_string());
        }
        if self.max_health <= 0.0 || self.max_mana <= 0.0 {
            return Err("max_health and max_mana must be > 0".to_string());
        }
        if self.entity_radius <= 0.0 || self.projectile_radius <= 0.0 {
            return Err("entity_radius and projectile_radius must be > 0".to_string());
        }
        if !self.grid_cell_size.is_finite() || self.grid_cell_size <= 0.0 {
            return Err("grid_cell_size must be finite and > 0".to_string());
        }
        if self.mana_regen_interval_ms == 0 {
            return Err("mana_regen_interval_ms must be > 0".to_string());
        }
        Ok(())
    }
}
