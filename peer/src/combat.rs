//! Combat resolution for [`PeerCoordinator`]: the boundary ring, projectile
//! hits, body bumps and death.

use ringfire_shared::protocol::{FireballShot, PlayerBump};
use ringfire_shared::vec2::{distance, length, scale, sub, try_normalize};
use ringfire_shared::{FireballKind, Vec2};

use crate::coordinator::{PeerCoordinator, TimerTask};
use crate::entity::PeerId;
use crate::match_state::MatchState;
use crate::output::{ImpulseRequest, PeerOutput};
use crate::pool::PoolHandle;
use crate::projectile::{CastRequest, ImpulseProfile, ShakeProfile};
use crate::spatial::SpatialKey;
use crate::transport::Transport;

const BUMP_IMPULSE: ImpulseProfile = ImpulseProfile {
    duration_ms: 600,
    drag: 18.0,
    max_multiplier: 7.0,
};

const RING_FLASH_MS: u64 = 200;

const CAST_SHAKE_MS: u64 = 200;

impl<T: Transport> PeerCoordinator<T> {
    /// Local cast. Spends mana, spawns the projectile and announces it.
    ///
    /// Fails without side effects when not Playing, when the caster is not
    /// the local entity, or when mana is short.
    pub fn cast(&mut self, request: CastRequest) -> bool {
        if self.state() != MatchState::Playing {
            return false;
        }
        if !self.entities.is_local(&request.caster) {
            return false;
        }
        let Some(direction) = try_normalize(request.direction) else {
            return false;
        };
        let request = CastRequest { direction, ..request };

        let cost = crate::projectile::spec(request.kind).mana_cost;
        if !self.local.try_spend(cost) {
            tracing::debug!(kind = ?request.kind, mana = self.local.mana, "Not enough mana");
            return false;
        }

        self.spawn_projectile(&request);
        let shot = FireballShot {
            x: request.origin.x,
            y: request.origin.y,
            direction: request.direction,
            player_id: request.caster.to_string(),
            kind: request.kind,
        };
        self.publish_shot(shot);
        self.channel.set_rate(request.origin.x, request.origin.y, true);

        let intensity = if request.kind == FireballKind::Heavy { 0.02 } else { 0.01 };
        self.outputs.push(PeerOutput::shake(ShakeProfile {
            duration_ms: CAST_SHAKE_MS,
            intensity,
        }));
        true
    }

    /// Acquire a projectile and register it everywhere it must live.
    pub(crate) fn spawn_projectile(&mut self, request: &CastRequest) -> PoolHandle {
        let now = self.clock.monotonic_ms();
        let reference = self.arena.reference_size();
        let base_radius = self.arena.projectile_radius;

        let handle = self.projectiles.acquire();
        let mut registered = None;
        if let Some(projectile) = self.projectiles.get_mut(handle) {
            projectile.launch(request, reference, now);
            registered = Some((
                projectile.position,
                projectile.radius(base_radius),
                projectile.spec().lifetime_ms,
            ));
        }
        if let Some((position, radius, lifetime)) = registered {
            self.spatial
                .insert(SpatialKey::Projectile(handle), position.x, position.y, radius);
            self.timers
                .schedule(now + lifetime, TimerTask::ExpireProjectile(handle));
        }
        handle
    }

    /// Return a projectile to its pool. Stale handles are ignored.
    pub(crate) fn release_projectile(&mut self, handle: PoolHandle) {
        self.spatial.remove(&SpatialKey::Projectile(handle));
        self.projectiles.release(handle);
    }

    pub(crate) fn advance_projectiles(&mut self, dt: f64) {
        let width = self.arena.world_width;
        let height = self.arena.world_height;
        let base_radius = self.arena.projectile_radius;
        for handle in self.projectiles.active_handles() {
            if let Some(projectile) = self.projectiles.get_mut(handle) {
                let radius = projectile.radius(base_radius);
                projectile.advance(dt, width, height, radius);
            }
        }
    }

    /// The index is rebuilt from scratch every tick.
    pub(crate) fn rebuild_spatial_index(&mut self) {
        self.spatial.clear();
        let entity_radius = self.arena.entity_radius;
        for entity in self.entities.iter() {
            self.spatial.insert(
                SpatialKey::Entity(entity.id.clone()),
                entity.position.x,
                entity.position.y,
                entity_radius,
            );
        }
        let base_radius = self.arena.projectile_radius;
        for (handle, projectile) in self.projectiles.iter_active() {
            self.spatial.insert(
                SpatialKey::Projectile(handle),
                projectile.position.x,
                projectile.position.y,
                projectile.radius(base_radius),
            );
        }
    }

    pub(crate) fn apply_ring_damage(&mut self, now: u64) {
        let (cx, cy) = self.arena.world_center();
        let boundary = self.ledger.boundary;
        let Some(local) = self.entities.local() else {
            return;
        };
        if distance(local.position, Vec2::new(cx, cy)) <= boundary {
            return;
        }

        // First exposure hurts at once; after that the cooldown applies
        if let Some(last) = self.local.last_ring_damage_ms {
            if now.saturating_sub(last) <= self.arena.ring_damage_cooldown_ms {
                return;
            }
        }
        self.local.last_ring_damage_ms = Some(now);

        let damage = self.arena.ring_damage;
        let health = match self.entities.local_mut() {
            Some(local) => local.apply_damage(damage),
            None => return,
        };
        self.outputs.push(PeerOutput::CameraFlash {
            duration_ms: RING_FLASH_MS,
        });
        tracing::debug!(health, boundary, "Outside the ring");
        if health <= 0.0 {
            self.die();
        }
    }

    pub(crate) fn resolve_projectile_hits(&mut self, now: u64) {
        let base_radius = self.arena.projectile_radius;
        let entity_radius = self.arena.entity_radius;
        let padding = self.arena.projectile_query_padding;

        for handle in self.projectiles.active_handles() {
            let Some(projectile) = self.projectiles.get(handle) else {
                continue;
            };
            let position = projectile.position;
            let radius = projectile.radius(base_radius);
            let caster = projectile.caster.clone();

            let target = self
                .spatial
                .get_nearby(position.x, position.y, radius + padding)
                .into_iter()
                .filter_map(|key| match key {
                    SpatialKey::Entity(id) => Some(id),
                    SpatialKey::Projectile(_) => None,
                })
                .filter(|id| caster.as_ref() != Some(id))
                .find(|id| {
                    self.entities
                        .get(id)
                        .is_some_and(|e| distance(e.position, position) < radius + entity_radius)
                });

            if let Some(target) = target {
                self.apply_hit(handle, target, now);
            }
        }
    }

    fn apply_hit(&mut self, handle: PoolHandle, target: PeerId, now: u64) {
        let Some(projectile) = self.projectiles.get(handle) else {
            return;
        };
        let position = projectile.position;
        let travel = projectile.direction;
        let spec = projectile.spec();
        let caster_position = projectile
            .caster
            .as_ref()
            .and_then(|id| self.entities.get(id))
            .map(|e| e.position);
        let Some(target_position) = self.entities.get(&target).map(|e| e.position) else {
            return;
        };

        let direction = caster_position
            .and_then(|from| try_normalize(sub(target_position, from)))
            .or_else(|| try_normalize(sub(target_position, position)))
            .unwrap_or(travel);
        let magnitude =
            self.arena.reference_size() * self.arena.knockback_base_factor * spec.knockback_multiplier;

        if self.entities.is_local(&target) {
            let health = match self.entities.local_mut() {
                Some(local) => {
                    local.in_combat = true;
                    local.apply_damage(spec.damage)
                }
                None => return,
            };
            self.local.enter_combat(now, self.arena.combat_linger_ms);
            self.outputs.push(PeerOutput::Impulse(ImpulseRequest::new(
                scale(direction, magnitude),
                spec.impulse,
            )));
            self.outputs.push(PeerOutput::shake(spec.shake));
            tracing::debug!(damage = spec.damage, health, "Hit by projectile");
            if health <= 0.0 {
                self.die();
            }
        }

        self.spawn_explosion(position, now);
        self.release_projectile(handle);
    }

    fn spawn_explosion(&mut self, position: Vec2, now: u64) {
        let handle = self.explosions.acquire();
        if let Some(explosion) = self.explosions.get_mut(handle) {
            explosion.position = position;
            explosion.started_at_ms = now;
            explosion.active = true;
        }
        self.timers.schedule(
            now + self.arena.explosion_duration_ms,
            TimerTask::ReleaseExplosion(handle),
        );
        self.outputs.push(PeerOutput::Explosion { position });
    }

    /// Detect overlap between the local body and one other entity and
    /// announce it so both sides apply opposite impulses.
    pub(crate) fn detect_bumps(&mut self, now: u64) {
        if let Some(last) = self.local.last_bump_ms {
            if now.saturating_sub(last) < self.arena.bump_cooldown_ms {
                return;
            }
        }
        let Some(local) = self.entities.local() else {
            return;
        };
        let me = local.id.clone();
        let my_position = local.position;
        let radius = self.arena.entity_radius;
        let threshold = (radius + radius) * self.arena.bump_overlap_factor;

        let other = self
            .spatial
            .get_nearby(my_position.x, my_position.y, radius)
            .into_iter()
            .filter_map(|key| match key {
                SpatialKey::Entity(id) if id != me => Some(id),
                _ => None,
            })
            .find_map(|id| {
                let position = self.entities.get(&id)?.position;
                let gap = distance(my_position, position);
                (gap > 0.0 && gap < threshold).then(|| (id, sub(my_position, position), gap))
            });
        let Some((other, delta, gap)) = other else {
            return;
        };

        let normal = scale(delta, 1.0 / gap);
        let force = self.arena.reference_size() * self.arena.bump_force_factor;
        let bump = PlayerBump {
            a: me.to_string(),
            b: other.to_string(),
            nx: normal.x,
            ny: normal.y,
            force,
        };
        self.local.last_bump_ms = Some(now);
        self.publish_bump(bump);
        self.push_bump_impulse(normal, force);
        tracing::debug!(other = %other, "Bumped");
    }

    pub(crate) fn push_bump_impulse(&mut self, normal: Vec2, force: f64) {
        if length(normal) == 0.0 {
            return;
        }
        self.outputs.push(PeerOutput::Impulse(ImpulseRequest::new(
            scale(normal, force),
            BUMP_IMPULSE,
        )));
    }

    pub(crate) fn regenerate(&mut self, now: u64) {
        self.local.regenerate(
            now,
            self.arena.mana_regen_amount,
            self.arena.mana_regen_interval_ms,
        );
    }

    /// Local death: announce it, stop simulating our body and watch the rest
    /// of the round.
    pub(crate) fn die(&mut self) {
        let Some(id) = self.entities.local_id().cloned() else {
            return;
        };
        tracing::info!(peer_id = %id, round = self.ledger.round_index, "Eliminated");

        self.transition(MatchState::Spectating);
        self.announce_death(&id);
        self.entities.remove(&id);
        self.spatial.remove(&SpatialKey::Entity(id));
        self.local.charge_started_ms = None;
        self.recompute_authority();
    }
}
