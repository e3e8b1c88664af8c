//! The per-peer orchestrator.
//!
//! One [`PeerCoordinator`] owns everything a peer knows: the entity registry,
//! the spatial index, both pools, the match state and its round counters. It
//! is driven from a single tick loop and talks to other peers only through
//! its [`BroadcastChannel`].

use std::f64::consts::TAU;
use std::sync::mpsc;
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use ringfire_shared::protocol::{
    events, FireballShot, PlayerBump, PlayerDeath, PlayerJoin, PlayerLeave, PlayerMove, RingUpdate,
    RoundReset,
};
use ringfire_shared::vec2::{add, from_angle, scale, try_normalize};
use ringfire_shared::{ArenaConfig, GameEvent, Vec2};

use crate::channel::BroadcastChannel;
use crate::clock::Clock;
use crate::config::PeerConfig;
use crate::entity::{Entity, EntityRegistry, LocalState, PeerId};
use crate::match_state::{MatchState, MatchStateMachine, RoundLedger, TransitionData};
use crate::output::PeerOutput;
use crate::pool::{ObjectPool, PoolHandle, PoolStats};
use crate::projectile::{Explosion, Projectile};
use crate::scheduler::Scheduler;
use crate::spatial::{GridStats, SpatialIndex, SpatialKey};
use crate::transport::Transport;

/// Delayed work fired from the tick loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerTask {
    ExpireProjectile(PoolHandle),
    ReleaseExplosion(PoolHandle),
    RestartRound { round: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinatorStats {
    pub round: u32,
    pub state: MatchState,
    pub known_entities: usize,
    pub projectiles: PoolStats,
    pub explosions: PoolStats,
    pub grid: GridStats,
}

pub struct PeerCoordinator<T> {
    pub(crate) arena: ArenaConfig,
    pub(crate) clock: Arc<dyn Clock>,
    rng: ChaCha8Rng,
    pub(crate) channel: BroadcastChannel<T>,
    events_rx: mpsc::Receiver<GameEvent>,
    pub(crate) self_id: Option<PeerId>,
    pub(crate) entities: EntityRegistry,
    pub(crate) local: LocalState,
    machine: MatchStateMachine,
    pub(crate) ledger: RoundLedger,
    is_authority: bool,
    authority: Option<PeerId>,
    pub(crate) spatial: SpatialIndex<SpatialKey>,
    pub(crate) projectiles: ObjectPool<Projectile>,
    pub(crate) explosions: ObjectPool<Explosion>,
    pub(crate) timers: Scheduler<TimerTask>,
    pub(crate) outputs: Vec<PeerOutput>,
    /// Round a synchronized restart is already scheduled for
    restart_pending: Option<u32>,
}

impl<T: Transport> PeerCoordinator<T> {
    pub fn new(config: PeerConfig, transport: T, clock: Arc<dyn Clock>, seed: u64) -> Self {
        let arena = config.arena;
        let mut channel = BroadcastChannel::new(transport, Arc::clone(&clock), config.channel);

        // Handlers only decode and queue; the tick loop applies events
        let (events_tx, events_rx) = mpsc::channel();
        for name in events::ALL {
            let tx = events_tx.clone();
            channel.subscribe(name, move |payload| match GameEvent::decode(name, payload) {
                Ok(Some(event)) => {
                    let _ = tx.send(event);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(event = name, error = %e, "Dropping malformed payload"),
            });
        }

        let now = clock.monotonic_ms();
        Self {
            arena,
            rng: ChaCha8Rng::seed_from_u64(seed),
            channel,
            events_rx,
            self_id: None,
            entities: EntityRegistry::new(),
            local: LocalState::new(arena.max_mana, now),
            machine: MatchStateMachine::new(),
            ledger: RoundLedger::new(arena.ring_radius),
            is_authority: false,
            authority: None,
            spatial: SpatialIndex::new(arena.world_width, arena.world_height, arena.grid_cell_size),
            projectiles: ObjectPool::new(
                Projectile::default,
                Projectile::reset,
                arena.projectile_pool_size,
            ),
            explosions: ObjectPool::new(
                Explosion::default,
                Explosion::reset,
                arena.explosion_pool_size,
            ),
            timers: Scheduler::new(),
            outputs: Vec::new(),
            restart_pending: None,
            clock,
        }
    }

    /// Join the named broadcast channel. Every event handler is registered
    /// before this is called. Failure moves the peer to Disconnected.
    pub async fn connect(&mut self, channel: &str) -> bool {
        let connected = self.channel.connect(channel).await;
        if !connected {
            self.transition(MatchState::Disconnected);
        }
        connected
    }

    /// Create the local entity, enter Playing and announce ourselves.
    pub fn join(&mut self, id: impl Into<PeerId>, spawn: Option<Vec2>) -> bool {
        let id = id.into();
        let now = self.clock.monotonic_ms();
        let position = spawn.unwrap_or_else(|| self.random_spawn());

        self.entities
            .insert_local(Entity::new(id.clone(), position, self.arena.max_health, now));
        self.local = LocalState::new(self.arena.max_mana, now);
        self.self_id = Some(id.clone());
        self.recompute_authority();
        self.transition(MatchState::Playing);

        tracing::info!(peer_id = %id, x = position.x, y = position.y, "Joined arena");
        self.publish_join(false)
    }

    /// Announce departure, release every pooled object and disconnect.
    pub fn shutdown(&mut self) {
        if let Some(id) = self.self_id.clone() {
            self.channel
                .publish_event(&GameEvent::Leave(PlayerLeave { id: id.to_string() }), true);
        }
        self.projectiles.drain();
        self.explosions.drain();
        self.spatial.clear();
        self.timers.clear();
        self.restart_pending = None;
        self.channel.disconnect();
        self.transition(MatchState::Disconnected);
        tracing::info!(round = self.ledger.round_index, "Peer shut down");
    }

    /// Advance the simulation by `dt` seconds.
    pub fn tick(&mut self, dt: f64) {
        self.channel.dispatch();
        self.process_events();

        let now = self.clock.monotonic_ms();
        self.run_timers(now);
        self.check_liveness();

        let known = self.entities.len();
        let epoch = self.clock.epoch_ms();
        self.machine.update(now, epoch, &mut self.ledger.hooks(known));

        if !self.machine.is(MatchState::Playing) {
            return;
        }

        self.update_boundary(now);
        self.advance_projectiles(dt);
        self.rebuild_spatial_index();
        self.apply_ring_damage(now);
        self.resolve_projectile_hits(now);
        self.detect_bumps(now);
        self.regenerate(now);
        self.publish_local_state(now);
        self.prune_stale_peers(now);
        self.check_win_condition();
    }

    // === Input intents ===

    pub fn set_movement_intent(&mut self, intent: Vec2) {
        self.local.movement_intent = intent;
    }

    /// Start charging a cast, if alive and able to afford the cheapest one.
    pub fn cast_requested(&mut self, _target: Vec2) {
        if !self.machine.is(MatchState::Playing) || self.entities.local().is_none() {
            return;
        }
        let cheapest = crate::projectile::spec(ringfire_shared::FireballKind::Normal).mana_cost;
        if self.local.mana >= cheapest && self.local.charge_started_ms.is_none() {
            self.local.charge_started_ms = Some(self.clock.monotonic_ms());
        }
    }

    /// Release the charge toward `target` (world coordinates).
    pub fn cast_released(&mut self, target: Vec2) -> bool {
        let Some(started) = self.local.charge_started_ms.take() else {
            return false;
        };
        if !self.machine.is(MatchState::Playing) {
            return false;
        }
        let Some(local) = self.entities.local() else {
            return false;
        };
        let Some(direction) = try_normalize(ringfire_shared::vec2::sub(target, local.position)) else {
            return false;
        };

        let held = self.clock.monotonic_ms().saturating_sub(started);
        let request = crate::projectile::CastRequest {
            origin: local.position,
            direction,
            kind: crate::projectile::kind_for_charge(held),
            caster: local.id.clone(),
        };
        self.cast(request)
    }

    /// Physics reports where the local body actually is.
    pub fn report_local_position(&mut self, position: Vec2) {
        if let Some(local) = self.entities.local_mut() {
            local.position = position;
        }
    }

    // === Accessors ===

    pub fn state(&self) -> MatchState {
        self.machine.state()
    }

    pub fn round_index(&self) -> u32 {
        self.ledger.round_index
    }

    pub fn is_authority(&self) -> bool {
        self.is_authority
    }

    pub fn authority(&self) -> Option<&PeerId> {
        self.authority.as_ref()
    }

    pub fn boundary_radius(&self) -> f64 {
        self.ledger.boundary
    }

    pub fn self_id(&self) -> Option<&PeerId> {
        self.self_id.as_ref()
    }

    pub fn entities(&self) -> &EntityRegistry {
        &self.entities
    }

    pub fn local_entity(&self) -> Option<&Entity> {
        self.entities.local()
    }

    pub fn health(&self) -> Option<f64> {
        self.entities.local().map(|e| e.health)
    }

    pub fn mana(&self) -> f64 {
        self.local.mana
    }

    pub fn movement_intent(&self) -> Vec2 {
        self.local.movement_intent
    }

    pub fn charging(&self) -> bool {
        self.local.charge_started_ms.is_some()
    }

    pub fn projectiles(&self) -> impl Iterator<Item = (PoolHandle, &Projectile)> {
        self.projectiles.iter_active()
    }

    pub fn projectile_count(&self) -> usize {
        self.projectiles.active_count()
    }

    pub fn spatial(&self) -> &SpatialIndex<SpatialKey> {
        &self.spatial
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub fn drain_outputs(&mut self) -> Vec<PeerOutput> {
        std::mem::take(&mut self.outputs)
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            round: self.ledger.round_index,
            state: self.machine.state(),
            known_entities: self.entities.len(),
            projectiles: self.projectiles.stats(),
            explosions: self.explosions.stats(),
            grid: self.spatial.stats(),
        }
    }

    // === Internals ===

    /// Attempt a state change; rejected transitions are not errors here.
    pub(crate) fn transition(&mut self, target: MatchState) -> bool {
        let known = self.entities.len();
        let data = TransitionData {
            at_ms: self.clock.monotonic_ms(),
            epoch_ms: self.clock.epoch_ms(),
            known_entities: known,
        };
        match self.machine.set_state(target, data, &mut self.ledger.hooks(known)) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Transition ignored");
                false
            }
        }
    }

    /// Authority is the smallest known identity; we hold it only while our
    /// own entity is that identity.
    pub(crate) fn recompute_authority(&mut self) {
        let elected = self.entities.elect_authority().cloned();
        self.is_authority = match (&elected, &self.self_id) {
            (Some(authority), Some(me)) => authority == me,
            _ => false,
        };
        if elected != self.authority {
            tracing::info!(
                authority = elected.as_ref().map(PeerId::as_str).unwrap_or("none"),
                is_self = self.is_authority,
                "Authority changed"
            );
            self.authority = elected;
        }
    }

    pub(crate) fn publish_join(&mut self, reply: bool) -> bool {
        let Some(local) = self.entities.local() else {
            return false;
        };
        let payload = PlayerJoin {
            id: local.id.to_string(),
            world_x: local.position.x,
            world_y: local.position.y,
            health: local.health,
            is_authority: self.is_authority,
            reply,
        };
        self.channel.publish_event(&GameEvent::Join(payload), true)
    }

    fn random_spawn(&mut self) -> Vec2 {
        let (cx, cy) = self.arena.world_center();
        let angle = self.rng.gen_range(0.0..TAU);
        let distance = self.rng.gen_range(0.0..self.arena.ring_radius * 0.5);
        add(Vec2::new(cx, cy), scale(from_angle(angle), distance))
    }

    fn is_self(&self, id: &PeerId) -> bool {
        self.self_id.as_ref() == Some(id)
    }

    fn process_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                GameEvent::Join(join) => self.on_join(join),
                GameEvent::Move(mv) => self.on_move(mv),
                GameEvent::Leave(leave) => self.on_departure(PeerId::from(leave.id), "left"),
                GameEvent::Death(death) => self.on_departure(PeerId::from(death.id), "died"),
                GameEvent::Bump(bump) => self.on_bump(bump),
                GameEvent::FireballShot(shot) => self.on_fireball_shot(shot),
                GameEvent::RoundReset(reset) => self.on_round_reset(reset),
                GameEvent::RingUpdate(ring) => self.on_ring_update(ring),
            }
        }
    }

    fn on_join(&mut self, join: PlayerJoin) {
        let id = PeerId::from(join.id);
        if self.is_self(&id) {
            return;
        }

        let now = self.clock.monotonic_ms();
        let position = Vec2::new(join.world_x, join.world_y);
        let health = join.health.clamp(0.0, self.arena.max_health);
        match self.entities.get_mut(&id) {
            Some(known) => {
                known.position = position;
                known.health = health;
                known.last_update_ms = now;
            }
            None => {
                self.entities.insert_remote(Entity::new(id.clone(), position, health, now));
                tracing::info!(peer_id = %id, known = self.entities.len(), "Peer joined");
            }
        }
        self.recompute_authority();

        // Replies are never answered, which bounds the exchange to one round trip
        if !join.reply {
            self.publish_join(true);
        }
    }

    fn on_move(&mut self, mv: PlayerMove) {
        let id = PeerId::from(mv.id);
        if self.is_self(&id) {
            return;
        }
        let now = self.clock.monotonic_ms();
        let max_health = self.arena.max_health;
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.position = Vec2::new(mv.world_x, mv.world_y);
            entity.health = mv.health.clamp(0.0, max_health);
            entity.moving = mv.moving;
            entity.in_combat = mv.in_combat;
            entity.last_update_ms = now;
        }
    }

    /// Leave and death are handled identically.
    fn on_departure(&mut self, id: PeerId, reason: &'static str) {
        if self.is_self(&id) {
            return;
        }
        if self.remove_remote(&id) {
            tracing::info!(peer_id = %id, reason, remaining = self.entities.len(), "Peer removed");
            self.recompute_authority();
            self.check_win_condition();
        }
    }

    pub(crate) fn remove_remote(&mut self, id: &PeerId) -> bool {
        let removed = self.entities.remove(id).is_some();
        self.spatial.remove(&SpatialKey::Entity(id.clone()));
        removed
    }

    fn on_fireball_shot(&mut self, shot: FireballShot) {
        let caster = PeerId::from(shot.player_id);
        if self.is_self(&caster) {
            return;
        }
        let Some(direction) = try_normalize(shot.direction) else {
            tracing::debug!(peer_id = %caster, "Ignoring fireball without direction");
            return;
        };
        let request = crate::projectile::CastRequest {
            origin: Vec2::new(shot.x, shot.y),
            direction,
            kind: shot.kind,
            caster,
        };
        self.spawn_projectile(&request);
    }

    fn on_round_reset(&mut self, reset: RoundReset) {
        if self.machine.is(MatchState::Disconnected) || self.self_id.is_none() {
            return;
        }
        // Late joiners count rounds from 1, so the number itself is not checked
        if self.restart_pending.is_some() {
            tracing::debug!(round = reset.round, "Restart already pending");
            return;
        }

        self.transition(MatchState::RoundEnd);
        self.schedule_restart(reset.round, reset.start_at);
        self.outputs.push(PeerOutput::RoundEnded {
            next_round: reset.round,
            start_at: reset.start_at,
        });
    }

    fn on_ring_update(&mut self, ring: RingUpdate) {
        if self.is_authority {
            return;
        }
        self.ledger.boundary = ring.radius.max(0.0);
        self.ledger.round_started_epoch_ms = ring.start_time;

        // The authority's wall-clock start, on our monotonic timeline
        let since_start = self.clock.epoch_ms().saturating_sub(ring.start_time);
        self.ledger.round_started_at_ms = self.clock.monotonic_ms().saturating_sub(since_start);
    }

    fn on_bump(&mut self, bump: PlayerBump) {
        let Some(me) = self.self_id.as_ref() else {
            return;
        };
        if self.entities.local().is_none() {
            return;
        }
        let normal = if me.as_str() == bump.a {
            Vec2::new(bump.nx, bump.ny)
        } else if me.as_str() == bump.b {
            Vec2::new(-bump.nx, -bump.ny)
        } else {
            return;
        };
        self.push_bump_impulse(normal, bump.force);
    }

    fn schedule_restart(&mut self, round: u32, start_at_epoch_ms: u64) {
        let delay = start_at_epoch_ms.saturating_sub(self.clock.epoch_ms());
        let deadline = self.clock.monotonic_ms() + delay;
        self.restart_pending = Some(round);
        self.timers.schedule(deadline, TimerTask::RestartRound { round });
        tracing::info!(round, delay_ms = delay, "Round restart scheduled");
    }

    fn run_timers(&mut self, now: u64) {
        for task in self.timers.drain_due(now) {
            match task {
                TimerTask::ExpireProjectile(handle) => self.release_projectile(handle),
                TimerTask::ReleaseExplosion(handle) => {
                    self.explosions.release(handle);
                }
                TimerTask::RestartRound { round } => self.start_next_round(round),
            }
        }
    }

    fn check_liveness(&mut self) {
        if self.channel.connection_lost() && !self.machine.is(MatchState::Disconnected) {
            tracing::warn!("Transport closed; peer is now disconnected");
            self.transition(MatchState::Disconnected);
        }
    }

    /// Only the authority ends rounds, and only once per round.
    pub(crate) fn check_win_condition(&mut self) {
        if !self.machine.is(MatchState::Playing) {
            return;
        }
        let remaining = self.entities.len();
        self.ledger.observe_players(remaining);

        if self.is_authority
            && remaining <= 1
            && self.ledger.max_players_this_round > 1
            && self.restart_pending.is_none()
        {
            self.handle_round_end();
        }
    }

    fn handle_round_end(&mut self) {
        let next_round = self.ledger.round_index + 1;
        let start_at = self.clock.epoch_ms() + self.arena.round_restart_delay_ms;
        let winner = self.entities.local().map(|e| e.id.to_string());

        self.transition(MatchState::RoundEnd);
        self.channel.publish_event(
            &GameEvent::RoundReset(RoundReset {
                round: next_round,
                start_at,
            }),
            true,
        );
        self.schedule_restart(next_round, start_at);
        self.outputs.push(PeerOutput::RoundEnded {
            next_round,
            start_at,
        });
        tracing::info!(
            round = self.ledger.round_index,
            winner = winner.as_deref().unwrap_or("none"),
            "Round over"
        );
    }

    /// Reset everything for the next round. The round index moves here and
    /// nowhere else.
    fn start_next_round(&mut self, round: u32) {
        if self.restart_pending != Some(round) {
            return;
        }
        self.restart_pending = None;

        self.projectiles.drain();
        self.explosions.drain();
        self.spatial.clear();
        self.entities.clear();
        self.timers.clear();
        self.ledger.round_index += 1;

        let Some(id) = self.self_id.clone() else {
            return;
        };

        // Spectating and Playing reach Playing again through RoundEnd
        if !self.machine.is(MatchState::RoundEnd) {
            self.transition(MatchState::RoundEnd);
        }

        let now = self.clock.monotonic_ms();
        let spawn = self.random_spawn();
        let intent = self.local.movement_intent;
        self.entities
            .insert_local(Entity::new(id.clone(), spawn, self.arena.max_health, now));
        self.local = LocalState::new(self.arena.max_mana, now);
        self.local.movement_intent = intent;

        self.transition(MatchState::Playing);
        self.recompute_authority();
        self.publish_join(false);
        self.outputs.push(PeerOutput::RoundStarted {
            round: self.ledger.round_index,
        });
        tracing::info!(peer_id = %id, round = self.ledger.round_index, "Round started");
    }

    fn publish_local_state(&mut self, now: u64) {
        let in_combat = self.local.in_combat(now);
        let moving = ringfire_shared::vec2::length(self.local.movement_intent) > 0.0;
        let Some(local) = self.entities.local_mut() else {
            return;
        };
        local.in_combat = in_combat;
        local.moving = moving;
        local.last_update_ms = now;

        let payload = PlayerMove {
            id: local.id.to_string(),
            world_x: local.position.x,
            world_y: local.position.y,
            health: local.health,
            moving,
            in_combat,
        };
        self.channel.set_rate(payload.world_x, payload.world_y, in_combat);
        self.channel.publish_event(&GameEvent::Move(payload), false);
    }

    fn prune_stale_peers(&mut self, now: u64) {
        let stale = self.entities.stale_remotes(now, self.arena.peer_timeout_ms);
        if stale.is_empty() {
            return;
        }
        for id in &stale {
            self.remove_remote(id);
            tracing::info!(peer_id = %id, "Dropping silent peer");
        }
        self.recompute_authority();
    }

    pub(crate) fn update_boundary(&mut self, now: u64) {
        if !self.is_authority {
            return;
        }
        let elapsed_secs = now.saturating_sub(self.ledger.round_started_at_ms) as f64 / 1000.0;
        let radius = (self.arena.ring_radius - elapsed_secs * self.arena.ring_shrink_rate)
            .max(self.arena.ring_floor())
            .min(self.ledger.boundary);
        self.ledger.boundary = radius;
        self.channel.publish_event(
            &GameEvent::RingUpdate(RingUpdate {
                radius,
                start_time: self.ledger.round_started_epoch_ms,
            }),
            false,
        );
    }

    pub(crate) fn announce_death(&mut self, id: &PeerId) {
        self.channel
            .publish_event(&GameEvent::Death(PlayerDeath { id: id.to_string() }), true);
    }

    pub(crate) fn publish_shot(&mut self, shot: FireballShot) -> bool {
        self.channel.publish_event(&GameEvent::FireballShot(shot), true)
    }

    pub(crate) fn publish_bump(&mut self, bump: PlayerBump) -> bool {
        self.channel.publish_event(&GameEvent::Bump(bump), true)
    }
}
