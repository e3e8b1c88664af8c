use std::collections::HashMap;
use std::fmt;

use ringfire_shared::Vec2;

/// Globally unique participant identity. Ordering is lexicographic, which is
/// what authority election relies on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: PeerId,
    pub position: Vec2,
    /// Always within [0, max_health]
    pub health: f64,
    pub moving: bool,
    pub in_combat: bool,
    /// Monotonic time of the last message (or local update) about this entity
    pub last_update_ms: u64,
}

impl Entity {
    pub fn new(id: PeerId, position: Vec2, health: f64, now_ms: u64) -> Self {
        Self {
            id,
            position,
            health,
            moving: false,
            in_combat: false,
            last_update_ms: now_ms,
        }
    }

    /// Subtract `amount`, clamping at zero. Returns the new health.
    pub fn apply_damage(&mut self, amount: f64) -> f64 {
        self.health = (self.health - amount).max(0.0);
        self.health
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0.0
    }
}

/// Every entity this peer knows about, at most one of them local.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: HashMap<PeerId, Entity>,
    local: Option<PeerId>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the local entity, replacing any previous local one.
    pub fn insert_local(&mut self, entity: Entity) {
        if let Some(prev) = self.local.take() {
            self.entities.remove(&prev);
        }
        self.local = Some(entity.id.clone());
        self.entities.insert(entity.id.clone(), entity);
    }

    /// Insert a remote entity. Returns false if the id was already known, in
    /// which case nothing is replaced.
    pub fn insert_remote(&mut self, entity: Entity) -> bool {
        if self.entities.contains_key(&entity.id) {
            return false;
        }
        self.entities.insert(entity.id.clone(), entity);
        true
    }

    pub fn remove(&mut self, id: &PeerId) -> Option<Entity> {
        if self.local.as_ref() == Some(id) {
            self.local = None;
        }
        self.entities.remove(id)
    }

    pub fn get(&self, id: &PeerId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn get_mut(&mut self, id: &PeerId) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn local_id(&self) -> Option<&PeerId> {
        self.local.as_ref()
    }

    pub fn local(&self) -> Option<&Entity> {
        self.local.as_ref().and_then(|id| self.entities.get(id))
    }

    pub fn local_mut(&mut self) -> Option<&mut Entity> {
        let id = self.local.as_ref()?;
        self.entities.get_mut(id)
    }

    pub fn is_local(&self, id: &PeerId) -> bool {
        self.local.as_ref() == Some(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// The lexicographically smallest known identity, if any.
    pub fn elect_authority(&self) -> Option<&PeerId> {
        self.entities.keys().min()
    }

    /// Remote entities not heard from within `timeout_ms`.
    pub fn stale_remotes(&self, now_ms: u64, timeout_ms: u64) -> Vec<PeerId> {
        let mut stale: Vec<PeerId> = self
            .entities
            .values()
            .filter(|e| !self.is_local(&e.id))
            .filter(|e| now_ms.saturating_sub(e.last_update_ms) > timeout_ms)
            .map(|e| e.id.clone())
            .collect();
        stale.sort();
        stale
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.local = None;
    }
}

/// Resources and input state that only exist for the local entity.
#[derive(Debug, Clone)]
pub struct LocalState {
    pub mana: f64,
    pub max_mana: f64,
    pub movement_intent: Vec2,
    last_regen_ms: u64,
    pub last_ring_damage_ms: Option<u64>,
    pub last_bump_ms: Option<u64>,
    /// Combat tier is forced until this monotonic time
    pub combat_until_ms: u64,
    pub charge_started_ms: Option<u64>,
}

impl LocalState {
    pub fn new(max_mana: f64, now_ms: u64) -> Self {
        Self {
            mana: max_mana,
            max_mana,
            movement_intent: Vec2::ZERO,
            last_regen_ms: now_ms,
            last_ring_damage_ms: None,
            last_bump_ms: None,
            combat_until_ms: 0,
            charge_started_ms: None,
        }
    }

    /// Add `amount` once more than `interval_ms` has passed, capped at max.
    pub fn regenerate(&mut self, now_ms: u64, amount: f64, interval_ms: u64) -> bool {
        if now_ms.saturating_sub(self.last_regen_ms) <= interval_ms {
            return false;
        }
        self.last_regen_ms = now_ms;
        let before = self.mana;
        self.mana = (self.mana + amount).min(self.max_mana);
        self.mana > before
    }

    /// Deduct `cost` if affordable.
    pub fn try_spend(&mut self, cost: f64) -> bool {
        if self.mana < cost {
            return false;
        }
        self.mana -= cost;
        true
    }

    pub fn in_combat(&self, now_ms: u64) -> bool {
        now_ms < self.combat_until_ms
    }

    pub fn enter_combat(&mut self, now_ms: u64, linger_ms: u64) {
        self.combat_until_ms = self.combat_until_ms.max(now_ms + linger_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str) -> Entity {
        Entity::new(PeerId::from(id), Vec2::new(0.0, 0.0), 100.0, 0)
    }

    #[test]
    fn authority_is_smallest_id_regardless_of_order() {
        let orders = [["carol", "alice", "bob"], ["bob", "carol", "alice"]];
        for order in orders {
            let mut registry = EntityRegistry::new();
            for id in order {
                registry.insert_remote(entity(id));
            }
            assert_eq!(registry.elect_authority().map(PeerId::as_str), Some("alice"));
        }
    }

    #[test]
    fn empty_registry_has_no_authority() {
        let registry = EntityRegistry::new();
        assert!(registry.elect_authority().is_none());
    }

    #[test]
    fn only_one_local_entity() {
        let mut registry = EntityRegistry::new();
        registry.insert_local(entity("a"));
        registry.insert_local(entity("b"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.local().map(|e| e.id.as_str()), Some("b"));
    }

    #[test]
    fn duplicate_remote_insert_is_rejected() {
        let mut registry = EntityRegistry::new();
        assert!(registry.insert_remote(entity("a")));
        assert!(!registry.insert_remote(entity("a")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn damage_clamps_at_zero() {
        let mut e = entity("a");
        assert_eq!(e.apply_damage(30.0), 70.0);
        assert_eq!(e.apply_damage(500.0), 0.0);
        assert!(!e.is_alive());
    }

    #[test]
    fn stale_remotes_skip_local() {
        let mut registry = EntityRegistry::new();
        registry.insert_local(entity("me"));
        registry.insert_remote(entity("ghost"));
        let mut fresh = entity("fresh");
        fresh.last_update_ms = 9_000;
        registry.insert_remote(fresh);
        let stale = registry.stale_remotes(10_000, 5_000);
        assert_eq!(stale, vec![PeerId::from("ghost")]);
    }

    #[test]
    fn mana_regenerates_per_interval_up_to_max() {
        let mut local = LocalState::new(100.0, 0);
        assert!(local.try_spend(35.0));
        assert!(!local.regenerate(150, 2.0, 200));
        assert!(!local.regenerate(200, 2.0, 200));
        assert!(local.regenerate(201, 2.0, 200));
        assert_eq!(local.mana, 67.0);
        local.mana = 99.5;
        local.regenerate(402, 2.0, 200);
        assert_eq!(local.mana, 100.0);
    }

    #[test]
    fn spending_more_than_available_fails() {
        let mut local = LocalState::new(100.0, 0);
        local.mana = 15.0;
        assert!(!local.try_spend(20.0));
        assert_eq!(local.mana, 15.0);
    }
}
