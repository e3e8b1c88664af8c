//! Match phase state machine.
//!
//! The machine only knows the legal transition table. Everything a phase
//! change does to round bookkeeping happens in [`MatchHooks`], which the
//! coordinator implements with [`RoundLedger`].

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchState {
    Waiting,
    Playing,
    RoundEnd,
    Spectating,
    Disconnected,
}

impl MatchState {
    pub const ALL: [MatchState; 5] = [
        MatchState::Waiting,
        MatchState::Playing,
        MatchState::RoundEnd,
        MatchState::Spectating,
        MatchState::Disconnected,
    ];

    pub fn allowed_targets(self) -> &'static [MatchState] {
        use MatchState::*;
        match self {
            Waiting => &[Playing, Disconnected],
            Playing => &[RoundEnd, Spectating, Disconnected],
            RoundEnd => &[Waiting, Playing, Disconnected],
            Spectating => &[RoundEnd, Disconnected],
            Disconnected => &[Waiting],
        }
    }

    pub fn can_transition_to(self, target: MatchState) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MatchState::Waiting => "waiting",
            MatchState::Playing => "playing",
            MatchState::RoundEnd => "round_end",
            MatchState::Spectating => "spectating",
            MatchState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for MatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid match transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: MatchState,
    pub to: MatchState,
}

/// Payload stored alongside each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransitionData {
    /// Monotonic time of the transition
    pub at_ms: u64,
    pub epoch_ms: u64,
    pub known_entities: usize,
}

/// Side effects of phase changes.
pub trait MatchHooks {
    /// Entities currently known, used by Waiting to decide when to start.
    fn known_entities(&self) -> usize {
        0
    }

    fn on_enter(&mut self, _state: MatchState, _data: &TransitionData) {}

    fn on_exit(&mut self, _state: MatchState) {}
}

/// No side effects.
impl MatchHooks for () {}

#[derive(Debug)]
pub struct MatchStateMachine {
    state: MatchState,
    payloads: HashMap<MatchState, TransitionData>,
}

impl Default for MatchStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchStateMachine {
    pub fn new() -> Self {
        Self {
            state: MatchState::Waiting,
            payloads: HashMap::new(),
        }
    }

    pub fn state(&self) -> MatchState {
        self.state
    }

    pub fn is(&self, state: MatchState) -> bool {
        self.state == state
    }

    pub fn can_transition_to(&self, target: MatchState) -> bool {
        self.state.can_transition_to(target)
    }

    /// Payload of the last transition into `state`.
    pub fn data(&self, state: MatchState) -> Option<&TransitionData> {
        self.payloads.get(&state)
    }

    /// Move to `target`, running the exit hook of the current state and the
    /// enter hook of the new one. Self-transitions and transitions missing
    /// from the table are rejected and leave the state untouched.
    pub fn set_state(
        &mut self,
        target: MatchState,
        data: TransitionData,
        hooks: &mut impl MatchHooks,
    ) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(target) {
            return Err(InvalidTransition {
                from: self.state,
                to: target,
            });
        }

        let from = self.state;
        hooks.on_exit(from);
        self.state = target;
        self.payloads.insert(target, data);
        hooks.on_enter(target, &data);
        tracing::debug!(from = %from, to = %target, "Match state changed");
        Ok(())
    }

    /// Per-tick hook. Waiting is the only phase that advances on its own.
    pub fn update(&mut self, at_ms: u64, epoch_ms: u64, hooks: &mut impl MatchHooks) {
        if self.state == MatchState::Waiting {
            let known = hooks.known_entities();
            if known >= 2 {
                let data = TransitionData {
                    at_ms,
                    epoch_ms,
                    known_entities: known,
                };
                // Waiting -> Playing is always legal
                let _ = self.set_state(MatchState::Playing, data, hooks);
            }
        }
    }
}

/// Per-round counters owned by the coordinator and mutated only from
/// state-machine hooks.
#[derive(Debug, Clone)]
pub struct RoundLedger {
    pub round_index: u32,
    /// High-water mark of entities seen since the round began
    pub max_players_this_round: usize,
    pub round_started_at_ms: u64,
    pub round_started_epoch_ms: u64,
    pub initial_boundary: f64,
    pub boundary: f64,
    pub spectating: bool,
}

impl RoundLedger {
    pub fn new(initial_boundary: f64) -> Self {
        Self {
            round_index: 1,
            max_players_this_round: 0,
            round_started_at_ms: 0,
            round_started_epoch_ms: 0,
            initial_boundary,
            boundary: initial_boundary,
            spectating: false,
        }
    }

    /// Record another sighting; the mark never goes down within a round.
    pub fn observe_players(&mut self, count: usize) {
        self.max_players_this_round = self.max_players_this_round.max(count);
    }

    /// Hook adapter carrying the live entity count.
    pub fn hooks(&mut self, known_entities: usize) -> LedgerHooks<'_> {
        LedgerHooks {
            ledger: self,
            known_entities,
        }
    }
}

pub struct LedgerHooks<'a> {
    ledger: &'a mut RoundLedger,
    known_entities: usize,
}

impl MatchHooks for LedgerHooks<'_> {
    fn known_entities(&self) -> usize {
        self.known_entities
    }

    fn on_enter(&mut self, state: MatchState, data: &TransitionData) {
        let ledger = &mut *self.ledger;
        match state {
            MatchState::Playing => {
                ledger.round_started_at_ms = data.at_ms;
                ledger.round_started_epoch_ms = data.epoch_ms;
                ledger.boundary = ledger.initial_boundary;
                ledger.observe_players(data.known_entities);
            }
            MatchState::Spectating => ledger.spectating = true,
            MatchState::Waiting => ledger.spectating = false,
            MatchState::RoundEnd | MatchState::Disconnected => {}
        }
    }

    fn on_exit(&mut self, state: MatchState) {
        match state {
            MatchState::RoundEnd => self.ledger.max_players_this_round = 0,
            MatchState::Spectating => self.ledger.spectating = false,
            _ => {}
        }
    }
}
