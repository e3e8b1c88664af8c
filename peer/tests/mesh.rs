//! Multi-peer scenarios over the in-process hub.
//!
//! Every peer shares one `ManualClock`, so wall-clock targets such as the
//! round restart line up exactly and time only moves when a test says so.

use std::sync::Arc;

use ringfire_peer::spatial::SpatialKey;
use ringfire_peer::{
    CastRequest, Clock, LocalHub, LocalTransport, ManualClock, MatchState, PeerConfig,
    PeerCoordinator, PeerId, PeerOutput, Transport,
};
use ringfire_shared::protocol::{events, PlayerBump, PlayerJoin, RoundReset};
use ringfire_shared::vec2::vec2;
use ringfire_shared::{Envelope, FireballKind, GameEvent, Vec2};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

type Peer = PeerCoordinator<LocalTransport>;

const DT: f64 = 1.0 / 60.0;

async fn spawn_peer(hub: &LocalHub, clock: &Arc<ManualClock>, id: &str, at: Vec2) -> Peer {
    let seed = id.bytes().map(u64::from).sum();
    let mut peer = PeerCoordinator::new(PeerConfig::default(), hub.transport(), clock.clone(), seed);
    assert!(peer.connect("arena").await);
    assert!(peer.join(id, Some(at)));
    peer
}

fn tick_all(peers: &mut [&mut Peer]) {
    for peer in peers.iter_mut() {
        peer.tick(DT);
    }
}

/// Enough ticks for announcements and replies to land everywhere.
fn settle(peers: &mut [&mut Peer]) {
    for _ in 0..3 {
        tick_all(peers);
    }
}

/// A bare channel member that speaks the wire protocol directly.
async fn observer(hub: &LocalHub) -> (LocalTransport, UnboundedReceiver<Envelope>) {
    let mut transport = hub.transport();
    let (tx, rx) = unbounded_channel();
    transport.connect("arena", tx).await.unwrap();
    (transport, rx)
}

fn send(transport: &mut LocalTransport, event: GameEvent) {
    transport
        .publish(Envelope {
            event: event.name().to_string(),
            payload: event.payload().unwrap(),
        })
        .unwrap();
}

/// Drain the inbox, keeping only events published under `name`.
fn received(inbox: &mut UnboundedReceiver<Envelope>, name: &str) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    while let Ok(envelope) = inbox.try_recv() {
        if envelope.event == name {
            out.push(envelope.payload);
        }
    }
    out
}

fn kicks(outputs: &[PeerOutput]) -> Vec<(f64, f64)> {
    outputs
        .iter()
        .filter_map(|o| match o {
            PeerOutput::Impulse(i) => Some((i.dx, i.dy)),
            _ => None,
        })
        .collect()
}

fn impulses(outputs: &[PeerOutput]) -> Vec<f64> {
    outputs
        .iter()
        .filter_map(|o| match o {
            PeerOutput::Impulse(i) => Some(i.magnitude()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn peers_discover_each_other_and_agree_on_authority() {
    let hub = LocalHub::new();
    let clock = Arc::new(ManualClock::new());
    let mut bob = spawn_peer(&hub, &clock, "bob", vec2(550.0, 500.0)).await;
    let mut alice = spawn_peer(&hub, &clock, "alice", vec2(450.0, 500.0)).await;
    let mut carol = spawn_peer(&hub, &clock, "carol", vec2(500.0, 600.0)).await;

    settle(&mut [&mut bob, &mut alice, &mut carol]);

    for peer in [&bob, &alice, &carol] {
        assert_eq!(peer.entities().len(), 3);
        assert_eq!(peer.authority().map(PeerId::as_str), Some("alice"));
    }
    assert!(alice.is_authority());
    assert!(!bob.is_authority());
    assert!(!carol.is_authority());
}

#[tokio::test]
async fn authority_moves_when_the_smallest_id_leaves() {
    let hub = LocalHub::new();
    let clock = Arc::new(ManualClock::new());
    let mut alice = spawn_peer(&hub, &clock, "alice", vec2(450.0, 500.0)).await;
    let mut bob = spawn_peer(&hub, &clock, "bob", vec2(550.0, 500.0)).await;
    let mut carol = spawn_peer(&hub, &clock, "carol", vec2(500.0, 600.0)).await;
    settle(&mut [&mut alice, &mut bob, &mut carol]);

    alice.shutdown();
    assert_eq!(alice.state(), MatchState::Disconnected);
    settle(&mut [&mut bob, &mut carol]);

    assert!(bob.is_authority());
    assert_eq!(carol.authority().map(PeerId::as_str), Some("bob"));
    assert_eq!(carol.entities().len(), 2);
}

#[tokio::test]
async fn lone_spectator_has_no_authority() {
    let hub = LocalHub::new();
    let clock = Arc::new(ManualClock::new());
    let mut alice = spawn_peer(&hub, &clock, "alice", vec2(950.0, 500.0)).await;

    for _ in 0..5 {
        alice.tick(DT);
        clock.advance_ms(501);
    }
    assert_eq!(alice.state(), MatchState::Spectating);
    assert!(alice.authority().is_none());
    assert!(!alice.is_authority());
}

#[tokio::test]
async fn death_ends_the_round_and_every_peer_restarts_once() {
    let hub = LocalHub::new();
    let clock = Arc::new(ManualClock::new());
    let mut alice = spawn_peer(&hub, &clock, "alice", vec2(450.0, 500.0)).await;
    let mut bob = spawn_peer(&hub, &clock, "bob", vec2(550.0, 500.0)).await;
    settle(&mut [&mut alice, &mut bob]);
    assert_eq!(alice.round_index(), 1);

    // Five ring hits of 20 finish bob off
    for _ in 0..5 {
        bob.report_local_position(vec2(950.0, 500.0));
        tick_all(&mut [&mut alice, &mut bob]);
        clock.advance_ms(501);
    }
    assert_eq!(bob.state(), MatchState::Spectating);
    tick_all(&mut [&mut alice, &mut bob]);

    assert_eq!(alice.state(), MatchState::RoundEnd);
    assert_eq!(bob.state(), MatchState::RoundEnd);
    let ended = alice
        .drain_outputs()
        .into_iter()
        .filter(|o| matches!(o, PeerOutput::RoundEnded { next_round: 2, .. }))
        .count();
    assert_eq!(ended, 1);
    assert!(bob
        .drain_outputs()
        .iter()
        .any(|o| matches!(o, PeerOutput::RoundEnded { next_round: 2, .. })));

    // Nothing moves before the shared start time
    clock.advance_ms(2_000);
    tick_all(&mut [&mut alice, &mut bob]);
    assert_eq!(alice.round_index(), 1);
    assert_eq!(bob.round_index(), 1);

    clock.advance_ms(1_000);
    settle(&mut [&mut alice, &mut bob]);
    for _ in 0..10 {
        clock.advance_ms(500);
        tick_all(&mut [&mut alice, &mut bob]);
    }

    for peer in [&mut alice, &mut bob] {
        assert_eq!(peer.round_index(), 2);
        assert_eq!(peer.state(), MatchState::Playing);
        assert_eq!(peer.health(), Some(100.0));
        assert_eq!(peer.mana(), 100.0);
        assert_eq!(peer.entities().len(), 2);
        let started = peer
            .drain_outputs()
            .into_iter()
            .filter(|o| matches!(o, PeerOutput::RoundStarted { .. }))
            .count();
        assert_eq!(started, 1);
    }
    assert!(alice.is_authority());
}

#[tokio::test]
async fn heavy_hit_damages_knocks_back_once_and_frees_the_projectile() {
    let hub = LocalHub::new();
    let clock = Arc::new(ManualClock::new());
    let mut alice = spawn_peer(&hub, &clock, "alice", vec2(400.0, 500.0)).await;
    let mut bob = spawn_peer(&hub, &clock, "bob", vec2(600.0, 500.0)).await;
    settle(&mut [&mut alice, &mut bob]);
    bob.drain_outputs();

    let cast = CastRequest {
        origin: vec2(600.0, 500.0),
        direction: vec2(1.0, 0.0),
        kind: FireballKind::Heavy,
        caster: PeerId::from("alice"),
    };
    assert!(alice.cast(cast));
    assert_eq!(alice.mana(), 65.0);

    let mut outputs = Vec::new();
    for _ in 0..5 {
        tick_all(&mut [&mut alice, &mut bob]);
        outputs.extend(bob.drain_outputs());
    }

    assert_eq!(bob.health(), Some(75.0));
    let base = 1000.0 * 3.2;
    let kicks = impulses(&outputs);
    assert_eq!(kicks.len(), 1);
    assert!((kicks[0] - base * 4.0).abs() < 1e-6);
    let direction = outputs.iter().find_map(|o| match o {
        PeerOutput::Impulse(i) => Some((i.dx, i.dy)),
        _ => None,
    });
    assert!(matches!(direction, Some((dx, dy)) if dx > 0.0 && dy.abs() < 1e-9));
    assert!(outputs
        .iter()
        .any(|o| matches!(o, PeerOutput::Explosion { .. })));

    assert_eq!(bob.projectile_count(), 0);
    assert_eq!(alice.projectile_count(), 0);
    let nearby = bob.spatial().get_nearby(600.0, 500.0, 100.0);
    assert!(nearby
        .iter()
        .all(|key| !matches!(key, SpatialKey::Projectile(_))));

    // The remote view of bob picks up the new health from his moves
    clock.advance_ms(200);
    settle(&mut [&mut alice, &mut bob]);
    let seen = alice.entities().get(&PeerId::from("bob")).map(|e| e.health);
    assert_eq!(seen, Some(75.0));
}

#[tokio::test]
async fn projectiles_never_hit_their_caster() {
    let hub = LocalHub::new();
    let clock = Arc::new(ManualClock::new());
    let mut alice = spawn_peer(&hub, &clock, "alice", vec2(400.0, 500.0)).await;
    let mut bob = spawn_peer(&hub, &clock, "bob", vec2(600.0, 500.0)).await;
    settle(&mut [&mut alice, &mut bob]);
    alice.drain_outputs();

    let cast = CastRequest {
        origin: vec2(400.0, 500.0),
        direction: vec2(0.0, 1.0),
        kind: FireballKind::Normal,
        caster: PeerId::from("alice"),
    };
    assert!(alice.cast(cast));
    tick_all(&mut [&mut alice, &mut bob]);

    assert_eq!(alice.health(), Some(100.0));
    assert!(impulses(&alice.drain_outputs()).is_empty());
    assert_eq!(alice.projectile_count(), 1);
    assert_eq!(bob.projectile_count(), 1);
}

#[tokio::test]
async fn followers_adopt_the_authority_ring() {
    let hub = LocalHub::new();
    let clock = Arc::new(ManualClock::new());
    let mut alice = spawn_peer(&hub, &clock, "alice", vec2(480.0, 500.0)).await;
    let mut bob = spawn_peer(&hub, &clock, "bob", vec2(520.0, 500.0)).await;
    settle(&mut [&mut alice, &mut bob]);

    for _ in 0..20 {
        clock.advance_ms(500);
        tick_all(&mut [&mut alice, &mut bob]);
    }

    let radius = alice.boundary_radius();
    assert!(radius < 400.0);
    assert!((bob.boundary_radius() - radius).abs() < 1e-9);
}

#[tokio::test]
async fn silent_peers_are_pruned() {
    let hub = LocalHub::new();
    let clock = Arc::new(ManualClock::new());
    let mut alice = spawn_peer(&hub, &clock, "alice", vec2(450.0, 500.0)).await;
    let mut bob = spawn_peer(&hub, &clock, "bob", vec2(550.0, 500.0)).await;
    settle(&mut [&mut alice, &mut bob]);
    assert_eq!(alice.entities().len(), 2);

    // Bob stops ticking without saying goodbye
    for _ in 0..12 {
        clock.advance_ms(500);
        alice.tick(DT);
    }
    assert_eq!(alice.entities().len(), 1);
    assert!(alice
        .drain_outputs()
        .iter()
        .any(|o| matches!(o, PeerOutput::RoundEnded { .. })));
}

#[tokio::test]
async fn closed_transport_disconnects_the_peer() {
    let hub = LocalHub::new();
    let clock = Arc::new(ManualClock::new());
    let mut alice = spawn_peer(&hub, &clock, "alice", vec2(450.0, 500.0)).await;
    alice.tick(DT);
    assert!(alice.is_connected());

    hub.close_channel("arena");
    alice.tick(DT);
    assert_eq!(alice.state(), MatchState::Disconnected);
    assert!(!alice.cast(CastRequest {
        origin: vec2(450.0, 500.0),
        direction: vec2(1.0, 0.0),
        kind: FireballKind::Normal,
        caster: PeerId::from("alice"),
    }));
}

#[tokio::test]
async fn charge_and_release_picks_the_variant() {
    let hub = LocalHub::new();
    let clock = Arc::new(ManualClock::new());
    let mut alice = spawn_peer(&hub, &clock, "alice", vec2(450.0, 500.0)).await;

    assert!(!alice.cast_released(vec2(600.0, 500.0)));

    alice.cast_requested(vec2(600.0, 500.0));
    assert!(alice.charging());
    clock.advance_ms(1_500);
    assert!(alice.cast_released(vec2(600.0, 500.0)));
    assert!(!alice.charging());
    assert_eq!(alice.mana(), 65.0);

    let kinds: Vec<FireballKind> = alice.projectiles().map(|(_, p)| p.kind).collect();
    assert_eq!(kinds, vec![FireballKind::Heavy]);
}

#[tokio::test]
async fn join_is_answered_once_and_replies_are_not() {
    let hub = LocalHub::new();
    let clock = Arc::new(ManualClock::new());
    let (mut zed, mut inbox) = observer(&hub).await;
    let mut alice = spawn_peer(&hub, &clock, "alice", vec2(450.0, 500.0)).await;
    received(&mut inbox, events::PLAYER_JOIN);

    send(
        &mut zed,
        GameEvent::Join(PlayerJoin {
            id: "zed".to_string(),
            world_x: 300.0,
            world_y: 500.0,
            health: 100.0,
            is_authority: false,
            reply: false,
        }),
    );
    alice.tick(DT);
    alice.tick(DT);

    let answers: Vec<PlayerJoin> = received(&mut inbox, events::PLAYER_JOIN)
        .into_iter()
        .map(|p| serde_json::from_value(p).unwrap())
        .collect();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].id, "alice");
    assert!(answers[0].reply);
    assert_eq!(alice.entities().len(), 2);

    // Duplicate delivery refreshes the known entry and is never answered
    send(
        &mut zed,
        GameEvent::Join(PlayerJoin {
            id: "zed".to_string(),
            world_x: 320.0,
            world_y: 510.0,
            health: 80.0,
            is_authority: false,
            reply: true,
        }),
    );
    alice.tick(DT);

    assert!(received(&mut inbox, events::PLAYER_JOIN).is_empty());
    assert_eq!(alice.entities().len(), 2);
    let known = alice.entities().get(&PeerId::from("zed")).unwrap();
    assert_eq!(known.position, vec2(320.0, 510.0));
    assert_eq!(known.health, 80.0);
}

#[tokio::test]
async fn bump_pushes_the_pair_apart_and_bystanders_ignore_it() {
    let hub = LocalHub::new();
    let clock = Arc::new(ManualClock::new());
    let (mut herald, _inbox) = observer(&hub).await;
    let mut alice = spawn_peer(&hub, &clock, "alice", vec2(300.0, 500.0)).await;
    let mut bob = spawn_peer(&hub, &clock, "bob", vec2(700.0, 500.0)).await;
    let mut carol = spawn_peer(&hub, &clock, "carol", vec2(500.0, 300.0)).await;
    settle(&mut [&mut alice, &mut bob, &mut carol]);
    for peer in [&mut alice, &mut bob, &mut carol] {
        peer.drain_outputs();
    }

    send(
        &mut herald,
        GameEvent::Bump(PlayerBump {
            a: "bob".to_string(),
            b: "alice".to_string(),
            nx: 0.0,
            ny: 1.0,
            force: 4_500.0,
        }),
    );
    tick_all(&mut [&mut alice, &mut bob, &mut carol]);

    assert_eq!(kicks(&bob.drain_outputs()), vec![(0.0, 4_500.0)]);
    assert_eq!(kicks(&alice.drain_outputs()), vec![(-0.0, -4_500.0)]);
    assert!(kicks(&carol.drain_outputs()).is_empty());
}

#[tokio::test]
async fn overlapping_bodies_publish_bumps_with_a_cooldown() {
    let hub = LocalHub::new();
    let clock = Arc::new(ManualClock::new());
    let (_watcher, mut inbox) = observer(&hub).await;
    let mut alice = spawn_peer(&hub, &clock, "alice", vec2(500.0, 500.0)).await;
    let mut bob = spawn_peer(&hub, &clock, "bob", vec2(510.0, 500.0)).await;
    let mut carol = spawn_peer(&hub, &clock, "carol", vec2(500.0, 700.0)).await;

    let mut outputs = [Vec::new(), Vec::new(), Vec::new()];
    let mut run = |alice: &mut Peer, bob: &mut Peer, carol: &mut Peer| {
        tick_all(&mut [&mut *alice, &mut *bob, &mut *carol]);
        outputs[0].extend(alice.drain_outputs());
        outputs[1].extend(bob.drain_outputs());
        outputs[2].extend(carol.drain_outputs());
    };
    for _ in 0..3 {
        run(&mut alice, &mut bob, &mut carol);
    }

    let bumps: Vec<PlayerBump> = received(&mut inbox, events::PLAYER_BUMP)
        .into_iter()
        .map(|p| serde_json::from_value(p).unwrap())
        .collect();
    assert_eq!(bumps.len(), 2);
    let from_alice = bumps.iter().find(|b| b.a == "alice").unwrap();
    assert_eq!(from_alice.b, "bob");
    assert_eq!((from_alice.nx, from_alice.ny), (-1.0, 0.0));
    assert!((from_alice.force - 1000.0 * 4.5).abs() < 1e-9);

    // Still inside the cooldown window
    clock.advance_ms(200);
    run(&mut alice, &mut bob, &mut carol);
    assert!(received(&mut inbox, events::PLAYER_BUMP).is_empty());

    clock.advance_ms(200);
    run(&mut alice, &mut bob, &mut carol);
    assert_eq!(received(&mut inbox, events::PLAYER_BUMP).len(), 2);

    let [alice_kicks, bob_kicks, carol_kicks] = outputs.map(|o| kicks(&o));
    assert!(!alice_kicks.is_empty());
    assert!(alice_kicks.iter().all(|&(dx, dy)| dx < 0.0 && dy.abs() < 1e-9));
    assert!(!bob_kicks.is_empty());
    assert!(bob_kicks.iter().all(|&(dx, dy)| dx > 0.0 && dy.abs() < 1e-9));
    assert!(carol_kicks.is_empty());
}

#[tokio::test]
async fn late_authority_restarts_peers_further_along() {
    let hub = LocalHub::new();
    let clock = Arc::new(ManualClock::new());
    let (mut herald, _inbox) = observer(&hub).await;
    let mut carol = spawn_peer(&hub, &clock, "carol", vec2(500.0, 560.0)).await;

    for round in 2..=5 {
        send(
            &mut herald,
            GameEvent::RoundReset(RoundReset {
                round,
                start_at: clock.epoch_ms(),
            }),
        );
        carol.tick(DT);
    }
    assert_eq!(carol.round_index(), 5);
    assert_eq!(carol.state(), MatchState::Playing);

    let mut alice = spawn_peer(&hub, &clock, "alice", vec2(450.0, 500.0)).await;
    settle(&mut [&mut alice, &mut carol]);
    assert!(alice.is_authority());
    assert_eq!(alice.round_index(), 1);

    for _ in 0..5 {
        carol.report_local_position(vec2(950.0, 500.0));
        tick_all(&mut [&mut alice, &mut carol]);
        clock.advance_ms(501);
    }
    assert_eq!(carol.state(), MatchState::Spectating);
    tick_all(&mut [&mut alice, &mut carol]);
    assert_eq!(alice.state(), MatchState::RoundEnd);
    assert_eq!(carol.state(), MatchState::RoundEnd);

    clock.advance_ms(3_000);
    settle(&mut [&mut alice, &mut carol]);

    assert_eq!(alice.state(), MatchState::Playing);
    assert_eq!(carol.state(), MatchState::Playing);
    assert_eq!(alice.round_index(), 2);
    assert_eq!(carol.round_index(), 6);
    assert_eq!(carol.entities().len(), 2);
}

#[tokio::test]
async fn ring_keeps_shrinking_across_an_authority_handover() {
    let hub = LocalHub::new();
    let clock = Arc::new(ManualClock::new());
    let mut alice = spawn_peer(&hub, &clock, "alice", vec2(480.0, 500.0)).await;
    for _ in 0..20 {
        clock.advance_ms(500);
        alice.tick(DT);
    }
    assert!((alice.boundary_radius() - 380.0).abs() < 1e-9);

    let mut bob = spawn_peer(&hub, &clock, "bob", vec2(520.0, 500.0)).await;
    let mut carol = spawn_peer(&hub, &clock, "carol", vec2(500.0, 560.0)).await;
    settle(&mut [&mut alice, &mut bob, &mut carol]);
    clock.advance_ms(200);
    tick_all(&mut [&mut alice, &mut bob, &mut carol]);
    let before = bob.boundary_radius();
    assert!((before - 379.6).abs() < 1e-9);

    alice.shutdown();
    clock.advance_ms(100);
    settle(&mut [&mut bob, &mut carol]);

    assert!(bob.is_authority());
    let after = bob.boundary_radius();
    assert!(after <= before);
    assert!((after - 379.4).abs() < 1e-9);
    assert!((carol.boundary_radius() - after).abs() < 1e-9);
}
