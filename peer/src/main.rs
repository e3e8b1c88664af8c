use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use ringfire_peer::bot::{BotPersonality, BotPlayer, BotView, KinematicBody};
use ringfire_peer::{MatchState, PeerConfig, PeerCoordinator, PeerOutput, SystemClock, WsTransport};
use ringfire_shared::Vec2;

/// Headless ringfire peer driven by a bot.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Relay base URL
    #[arg(long, default_value = "ws://127.0.0.1:9001")]
    relay: String,

    /// Broadcast channel (room) to join
    #[arg(long, default_value = "game-room")]
    channel: String,

    /// Peer identity; random when omitted
    #[arg(long)]
    id: Option<String>,

    /// Simulation ticks per second
    #[arg(long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Bot personality; random when omitted
    #[arg(long, value_enum)]
    personality: Option<BotPersonality>,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,
}

/// Body speed cap in world units per second
const BODY_MAX_SPEED: f64 = 200.0;

/// Ticks between diagnostics lines
const STATS_EVERY_TICKS: u64 = 600;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

#[tokio::main]
async fn main() {
    init_tracing();
    let args = Args::parse();

    let config = PeerConfig::default();
    if let Err(e) = config.validate() {
        eprintln!("Invalid peer configuration: {}", e);
        std::process::exit(1);
    }
    if args.tick_rate == 0 {
        eprintln!("Invalid tick rate: must be > 0");
        std::process::exit(1);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let id = args.id.unwrap_or_else(|| {
        use rand::Rng;
        format!("peer_{:08x}", rng.gen::<u32>())
    });
    let personality = args
        .personality
        .unwrap_or_else(|| BotPersonality::random(&mut rng));

    let transport = WsTransport::new(args.relay.clone());
    let clock = Arc::new(SystemClock::new());
    let mut peer = PeerCoordinator::new(config, transport, clock, args.seed);

    if !peer.connect(&args.channel).await {
        tracing::error!(relay = %args.relay, channel = %args.channel, "Could not reach relay");
        std::process::exit(1);
    }
    peer.join(id.as_str(), None);

    let arena = config.arena;
    let (cx, cy) = arena.world_center();
    let center = Vec2::new(cx, cy);
    let spawn = peer.local_entity().map(|e| e.position).unwrap_or(center);
    let mut body = KinematicBody::new(spawn, BODY_MAX_SPEED);
    let mut bot = BotPlayer::new(personality, &mut rng);
    tracing::info!(peer_id = %id, ?personality, channel = %args.channel, "Bot peer running");

    let dt = 1.0 / args.tick_rate as f64;
    let mut tick_interval = tokio::time::interval(Duration::from_secs_f64(dt));
    tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let deadline = args.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut tick_count: u64 = 0;
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                if let Some(view) = BotView::observe(&peer, center) {
                    let input = bot.tick(dt, &view, &mut rng);
                    peer.set_movement_intent(input.movement);
                    if let Some(target) = input.press {
                        peer.cast_requested(target);
                    }
                    if let Some(target) = input.release {
                        peer.cast_released(target);
                    }
                    body.step(dt, peer.movement_intent(), arena.world_width, arena.world_height);
                    peer.report_local_position(body.position);
                }

                peer.tick(dt);

                for output in peer.drain_outputs() {
                    match output {
                        PeerOutput::Impulse(impulse) => body.apply_impulse(&impulse),
                        PeerOutput::RoundStarted { round } => {
                            if let Some(local) = peer.local_entity() {
                                body.reset(local.position);
                            }
                            tracing::info!(round, "New round");
                        }
                        PeerOutput::RoundEnded { next_round, start_at } => {
                            tracing::info!(next_round, start_at, "Round ended");
                        }
                        other => tracing::trace!(?other, "Presentation output"),
                    }
                }

                tick_count += 1;
                if tick_count % STATS_EVERY_TICKS == 0 {
                    let stats = peer.stats();
                    tracing::info!(
                        round = stats.round,
                        state = %stats.state,
                        known = stats.known_entities,
                        projectiles = stats.projectiles.active,
                        pooled = stats.projectiles.pooled,
                        grid_entries = stats.grid.total_entries,
                        "Peer stats"
                    );
                }

                if peer.state() == MatchState::Disconnected {
                    tracing::warn!("Lost the relay; exiting");
                    break;
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    tracing::info!("Run duration elapsed");
                    break;
                }
            }

            _ = &mut interrupt => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    peer.shutdown();
    // Let the transport flush the leave announcement
    tokio::time::sleep(Duration::from_millis(100)).await;
}
