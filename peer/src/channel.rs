//! Adaptive-rate broadcast over a [`Transport`].
//!
//! Non-immediate publishes are throttled per event name by the current rate
//! tier; a publish inside the window is dropped, not queued. Immediate
//! publishes always go out while connected.

use std::collections::HashMap;
use std::sync::Arc;

use ringfire_shared::{Envelope, GameEvent};
use serde::Serialize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::clock::Clock;
use crate::config::ChannelConfig;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateTier {
    Idle,
    Moving,
    Combat,
}

type Handler = Box<dyn FnMut(serde_json::Value) + Send>;

pub struct BroadcastChannel<T> {
    transport: T,
    clock: Arc<dyn Clock>,
    config: ChannelConfig,
    handlers: HashMap<String, Handler>,
    inbound_tx: UnboundedSender<Envelope>,
    inbound_rx: UnboundedReceiver<Envelope>,
    connected: bool,
    tier: RateTier,
    last_sample: Option<(f64, f64)>,
    /// Monotonic time of the last successful throttled publish, per event
    last_publish: HashMap<String, u64>,
}

impl<T: Transport> BroadcastChannel<T> {
    pub fn new(transport: T, clock: Arc<dyn Clock>, config: ChannelConfig) -> Self {
        let (inbound_tx, inbound_rx) = unbounded_channel();
        Self {
            transport,
            clock,
            config,
            handlers: HashMap::new(),
            inbound_tx,
            inbound_rx,
            connected: false,
            tier: RateTier::Idle,
            last_sample: None,
            last_publish: HashMap::new(),
        }
    }

    /// Register the handler for `event`, replacing any previous one.
    ///
    /// Handlers registered before [`connect`](Self::connect) resolves see
    /// every message delivered after the transport is ready.
    pub fn subscribe(&mut self, event: &str, handler: impl FnMut(serde_json::Value) + Send + 'static) {
        self.handlers.insert(event.to_string(), Box::new(handler));
    }

    /// Join `channel`, waiting at most the configured timeout. A timeout or
    /// transport failure leaves the channel disconnected; there is no retry.
    pub async fn connect(&mut self, channel: &str) -> bool {
        let attempt = self.transport.connect(channel, self.inbound_tx.clone());
        let outcome = tokio::time::timeout(self.config.connect_timeout, attempt).await;
        match outcome {
            Ok(Ok(())) => {
                self.connected = true;
                tracing::info!(channel, "Broadcast channel connected");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(channel, error = %e, "Broadcast channel failed to connect");
                self.connected = false;
                false
            }
            Err(_) => {
                tracing::warn!(
                    channel,
                    timeout_ms = self.config.connect_timeout.as_millis() as u64,
                    "Broadcast channel connect timed out"
                );
                self.transport.disconnect();
                self.connected = false;
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected && self.transport.is_open()
    }

    /// True when a successful connection has since dropped.
    pub fn connection_lost(&self) -> bool {
        self.connected && !self.transport.is_open()
    }

    /// Publish a typed game event under its broadcast name.
    pub fn publish_event(&mut self, event: &GameEvent, immediate: bool) -> bool {
        match event.payload() {
            Ok(payload) => self.publish(event.name(), &payload, immediate),
            Err(e) => {
                tracing::warn!(event = event.name(), error = %e, "Failed to encode event");
                false
            }
        }
    }

    /// Publish `payload` under `event`. Returns false when disconnected, when
    /// throttled, or when the transport refuses the message.
    pub fn publish<P: Serialize>(&mut self, event: &str, payload: &P, immediate: bool) -> bool {
        if !self.is_connected() {
            return false;
        }

        let now = self.clock.monotonic_ms();
        if !immediate {
            if let Some(&last) = self.last_publish.get(event) {
                if now.saturating_sub(last) < self.interval_ms() {
                    tracing::trace!(event, tier = ?self.tier, "Publish throttled");
                    return false;
                }
            }
        }

        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(event, error = %e, "Failed to encode payload");
                return false;
            }
        };
        let envelope = Envelope {
            event: event.to_string(),
            payload,
        };

        match self.transport.publish(envelope) {
            Ok(()) => {
                if !immediate {
                    self.last_publish.insert(event.to_string(), now);
                }
                true
            }
            Err(e) => {
                tracing::warn!(event, error = %e, "Publish failed");
                false
            }
        }
    }

    /// Pick the rate tier from the latest position sample and combat flag.
    pub fn set_rate(&mut self, x: f64, y: f64, in_combat: bool) -> RateTier {
        let moved = match self.last_sample {
            Some((px, py)) => {
                (x - px).abs() > self.config.movement_epsilon
                    || (y - py).abs() > self.config.movement_epsilon
            }
            None => false,
        };
        self.last_sample = Some((x, y));

        self.tier = if in_combat {
            RateTier::Combat
        } else if moved {
            RateTier::Moving
        } else {
            RateTier::Idle
        };
        self.tier
    }

    pub fn tier(&self) -> RateTier {
        self.tier
    }

    /// Current minimum interval between throttled publishes.
    pub fn interval_ms(&self) -> u64 {
        match self.tier {
            RateTier::Idle => self.config.idle_interval_ms,
            RateTier::Moving => self.config.moving_interval_ms,
            RateTier::Combat => self.config.combat_interval_ms,
        }
    }

    /// Run handlers for everything received since the last call. Messages for
    /// events nobody subscribed to are discarded. Returns the number handled.
    pub fn dispatch(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(envelope) = self.inbound_rx.try_recv() {
            match self.handlers.get_mut(&envelope.event) {
                Some(handler) => {
                    handler(envelope.payload);
                    handled += 1;
                }
                None => tracing::debug!(event = %envelope.event, "No handler for event"),
            }
        }
        handled
    }

    pub fn disconnect(&mut self) {
        if self.connected {
            tracing::info!("Broadcast channel disconnected");
        }
        self.transport.disconnect();
        self.connected = false;
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::transport::LocalHub;
    use serde_json::json;
    use std::sync::Mutex;

    async fn pair() -> (
        Arc<ManualClock>,
        BroadcastChannel<crate::transport::LocalTransport>,
        BroadcastChannel<crate::transport::LocalTransport>,
    ) {
        let hub = LocalHub::new();
        let clock = Arc::new(ManualClock::new());
        let mut a = BroadcastChannel::new(hub.transport(), clock.clone(), ChannelConfig::default());
        let mut b = BroadcastChannel::new(hub.transport(), clock.clone(), ChannelConfig::default());
        assert!(a.connect("room").await);
        assert!(b.connect("room").await);
        (clock, a, b)
    }

    #[tokio::test]
    async fn publish_fails_when_not_connected() {
        let hub = LocalHub::new();
        let clock = Arc::new(ManualClock::new());
        let mut channel = BroadcastChannel::new(hub.transport(), clock, ChannelConfig::default());
        assert!(!channel.publish("player-move", &json!({}), false));
        assert!(!channel.publish("player-join", &json!({}), true));
    }

    #[tokio::test]
    async fn throttled_publish_true_false_true() {
        let (clock, mut a, _b) = pair().await;
        assert_eq!(a.interval_ms(), 100);

        assert!(a.publish("player-move", &json!({ "n": 1 }), false));
        clock.advance_ms(40);
        assert!(!a.publish("player-move", &json!({ "n": 2 }), false));
        clock.advance_ms(60);
        assert!(a.publish("player-move", &json!({ "n": 3 }), false));
    }

    #[tokio::test]
    async fn immediate_publish_ignores_window() {
        let (_clock, mut a, _b) = pair().await;
        assert!(a.publish("player-move", &json!({}), false));
        assert!(a.publish("player-death", &json!({ "id": "a" }), true));
        assert!(a.publish("player-death", &json!({ "id": "a" }), true));
    }

    #[tokio::test]
    async fn windows_are_tracked_per_event() {
        let (_clock, mut a, _b) = pair().await;
        assert!(a.publish("ring-update", &json!({}), false));
        assert!(a.publish("player-move", &json!({}), false));
        assert!(!a.publish("ring-update", &json!({}), false));
    }

    #[tokio::test]
    async fn rate_tiers_follow_motion_and_combat() {
        let (_clock, mut a, _b) = pair().await;
        assert_eq!(a.set_rate(100.0, 100.0, false), RateTier::Idle);
        assert_eq!(a.set_rate(100.5, 100.0, false), RateTier::Idle);
        assert_eq!(a.set_rate(110.0, 100.0, false), RateTier::Moving);
        assert_eq!(a.interval_ms(), 50);
        assert_eq!(a.set_rate(110.0, 100.0, true), RateTier::Combat);
        assert_eq!(a.interval_ms(), 16);
    }

    #[tokio::test]
    async fn dispatch_runs_latest_handler_only() {
        let (_clock, mut a, mut b) = pair().await;
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        b.subscribe("player-death", move |p| first.lock().unwrap().push(format!("old {}", p["id"])));
        let second = seen.clone();
        b.subscribe("player-death", move |p| second.lock().unwrap().push(format!("new {}", p["id"])));

        assert!(a.publish("player-death", &json!({ "id": "a" }), true));
        assert!(a.publish("chat", &json!({}), true));
        assert_eq!(b.dispatch(), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["new \"a\"".to_string()]);
    }

    #[tokio::test]
    async fn typed_events_go_out_under_their_wire_name() {
        let (_clock, mut a, mut b) = pair().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        b.subscribe("player-death", move |p| sink.lock().unwrap().push(p["id"].clone()));

        let death = GameEvent::Death(ringfire_shared::protocol::PlayerDeath { id: "a".into() });
        assert!(a.publish_event(&death, true));
        assert_eq!(b.dispatch(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![json!("a")]);
    }

    #[tokio::test]
    async fn closed_transport_stops_publishing() {
        let hub = LocalHub::new();
        let clock = Arc::new(ManualClock::new());
        let mut a = BroadcastChannel::new(hub.transport(), clock, ChannelConfig::default());
        assert!(a.connect("room").await);
        hub.close_channel("room");
        assert!(!a.is_connected());
        assert!(a.connection_lost());
        assert!(!a.publish("player-join", &json!({}), true));
    }
}
