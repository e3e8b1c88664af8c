//! Pub/sub transports the broadcast channel runs on.
//!
//! A transport joins one named channel and carries opaque [`Envelope`]s to
//! every other member. Delivery is at-most-once and unordered across
//! publishers; a member never receives its own publishes.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ringfire_shared::protocol::{PeerMsg, RelayMsg, PROTOCOL_VERSION};
use ringfire_shared::Envelope;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectFailed(String),
    #[error("subscription rejected: {0}")]
    Rejected(String),
    #[error("transport closed")]
    Closed,
    #[error("transport not connected")]
    NotConnected,
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait Transport: Send {
    /// Join `channel`. Resolves once the transport reports ready; from then on
    /// every envelope published by another member is pushed into `inbound`.
    fn connect(
        &mut self,
        channel: &str,
        inbound: UnboundedSender<Envelope>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn publish(&mut self, envelope: Envelope) -> Result<(), TransportError>;

    fn disconnect(&mut self);

    /// False once the connection has dropped or was never made.
    fn is_open(&self) -> bool;
}

// === In-process hub ===

struct Member {
    id: u64,
    inbound: UnboundedSender<Envelope>,
    open: Arc<AtomicBool>,
}

#[derive(Default)]
struct HubInner {
    channels: HashMap<String, Vec<Member>>,
    next_id: u64,
}

/// In-memory fan-out shared by every [`LocalTransport`] created from it.
#[derive(Clone, Default)]
pub struct LocalHub {
    inner: Arc<Mutex<HubInner>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> LocalTransport {
        LocalTransport {
            hub: self.clone(),
            membership: None,
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn member_count(&self, channel: &str) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.channels.get(channel).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Drop every member of `channel` as if the service went away.
    pub fn close_channel(&self, channel: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(members) = inner.channels.remove(channel) {
                for member in members {
                    member.open.store(false, Ordering::SeqCst);
                }
            }
        }
    }
}

pub struct LocalTransport {
    hub: LocalHub,
    membership: Option<(String, u64)>,
    open: Arc<AtomicBool>,
}

impl Transport for LocalTransport {
    async fn connect(
        &mut self,
        channel: &str,
        inbound: UnboundedSender<Envelope>,
    ) -> Result<(), TransportError> {
        self.disconnect();

        let mut inner = self
            .hub
            .inner
            .lock()
            .map_err(|_| TransportError::ConnectFailed("hub lock poisoned".to_string()))?;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.channels.entry(channel.to_string()).or_default().push(Member {
            id,
            inbound,
            open: Arc::clone(&self.open),
        });
        drop(inner);

        self.membership = Some((channel.to_string(), id));
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn publish(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        let Some((channel, id)) = &self.membership else {
            return Err(TransportError::NotConnected);
        };
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let inner = self.hub.inner.lock().map_err(|_| TransportError::Closed)?;
        if let Some(members) = inner.channels.get(channel) {
            for member in members.iter().filter(|m| m.id != *id) {
                // A departed receiver is not the publisher's problem
                let _ = member.inbound.send(envelope.clone());
            }
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some((channel, id)) = self.membership.take() {
            if let Ok(mut inner) = self.hub.inner.lock() {
                if let Some(members) = inner.channels.get_mut(&channel) {
                    members.retain(|m| m.id != id);
                    if members.is_empty() {
                        inner.channels.remove(&channel);
                    }
                }
            }
        }
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

// === WebSocket relay client ===

/// Client of the `ringfire-relay` fan-out service.
///
/// `connect` resolves once the relay confirms the subscription. A background
/// task then pumps frames both ways until either side closes. There is no
/// automatic reconnect.
pub struct WsTransport {
    base_url: String,
    cmd_tx: Option<UnboundedSender<String>>,
    open: Arc<AtomicBool>,
    connection_id: Option<u32>,
}

impl WsTransport {
    /// `base_url` is the relay root, e.g. `ws://127.0.0.1:9001`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            cmd_tx: None,
            open: Arc::new(AtomicBool::new(false)),
            connection_id: None,
        }
    }

    /// Id the relay assigned to this connection.
    pub fn connection_id(&self) -> Option<u32> {
        self.connection_id
    }

    fn channel_url(&self, channel: &str) -> String {
        format!("{}/ws/{}", self.base_url.trim_end_matches('/'), channel)
    }
}

impl Transport for WsTransport {
    async fn connect(
        &mut self,
        channel: &str,
        inbound: UnboundedSender<Envelope>,
    ) -> Result<(), TransportError> {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message;

        self.disconnect();

        let url = self.channel_url(channel);
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        // The relay's subscription confirmation is the ready signal
        let subscribed = loop {
            match read.next().await {
                Some(Ok(Message::Text(txt))) => match serde_json::from_str::<RelayMsg>(&txt) {
                    Ok(RelayMsg::Subscribed(msg)) => break msg,
                    Ok(RelayMsg::Broadcast(_)) | Err(_) => continue,
                },
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::ConnectFailed(e.to_string())),
            }
        };

        if subscribed.protocol_version != PROTOCOL_VERSION {
            let _ = write.close().await;
            return Err(TransportError::Rejected(format!(
                "relay protocol v{}, peer protocol v{}",
                subscribed.protocol_version, PROTOCOL_VERSION
            )));
        }

        tracing::info!(
            channel = %subscribed.channel,
            connection_id = subscribed.connection_id,
            server_version = %subscribed.server_version,
            "Subscribed to relay channel"
        );

        let (cmd_tx, mut cmd_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let open = Arc::clone(&self.open);
        open.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    cmd = cmd_rx.recv() => {
                        match cmd {
                            Some(text) => {
                                if write.send(Message::Text(text.into())).await.is_err() {
                                    break;
                                }
                            }
                            None => {
                                let _ = write.close().await;
                                break;
                            }
                        }
                    }

                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(txt))) => {
                                if let Ok(RelayMsg::Broadcast(envelope)) = serde_json::from_str::<RelayMsg>(&txt) {
                                    if inbound.send(envelope).is_err() {
                                        break;
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "Relay connection error");
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
            open.store(false, Ordering::SeqCst);
            tracing::info!("Relay connection closed");
        });

        self.cmd_tx = Some(cmd_tx);
        self.connection_id = Some(subscribed.connection_id);
        Ok(())
    }

    fn publish(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        let Some(cmd_tx) = &self.cmd_tx else {
            return Err(TransportError::NotConnected);
        };
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let text = serde_json::to_string(&PeerMsg::Broadcast(envelope))?;
        cmd_tx.send(text).map_err(|_| TransportError::Closed)
    }

    fn disconnect(&mut self) {
        // Dropping the sender makes the pump task close the socket
        self.cmd_tx = None;
        self.connection_id = None;
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
