//! WebSocket signaling transport.
//!
//! JSON text frames over a single socket, multiplexed by room id. The
//! transport owns a background task that reconnects with capped backoff and
//! republishes its connection state; consumers never manage reconnection
//! themselves. TLS is terminated by the signaling gateway, so the client
//! speaks plain `ws://` to it.

use crate::error::SignalError;
use crate::events::SignalEvent;
use crate::transport::{LinkState, SignalingTransport};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Connection settings for [`WsTransport`].
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Signaling server URL, e.g. `ws://signal.example.com/rtc`.
    pub url: String,
    /// Bearer token appended to the connect URL, when the server requires one.
    pub auth_token: Option<String>,
    /// First reconnect delay; doubles per attempt.
    pub reconnect_initial: Duration,
    /// Ceiling for the reconnect delay.
    pub reconnect_max: Duration,
}

impl WsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(15),
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn connect_url(&self) -> String {
        match &self.auth_token {
            Some(token) => format!("{}?token={}", self.url, token),
            None => self.url.clone(),
        }
    }
}

/// Auto-reconnecting WebSocket signaling client.
pub struct WsTransport {
    out_tx: mpsc::UnboundedSender<SignalEvent>,
    inbound: broadcast::Sender<SignalEvent>,
    link_tx: watch::Sender<LinkState>,
    link_rx: watch::Receiver<LinkState>,
    task: JoinHandle<()>,
}

impl WsTransport {
    /// Spawn the transport. Returns immediately; the background task brings
    /// the socket up and keeps it up.
    pub fn spawn(config: WsConfig) -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (inbound, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (link_tx, link_rx) = watch::channel(LinkState::Reconnecting);
        let task = tokio::spawn(run_socket(
            config,
            out_rx,
            inbound.clone(),
            link_tx.clone(),
        ));
        Self {
            out_tx,
            inbound,
            link_tx,
            link_rx,
            task,
        }
    }

    /// Tear the socket down. Further emits fail with `ChannelClosed`.
    pub fn close(&self) {
        self.task.abort();
        let _ = self.link_tx.send(LinkState::Closed);
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl SignalingTransport for WsTransport {
    async fn emit(&self, event: SignalEvent) -> Result<(), SignalError> {
        event.validate()?;
        self.out_tx
            .send(event)
            .map_err(|_| SignalError::ChannelClosed)
    }

    fn subscribe(&self) -> broadcast::Receiver<SignalEvent> {
        self.inbound.subscribe()
    }

    fn link_state(&self) -> watch::Receiver<LinkState> {
        self.link_rx.clone()
    }
}

async fn run_socket(
    config: WsConfig,
    mut out_rx: mpsc::UnboundedReceiver<SignalEvent>,
    inbound: broadcast::Sender<SignalEvent>,
    link_tx: watch::Sender<LinkState>,
) {
    let mut backoff = config.reconnect_initial;
    loop {
        let stream = match connect_async(config.connect_url().as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                tracing::warn!(url = %config.url, error = %e, "signaling connect failed");
                let _ = link_tx.send(LinkState::Reconnecting);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(config.reconnect_max);
                continue;
            }
        };
        tracing::info!(url = %config.url, "signaling connected");
        let _ = link_tx.send(LinkState::Connected);
        backoff = config.reconnect_initial;

        let (mut write, mut read) = stream.split();
        loop {
            tokio::select! {
                outbound = out_rx.recv() => {
                    let Some(event) = outbound else {
                        // Transport handle dropped; shut the socket down.
                        let _ = write.send(Message::Close(None)).await;
                        let _ = link_tx.send(LinkState::Closed);
                        return;
                    };
                    let frame = match event.encode() {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::warn!(error = %e, "dropping unencodable event");
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(frame.into())).await {
                        tracing::warn!(error = %e, "signaling send failed");
                        break;
                    }
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            match SignalEvent::decode(text.as_str()) {
                                Ok(event) => {
                                    tracing::debug!(
                                        event = event.event_name(),
                                        room_id = %event.room_id(),
                                        "signaling event received"
                                    );
                                    let _ = inbound.send(event);
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "dropping invalid frame");
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!("signaling socket closed by server");
                            break;
                        }
                        Some(Ok(_)) => {} // ping/pong/binary: nothing to do
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "signaling read failed");
                            break;
                        }
                    }
                }
            }
        }

        let _ = link_tx.send(LinkState::Reconnecting);
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(config.reconnect_max);
    }
}
