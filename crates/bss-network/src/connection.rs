//! The process-wide backend connection.
//!
//! [`ConnectionManager`] is held by the root session only and is the sole place
//! that can connect or disconnect. Controllers receive a [`ConnectionHandle`],
//! which can send and subscribe but never tear the connection down.

use std::{
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard},
    task::{Context, Poll},
};

use bss_types::{
    events::ConnectionEvent,
    protocol::{InboundMessage, MessageKind, OutboundMessage},
};
use futures::{stream::BoxStream, Stream, StreamExt};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, error, info, warn};

use crate::transport::Connector;

const INBOUND_CAPACITY: usize = 256;
const LIFECYCLE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct Shared {
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<OutboundMessage>>,
    reader: Option<JoinHandle<()>>,
    /// Bumped on every connect attempt and disconnect; stale readers compare against it.
    epoch: u64,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    shared: Arc<Mutex<Shared>>,
    inbound_tx: broadcast::Sender<InboundMessage>,
    lifecycle_tx: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let (inbound_tx, _) = broadcast::channel(INBOUND_CAPACITY);
        let (lifecycle_tx, _) = broadcast::channel(LIFECYCLE_CAPACITY);
        Self {
            connector,
            shared: Arc::new(Mutex::new(Shared {
                state: ConnectionState::Disconnected,
                outbound: None,
                reader: None,
                epoch: 0,
            })),
            inbound_tx,
            lifecycle_tx,
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            shared: self.shared.clone(),
            inbound_tx: self.inbound_tx.clone(),
            lifecycle_tx: self.lifecycle_tx.clone(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.shared).state
    }

    /// Open the connection, or return the live one.
    ///
    /// Returns `None` without connecting when no token is available. Transport
    /// failures are published as [`ConnectionEvent::ConnectError`] and are not
    /// retried here.
    pub async fn connect(&self, token: Option<&str>) -> Option<ConnectionHandle> {
        let Some(token) = token.filter(|t| !t.trim().is_empty()) else {
            warn!("No auth token available; skipping backend connection");
            return None;
        };

        let attempt = {
            let mut shared = lock(&self.shared);
            match shared.state {
                ConnectionState::Connected => {
                    debug!("Backend connection already open; reusing it");
                    return Some(self.handle());
                }
                ConnectionState::Connecting => {
                    debug!("Backend connection attempt already in progress");
                    return None;
                }
                ConnectionState::Disconnected => {
                    shared.state = ConnectionState::Connecting;
                    shared.epoch += 1;
                    shared.epoch
                }
            }
        };

        match self.connector.open(token).await {
            Ok(link) => {
                {
                    let mut shared = lock(&self.shared);
                    if shared.epoch != attempt {
                        info!("Connection attempt superseded by disconnect; discarding link");
                        return None;
                    }
                    shared.state = ConnectionState::Connected;
                    shared.outbound = Some(link.outbound);
                }
                info!("Backend connection established");
                let _ = self.lifecycle_tx.send(ConnectionEvent::Connected);

                let reader = tokio::spawn(forward_inbound(
                    link.inbound,
                    self.shared.clone(),
                    self.inbound_tx.clone(),
                    self.lifecycle_tx.clone(),
                    attempt,
                ));
                let mut shared = lock(&self.shared);
                if shared.epoch == attempt {
                    shared.reader = Some(reader);
                }
                drop(shared);
                Some(self.handle())
            }
            Err(err) => {
                {
                    let mut shared = lock(&self.shared);
                    if shared.epoch == attempt {
                        shared.state = ConnectionState::Disconnected;
                    }
                }
                error!(%err, "Backend connection failed");
                let _ = self
                    .lifecycle_tx
                    .send(ConnectionEvent::ConnectError(err.to_string()));
                None
            }
        }
    }

    /// Close the connection. Safe to call when already disconnected.
    pub fn disconnect(&self) {
        let mut shared = lock(&self.shared);
        if shared.state == ConnectionState::Disconnected {
            debug!("disconnect requested while already disconnected");
            return;
        }
        shared.epoch += 1;
        shared.state = ConnectionState::Disconnected;
        shared.outbound = None;
        if let Some(reader) = shared.reader.take() {
            reader.abort();
        }
        drop(shared);
        info!("Backend connection closed");
        let _ = self.lifecycle_tx.send(ConnectionEvent::Disconnected);
    }
}

async fn forward_inbound(
    mut inbound: BoxStream<'static, InboundMessage>,
    shared: Arc<Mutex<Shared>>,
    inbound_tx: broadcast::Sender<InboundMessage>,
    lifecycle_tx: broadcast::Sender<ConnectionEvent>,
    epoch: u64,
) {
    while let Some(message) = inbound.next().await {
        // Err only means nobody is subscribed right now.
        let _ = inbound_tx.send(message);
    }

    let mut guard = lock(&shared);
    if guard.epoch == epoch && guard.state == ConnectionState::Connected {
        guard.state = ConnectionState::Disconnected;
        guard.outbound = None;
        guard.reader = None;
        drop(guard);
        warn!("Backend closed the connection");
        let _ = lifecycle_tx.send(ConnectionEvent::Disconnected);
    }
}

/// Send/subscribe capability on the shared connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Mutex<Shared>>,
    inbound_tx: broadcast::Sender<InboundMessage>,
    lifecycle_tx: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionHandle {
    pub fn is_connected(&self) -> bool {
        lock(&self.shared).state == ConnectionState::Connected
    }

    /// Fire-and-forget. Returns whether the message was handed to the transport;
    /// when disconnected the message is dropped with a warning, never queued.
    pub fn send(&self, message: OutboundMessage) -> bool {
        let name = message.name();
        let shared = lock(&self.shared);
        match (shared.state, shared.outbound.as_ref()) {
            (ConnectionState::Connected, Some(tx)) => {
                debug!(event = name, "sending backend command");
                if tx.send(message).is_err() {
                    warn!(event = name, "transport writer is gone; command dropped");
                    false
                } else {
                    true
                }
            }
            _ => {
                warn!(event = name, "not connected; command dropped");
                false
            }
        }
    }

    /// Subscribe to one inbound message type. Drop the subscription (or call
    /// [`Subscription::unsubscribe`]) to stop receiving.
    pub fn subscribe(&self, kind: MessageKind) -> Subscription {
        debug!(%kind, "subscribing to inbound messages");
        let inner = BroadcastStream::new(self.inbound_tx.subscribe())
            .filter_map(move |item| async move {
                match item {
                    Ok(message) if message.kind() == kind => Some(message),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(%kind, skipped, "subscriber lagged; stale messages dropped");
                        None
                    }
                }
            })
            .boxed();
        Subscription { kind, inner }
    }

    pub fn lifecycle(&self) -> BoxStream<'static, ConnectionEvent> {
        BroadcastStream::new(self.lifecycle_tx.subscribe())
            .filter_map(|item| async move { item.ok() })
            .boxed()
    }
}

/// Stream of inbound messages of a single [`MessageKind`].
pub struct Subscription {
    kind: MessageKind,
    inner: BoxStream<'static, InboundMessage>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        debug!(kind = %self.kind, "unsubscribing from inbound messages");
    }
}

impl Stream for Subscription {
    type Item = InboundMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalConnector;
    use bss_types::{
        camera::CameraId,
        protocol::{ServerMessage, StopStream},
    };
    use tokio::time::{timeout, Duration};

    fn stop(camera: u32) -> OutboundMessage {
        OutboundMessage::StopStream(StopStream {
            camera_id: CameraId(camera),
        })
    }

    #[tokio::test]
    async fn connect_without_token_returns_nothing() {
        let connector = LocalConnector::new();
        let manager = ConnectionManager::new(Arc::new(connector.clone()));
        assert!(manager.connect(None).await.is_none());
        assert!(manager.connect(Some("  ")).await.is_none());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(connector.open_count(), 0);
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let connector = LocalConnector::new();
        let manager = ConnectionManager::new(Arc::new(connector.clone()));
        assert!(manager.connect(Some("token")).await.is_some());
        assert!(manager.connect(Some("token")).await.is_some());
        assert_eq!(connector.open_count(), 1);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn send_while_disconnected_is_a_noop() {
        let connector = LocalConnector::new();
        let manager = ConnectionManager::new(Arc::new(connector.clone()));
        let handle = manager.handle();
        assert!(!handle.send(stop(1)));

        manager.connect(Some("token")).await.expect("connected");
        assert!(handle.send(stop(1)));
        manager.disconnect();
        manager.disconnect();
        assert!(!handle.send(stop(2)));
        assert_eq!(connector.sent(), vec![stop(1)]);
    }

    #[tokio::test]
    async fn connect_error_is_published_and_not_retried() {
        let connector = LocalConnector::new();
        connector.refuse_with("backend offline");
        let manager = ConnectionManager::new(Arc::new(connector.clone()));
        let mut lifecycle = manager.handle().lifecycle();

        assert!(manager.connect(Some("token")).await.is_none());
        let event = timeout(Duration::from_secs(1), lifecycle.next())
            .await
            .expect("lifecycle event")
            .expect("stream open");
        assert!(matches!(event, ConnectionEvent::ConnectError(reason) if reason.contains("backend offline")));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test]
    async fn subscription_filters_by_kind_and_survives_reconnect() {
        let connector = LocalConnector::new();
        let manager = ConnectionManager::new(Arc::new(connector.clone()));
        let mut responses = manager.handle().subscribe(MessageKind::Response);

        manager.connect(Some("token")).await.expect("connected");
        connector.inject(InboundMessage::Error(ServerMessage {
            message: "ignored".into(),
        }));
        connector.inject(InboundMessage::Response(ServerMessage {
            message: "first".into(),
        }));
        let got = timeout(Duration::from_secs(1), responses.next())
            .await
            .expect("response")
            .expect("stream open");
        assert_eq!(
            got,
            InboundMessage::Response(ServerMessage {
                message: "first".into()
            })
        );

        manager.disconnect();
        manager.connect(Some("token")).await.expect("reconnected");
        connector.inject(InboundMessage::Response(ServerMessage {
            message: "second".into(),
        }));
        let got = timeout(Duration::from_secs(1), responses.next())
            .await
            .expect("response")
            .expect("stream open");
        assert!(matches!(got, InboundMessage::Response(m) if m.message == "second"));
    }

    #[tokio::test]
    async fn server_close_marks_connection_lost() {
        let connector = LocalConnector::new();
        let manager = ConnectionManager::new(Arc::new(connector.clone()));
        let mut lifecycle = manager.handle().lifecycle();
        manager.connect(Some("token")).await.expect("connected");
        assert_eq!(lifecycle.next().await, Some(ConnectionEvent::Connected));

        connector.close_from_server();
        let event = timeout(Duration::from_secs(1), lifecycle.next())
            .await
            .expect("disconnect event");
        assert_eq!(event, Some(ConnectionEvent::Disconnected));
        assert!(!manager.handle().is_connected());
    }
}
