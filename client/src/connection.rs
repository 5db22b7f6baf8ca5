use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use realtime_events::{ClientFrame, ServerEvent, UserId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::badge::BadgeReconciler;
use crate::config::ClientConfig;
use crate::dispatcher::EventDispatcher;

/// Connection lifecycle, observable by UI through a watch channel (drives
/// the "disconnected" indicator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct Session {
    user_id: UserId,
    supervisor: JoinHandle<()>,
    outbound: mpsc::UnboundedSender<ClientFrame>,
}

/// Owns the one transport per identity.
///
/// A supervisor task per identity runs the connect / pump / fixed-delay
/// retry loop. Identity switches and logout abort that task, which also
/// cancels any pending reconnect sleep deterministically; a reconnect with
/// a stale identity can never fire.
pub struct ConnectionManager {
    config: Arc<ClientConfig>,
    dispatcher: Arc<EventDispatcher>,
    badges: Arc<BadgeReconciler>,
    state_tx: watch::Sender<ConnectionState>,
    session: Mutex<Option<Session>>,
}

impl ConnectionManager {
    pub fn new(
        config: Arc<ClientConfig>,
        dispatcher: Arc<EventDispatcher>,
        badges: Arc<BadgeReconciler>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            dispatcher,
            badges,
            state_tx,
            session: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Start a session for `user_id`, tearing down any existing one first.
    /// Switching identity is always a full teardown plus a fresh cycle.
    pub fn set_identity(&self, user_id: UserId) {
        let mut guard = self.session.lock().expect("session lock poisoned");
        if let Some(previous) = guard.take() {
            tracing::debug!(
                previous_user = previous.user_id,
                new_user = user_id,
                "identity switch, tearing down session"
            );
            previous.supervisor.abort();
        }

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let supervisor = tokio::spawn(run_session(
            self.config.clone(),
            user_id,
            self.dispatcher.clone(),
            self.badges.clone(),
            self.state_tx.clone(),
            outbound_rx,
        ));
        *guard = Some(Session {
            user_id,
            supervisor,
            outbound,
        });
    }

    /// Logout: close the transport, cancel any pending reconnect, stay
    /// Disconnected. No reconnect fires afterwards.
    pub fn clear_identity(&self) {
        if let Some(session) = self
            .session
            .lock()
            .expect("session lock poisoned")
            .take()
        {
            tracing::debug!(user_id = session.user_id, "identity cleared, tearing down");
            session.supervisor.abort();
        }
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }

    /// Queue a frame for the write half. A no-op with a logged warning
    /// unless the state machine is in `Connected`.
    pub fn send(&self, frame: ClientFrame) {
        if self.state() != ConnectionState::Connected {
            tracing::warn!("dropping outbound frame: not connected");
            return;
        }
        let guard = self.session.lock().expect("session lock poisoned");
        match guard.as_ref() {
            Some(session) => {
                if session.outbound.send(frame).is_err() {
                    tracing::warn!("dropping outbound frame: session closing");
                }
            }
            None => tracing::warn!("dropping outbound frame: no session"),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(session) = self.session.lock().expect("session lock poisoned").take() {
            session.supervisor.abort();
        }
    }
}

/// Supervisor loop for one identity: Connecting → Connected → (close) →
/// Disconnected → fixed-delay retry. Runs until aborted.
async fn run_session(
    config: Arc<ClientConfig>,
    user_id: UserId,
    dispatcher: Arc<EventDispatcher>,
    badges: Arc<BadgeReconciler>,
    state_tx: watch::Sender<ConnectionState>,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientFrame>,
) {
    loop {
        state_tx.send_replace(ConnectionState::Connecting);

        match connect_async(config.ws_url.as_str()).await {
            Ok((stream, _)) => {
                connected_session(
                    stream,
                    user_id,
                    &dispatcher,
                    &badges,
                    &state_tx,
                    &mut outbound_rx,
                )
                .await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "websocket connect failed");
            }
        }

        state_tx.send_replace(ConnectionState::Disconnected);
        tracing::debug!(
            delay_ms = config.reconnect_delay.as_millis() as u64,
            "scheduling reconnect"
        );
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

async fn connected_session(
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    user_id: UserId,
    dispatcher: &EventDispatcher,
    badges: &BadgeReconciler,
    state_tx: &watch::Sender<ConnectionState>,
    outbound_rx: &mut mpsc::UnboundedReceiver<ClientFrame>,
) {
    let (mut write, mut read) = stream.split();

    // Authenticate immediately after the transport opens.
    let auth = ClientFrame::Authenticate { user_id };
    let frame = match serde_json::to_string(&auth) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode authenticate frame");
            return;
        }
    };
    if let Err(e) = write.send(WsMessage::text(frame)).await {
        tracing::warn!(error = %e, "failed to send authenticate frame");
        return;
    }

    state_tx.send_replace(ConnectionState::Connected);
    tracing::info!(user_id, "websocket connected");

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(frame) => {
                    let encoded = match serde_json::to_string(&frame) {
                        Ok(encoded) => encoded,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to encode outbound frame");
                            continue;
                        }
                    };
                    if let Err(e) = write.send(WsMessage::text(encoded)).await {
                        tracing::warn!(error = %e, "outbound send failed, closing");
                        return;
                    }
                }
                // Manager dropped; the supervisor is about to be aborted.
                None => return,
            },
            inbound = read.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => {
                    handle_frame(text.as_str(), dispatcher, badges).await;
                }
                Some(Ok(WsMessage::Ping(payload))) => {
                    if write.send(WsMessage::Pong(payload)).await.is_err() {
                        return;
                    }
                }
                Some(Ok(WsMessage::Close(reason))) => {
                    tracing::debug!(?reason, "server closed connection");
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "websocket stream error");
                    return;
                }
                None => {
                    tracing::debug!("websocket stream ended");
                    return;
                }
            },
        }
    }
}

/// Decode one inbound frame and route it: dispatcher first (dedup +
/// fan-out), then the badge reconciler for accepted count updates.
/// Malformed frames are logged and skipped; the connection stays open.
async fn handle_frame(text: &str, dispatcher: &EventDispatcher, badges: &BadgeReconciler) {
    let event = match ServerEvent::decode(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "discarding malformed frame");
            return;
        }
    };

    if dispatcher.dispatch(&event).await {
        if let ServerEvent::BadgeCountsUpdate { counts } = &event {
            badges.reconcile(counts).await;
        }
    }
}
