use std::time::{Duration, Instant};

use actix::fut::{ActorFutureExt, WrapFuture};
use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use realtime_events::{ClientFrame, ServerEvent, UserId};
use tokio::sync::mpsc;

use super::{ConnectionId, ConnectionRegistry};
use crate::config::Config;

/// Outbound frame bridged from the registry channel into the actor mailbox.
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct OutboundFrame(String);

/// One WebSocket session.
///
/// Starts unauthenticated; the first `authenticate` frame binds it to a user
/// in the registry. Repeat authenticate frames re-bind (tab user switch)
/// after unregistering the previous identity.
pub struct WsSession {
    user_id: Option<UserId>,
    connection_id: Option<ConnectionId>,
    registry: ConnectionRegistry,
    bind: Option<actix::SpawnHandle>,
    hb: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl WsSession {
    pub fn new(registry: ConnectionRegistry, config: &Config) -> Self {
        Self {
            user_id: None,
            connection_id: None,
            registry,
            bind: None,
            hb: Instant::now(),
            heartbeat_interval: config.heartbeat_interval,
            client_timeout: config.client_timeout,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let timeout = self.client_timeout;
        ctx.run_interval(self.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > timeout {
                tracing::warn!(user_id = ?act.user_id, "WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn authenticate(&mut self, user_id: UserId, ctx: &mut ws::WebsocketContext<Self>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let registry = self.registry.clone();
        let previous = self.user_id.take().zip(self.connection_id.take());

        // Forward frames queued by the registry into the actor mailbox. The
        // task ends when the registry drops this sender (replacement or
        // unregister).
        let forward_to = ctx.address();
        actix::spawn(async move {
            while let Some(frame) = rx.recv().await {
                forward_to.do_send(OutboundFrame(frame));
            }
        });

        // The bind runs inside the actor lifecycle, not on a detached task.
        // If the transport closes while the bind is pending the future is
        // dropped before the registry insert; once it resolves the identity
        // is recorded in the same poll, so `stopped` always sees it and the
        // unregister-on-close path cannot miss a live entry.
        let bind = async move {
            if let Some((prev_user, prev_id)) = previous {
                registry.unregister(prev_user, prev_id).await;
            }
            registry.register(user_id, tx).await
        };
        // A repeat authenticate cancels a still-pending bind so two binds
        // never race for the identity fields.
        if let Some(pending) = self.bind.take() {
            ctx.cancel_future(pending);
        }
        self.bind = Some(ctx.spawn(bind.into_actor(self).map(move |connection_id, act, ctx| {
            act.user_id = Some(user_id);
            act.connection_id = Some(connection_id);
            tracing::info!(user_id, "WebSocket session authenticated");

            match ServerEvent::connected(user_id).to_frame() {
                Ok(frame) => ctx.text(frame),
                Err(e) => tracing::error!(error = %e, "failed to encode connected ack"),
            }
        })));
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::debug!("WebSocket session opened, awaiting authenticate");
        self.hb(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some((user_id, connection_id)) = self.user_id.zip(self.connection_id) {
            tracing::info!(user_id, "WebSocket session closed");
            let registry = self.registry.clone();
            actix::spawn(async move {
                registry.unregister(user_id, connection_id).await;
            });
        }
    }
}

impl Handler<OutboundFrame> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: OutboundFrame, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::Authenticate { user_id }) => self.authenticate(user_id, ctx),
                Err(e) => {
                    // Frame discarded, connection stays open.
                    tracing::warn!(error = %e, "discarding unparseable client frame");
                }
            },
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("binary WebSocket frames not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!(?reason, "WebSocket close frame received");
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket protocol error, closing session");
                ctx.stop();
            }
            _ => {}
        }
    }
}

/// `GET /ws` — upgrade to the per-user event stream.
pub async fn ws_route(
    req: HttpRequest,
    stream: web::Payload,
    registry: web::Data<ConnectionRegistry>,
    config: web::Data<Config>,
) -> Result<HttpResponse, Error> {
    let session = WsSession::new(registry.get_ref().clone(), config.get_ref());
    ws::start(session, &req, stream)
}
