use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use courier_core::{DisplayName, UserId};
use courier_protocol::{parse_inbound_frame, OutboundFrame};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::{
    sync::{mpsc, watch},
    task::AbortHandle,
};
use uuid::Uuid;

use super::{
    auth::{bearer_token, now_unix, resolve_credential, VerifiedIdentity},
    core::{AppState, ReplacedSessionPolicy, SESSION_REPLACED_CLOSE_CODE},
    errors::ApiFailure,
    metrics::{
        record_frame_rejected, record_message_routed, record_session_replaced,
        record_store_failure, record_ws_disconnect,
    },
    registry::{ConnectionControl, ConnectionRegistry, SessionHandle},
    store::NewMessage,
    types::ChatAuthQuery,
};

pub(crate) async fn chat_ws(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    Query(query): Query<ChatAuthQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiFailure> {
    let credential = query
        .access_token
        .or_else(|| bearer_token(&headers).map(ToOwned::to_owned))
        .ok_or(ApiFailure::Unauthorized)?;
    let identity = resolve_credential(&state, &credential, "chat_upgrade")?;

    Ok(ws.on_upgrade(move |socket| async move {
        handle_chat_connection(state, socket, identity).await;
    }))
}

/// Unregisters the session and stops its writer when the read path ends,
/// however it ends.
///
/// Owns the session's own handle, so the writer's queue and control channel
/// outlive a registry entry that was displaced by a newer connection.
struct SessionTeardown {
    registry: ConnectionRegistry,
    user_id: UserId,
    handle: SessionHandle,
    writer: AbortHandle,
}

impl Drop for SessionTeardown {
    fn drop(&mut self) {
        self.writer.abort();
        let removed = self
            .registry
            .unregister(self.user_id, self.handle.connection_id);
        tracing::debug!(
            event = "chat.session",
            outcome = "teardown",
            user_id = %self.user_id,
            connection_id = %self.handle.connection_id,
            registry_entry_removed = removed,
        );
    }
}

pub(crate) async fn handle_chat_connection(
    state: AppState,
    socket: WebSocket,
    identity: VerifiedIdentity,
) {
    let connection_id = Uuid::new_v4();
    let (sink, mut stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<String>(state.runtime.chat_outbound_queue);
    let (control_tx, control_rx) = watch::channel(ConnectionControl::Open);

    let mut send_task = tokio::spawn(run_writer(
        sink,
        outbound_rx,
        control_rx,
        state.runtime.chat_ping_interval,
    ));
    let handle = SessionHandle::new(
        connection_id,
        identity.display_name.clone(),
        outbound_tx,
        control_tx,
    );
    let _teardown = SessionTeardown {
        registry: state.registry.clone(),
        user_id: identity.user_id,
        handle: handle.clone(),
        writer: send_task.abort_handle(),
    };

    if let Some(displaced) = state.registry.register(identity.user_id, handle) {
        apply_replaced_session_policy(
            state.runtime.replaced_session_policy,
            identity.user_id,
            &displaced,
        );
    }
    tracing::info!(
        event = "chat.session",
        outcome = "connected",
        user_id = %identity.user_id,
        connection_id = %connection_id,
    );

    let mut session = ChatSession {
        ingress: ChatIngress::new(
            state.runtime.chat_ingress_frames_per_window,
            state.runtime.chat_ingress_window,
        ),
        state,
        user_id: identity.user_id,
        display_name: identity.display_name,
    };
    let mut disconnect_reason = "connection_closed";
    loop {
        let incoming = tokio::select! {
            incoming = stream.next() => incoming,
            writer_exit = &mut send_task => {
                disconnect_reason = writer_exit.unwrap_or("writer_failed");
                break;
            }
        };
        let Some(incoming) = incoming else {
            break;
        };
        let Ok(message) = incoming else {
            disconnect_reason = "socket_error";
            break;
        };

        let handled = match message {
            Message::Text(text) => session.handle_inbound(text.as_bytes()).await,
            Message::Binary(bytes) => session.handle_inbound(&bytes).await,
            Message::Close(_) => {
                disconnect_reason = "client_close";
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        if let Err(reason) = handled {
            disconnect_reason = reason;
            break;
        }
    }

    record_ws_disconnect(disconnect_reason);
    tracing::info!(
        event = "chat.session",
        outcome = "disconnected",
        reason = disconnect_reason,
        user_id = %session.user_id,
        connection_id = %connection_id,
    );
}

fn apply_replaced_session_policy(
    policy: ReplacedSessionPolicy,
    user_id: UserId,
    displaced: &SessionHandle,
) {
    if policy == ReplacedSessionPolicy::Close {
        displaced.close(SESSION_REPLACED_CLOSE_CODE, "session_replaced");
    }
    record_session_replaced(policy.as_str());
    tracing::info!(
        event = "chat.session",
        outcome = "replaced",
        policy = policy.as_str(),
        user_id = %user_id,
        connection_id = %displaced.connection_id,
    );
}

/// Sole owner of the socket sink. Frames leave in queue order.
async fn run_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<String>,
    mut control_rx: watch::Receiver<ConnectionControl>,
    ping_interval: Duration,
) -> &'static str {
    let mut ping = tokio::time::interval(ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            control_change = control_rx.changed() => {
                if control_change.is_err() {
                    return "control_dropped";
                }
                let control = *control_rx.borrow_and_update();
                if let ConnectionControl::Close { code, reason } = control {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    return reason;
                }
            }
            maybe_payload = outbound_rx.recv() => {
                let Some(payload) = maybe_payload else {
                    return "outbound_closed";
                };
                if sink.send(Message::Text(payload.into())).await.is_err() {
                    return "write_failed";
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(vec![].into())).await.is_err() {
                    return "write_failed";
                }
            }
        }
    }
}

/// Arrival times of recent inbound frames on one connection.
struct ChatIngress {
    arrivals: VecDeque<Instant>,
    limit: usize,
    window: Duration,
}

impl ChatIngress {
    fn new(frames_per_window: u32, window: Duration) -> Self {
        Self {
            arrivals: VecDeque::new(),
            limit: usize::try_from(frames_per_window).unwrap_or(usize::MAX),
            window,
        }
    }

    fn admit(&mut self) -> bool {
        self.admit_at(Instant::now())
    }

    /// Rejected frames do not count against the window.
    fn admit_at(&mut self, now: Instant) -> bool {
        while let Some(oldest) = self.arrivals.front() {
            if now.saturating_duration_since(*oldest) < self.window {
                break;
            }
            self.arrivals.pop_front();
        }
        if self.arrivals.len() >= self.limit {
            return false;
        }
        self.arrivals.push_back(now);
        true
    }
}

struct ChatSession {
    state: AppState,
    user_id: UserId,
    display_name: DisplayName,
    ingress: ChatIngress,
}

impl ChatSession {
    /// Validate, stamp, persist and route one inbound frame.
    ///
    /// Returns the disconnect reason when the frame must end the session.
    async fn handle_inbound(&mut self, raw: &[u8]) -> Result<(), &'static str> {
        if raw.len() > self.state.runtime.max_chat_frame_bytes {
            record_frame_rejected("event_too_large");
            return Err("event_too_large");
        }
        if !self.ingress.admit() {
            record_frame_rejected("ingress_rate_limited");
            return Err("ingress_rate_limited");
        }

        let frame = parse_inbound_frame(raw).map_err(|error| {
            record_frame_rejected(error.reason());
            tracing::debug!(event = "chat.frame", outcome = "rejected", user_id = %self.user_id, %error);
            "invalid_frame"
        })?;

        let new_message = NewMessage {
            sender_id: self.user_id,
            receiver_id: frame.receiver_id,
            content: frame.content,
            created_at_unix: now_unix(),
        };
        let stored = match self.state.store.append(new_message).await {
            Ok(stored) => stored,
            Err(error) => {
                record_store_failure("append");
                tracing::warn!(
                    event = "chat.message",
                    outcome = "store_failed",
                    sender_id = %self.user_id,
                    receiver_id = %frame.receiver_id,
                    %error,
                );
                return Ok(());
            }
        };

        let outcome = self.state.router.route(&OutboundFrame {
            id: stored.id,
            sender_id: stored.sender_id,
            receiver_id: stored.receiver_id,
            content: stored.content,
            created_at_unix: stored.created_at_unix,
            sender_display_name: self.display_name.as_str().to_owned(),
        });
        record_message_routed(outcome.as_str());
        tracing::debug!(
            event = "chat.message",
            outcome = outcome.as_str(),
            message_id = stored.id,
            sender_id = %stored.sender_id,
            receiver_id = %stored.receiver_id,
        );
        Ok(())
    }
}
