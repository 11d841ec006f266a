//! Connection handling logic for WebSocket clients.
//!
//! This module contains the session state machine that manages the lifecycle
//! of one client connection: handshake and token authentication, presence
//! establishment, the receive-then-dispatch loop, and deterministic cleanup
//! when the connection ends for any reason.

use crate::auth::AuthenticatedUser;
use crate::error::{AuthError, ServerError};
use crate::protocol::{ChatScope, ClientEvent, OnlineUser, ServerEvent};
use crate::registry::ConnectionHandle;
use crate::session::{PositionSync, SessionContext};
use crate::store::{DurableStore, FastStore, LivePosition};
use crate::{UserId, WorldId};
use futures_util::{SinkExt, StreamExt};
use rand::seq::SliceRandom;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::handshake::server::{Request, Response},
    tungstenite::http::Uri,
    tungstenite::protocol::frame::coding::CloseCode,
    tungstenite::protocol::CloseFrame,
    tungstenite::Message,
};
use tracing::{debug, error, info, warn};

/// Decrements the live session count when a connection ends.
struct SessionSlot(Arc<SessionContext>);

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.0.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Handles a single client connection from establishment to cleanup.
///
/// # Connection Flow
///
/// 1. Perform the WebSocket handshake, capturing the request URI
/// 2. Resolve the world from the path and the bearer token from the query;
///    a missing or invalid token closes the socket with a policy-violation
///    status before any state is created
/// 3. Register in the connection registry (displacing a prior connection of
///    the same user, which is asked to close)
/// 4. Establish presence: warm the zone cache, resolve the initial position,
///    seed the fast store, reply with the online snapshot, announce the join
/// 5. Dispatch inbound messages until the socket closes, an error occurs, or
///    a reconnect displaces this session
/// 6. Run the termination sequence, every step independent of the others
pub async fn handle_session(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<SessionContext>,
) -> Result<(), ServerError> {
    let mut request_uri: Option<Uri> = None;
    let ws_stream = accept_hdr_async(stream, |req: &Request, resp: Response| {
        request_uri = Some(req.uri().clone());
        Ok(resp)
    })
    .await
    .map_err(|e| ServerError::Network(format!("WebSocket handshake failed: {e}")))?;

    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let ws_sender = Arc::new(tokio::sync::Mutex::new(ws_sender));

    let slot = SessionSlot(ctx.clone());
    if ctx.active_sessions.fetch_add(1, Ordering::Relaxed) >= ctx.config.max_connections {
        warn!("🚦 Connection limit reached, turning away {}", addr);
        let mut sender = ws_sender.lock().await;
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Again,
                reason: "server full".into(),
            })))
            .await;
        return Ok(());
    }

    // Authenticate before any session state exists
    let (world, user) = match authenticate(&ctx, request_uri.as_ref()) {
        Ok(ok) => ok,
        Err(e) => {
            info!("🔒 Rejected connection from {}: {}", addr, e);
            let mut sender = ws_sender.lock().await;
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: CloseCode::Policy,
                    reason: "authentication failed".into(),
                })))
                .await;
            return Err(e);
        }
    };
    info!("🔗 {} ({}) connected to world {} from {}", user.username, user.user_id, world, addr);

    let (handle, mut outbound_rx) = ConnectionHandle::channel(
        user.user_id.clone(),
        user.username.clone(),
        ctx.config.outbound_buffer,
    );
    if let Some(displaced) = ctx.registry.register(&world, &user.user_id, handle.clone()) {
        displaced.request_close();
    }

    let session = Session::establish(ctx.clone(), world, user, handle.clone()).await;

    // Outgoing task: drain the session's queue into the socket
    let outgoing_task = {
        let ws_sender = ws_sender.clone();
        async move {
            while let Some(event) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to serialize outbound event: {}", e);
                        continue;
                    }
                };
                let mut sender = ws_sender.lock().await;
                if let Err(e) = sender.send(Message::Text(text.into())).await {
                    debug!("Failed to send message: {}", e);
                    break;
                }
            }
        }
    };

    // Incoming task: strict receive-then-dispatch, in arrival order
    let incoming_task = {
        let session = &session;
        let ws_sender = ws_sender.clone();
        async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => session.handle_message(text.as_str()).await,
                    Ok(Message::Ping(data)) => {
                        let mut sender = ws_sender.lock().await;
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    Ok(Message::Close(_)) => {
                        debug!("🔌 {} requested close", session.user_id());
                        break;
                    }
                    Err(e) => {
                        debug!("WebSocket error for {}: {}", session.user_id(), e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    };

    // Run until the socket ends, the outbound side fails, or a reconnect
    // displaces this session
    let mut displaced = false;
    tokio::select! {
        _ = incoming_task => {},
        _ = outgoing_task => {},
        _ = handle.close_requested() => {
            displaced = true;
        }
    }

    if displaced {
        let mut sender = ws_sender.lock().await;
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "reconnected elsewhere".into(),
            })))
            .await;
    }

    session.finalize(displaced).await;
    drop(slot);
    Ok(())
}

/// Resolves the world and authenticated identity from the handshake URI.
fn authenticate(
    ctx: &SessionContext,
    uri: Option<&Uri>,
) -> Result<(WorldId, AuthenticatedUser), ServerError> {
    let uri = uri.ok_or_else(|| ServerError::Network("missing request URI".to_string()))?;

    let path = uri.path().trim_matches('/');
    let mut segments = path.split('/');
    let world = match (segments.next(), segments.next(), segments.next()) {
        (Some("ws"), Some(world), None) if !world.is_empty() => world.to_string(),
        _ => return Err(ServerError::Network(format!("unsupported path: /{path}"))),
    };

    let token = uri
        .query()
        .and_then(|query| {
            query
                .split('&')
                .find_map(|pair| pair.strip_prefix("token="))
        })
        .filter(|t| !t.is_empty())
        .ok_or(ServerError::Auth(AuthError::MissingToken))?;

    let user = ctx.verifier.verify(token)?;
    Ok((world, user))
}

/// The protocol state machine of one authenticated connection.
///
/// Owns the session-local position sync state and dispatches inbound events
/// against the shared registry, zone, and store components. All methods take
/// `&self`; the receive loop is the only caller, so per-connection ordering
/// is the arrival order of messages.
pub struct Session {
    ctx: Arc<SessionContext>,
    world: WorldId,
    user: AuthenticatedUser,
    handle: ConnectionHandle,
    sync: PositionSync,
}

impl Session {
    /// Performs presence establishment and returns the active session.
    ///
    /// Store failures on this path degrade (logged, presence falls back to
    /// registry-only behavior) instead of failing the connection.
    pub async fn establish(
        ctx: Arc<SessionContext>,
        world: WorldId,
        user: AuthenticatedUser,
        handle: ConnectionHandle,
    ) -> Self {
        if let Err(e) = ctx.zone_index.warm(&world).await {
            warn!("⚠️ Zone warm-up failed for world {}: {}", world, e);
        }

        let initial = resolve_initial_position(&ctx, &world, &user.user_id).await;

        if let Err(e) = ctx
            .fast
            .put_position(
                &world,
                &user.user_id,
                LivePosition { x: initial.0, y: initial.1, username: user.username.clone() },
            )
            .await
        {
            warn!("⚠️ Fast store position seed failed for {}: {}", user.user_id, e);
        }
        if let Err(e) = ctx.fast.add_online(&world, &user.user_id, &user.username).await {
            warn!("⚠️ Fast store online-set add failed for {}: {}", user.user_id, e);
        }

        let sync = PositionSync::new(
            world.clone(),
            user.user_id.clone(),
            ctx.durable.clone(),
            initial,
            ctx.config.move_persist_interval(),
        );
        sync.spawn_autosave(ctx.config.autosave_interval());

        let session = Self { ctx, world, user, handle, sync };

        // Initial snapshot for the joiner, then announce to everyone else
        let users = session.online_snapshot().await;
        session.reply(ServerEvent::UserList { users }).await;
        session
            .ctx
            .registry
            .broadcast(
                &session.world,
                ServerEvent::UserJoined {
                    user_id: session.user.user_id.clone(),
                    username: session.user.username.clone(),
                    x: initial.0,
                    y: initial.1,
                },
                Some(&session.user.user_id),
            )
            .await;

        session
    }

    pub fn user_id(&self) -> &UserId {
        &self.user.user_id
    }

    pub fn world(&self) -> &WorldId {
        &self.world
    }

    /// Last position recorded for this session.
    pub fn position(&self) -> (f64, f64) {
        self.sync.position()
    }

    /// Parses and dispatches one inbound frame.
    ///
    /// A malformed message is a protocol violation: it is ignored and the
    /// connection survives.
    pub async fn handle_message(&self, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle_event(event).await,
            Err(e) => debug!("🚫 Ignoring malformed message from {}: {}", self.user.user_id, e),
        }
    }

    /// Dispatches one decoded client event.
    pub async fn handle_event(&self, event: ClientEvent) {
        match event {
            ClientEvent::PlayerMove { x, y, direction, moving } => {
                self.on_move(x, y, direction, moving).await;
            }
            ClientEvent::ZoneEnter { zone_id, zone_type } => {
                self.on_zone_enter(zone_id, zone_type).await;
            }
            ClientEvent::ZoneExit { zone_id } => self.on_zone_exit(zone_id).await,
            ClientEvent::RequestUsers => {
                let users = self.online_snapshot().await;
                self.reply(ServerEvent::UserList { users }).await;
            }
            ClientEvent::ChatMessage { scope, message, channel_id, target, message_data } => {
                self.on_chat(scope, message, channel_id, target, message_data).await;
            }
            ClientEvent::ProximityChat { message } => self.on_proximity_chat(message).await,
            ClientEvent::DmSent { target_id, message } => {
                self.relay_to(&target_id, ServerEvent::DmReceived { message }).await;
            }
            ClientEvent::DmUpdated { target_id, message } => {
                self.relay_to(&target_id, ServerEvent::DmUpdated { message }).await;
            }
            ClientEvent::DmDeleted { target_id, message_id } => {
                self.relay_to(&target_id, ServerEvent::DmDeleted { message_id }).await;
            }
            ClientEvent::SignalOffer { target, payload } => {
                let from = self.user.user_id.clone();
                self.relay_to(&target, ServerEvent::SignalOffer { from, payload }).await;
            }
            ClientEvent::SignalAnswer { target, payload } => {
                let from = self.user.user_id.clone();
                self.relay_to(&target, ServerEvent::SignalAnswer { from, payload }).await;
            }
            ClientEvent::SignalIce { target, payload } => {
                let from = self.user.user_id.clone();
                self.relay_to(&target, ServerEvent::SignalIce { from, payload }).await;
            }
        }
    }

    /// Movement: containment lookup (no I/O), broadcast, fast-store mirror,
    /// throttled durable write.
    async fn on_move(&self, x: f64, y: f64, direction: Option<String>, moving: Option<bool>) {
        let zone = self
            .ctx
            .zone_index
            .locate(&self.world, x, y)
            .map(|z| z.name);

        self.ctx
            .registry
            .broadcast(
                &self.world,
                ServerEvent::PlayerMove {
                    user_id: self.user.user_id.clone(),
                    x,
                    y,
                    zone,
                    direction,
                    moving,
                },
                Some(&self.user.user_id),
            )
            .await;

        self.sync.record(x, y);

        // Fast-store mirror happens after the fan-out, off the critical path
        if let Err(e) = self
            .ctx
            .fast
            .put_position(
                &self.world,
                &self.user.user_id,
                LivePosition { x, y, username: self.user.username.clone() },
            )
            .await
        {
            debug!("⚠️ Fast store mirror failed for {}: {}", self.user.user_id, e);
        }

        self.sync.maybe_persist().await;
    }

    /// Zone entry: lifecycle update, member snapshot reply, individual
    /// notifications. Control events are not movement-throttled.
    async fn on_zone_enter(&self, zone_id: String, zone_type: Option<String>) {
        let zone_type = zone_type
            .or_else(|| {
                self.ctx
                    .zone_index
                    .zone_by_id(&self.world, &zone_id)
                    .map(|z| z.zone_type)
            })
            .unwrap_or_else(|| "PUBLIC".to_string());

        let outcome = self
            .ctx
            .zones
            .enter(&zone_id, &self.user.user_id, &self.user.username, &zone_type)
            .await;

        // Anyone left behind in the implicitly exited zone gets notified
        if let Some(previous) = outcome.previous_zone {
            self.notify_zone_left(&previous).await;
        }

        let snapshot = outcome.snapshot;
        for member in snapshot.members.iter().filter(|m| *m != &self.user.user_id) {
            self.ctx
                .registry
                .send_to_user(
                    &self.world,
                    member,
                    ServerEvent::UserEnteredZone {
                        zone_id: snapshot.zone_id.clone(),
                        user_id: self.user.user_id.clone(),
                        username: self.user.username.clone(),
                        member_count: snapshot.member_count,
                    },
                )
                .await;
        }

        self.reply(ServerEvent::ZoneMembers {
            zone_id: snapshot.zone_id,
            zone_type: snapshot.zone_type,
            members: snapshot.members,
            member_count: snapshot.member_count,
        })
        .await;
    }

    /// Zone exit: lifecycle update plus notifications to whoever remains.
    /// Exiting a zone that does not exist is silently absorbed.
    async fn on_zone_exit(&self, zone_id: String) {
        self.ctx.zones.exit(&zone_id, &self.user.user_id).await;
        self.notify_zone_left(&zone_id).await;
    }

    /// Tells each remaining member of `zone_id` that this user left it.
    async fn notify_zone_left(&self, zone_id: &String) {
        let remaining = self.ctx.zones.members_of(zone_id).await;
        for member in &remaining {
            self.ctx
                .registry
                .send_to_user(
                    &self.world,
                    member,
                    ServerEvent::UserLeftZone {
                        zone_id: zone_id.clone(),
                        user_id: self.user.user_id.clone(),
                        member_count: remaining.len(),
                    },
                )
                .await;
        }
    }

    /// Scoped chat relay. Oversized messages are ignored.
    async fn on_chat(
        &self,
        scope: ChatScope,
        message: String,
        channel_id: Option<String>,
        target: Option<UserId>,
        message_data: Option<serde_json::Value>,
    ) {
        if message.chars().count() > self.ctx.config.max_chat_len {
            debug!("🚫 Dropping oversized chat from {}", self.user.user_id);
            return;
        }

        match scope {
            ChatScope::Global => {
                let event = self.chat_event(scope, message, None, None, message_data, true);
                self.ctx
                    .registry
                    .broadcast(&self.world, event, Some(&self.user.user_id))
                    .await;
            }
            ChatScope::Channel => {
                let Some(channel_id) = channel_id else {
                    debug!("🚫 Channel chat without channel_id from {}", self.user.user_id);
                    return;
                };
                let event =
                    self.chat_event(scope, message, Some(channel_id), None, message_data, true);
                self.ctx
                    .registry
                    .broadcast(&self.world, event, Some(&self.user.user_id))
                    .await;
            }
            ChatScope::Zone => {
                // Zone chat reaches the sender's current zone only and is
                // never persisted
                let Some(zone_id) = self.ctx.zones.zone_of(&self.user.user_id).await else {
                    debug!("🚫 Zone chat from {} outside any zone", self.user.user_id);
                    return;
                };
                let members = self.ctx.zones.members_of(&zone_id).await;
                let event =
                    self.chat_event(scope, message, None, Some(zone_id), message_data, false);
                for member in members.iter().filter(|m| *m != &self.user.user_id) {
                    self.ctx
                        .registry
                        .send_to_user(&self.world, member, event.clone())
                        .await;
                }
            }
            ChatScope::Direct => {
                let Some(target) = target else {
                    debug!("🚫 Direct chat without target from {}", self.user.user_id);
                    return;
                };
                let event = self.chat_event(scope, message, None, None, message_data, true);
                self.ctx
                    .registry
                    .send_to_user(&self.world, &target, event.clone())
                    .await;
                // Direct messages are echoed back to the sender
                self.reply(event).await;
            }
            ChatScope::Proximity => self.on_proximity_chat(message).await,
        }
    }

    /// Radius-limited relay around the sender's last fast-store position.
    async fn on_proximity_chat(&self, message: String) {
        if message.chars().count() > self.ctx.config.max_chat_len {
            debug!("🚫 Dropping oversized proximity chat from {}", self.user.user_id);
            return;
        }

        let origin = match self.ctx.fast.get_position(&self.world, &self.user.user_id).await {
            Ok(Some(record)) => (record.x, record.y),
            Ok(None) => self.sync.position(),
            Err(e) => {
                warn!("⚠️ Proximity chat dropped, fast store unavailable: {}", e);
                return;
            }
        };

        let listeners = match self.ctx.fast.online_users(&self.world).await {
            Ok(listeners) => listeners,
            Err(e) => {
                warn!("⚠️ Proximity chat dropped, fast store unavailable: {}", e);
                return;
            }
        };

        let radius = self.ctx.config.proximity_radius;
        let event = self.chat_event(ChatScope::Proximity, message, None, None, None, false);
        for listener in listeners {
            if listener.user_id == self.user.user_id {
                continue;
            }
            let Some((x, y)) = listener.position else {
                continue;
            };
            if (x - origin.0).abs() + (y - origin.1).abs() <= radius {
                self.ctx
                    .registry
                    .send_to_user(&self.world, &listener.user_id, event.clone())
                    .await;
            }
        }
    }

    fn chat_event(
        &self,
        scope: ChatScope,
        message: String,
        channel_id: Option<String>,
        zone_id: Option<String>,
        message_data: Option<serde_json::Value>,
        persist: bool,
    ) -> ServerEvent {
        ServerEvent::ChatMessage {
            scope,
            user_id: self.user.user_id.clone(),
            username: self.user.username.clone(),
            message,
            persist,
            channel_id,
            zone_id,
            message_data,
        }
    }

    /// Online snapshot: the fast store's view when present, the local
    /// registry otherwise.
    async fn online_snapshot(&self) -> Vec<OnlineUser> {
        match self.ctx.fast.online_users(&self.world).await {
            Ok(users) if !users.is_empty() => users
                .into_iter()
                .map(|u| OnlineUser {
                    user_id: u.user_id,
                    username: u.username,
                    x: u.position.map(|p| p.0),
                    y: u.position.map(|p| p.1),
                })
                .collect(),
            Ok(_) => self.registry_snapshot(),
            Err(e) => {
                warn!("⚠️ Online snapshot degraded to registry: {}", e);
                self.registry_snapshot()
            }
        }
    }

    fn registry_snapshot(&self) -> Vec<OnlineUser> {
        self.ctx
            .registry
            .users(&self.world)
            .into_iter()
            .map(|(user_id, username)| OnlineUser { user_id, username, x: None, y: None })
            .collect()
    }

    /// Best-effort delivery to a named target; absent targets are silently
    /// absorbed.
    async fn relay_to(&self, target: &UserId, event: ServerEvent) {
        self.ctx.registry.send_to_user(&self.world, target, event).await;
    }

    /// Best-effort delivery back to this session.
    async fn reply(&self, event: ServerEvent) {
        self.handle
            .send_timeout(event, self.ctx.config.broadcast_timeout())
            .await;
    }

    /// The termination sequence. Every step is independent; a failure in one
    /// is logged and never prevents the others. Safe to run twice.
    ///
    /// A session displaced by a reconnect only releases session-local
    /// resources: the replacement connection owns the registry slot and the
    /// shared store records, and its own cleanup covers any zone membership
    /// left behind (membership is keyed by user id).
    pub async fn finalize(&self, displaced: bool) {
        self.sync.cancel_autosave();

        if displaced {
            debug!("🔁 Session for {} displaced by reconnect, skipping shared teardown", self.user.user_id);
            return;
        }

        if let Some((zone_id, _destroyed)) = self.ctx.zones.cleanup(&self.user.user_id).await {
            self.notify_zone_left(&zone_id).await;
        }

        self.ctx
            .registry
            .unregister_exact(&self.world, &self.user.user_id, self.handle.session_id());

        self.sync.final_flush().await;

        if let Err(e) = self.ctx.fast.remove_online(&self.world, &self.user.user_id).await {
            warn!("⚠️ Online-set removal failed for {}: {}", self.user.user_id, e);
        }
        if let Err(e) = self.ctx.fast.remove_position(&self.world, &self.user.user_id).await {
            warn!("⚠️ Live position removal failed for {}: {}", self.user.user_id, e);
        }

        self.ctx
            .registry
            .broadcast(
                &self.world,
                ServerEvent::UserLeft {
                    user_id: self.user.user_id.clone(),
                    username: self.user.username.clone(),
                },
                Some(&self.user.user_id),
            )
            .await;

        info!("👋 {} left world {}", self.user.username, self.world);
    }
}

/// Resolves the initial position for a joining user.
///
/// Priority order: durable last-known position, then a random declared spawn
/// point, then the fixed fallback coordinate. Store failures fall through to
/// the next source.
async fn resolve_initial_position(
    ctx: &SessionContext,
    world: &WorldId,
    user: &UserId,
) -> (f64, f64) {
    match ctx.durable.load_position(world, user).await {
        Ok(Some(stored)) => return (stored.x, stored.y),
        Ok(None) => {}
        Err(e) => warn!("⚠️ Durable position lookup failed for {}: {}", user, e),
    }

    match ctx.durable.spawn_points(world).await {
        Ok(spawns) => {
            if let Some(spawn) = spawns.choose(&mut rand::thread_rng()) {
                return (spawn.x, spawn.y);
            }
        }
        Err(e) => warn!("⚠️ Spawn point lookup failed for world {}: {}", world, e),
    }

    let fallback = ctx.config.spawn_fallback;
    (fallback.x, fallback.y)
}
