//! C5 — Dispatcher: the public façade. Receives decoded inbound frames,
//! validates them, mutates C1–C4 under the locking discipline of spec §5,
//! and emits outbound frames via `SessionHandle::send`. Also hosts the
//! idle-timeout sweeper.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::CoreError;
use crate::frame::{Frame, Inbound, Source, Visibility, SERVER_USERNAME};
use crate::membership::Membership;
use crate::message::{MessageLog, MessageRecord, DEFAULT_TAIL_LIMIT};
use crate::room::{RoomMirror, RoomRegistry, GENERAL_ROOM_NAME};
use crate::session::{SessionHandle, SessionId, SessionRegistry};

/// The concurrency-safe engine from spec §2: owns C1–C4 and exposes the
/// frame handlers that are the crate's only public surface for mutating
/// chat state. Cloned cheaply (every field is an `Arc`); hand a clone to
/// each connection task and to the sweeper.
#[derive(Clone)]
pub struct ChatCore {
    pub sessions: Arc<SessionRegistry>,
    pub rooms: Arc<RoomRegistry>,
    pub membership: Arc<Membership>,
    pub messages: Arc<MessageLog>,
    pub config: Arc<ServerConfig>,
    /// Serializes the "compute recipients + append" step of a room post so
    /// that the message's position in the log and the recipient snapshot
    /// always come from the same instant (spec §5, composite op 3). A
    /// single coarser lock here is the "MAY split the lock per component"
    /// escape hatch spec §5 explicitly allows.
    fanout_lock: Arc<Mutex<()>>,
}

impl ChatCore {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_mirror(config, None)
    }

    pub fn with_mirror(config: ServerConfig, mirror: Option<Arc<dyn RoomMirror>>) -> Self {
        ChatCore {
            sessions: Arc::new(SessionRegistry::new()),
            rooms: Arc::new(RoomRegistry::new(mirror, config.require_private_room_password)),
            membership: Arc::new(Membership::new()),
            messages: Arc::new(MessageLog::new()),
            config: Arc::new(config),
            fanout_lock: Arc::new(Mutex::new(())),
        }
    }

    fn general_room_id(&self) -> String {
        self.rooms
            .get_by_name(GENERAL_ROOM_NAME)
            .expect("General room always exists")
            .room_id
    }

    // --- delivery helpers -------------------------------------------------

    /// Best-effort send to one session. A transport failure schedules that
    /// session for disconnect; it is never surfaced back to the caller.
    fn reply(&self, sid: SessionId, frame: Frame) {
        match self.sessions.lookup(sid) {
            Ok(session) => {
                if session.handle.send(&frame).is_err() {
                    warn!(%sid, "send failed, disconnecting");
                    self.disconnect(sid);
                }
            }
            Err(_) => { /* already gone, nothing to do */ }
        }
    }

    fn reply_error(&self, sid: SessionId, username: &str, err: &CoreError) {
        self.reply(sid, Frame::error(username, err));
    }

    /// Deliver the same frame to every recipient in `targets`, in order.
    /// Failures are collected and disconnected after the fan-out completes,
    /// so one slow/dead recipient never blocks or reorders delivery to the
    /// others (spec §5's cancellation + no-retry rules).
    fn fan_out(&self, targets: &[SessionId], frame: Frame) {
        let mut failed = Vec::new();
        for &sid in targets {
            match self.sessions.lookup(sid) {
                Ok(session) => {
                    if session.handle.send(&frame).is_err() {
                        failed.push(sid);
                    }
                }
                Err(_) => {}
            }
        }
        for sid in failed {
            warn!(%sid, "fan-out send failed, disconnecting");
            self.disconnect(sid);
        }
    }

    /// Same as `fan_out` but addressed to every live session, regardless
    /// of room membership (used by the room-independent `broadcast` frame
    /// and server-wide announcements like an updated room list).
    fn fan_out_everyone(&self, frame: Frame) {
        let targets: Vec<SessionId> = self.sessions.all_handles().into_iter().map(|(sid, _)| sid).collect();
        self.fan_out(&targets, frame);
    }

    fn system_message_frame(record: &MessageRecord) -> Frame {
        Frame {
            username: record.author_session_username.clone(),
            message: record.content.clone(),
            message_id: record.message_id,
            timestamp: rfc3339(record.timestamp),
            source: Source::Host,
            device_id: None,
            command: None,
            params: None,
            frame_type: Some(crate::frame::FrameType::Message),
            room_id: Some(record.room_id.clone()),
        }
    }

    /// Post a system message into a room and fan it out, all inside the
    /// fan-out lock so the occupant snapshot matches the log position.
    fn post_system_message(&self, room_id: &str, content: String) {
        let _guard = self.fanout_lock.lock().unwrap();
        let record = MessageRecord::new(room_id.to_string(), SERVER_USERNAME, content, true);
        let occupants = self.membership.occupants(&room_id.to_string());
        self.messages.append(record.clone());
        drop(_guard);
        self.fan_out(&occupants, Self::system_message_frame(&record));
    }

    // --- connection lifecycle ---------------------------------------------

    /// Register a new transport-level connection. Not itself an inbound
    /// `Frame` (there is no wire bytes yet) — called directly by the
    /// adapter on accept.
    pub fn connect(&self, handle: Arc<dyn SessionHandle>) -> SessionId {
        let (sid, username) = self.sessions.register(handle);
        info!(%sid, "session connected");

        self.reply(
            sid,
            Frame::command(
                &username,
                "welcome",
                serde_json::json!({
                    "sid": sid.0,
                    "assignedUsername": username,
                    "onlineCount": self.sessions.live_count(),
                }),
            ),
        );
        self.send_room_list(sid, &username);

        sid
    }

    fn send_room_list(&self, sid: SessionId, username: &str) {
        let membership = &self.membership;
        let rooms = self.rooms.list_public(|room_id| membership.occupant_count(&room_id.to_string()));
        self.reply(
            sid,
            Frame::command(username, "rooms_list", serde_json::json!({ "rooms": room_summaries_json(&rooms) })),
        );
    }

    /// Entry point for every decoded inbound frame.
    pub fn on_frame(&self, sid: SessionId, frame: Frame) {
        if self.sessions.touch(sid).is_err() {
            return;
        }
        let username = match self.sessions.lookup(sid) {
            Ok(s) => s.username,
            Err(_) => return,
        };

        if frame.command.is_none() {
            self.handle_send_message(sid, &username, frame.message);
            return;
        }

        match frame.clone().into_inbound() {
            Ok(inbound) => self.route(sid, &username, inbound),
            Err(err) => self.reply_error(sid, &username, &err),
        }
    }

    fn route(&self, sid: SessionId, username: &str, inbound: Inbound) {
        match inbound {
            Inbound::Authenticate { username: requested, device_id } => {
                self.handle_authenticate(sid, &requested, device_id)
            }
            Inbound::CreateRoom { name, visibility, password } => {
                self.handle_create_room(sid, username, &name, visibility, password)
            }
            Inbound::JoinRoom { room_id, password } => self.handle_join_room(sid, username, &room_id, password),
            Inbound::LeaveRoom { room_id } => self.handle_leave_room(sid, username, room_id),
            Inbound::DeleteRoom { room_id } => self.handle_delete_room(sid, username, &room_id),
            Inbound::SendMessage { content } => self.handle_send_message(sid, username, content),
            Inbound::UpdateMessage { message_id, content } => {
                self.handle_update_message(sid, username, &message_id, content)
            }
            Inbound::DeleteMessage { message_id } => self.handle_delete_message(sid, username, &message_id),
            Inbound::GetRooms => self.send_room_list(sid, username),
            Inbound::RoomOccupants { room_id } => self.handle_room_occupants(sid, username, &room_id),
            Inbound::KickOccupant { room_id, target_username } => {
                self.handle_kick_occupant(sid, username, &room_id, &target_username)
            }
            Inbound::Typing { is_typing } => self.handle_typing(sid, username, is_typing),
            Inbound::Broadcast { text } => self.handle_broadcast(sid, username, text),
        }
    }

    // --- handlers -----------------------------------------------------------

    fn handle_authenticate(&self, sid: SessionId, requested_username: &str, device_id: Option<String>) {
        let result = self.sessions.authenticate(sid, requested_username, device_id);
        let (assigned, hint) = match result {
            Ok(v) => v,
            Err(err) => return self.reply_error(sid, requested_username, &err),
        };

        let general = self.general_room_id();
        if let Err(err) = self.membership.join(sid, &general, |r| self.rooms.exists(r)) {
            return self.reply_error(sid, &assigned, &err);
        }

        let mut ack = serde_json::json!({ "usernameAssigned": assigned });
        if let Some(hint) = hint {
            ack["reconnectHint"] = serde_json::json!({
                "lastRoom": hint.last_room,
                "lastSeen": rfc3339(hint.last_seen),
            });
        }
        self.reply(sid, Frame::command(&assigned, "auth_ack", ack));

        self.post_system_message(&general, format!("{assigned} joined the chat"));
        self.fan_out(
            &self.membership.occupants(&general),
            Frame::system("user_joined", serde_json::json!({ "username": assigned, "roomId": general })),
        );
    }

    fn handle_create_room(
        &self,
        sid: SessionId,
        username: &str,
        name: &str,
        visibility: Visibility,
        password: Option<String>,
    ) {
        match self.rooms.create(name, visibility, password.as_deref(), username) {
            Ok(room_id) => {
                self.reply(
                    sid,
                    Frame::command(username, "create_room_result", serde_json::json!({ "ok": true, "roomId": room_id })),
                );
                let membership = &self.membership;
                let rooms = self.rooms.list_public(|room_id| membership.occupant_count(&room_id.to_string()));
                let frame = Frame::system("rooms_list", serde_json::json!({ "rooms": room_summaries_json(&rooms) }));
                self.fan_out_everyone(frame);
            }
            Err(err) => self.reply_error(sid, username, &err),
        }
    }

    fn handle_join_room(&self, sid: SessionId, username: &str, room_id: &str, password: Option<String>) {
        if let Err(err) = self.rooms.verify_password(room_id, password.as_deref()) {
            self.reply(sid, Frame::error(username, &err));
            return;
        }

        if let Err(err) = self.membership.join(sid, &room_id.to_string(), |r| self.rooms.exists(r)) {
            self.reply(sid, Frame::error(username, &err));
            return;
        }

        self.reply(
            sid,
            Frame::command(username, "join_room_result", serde_json::json!({ "ok": true, "roomId": room_id })),
        );

        let occupant_usernames = self.usernames_of(&self.membership.occupants(&room_id.to_string()));
        self.fan_out(
            &self.membership.occupants(&room_id.to_string()),
            Frame::system(
                "user_joined_room",
                serde_json::json!({ "username": username, "roomId": room_id }),
            ),
        );
        self.post_system_message(room_id, format!("{username} joined the room"));

        let tail = self.messages.tail(&room_id.to_string(), DEFAULT_TAIL_LIMIT);
        self.reply(
            sid,
            Frame::command(
                username,
                "room_info",
                serde_json::json!({
                    "roomId": room_id,
                    "occupants": occupant_usernames,
                    "tail": tail.iter().map(message_record_json).collect::<Vec<_>>(),
                }),
            ),
        );
    }

    fn handle_leave_room(&self, sid: SessionId, username: &str, requested_room_id: Option<String>) {
        let current = self.membership.room_of(sid);
        if let Some(ref requested) = requested_room_id
            && current.as_deref() != Some(requested.as_str())
        {
            self.reply(
                sid,
                Frame::error(username, &CoreError::BadRequest("not a member of that room".to_string())),
            );
            return;
        }

        let Some(room_id) = self.membership.leave(sid) else {
            self.reply(
                sid,
                Frame::error(username, &CoreError::BadRequest("not currently in a room".to_string())),
            );
            return;
        };

        self.fan_out(
            &self.membership.occupants(&room_id),
            Frame::system("user_left_room", serde_json::json!({ "username": username, "roomId": room_id })),
        );
        self.post_system_message(&room_id, format!("{username} left the room"));

        // Always re-home to General, even when the room just left was General
        // itself — an authenticated session is never left roomless (spec §4.5's
        // session state machine has no "authenticated, no room" state).
        let general = self.general_room_id();
        let _ = self.membership.join(sid, &general, |r| self.rooms.exists(r));
    }

    /// Spec §5 composite op 2: remove the room and detach every occupant in
    /// one critical section (shared with the append-and-fan-out lock) so no
    /// concurrent `send_message` can snapshot occupants for a room that's
    /// mid-deletion. Affected occupants are re-homed to `"General"`.
    fn handle_delete_room(&self, sid: SessionId, username: &str, room_id: &str) {
        let guard = self.fanout_lock.lock().unwrap();
        let result = self.rooms.delete(room_id, username);
        let detached = if result.is_ok() {
            self.membership.detach_room(&room_id.to_string())
        } else {
            Vec::new()
        };
        drop(guard);

        if let Err(err) = result {
            self.reply_error(sid, username, &err);
            return;
        }

        self.reply(
            sid,
            Frame::command(username, "delete_room_result", serde_json::json!({ "ok": true, "roomId": room_id })),
        );
        self.fan_out_everyone(Frame::system("room_closed", serde_json::json!({ "roomId": room_id })));

        let general = self.general_room_id();
        for &occupant in &detached {
            let _ = self.membership.join(occupant, &general, |r| self.rooms.exists(r));
        }
        self.fan_out(
            &detached,
            Frame::system(
                "user_joined_room",
                serde_json::json!({ "roomId": general, "reason": "room_deleted" }),
            ),
        );
    }

    fn handle_send_message(&self, sid: SessionId, username: &str, content: String) {
        let Some(room_id) = self.membership.room_of(sid) else {
            self.reply(sid, Frame::error(username, &CoreError::BadRequest("not in a room".to_string())));
            return;
        };
        let content = content.trim().to_string();
        if content.is_empty() || content.len() > self.config.max_message_len {
            self.reply(
                sid,
                Frame::error(
                    username,
                    &CoreError::BadRequest(format!("content must be 1-{} characters", self.config.max_message_len)),
                ),
            );
            return;
        }

        let guard = self.fanout_lock.lock().unwrap();
        let record = MessageRecord::new(room_id.clone(), username, content, false);
        let occupants = self.membership.occupants(&room_id);
        self.messages.append(record.clone());
        drop(guard);

        self.fan_out(&occupants, Self::system_message_frame(&record));
    }

    fn handle_update_message(&self, sid: SessionId, username: &str, message_id: &str, content: String) {
        let Ok(message_id) = uuid::Uuid::parse_str(message_id) else {
            self.reply(sid, Frame::error(username, &CoreError::BadRequest("invalid messageId".to_string())));
            return;
        };

        let guard = self.fanout_lock.lock().unwrap();
        let result = self.messages.edit(message_id, username, content);
        let occupants = result
            .as_ref()
            .ok()
            .map(|record| self.membership.occupants(&record.room_id));
        drop(guard);

        match result {
            Ok(record) => {
                self.fan_out(
                    &occupants.unwrap_or_default(),
                    Frame::command(
                        SERVER_USERNAME,
                        "message_updated",
                        serde_json::json!({ "message": message_record_json(&record) }),
                    ),
                );
            }
            Err(err) => self.reply_error(sid, username, &err),
        }
    }

    fn handle_delete_message(&self, sid: SessionId, username: &str, message_id: &str) {
        let Ok(message_id) = uuid::Uuid::parse_str(message_id) else {
            self.reply(sid, Frame::error(username, &CoreError::BadRequest("invalid messageId".to_string())));
            return;
        };

        let guard = self.fanout_lock.lock().unwrap();
        let result = self.messages.delete(message_id, username, username);
        let occupants = result
            .as_ref()
            .ok()
            .map(|notice| self.membership.occupants(&notice.room_id));
        drop(guard);

        match result {
            Ok(notice) => {
                self.fan_out(
                    &occupants.unwrap_or_default(),
                    Frame::command(
                        SERVER_USERNAME,
                        "message_deleted",
                        serde_json::json!({
                            "messageId": notice.message_id,
                            "roomId": notice.room_id,
                            "originalTimestamp": rfc3339(notice.original_timestamp),
                            "deletedContent": notice.deleted_content,
                            "deleterUsername": notice.deleter_username,
                            "deletedAt": rfc3339(notice.deleted_at),
                        }),
                    ),
                );
            }
            Err(err) => self.reply_error(sid, username, &err),
        }
    }

    fn handle_room_occupants(&self, sid: SessionId, username: &str, room_id: &str) {
        if !self.rooms.exists(room_id) {
            self.reply(sid, Frame::error(username, &CoreError::NotFound("room")));
            return;
        }
        let occupants = self.usernames_of(&self.membership.occupants(&room_id.to_string()));
        self.reply(
            sid,
            Frame::command(username, "room_occupants", serde_json::json!({ "roomId": room_id, "occupants": occupants })),
        );
    }

    fn handle_kick_occupant(&self, sid: SessionId, username: &str, room_id: &str, target_username: &str) {
        let room = match self.rooms.get(room_id) {
            Ok(r) => r,
            Err(err) => return self.reply_error(sid, username, &err),
        };
        if username != room.created_by && username != SERVER_USERNAME {
            return self.reply_error(sid, username, &CoreError::Forbidden("not the room creator"));
        }

        let target_sid = self
            .membership
            .occupants(&room_id.to_string())
            .into_iter()
            .find(|&occupant| self.sessions.lookup(occupant).map(|s| s.username == target_username).unwrap_or(false));

        match target_sid {
            Some(target) => {
                self.reply(
                    sid,
                    Frame::command(username, "kick_occupant_result", serde_json::json!({ "ok": true })),
                );
                self.disconnect(target);
            }
            None => self.reply_error(sid, username, &CoreError::NotFound("occupant not in room")),
        }
    }

    fn handle_typing(&self, sid: SessionId, username: &str, is_typing: bool) {
        let Some(room_id) = self.membership.room_of(sid) else {
            return;
        };
        let targets: Vec<SessionId> = self.membership.occupants(&room_id).into_iter().filter(|&o| o != sid).collect();
        self.fan_out(
            &targets,
            Frame::system("typing_status", serde_json::json!({ "username": username, "roomId": room_id, "isTyping": is_typing })),
        );
    }

    fn handle_broadcast(&self, sid: SessionId, username: &str, text: String) {
        let _ = sid;
        let frame = Frame::system("broadcast_message", serde_json::json!({ "username": username, "text": text }));
        self.fan_out_everyone(frame);
    }

    fn usernames_of(&self, sids: &[SessionId]) -> Vec<String> {
        sids.iter().filter_map(|&sid| self.sessions.lookup(sid).ok().map(|s| s.username)).collect()
    }

    // --- disconnect & sweeper ------------------------------------------------

    /// The disconnect path, invoked by transport close, explicit quit, a
    /// failed send, or the sweeper. Idempotent: a session already gone is
    /// simply a no-op.
    pub fn disconnect(&self, sid: SessionId) {
        let username = match self.sessions.lookup(sid) {
            Ok(s) => s.username,
            Err(_) => return,
        };

        let room_left = self.membership.leave(sid);
        if let Some(ref room_id) = room_left {
            self.fan_out(
                &self.membership.occupants(room_id),
                Frame::system("user_disconnected", serde_json::json!({ "username": username, "roomId": room_id })),
            );
            self.post_system_message(room_id, format!("{username} disconnected"));
        }

        let _ = self.sessions.drop_session(sid, room_left);
        info!(%sid, %username, "session disconnected");
    }

    /// Spawns the idle-timeout sweeper described in spec §4.5. A zero
    /// timeout disables it entirely.
    pub fn spawn_sweeper(self: Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        if self.config.idle_timeout_secs == 0 {
            return None;
        }
        let interval = self.config.sweep_interval();
        let timeout = chrono::Duration::seconds(self.config.idle_timeout_secs as i64);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let expired = self.sessions.sweep(Utc::now(), timeout);
                for sid in expired {
                    warn!(%sid, "idle timeout, disconnecting");
                    self.disconnect(sid);
                }
            }
        }))
    }
}

/// Z-suffixed RFC3339, millisecond precision — the one timestamp rendering
/// used across every outbound frame (spec §3/§6: "ISO-8601 ... with Z
/// suffix"), so the same instant never renders two different ways between
/// a live frame and a replayed one.
fn rfc3339(dt: chrono::DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn room_summaries_json(rooms: &[crate::room::RoomSummary]) -> Vec<serde_json::Value> {
    rooms
        .iter()
        .map(|r| {
            serde_json::json!({
                "roomId": r.room_id,
                "name": r.name,
                "visibility": r.visibility.as_str(),
                "passwordProtected": r.password_protected,
                "createdBy": r.created_by,
                "createdAt": rfc3339(r.created_at),
                "occupantCount": r.occupant_count,
            })
        })
        .collect()
}

fn message_record_json(record: &MessageRecord) -> serde_json::Value {
    serde_json::json!({
        "messageId": record.message_id,
        "roomId": record.room_id,
        "author": record.author_session_username,
        "content": record.content,
        "timestamp": rfc3339(record.timestamp),
        "isSystem": record.is_system,
        "edited": record.edited,
        "editedAt": record.edited_at.map(rfc3339),
        "deleted": record.deleted,
    })
}
