//! C3 — Membership: the bidirectional session⇄room mapping with an
//! at-most-one-room-per-session invariant and atomic move semantics.
//!
//! A single `Mutex` guards both directions together so the leave-old /
//! enter-new swap in `join` is never observable as "in neither room" by a
//! concurrent `occupants` call (spec §5.1).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::error::CoreError;
use crate::room::RoomId;
use crate::session::SessionId;

struct Inner {
    session_to_room: HashMap<SessionId, RoomId>,
    room_to_sessions: HashMap<RoomId, HashSet<SessionId>>,
}

pub struct Membership {
    inner: Mutex<Inner>,
}

impl Default for Membership {
    fn default() -> Self {
        Self::new()
    }
}

impl Membership {
    pub fn new() -> Self {
        Membership {
            inner: Mutex::new(Inner {
                session_to_room: HashMap::new(),
                room_to_sessions: HashMap::new(),
            }),
        }
    }

    /// Atomically move `sid` into `room_id`, leaving its previous room (if
    /// any) in the same critical section. `room_exists` is consulted under
    /// the lock so a room deleted concurrently can't be joined.
    pub fn join(&self, sid: SessionId, room_id: &RoomId, room_exists: impl Fn(&RoomId) -> bool) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !room_exists(room_id) {
            return Err(CoreError::NotFound("room"));
        }

        if let Some(old_room) = inner.session_to_room.remove(&sid) {
            if let Some(set) = inner.room_to_sessions.get_mut(&old_room) {
                set.remove(&sid);
                if set.is_empty() {
                    inner.room_to_sessions.remove(&old_room);
                }
            }
        }

        inner.session_to_room.insert(sid, room_id.clone());
        inner.room_to_sessions.entry(room_id.clone()).or_default().insert(sid);

        Ok(())
    }

    /// Remove `sid` from whatever room it's in. Returns the room it left,
    /// or `None` if it wasn't in a room.
    pub fn leave(&self, sid: SessionId) -> Option<RoomId> {
        let mut inner = self.inner.lock().unwrap();
        let room_id = inner.session_to_room.remove(&sid)?;
        if let Some(set) = inner.room_to_sessions.get_mut(&room_id) {
            set.remove(&sid);
            if set.is_empty() {
                inner.room_to_sessions.remove(&room_id);
            }
        }
        Some(room_id)
    }

    pub fn room_of(&self, sid: SessionId) -> Option<RoomId> {
        self.inner.lock().unwrap().session_to_room.get(&sid).cloned()
    }

    pub fn occupants(&self, room_id: &RoomId) -> Vec<SessionId> {
        self.inner
            .lock()
            .unwrap()
            .room_to_sessions
            .get(room_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn occupant_count(&self, room_id: &RoomId) -> usize {
        self.inner
            .lock()
            .unwrap()
            .room_to_sessions
            .get(room_id)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    /// Detach every occupant of a deleted room in one critical section, so
    /// no concurrent fan-out can pick up a stale occupant list for it.
    /// Returns the sessions that were detached.
    pub fn detach_room(&self, room_id: &RoomId) -> Vec<SessionId> {
        let mut inner = self.inner.lock().unwrap();
        let Some(set) = inner.room_to_sessions.remove(room_id) else {
            return Vec::new();
        };
        for sid in &set {
            inner.session_to_room.remove(sid);
        }
        set.into_iter().collect()
    }
}
