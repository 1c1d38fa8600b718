//! C2 — RoomStore: CRUD over rooms, name uniqueness, and password
//! admission control. Backed by an in-memory map by default; an external
//! mirror (the `RoomMirror` port) can be plugged in to shadow room
//! metadata into a secondary store (spec §1's "remote persistence"
//! collaborator) without the in-memory map ever stopping being the
//! source of truth for invariants like uniqueness and protection.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::CoreError;
use crate::frame::Visibility;

pub type RoomId = String;

pub const GENERAL_ROOM_NAME: &str = "General";

#[derive(Debug, Clone)]
pub struct Room {
    pub room_id: RoomId,
    pub name: String,
    pub visibility: Visibility,
    /// Lowercase hex SHA-256 digest of the raw password, or empty if the
    /// room carries no password (spec §3: valid even for a private room).
    pub password_hash: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub name: String,
    pub visibility: Visibility,
    pub password_protected: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub occupant_count: usize,
}

impl Room {
    fn summary(&self, occupant_count: usize) -> RoomSummary {
        RoomSummary {
            room_id: self.room_id.clone(),
            name: self.name.clone(),
            visibility: self.visibility,
            password_protected: !self.password_hash.is_empty(),
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            occupant_count,
        }
    }
}

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// External room-metadata mirror (e.g. a cloud key-value store). Called
/// best-effort, after the in-memory state has already committed the
/// change; failures are the mirror's own concern, never the core's.
pub trait RoomMirror: Send + Sync {
    fn on_create(&self, room: &Room);
    fn on_delete(&self, room_id: &RoomId);
}

struct Inner {
    rooms: HashMap<RoomId, Room>,
    by_name: HashMap<String, RoomId>,
}

pub struct RoomRegistry {
    inner: RwLock<Inner>,
    mirror: Option<Arc<dyn RoomMirror>>,
    require_private_password: bool,
}

impl RoomRegistry {
    pub fn new(mirror: Option<Arc<dyn RoomMirror>>, require_private_password: bool) -> Self {
        let registry = RoomRegistry {
            inner: RwLock::new(Inner {
                rooms: HashMap::new(),
                by_name: HashMap::new(),
            }),
            mirror,
            require_private_password,
        };
        registry
            .create(GENERAL_ROOM_NAME, Visibility::Public, None, "SERVER")
            .expect("General room must be creatable at startup");
        registry
    }

    pub fn create(
        &self,
        name: &str,
        visibility: Visibility,
        password: Option<&str>,
        creator: &str,
    ) -> Result<RoomId, CoreError> {
        if self.require_private_password
            && visibility == Visibility::Private
            && password.map(str::is_empty).unwrap_or(true)
        {
            return Err(CoreError::BadRequest(
                "private rooms require a password on this deployment".to_string(),
            ));
        }

        let mut inner = self.inner.write().unwrap();
        if inner.by_name.contains_key(name) {
            return Err(CoreError::Conflict(format!("room '{name}' already exists")));
        }

        let room_id = uuid::Uuid::new_v4().to_string();
        let room = Room {
            room_id: room_id.clone(),
            name: name.to_string(),
            visibility,
            password_hash: password.filter(|p| !p.is_empty()).map(sha256_hex).unwrap_or_default(),
            created_by: creator.to_string(),
            created_at: Utc::now(),
        };

        inner.by_name.insert(name.to_string(), room_id.clone());
        inner.rooms.insert(room_id.clone(), room.clone());
        drop(inner);

        if let Some(mirror) = &self.mirror {
            mirror.on_create(&room);
        }

        Ok(room_id)
    }

    pub fn get(&self, room_id: &str) -> Result<Room, CoreError> {
        self.inner
            .read()
            .unwrap()
            .rooms
            .get(room_id)
            .cloned()
            .ok_or(CoreError::NotFound("room"))
    }

    pub fn get_by_name(&self, name: &str) -> Result<Room, CoreError> {
        let inner = self.inner.read().unwrap();
        let room_id = inner.by_name.get(name).ok_or(CoreError::NotFound("room"))?;
        inner.rooms.get(room_id).cloned().ok_or(CoreError::NotFound("room"))
    }

    pub fn exists(&self, room_id: &str) -> bool {
        self.inner.read().unwrap().rooms.contains_key(room_id)
    }

    /// Authorization: requester must be the creator, or the distinguished
    /// `SERVER` principal. `"General"` can never be deleted.
    pub fn delete(&self, room_id: &str, requester: &str) -> Result<(), CoreError> {
        let mut inner = self.inner.write().unwrap();
        let room = inner.rooms.get(room_id).ok_or(CoreError::NotFound("room"))?;

        if room.name == GENERAL_ROOM_NAME {
            return Err(CoreError::Protected);
        }
        if requester != room.created_by && requester != "SERVER" {
            return Err(CoreError::Forbidden("not the room creator"));
        }

        let room = inner.rooms.remove(room_id).unwrap();
        inner.by_name.remove(&room.name);
        drop(inner);

        if let Some(mirror) = &self.mirror {
            mirror.on_delete(&room.room_id);
        }

        Ok(())
    }

    /// `verify_password` per spec §4.2: ok when public, or the room has no
    /// password, or the candidate's digest matches.
    pub fn verify_password(&self, room_id: &str, candidate: Option<&str>) -> Result<(), CoreError> {
        let room = self.get(room_id)?;
        if room.visibility == Visibility::Public || room.password_hash.is_empty() {
            return Ok(());
        }
        let candidate_hash = candidate.map(sha256_hex).unwrap_or_default();
        if constant_time_eq(&candidate_hash, &room.password_hash) {
            Ok(())
        } else {
            Err(CoreError::Forbidden("incorrect password"))
        }
    }

    pub fn list_public(&self, occupant_count: impl Fn(&str) -> usize) -> Vec<RoomSummary> {
        self.inner
            .read()
            .unwrap()
            .rooms
            .values()
            .filter(|r| r.visibility == Visibility::Public)
            .map(|r| r.summary(occupant_count(&r.room_id)))
            .collect()
    }

    pub fn list_all(&self, occupant_count: impl Fn(&str) -> usize) -> Vec<RoomSummary> {
        self.inner
            .read()
            .unwrap()
            .rooms
            .values()
            .map(|r| r.summary(occupant_count(&r.room_id)))
            .collect()
    }
}

/// Hex strings are fixed-length for a given hash function, so a
/// straightforward byte comparison is already constant-time in practice;
/// this just avoids an early-exit short-circuit on the common case.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
