//! C1 — SessionRegistry: tracks live sessions, indexes by username, and
//! remembers recently disconnected device ids for reconnect hints.
//!
//! All mutation goes through a single `RwLock`, matching the locking
//! discipline the rest of the core uses: compute under the lock, release
//! it, then perform any I/O (here, that's the caller's job — `touch` and
//! `lookup` never block on a send).

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sid-{}", self.0)
    }
}

/// The transport's send port (spec §6). Implementations live in the
/// adapter; the core only ever calls `send` and reacts to failure.
pub trait SessionHandle: Send + Sync {
    fn send(&self, frame: &Frame) -> Result<(), CoreError>;
}

#[derive(Clone)]
pub struct Session {
    pub sid: SessionId,
    pub handle: Arc<dyn SessionHandle>,
    pub username: String,
    pub device_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Set once, by `authenticate`. Drives the CONNECTED→AUTHENTICATED
    /// transition in the session state machine (spec §4.5).
    pub authenticated: bool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("sid", &self.sid)
            .field("username", &self.username)
            .field("device_id", &self.device_id)
            .field("connected_at", &self.connected_at)
            .field("last_activity", &self.last_activity)
            .field("authenticated", &self.authenticated)
            .finish()
    }
}

/// A recently disconnected client, kept so a reconnecting device can be
/// told what room it used to be in without the registry auto-rejoining it.
#[derive(Debug, Clone)]
pub struct DisconnectRecord {
    pub username: String,
    pub last_room: Option<String>,
    pub last_seen: DateTime<Utc>,
}

struct Inner {
    sessions: HashMap<SessionId, Session>,
    by_username: HashMap<String, SessionId>,
    recent_disconnects: HashMap<String, DisconnectRecord>,
}

pub struct SessionRegistry {
    inner: RwLock<Inner>,
    next_sid: AtomicU64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            inner: RwLock::new(Inner {
                sessions: HashMap::new(),
                by_username: HashMap::new(),
                recent_disconnects: HashMap::new(),
            }),
            next_sid: AtomicU64::new(1),
        }
    }

    /// Allocate a new session with placeholder username `Guest-<n>`.
    pub fn register(&self, handle: Arc<dyn SessionHandle>) -> (SessionId, String) {
        let n = self.next_sid.fetch_add(1, Ordering::SeqCst);
        let sid = SessionId(n);
        let username = format!("Guest-{n}");
        let now = Utc::now();

        let mut inner = self.inner.write().unwrap();
        inner.sessions.insert(
            sid,
            Session {
                sid,
                handle,
                username: username.clone(),
                device_id: None,
                connected_at: now,
                last_activity: now,
                authenticated: false,
            },
        );
        inner.by_username.insert(username.clone(), sid);

        (sid, username)
    }

    /// Replace the placeholder username, resolving collisions by suffixing
    /// `_#k`. Returns the assigned username plus a reconnect hint if this
    /// device id was seen recently.
    pub fn authenticate(
        &self,
        sid: SessionId,
        requested_username: &str,
        device_id: Option<String>,
    ) -> Result<(String, Option<DisconnectRecord>), CoreError> {
        let mut inner = self.inner.write().unwrap();

        let old_username = inner
            .sessions
            .get(&sid)
            .map(|s| s.username.clone())
            .ok_or(CoreError::Gone)?;

        let assigned = Self::unique_username(&inner.by_username, requested_username, &old_username);

        inner.by_username.remove(&old_username);
        inner.by_username.insert(assigned.clone(), sid);

        let session = inner.sessions.get_mut(&sid).ok_or(CoreError::Gone)?;
        session.username = assigned.clone();
        session.device_id = device_id.clone();
        session.authenticated = true;

        let hint = device_id.and_then(|d| inner.recent_disconnects.get(&d).cloned());

        Ok((assigned, hint))
    }

    fn unique_username(
        by_username: &HashMap<String, SessionId>,
        requested: &str,
        reserved_by_self: &str,
    ) -> String {
        if requested != reserved_by_self && by_username.contains_key(requested) {
            let live_count = by_username.len();
            let mut k = live_count.max(1);
            loop {
                let candidate = format!("{requested}_{k}");
                if !by_username.contains_key(&candidate) {
                    return candidate;
                }
                k += 1;
            }
        }
        requested.to_string()
    }

    /// Mark a session active. Called on every inbound frame.
    pub fn touch(&self, sid: SessionId) -> Result<(), CoreError> {
        let mut inner = self.inner.write().unwrap();
        let session = inner.sessions.get_mut(&sid).ok_or(CoreError::Gone)?;
        session.last_activity = Utc::now();
        Ok(())
    }

    pub fn lookup(&self, sid: SessionId) -> Result<Session, CoreError> {
        self.inner
            .read()
            .unwrap()
            .sessions
            .get(&sid)
            .cloned()
            .ok_or(CoreError::Gone)
    }

    pub fn is_live(&self, sid: SessionId) -> bool {
        self.inner.read().unwrap().sessions.contains_key(&sid)
    }

    /// Remove and return a session, recording a reconnect hint for its
    /// device id (if any) under `last_room`.
    pub fn drop_session(&self, sid: SessionId, last_room: Option<String>) -> Result<Session, CoreError> {
        let mut inner = self.inner.write().unwrap();
        let session = inner.sessions.remove(&sid).ok_or(CoreError::Gone)?;
        inner.by_username.remove(&session.username);

        if let Some(ref device_id) = session.device_id {
            inner.recent_disconnects.insert(
                device_id.clone(),
                DisconnectRecord {
                    username: session.username.clone(),
                    last_room,
                    last_seen: Utc::now(),
                },
            );
        }

        Ok(session)
    }

    /// Sessions whose `last_activity` is older than `now - timeout`.
    pub fn sweep(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> Vec<SessionId> {
        let inner = self.inner.read().unwrap();
        inner
            .sessions
            .values()
            .filter(|s| now.signed_duration_since(s.last_activity) > timeout)
            .map(|s| s.sid)
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.inner.read().unwrap().sessions.len()
    }

    pub fn all_handles(&self) -> Vec<(SessionId, Arc<dyn SessionHandle>)> {
        self.inner
            .read()
            .unwrap()
            .sessions
            .values()
            .map(|s| (s.sid, s.handle.clone()))
            .collect()
    }
}
