//! C4 — MessageLog: a per-room append-only message stream with a
//! by-id index, edit history, and soft-delete. Deletion standardizes on
//! the tombstone-in-place variant described in spec §9: `deleted = true`
//! in the stored record, filtered out of default queries, with the
//! version history preserved so ordering and provenance stay intact.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::CoreError;
use crate::room::RoomId;

pub type MessageId = Uuid;

#[derive(Debug, Clone)]
pub struct VersionSnapshot {
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub message_id: MessageId,
    pub room_id: RoomId,
    pub author_session_username: String,
    pub author_user_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_system: bool,
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub version_history: Vec<VersionSnapshot>,
}

impl MessageRecord {
    pub fn new(room_id: RoomId, author_username: &str, content: String, is_system: bool) -> Self {
        MessageRecord {
            message_id: Uuid::new_v4(),
            room_id,
            author_session_username: author_username.to_string(),
            author_user_id: author_username.to_string(),
            content,
            timestamp: Utc::now(),
            is_system,
            edited: false,
            edited_at: None,
            deleted: false,
            version_history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeletionNotice {
    pub message_id: MessageId,
    pub room_id: RoomId,
    pub original_timestamp: DateTime<Utc>,
    pub deleted_content: String,
    pub deleter_username: String,
    pub deleted_at: DateTime<Utc>,
}

struct Inner {
    per_room: HashMap<RoomId, Vec<MessageRecord>>,
    index: HashMap<MessageId, (RoomId, usize)>,
}

pub struct MessageLog {
    inner: Mutex<Inner>,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLog {
    pub fn new() -> Self {
        MessageLog {
            inner: Mutex::new(Inner {
                per_room: HashMap::new(),
                index: HashMap::new(),
            }),
        }
    }

    /// Appends to the per-room list, creating an empty bucket on first use
    /// (system messages may race ahead of explicit room creation).
    pub fn append(&self, record: MessageRecord) -> MessageId {
        let mut inner = self.inner.lock().unwrap();
        let room_id = record.room_id.clone();
        let message_id = record.message_id;

        let bucket = inner.per_room.entry(room_id.clone()).or_default();
        let pos = bucket.len();
        bucket.push(record);
        inner.index.insert(message_id, (room_id, pos));

        message_id
    }

    pub fn get(&self, message_id: MessageId) -> Result<MessageRecord, CoreError> {
        let inner = self.inner.lock().unwrap();
        let (room_id, pos) = inner.index.get(&message_id).ok_or(CoreError::NotFound("message"))?;
        Ok(inner.per_room[room_id][*pos].clone())
    }

    /// Authorization requires `requester_user_id == record.author_user_id`.
    pub fn edit(
        &self,
        message_id: MessageId,
        requester_user_id: &str,
        new_content: String,
    ) -> Result<MessageRecord, CoreError> {
        let mut inner = self.inner.lock().unwrap();
        let (room_id, pos) = *inner.index.get(&message_id).ok_or(CoreError::NotFound("message"))?;
        let record = &mut inner.per_room.get_mut(&room_id).unwrap()[pos];

        if record.deleted {
            return Err(CoreError::Conflict("message already deleted".to_string()));
        }
        if record.author_user_id != requester_user_id {
            return Err(CoreError::Forbidden("not the message author"));
        }

        record.version_history.push(VersionSnapshot {
            content: record.content.clone(),
            timestamp: record.timestamp,
        });
        record.content = new_content;
        record.edited = true;
        record.edited_at = Some(Utc::now());

        Ok(record.clone())
    }

    /// Authorization requires `requester_user_id == record.author_user_id`.
    /// A second call on an already-deleted message returns `Conflict`
    /// (the "already_deleted" outcome) with no further state change.
    pub fn delete(
        &self,
        message_id: MessageId,
        requester_user_id: &str,
        deleter_username: &str,
    ) -> Result<DeletionNotice, CoreError> {
        let mut inner = self.inner.lock().unwrap();
        let (room_id, pos) = *inner.index.get(&message_id).ok_or(CoreError::NotFound("message"))?;
        let record = &mut inner.per_room.get_mut(&room_id).unwrap()[pos];

        if record.author_user_id != requester_user_id {
            return Err(CoreError::Forbidden("not the message author"));
        }
        if record.deleted {
            return Err(CoreError::Conflict("already_deleted".to_string()));
        }

        let deleted_at = Utc::now();
        record.version_history.push(VersionSnapshot {
            content: record.content.clone(),
            timestamp: record.timestamp,
        });
        let notice = DeletionNotice {
            message_id,
            room_id: record.room_id.clone(),
            original_timestamp: record.timestamp,
            deleted_content: record.content.clone(),
            deleter_username: deleter_username.to_string(),
            deleted_at,
        };
        record.deleted = true;

        Ok(notice)
    }

    /// The last `limit` non-deleted records, oldest to newest.
    pub fn tail(&self, room_id: &RoomId, limit: usize) -> Vec<MessageRecord> {
        let inner = self.inner.lock().unwrap();
        let Some(bucket) = inner.per_room.get(room_id) else {
            return Vec::new();
        };
        let live: Vec<MessageRecord> = bucket.iter().filter(|m| !m.deleted).cloned().collect();
        let start = live.len().saturating_sub(limit);
        live[start..].to_vec()
    }

    pub fn history(&self, message_id: MessageId) -> Result<Vec<VersionSnapshot>, CoreError> {
        let inner = self.inner.lock().unwrap();
        let (room_id, pos) = *inner.index.get(&message_id).ok_or(CoreError::NotFound("message"))?;
        Ok(inner.per_room[&room_id][pos].version_history.clone())
    }
}

pub const DEFAULT_TAIL_LIMIT: usize = 50;
