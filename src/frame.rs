//! The wire-agnostic frame contract (spec §6). The core never touches
//! sockets or bytes — it consumes and produces `Frame` values; an adapter
//! (see `bin/server.rs`) is responsible for line-delimited JSON encoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

pub const SERVER_USERNAME: &str = "SERVER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Client,
    Host,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    Message,
    Update,
    Delete,
}

/// The common envelope described in spec §6. `command` present means this
/// is a command frame; absent means it's a plain chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub username: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "messageId", default = "uuid::Uuid::new_v4")]
    pub message_id: uuid::Uuid,
    pub timestamp: String,
    pub source: Source,
    #[serde(rename = "deviceId", default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub frame_type: Option<FrameType>,
    #[serde(rename = "roomId", default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

impl Frame {
    pub fn now() -> String {
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }

    /// Build a system-emitted frame: `source = host`, `username = SERVER`.
    pub fn system(command: &str, params: Value) -> Self {
        Frame {
            username: SERVER_USERNAME.to_string(),
            message: String::new(),
            message_id: uuid::Uuid::new_v4(),
            timestamp: Self::now(),
            source: Source::Host,
            device_id: None,
            command: Some(command.to_string()),
            params: Some(params),
            frame_type: None,
            room_id: None,
        }
    }

    /// Build a command response/request frame addressed as `username`.
    pub fn command(username: &str, command: &str, params: Value) -> Self {
        Frame {
            username: username.to_string(),
            message: String::new(),
            message_id: uuid::Uuid::new_v4(),
            timestamp: Self::now(),
            source: Source::Host,
            device_id: None,
            command: Some(command.to_string()),
            params: Some(params),
            frame_type: None,
            room_id: None,
        }
    }

    pub fn error(username: &str, err: &CoreError) -> Self {
        Frame::command(
            username,
            "error",
            serde_json::json!({ "kind": err.kind(), "message": err.to_string() }),
        )
    }

    fn param_str(&self, key: &str) -> Option<String> {
        self.params.as_ref()?.get(key)?.as_str().map(String::from)
    }

    fn param_bool(&self, key: &str) -> Option<bool> {
        self.params.as_ref()?.get(key)?.as_bool()
    }

    /// Parse this inbound frame into a typed command. Missing required
    /// fields surface as `BadRequest`; an absent `command` means this is a
    /// plain chat message, handled by the caller before reaching here.
    pub fn into_inbound(self) -> Result<Inbound, CoreError> {
        let command = self.command.clone().ok_or_else(|| {
            CoreError::BadRequest("not a command frame".to_string())
        })?;

        match command.as_str() {
            "authenticate" => {
                let username = self
                    .param_str("username")
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| CoreError::BadRequest("username required".to_string()))?;
                let device_id = self.param_str("deviceId").or_else(|| self.param_str("device_id"));
                Ok(Inbound::Authenticate { username, device_id })
            }
            "create_room" => {
                let name = self
                    .param_str("name")
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| CoreError::BadRequest("name required".to_string()))?;
                let visibility = match self.param_str("visibility").as_deref() {
                    Some("private") => Visibility::Private,
                    _ => Visibility::Public,
                };
                let password = self.param_str("password");
                Ok(Inbound::CreateRoom { name, visibility, password })
            }
            "join_room" => {
                let room_id = self
                    .param_str("roomId")
                    .or_else(|| self.param_str("room_id"))
                    .or(self.room_id.clone())
                    .ok_or_else(|| CoreError::BadRequest("roomId required".to_string()))?;
                let password = self.param_str("password");
                Ok(Inbound::JoinRoom { room_id, password })
            }
            "leave_room" => {
                let room_id = self.param_str("roomId").or_else(|| self.param_str("room_id"));
                Ok(Inbound::LeaveRoom { room_id })
            }
            "send_message" => {
                let content = if !self.message.trim().is_empty() {
                    self.message.clone()
                } else {
                    self.param_str("content").unwrap_or_default()
                };
                Ok(Inbound::SendMessage { content })
            }
            "update_message" => {
                let message_id = self
                    .param_str("messageId")
                    .or_else(|| self.param_str("message_id"))
                    .ok_or_else(|| CoreError::BadRequest("messageId required".to_string()))?;
                let content = self
                    .param_str("content")
                    .ok_or_else(|| CoreError::BadRequest("content required".to_string()))?;
                Ok(Inbound::UpdateMessage { message_id, content })
            }
            "delete_message" => {
                let message_id = self
                    .param_str("messageId")
                    .or_else(|| self.param_str("message_id"))
                    .ok_or_else(|| CoreError::BadRequest("messageId required".to_string()))?;
                Ok(Inbound::DeleteMessage { message_id })
            }
            "get_rooms" => Ok(Inbound::GetRooms),
            "room_occupants" => {
                let room_id = self
                    .param_str("roomId")
                    .or_else(|| self.param_str("room_id"))
                    .or(self.room_id.clone())
                    .ok_or_else(|| CoreError::BadRequest("roomId required".to_string()))?;
                Ok(Inbound::RoomOccupants { room_id })
            }
            "delete_room" => {
                let room_id = self
                    .param_str("roomId")
                    .or_else(|| self.param_str("room_id"))
                    .or(self.room_id.clone())
                    .ok_or_else(|| CoreError::BadRequest("roomId required".to_string()))?;
                Ok(Inbound::DeleteRoom { room_id })
            }
            "kick_occupant" => {
                let room_id = self
                    .param_str("roomId")
                    .or_else(|| self.param_str("room_id"))
                    .ok_or_else(|| CoreError::BadRequest("roomId required".to_string()))?;
                let target_username = self
                    .param_str("targetUsername")
                    .or_else(|| self.param_str("target_username"))
                    .ok_or_else(|| CoreError::BadRequest("targetUsername required".to_string()))?;
                Ok(Inbound::KickOccupant { room_id, target_username })
            }
            "typing" => {
                let is_typing = self.param_bool("isTyping").or_else(|| self.param_bool("is_typing")).unwrap_or(false);
                Ok(Inbound::Typing { is_typing })
            }
            "broadcast" => {
                let text = self
                    .param_str("text")
                    .unwrap_or_else(|| self.message.clone());
                Ok(Inbound::Broadcast { text })
            }
            other => Err(CoreError::BadRequest(format!("unknown command: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

/// Typed form of a decoded inbound command frame (spec §4.5's taxonomy table).
#[derive(Debug, Clone)]
pub enum Inbound {
    Authenticate { username: String, device_id: Option<String> },
    CreateRoom { name: String, visibility: Visibility, password: Option<String> },
    JoinRoom { room_id: String, password: Option<String> },
    LeaveRoom { room_id: Option<String> },
    DeleteRoom { room_id: String },
    SendMessage { content: String },
    UpdateMessage { message_id: String, content: String },
    DeleteMessage { message_id: String },
    GetRooms,
    RoomOccupants { room_id: String },
    KickOccupant { room_id: String, target_username: String },
    Typing { is_typing: bool },
    Broadcast { text: String },
}
