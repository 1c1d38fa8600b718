//! Core of a real-time, multi-user chat server: sessions, rooms,
//! membership, and a per-room message log, composed behind a single
//! [`ChatCore`] façade. The core is transport-agnostic — it never touches
//! a socket — so it can be driven directly in tests or wired to any
//! framing an adapter chooses (see `bin/server.rs` for the bundled TCP
//! line-delimited-JSON adapter).

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod membership;
pub mod message;
pub mod room;
pub mod session;

pub use config::ServerConfig;
pub use dispatcher::ChatCore;
pub use error::{CoreError, CoreResult};
pub use frame::{Frame, FrameType, Inbound, Source, Visibility, SERVER_USERNAME};
pub use membership::Membership;
pub use message::{DeletionNotice, MessageId, MessageLog, MessageRecord, VersionSnapshot, DEFAULT_TAIL_LIMIT};
pub use room::{sha256_hex, Room, RoomId, RoomMirror, RoomRegistry, RoomSummary, GENERAL_ROOM_NAME};
pub use session::{DisconnectRecord, Session, SessionHandle, SessionId, SessionRegistry};
