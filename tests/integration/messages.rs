use crate::common::{connect_and_auth, send_message_frame, test_core};
use local_agent_chat::Frame;

#[test]
fn send_message_fans_out_to_room_occupants_including_sender() {
    let core = test_core();
    let (sid_a, handle_a) = connect_and_auth(&core, "alice");
    let (_sid_b, handle_b) = connect_and_auth(&core, "bob");

    core.on_frame(sid_a, send_message_frame("hello room"));

    let seen_by_a = handle_a.all().into_iter().any(|f| f.message == "hello room");
    let seen_by_b = handle_b.all().into_iter().any(|f| f.message == "hello room");
    assert!(seen_by_a);
    assert!(seen_by_b);
}

#[test]
fn empty_message_is_rejected() {
    let core = test_core();
    let (sid, handle) = connect_and_auth(&core, "alice");
    core.on_frame(sid, send_message_frame("   "));
    let err = handle.find("error").expect("empty message should error");
    assert_eq!(err.params.unwrap()["kind"], "BadRequest");
}

#[test]
fn message_over_max_length_is_rejected() {
    let core = local_agent_chat::ChatCore::new(local_agent_chat::ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        idle_timeout_secs: 0,
        max_message_len: 10,
        require_private_room_password: false,
    });
    let (sid, handle) = connect_and_auth(&core, "alice");
    core.on_frame(sid, send_message_frame("this message is far too long"));
    let err = handle.find("error").expect("overlong message should error");
    assert_eq!(err.params.unwrap()["kind"], "BadRequest");
}

#[test]
fn author_can_edit_their_own_message() {
    let core = test_core();
    let (sid, _handle) = connect_and_auth(&core, "alice");
    let general = core.rooms.get_by_name("General").unwrap().room_id;

    let record = local_agent_chat::MessageRecord::new(general.clone(), "alice", "original".to_string(), false);
    let message_id = core.messages.append(record);

    core.on_frame(
        sid,
        Frame::command(
            "alice",
            "update_message",
            serde_json::json!({ "messageId": message_id.to_string(), "content": "edited" }),
        ),
    );

    let stored = core.messages.get(message_id).unwrap();
    assert_eq!(stored.content, "edited");
    assert!(stored.edited);
}

#[test]
fn non_author_cannot_edit_message() {
    let core = test_core();
    let general = core.rooms.get_by_name("General").unwrap().room_id;
    let record = local_agent_chat::MessageRecord::new(general, "alice", "original".to_string(), false);
    let message_id = core.messages.append(record);

    let (sid, handle) = connect_and_auth(&core, "mallory");
    core.on_frame(
        sid,
        Frame::command(
            "mallory",
            "update_message",
            serde_json::json!({ "messageId": message_id.to_string(), "content": "hijacked" }),
        ),
    );

    let err = handle.find("error").expect("non-author edit should error");
    assert_eq!(err.params.unwrap()["kind"], "Forbidden");
    assert_eq!(core.messages.get(message_id).unwrap().content, "original");
}

#[test]
fn deleting_twice_is_a_conflict_not_a_second_tombstone() {
    let core = test_core();
    let general = core.rooms.get_by_name("General").unwrap().room_id;
    let record = local_agent_chat::MessageRecord::new(general, "alice", "bye".to_string(), false);
    let message_id = core.messages.append(record);

    core.messages.delete(message_id, "alice", "alice").expect("first delete ok");
    let err = core.messages.delete(message_id, "alice", "alice").unwrap_err();
    assert_eq!(err.kind(), "Conflict");
}

#[test]
fn deleted_messages_are_excluded_from_tail_but_content_is_retained_in_history() {
    let core = test_core();
    let general = core.rooms.get_by_name("General").unwrap().room_id;
    let record = local_agent_chat::MessageRecord::new(general.clone(), "alice", "secret".to_string(), false);
    let message_id = core.messages.append(record);

    core.messages.delete(message_id, "alice", "alice").unwrap();

    let tail = core.messages.tail(&general, 50);
    assert!(tail.iter().all(|m| m.message_id != message_id));

    let stored = core.messages.get(message_id).unwrap();
    assert!(stored.deleted);
    assert_eq!(stored.version_history.last().unwrap().content, "secret");
}
