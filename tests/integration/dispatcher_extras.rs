use crate::common::{connect_and_auth, create_room_frame, join_room_frame, test_core};
use local_agent_chat::Frame;

/// `leave_room` (spec §4.5) detaches the session and, in the default-room
/// variant, auto-rejoins `"General"` so a session is never left roomless.
#[test]
fn leave_room_rejoins_general_automatically() {
    let core = test_core();
    let (sid, handle) = connect_and_auth(&core, "nanook");
    core.on_frame(sid, create_room_frame("den", "public", None));
    let room_id = handle.find("create_room_result").unwrap().params.unwrap()["roomId"]
        .as_str()
        .unwrap()
        .to_string();
    core.on_frame(sid, join_room_frame(&room_id, None));
    assert_eq!(core.membership.room_of(sid).as_deref(), Some(room_id.as_str()));

    core.on_frame(sid, Frame::command("nanook", "leave_room", serde_json::json!({ "roomId": room_id })));

    let general = core.rooms.get_by_name("General").unwrap().room_id;
    assert_eq!(core.membership.room_of(sid).as_deref(), Some(general.as_str()));
}

#[test]
fn leave_room_for_a_room_not_currently_joined_is_bad_request() {
    let core = test_core();
    let (sid, handle) = connect_and_auth(&core, "nanook");
    core.on_frame(
        sid,
        Frame::command("nanook", "leave_room", serde_json::json!({ "roomId": "some-other-room" })),
    );
    let err = handle.find("error").expect("error frame");
    assert_eq!(err.params.unwrap()["kind"], "BadRequest");
}

/// The additive `room_occupants` frame (SPEC_FULL §4.5) lets a client
/// refresh its roster without rejoining.
#[test]
fn room_occupants_lists_current_members_by_username() {
    let core = test_core();
    let (owner_sid, owner_handle) = connect_and_auth(&core, "owner");
    core.on_frame(owner_sid, create_room_frame("den", "public", None));
    let room_id = owner_handle.find("create_room_result").unwrap().params.unwrap()["roomId"]
        .as_str()
        .unwrap()
        .to_string();
    core.on_frame(owner_sid, join_room_frame(&room_id, None));

    let (guest_sid, _guest_handle) = connect_and_auth(&core, "guest");
    core.on_frame(guest_sid, join_room_frame(&room_id, None));

    core.on_frame(
        owner_sid,
        Frame::command("owner", "room_occupants", serde_json::json!({ "roomId": room_id })),
    );

    let reply = owner_handle.find("room_occupants").expect("room_occupants reply");
    let occupants = reply.params.unwrap()["occupants"].as_array().unwrap().clone();
    let names: Vec<String> = occupants.into_iter().map(|v| v.as_str().unwrap().to_string()).collect();
    assert!(names.contains(&"owner".to_string()));
    assert!(names.contains(&"guest".to_string()));
}

#[test]
fn room_occupants_on_unknown_room_is_not_found() {
    let core = test_core();
    let (sid, handle) = connect_and_auth(&core, "nanook");
    core.on_frame(sid, Frame::command("nanook", "room_occupants", serde_json::json!({ "roomId": "ghost" })));
    let err = handle.find("error").expect("error frame");
    assert_eq!(err.params.unwrap()["kind"], "NotFound");
}

/// `kick_occupant` (SPEC_FULL §4.5) is limited to the room's creator (or
/// `SERVER`) and runs the standard disconnect path on the target.
#[test]
fn room_creator_can_kick_an_occupant() {
    let core = test_core();
    let (owner_sid, owner_handle) = connect_and_auth(&core, "owner");
    core.on_frame(owner_sid, create_room_frame("turf", "public", None));
    let room_id = owner_handle.find("create_room_result").unwrap().params.unwrap()["roomId"]
        .as_str()
        .unwrap()
        .to_string();
    core.on_frame(owner_sid, join_room_frame(&room_id, None));

    let (guest_sid, _guest_handle) = connect_and_auth(&core, "guest");
    core.on_frame(guest_sid, join_room_frame(&room_id, None));
    assert!(core.sessions.is_live(guest_sid));

    core.on_frame(
        owner_sid,
        Frame::command(
            "owner",
            "kick_occupant",
            serde_json::json!({ "roomId": room_id, "targetUsername": "guest" }),
        ),
    );

    assert!(owner_handle.find("kick_occupant_result").is_some());
    assert!(!core.sessions.is_live(guest_sid));
}

#[test]
fn non_creator_cannot_kick_an_occupant() {
    let core = test_core();
    let (owner_sid, owner_handle) = connect_and_auth(&core, "owner");
    core.on_frame(owner_sid, create_room_frame("turf2", "public", None));
    let room_id = owner_handle.find("create_room_result").unwrap().params.unwrap()["roomId"]
        .as_str()
        .unwrap()
        .to_string();
    core.on_frame(owner_sid, join_room_frame(&room_id, None));

    let (guest_sid, guest_handle) = connect_and_auth(&core, "guest");
    core.on_frame(guest_sid, join_room_frame(&room_id, None));

    let (intruder_sid, intruder_handle) = connect_and_auth(&core, "intruder");
    core.on_frame(intruder_sid, join_room_frame(&room_id, None));

    core.on_frame(
        intruder_sid,
        Frame::command(
            "intruder",
            "kick_occupant",
            serde_json::json!({ "roomId": room_id, "targetUsername": "guest" }),
        ),
    );

    let err = intruder_handle.find("error").expect("error frame");
    assert_eq!(err.params.unwrap()["kind"], "Forbidden");
    assert!(core.sessions.is_live(guest_sid));
    let _ = guest_handle;
}

/// `typing` fans out `typing_status` to every other occupant, never back
/// to the sender (spec §4.5's frame table).
#[test]
fn typing_notifies_other_occupants_but_not_sender() {
    let core = test_core();
    let (alice_sid, alice_handle) = connect_and_auth(&core, "alice");
    let (_bob_sid, bob_handle) = connect_and_auth(&core, "bob");

    core.on_frame(alice_sid, Frame::command("alice", "typing", serde_json::json!({ "isTyping": true })));

    assert!(bob_handle.find("typing_status").is_some());
    assert!(alice_handle.find("typing_status").is_none());
}

/// `broadcast` is room-independent and reaches every live session,
/// isolated from per-room fan-out (spec §9's open question, resolved to
/// "kept as specified").
#[test]
fn broadcast_reaches_every_live_session_regardless_of_room() {
    let core = test_core();
    let (sid_a, handle_a) = connect_and_auth(&core, "alice");
    core.on_frame(sid_a, create_room_frame("off-to-the-side", "public", None));
    let room_id = handle_a.find("create_room_result").unwrap().params.unwrap()["roomId"]
        .as_str()
        .unwrap()
        .to_string();
    core.on_frame(sid_a, join_room_frame(&room_id, None));

    let (_sid_b, handle_b) = connect_and_auth(&core, "bob");

    core.on_frame(
        sid_a,
        Frame::command("alice", "broadcast", serde_json::json!({ "text": "server-wide note" })),
    );

    let seen_by_a = handle_a.find("broadcast_message").expect("alice sees broadcast");
    let seen_by_b = handle_b.find("broadcast_message").expect("bob sees broadcast too");
    assert_eq!(seen_by_a.params.unwrap()["text"], "server-wide note");
    assert_eq!(seen_by_b.params.unwrap()["text"], "server-wide note");
}
