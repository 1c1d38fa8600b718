use crate::common::{auth_frame, test_core};
use local_agent_chat::Frame;
use std::sync::Arc;

/// A disconnect followed by a reconnect under the same device id surfaces
/// a `reconnectHint` with the last room, but does not auto-rejoin it
/// (spec §4.5, §9 "reconnection based on device id").
#[test]
fn reconnecting_device_id_surfaces_hint_without_auto_rejoin() {
    let core = test_core();

    let handle = Arc::new(crate::common::RecordingHandle::default());
    let sid = core.connect(handle.clone());
    core.on_frame(
        sid,
        Frame::command(
            "anonymous",
            "authenticate",
            serde_json::json!({ "username": "wanderer", "deviceId": "device-42" }),
        ),
    );

    let room_id = core.membership.room_of(sid).expect("joined General on auth");
    core.disconnect(sid);
    assert!(core.membership.room_of(sid).is_none());

    let handle2 = Arc::new(crate::common::RecordingHandle::default());
    let sid2 = core.connect(handle2.clone());
    core.on_frame(
        sid2,
        Frame::command(
            "anonymous",
            "authenticate",
            serde_json::json!({ "username": "wanderer", "deviceId": "device-42" }),
        ),
    );

    let ack = handle2.find("auth_ack").expect("auth_ack frame");
    let params = ack.params.unwrap();
    assert_eq!(params["reconnectHint"]["lastRoom"], room_id);

    // The hint is informational only; the session still ends up in General
    // (the default auto-join), not re-homed into whatever it left.
    let general = core.rooms.get_by_name("General").unwrap().room_id;
    assert_eq!(core.membership.room_of(sid2).as_deref(), Some(general.as_str()));
}

#[test]
fn no_hint_for_a_device_id_never_seen_before() {
    let core = test_core();
    let handle = Arc::new(crate::common::RecordingHandle::default());
    let sid = core.connect(handle.clone());
    core.on_frame(
        sid,
        Frame::command(
            "anonymous",
            "authenticate",
            serde_json::json!({ "username": "newcomer", "deviceId": "brand-new" }),
        ),
    );

    let ack = handle.find("auth_ack").expect("auth_ack frame");
    assert!(ack.params.unwrap().get("reconnectHint").is_none());
}

#[test]
fn disconnect_path_runs_for_a_session_with_a_failed_send() {
    let core = test_core();
    let dead = Arc::new(crate::common::DeadHandle);
    let sid = core.connect(dead);
    core.on_frame(sid, auth_frame("ghost"));

    // The welcome/auth_ack sends themselves failed, so the dispatcher
    // should have already disconnected this session.
    assert!(!core.sessions.is_live(sid));
}
