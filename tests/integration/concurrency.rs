use std::sync::Arc;
use std::thread;

use crate::common::{connect_and_auth, send_message_frame, test_core};

/// Spec §8 / S6: with N concurrent publishers each posting M messages into
/// the same room with a single other subscriber, the subscriber's receive
/// sequence is a permutation of the union in which, for each publisher,
/// that publisher's messages appear in the order they were posted.
#[test]
fn concurrent_publishers_preserve_per_sender_order() {
    let core = test_core();
    let (_sub_sid, sub_handle) = connect_and_auth(&core, "subscriber");

    const PUBLISHERS: usize = 10;
    const MESSAGES_PER_PUBLISHER: usize = 100;

    let mut publisher_sids = Vec::with_capacity(PUBLISHERS);
    for i in 0..PUBLISHERS {
        let (sid, _handle) = connect_and_auth(&core, &format!("publisher-{i}"));
        publisher_sids.push(sid);
    }

    thread::scope(|scope| {
        for (i, &sid) in publisher_sids.iter().enumerate() {
            let core = &core;
            scope.spawn(move || {
                for n in 0..MESSAGES_PER_PUBLISHER {
                    core.on_frame(sid, send_message_frame(&format!("pub{i}-msg{n}")));
                }
            });
        }
    });

    let received: Vec<String> = sub_handle
        .all()
        .into_iter()
        .filter(|f| f.command.is_none() && f.username.starts_with("publisher-"))
        .map(|f| f.message)
        .collect();

    for i in 0..PUBLISHERS {
        let prefix = format!("pub{i}-msg");
        let this_publisher: Vec<usize> = received
            .iter()
            .filter_map(|m| m.strip_prefix(prefix.as_str()))
            .map(|n| n.parse().unwrap())
            .collect();
        assert_eq!(this_publisher.len(), MESSAGES_PER_PUBLISHER, "publisher {i} lost messages");
        assert!(
            this_publisher.windows(2).all(|w| w[0] < w[1]),
            "publisher {i}'s messages arrived out of order: {this_publisher:?}"
        );
    }
}

/// Two messages appended to the same room, in that order, are delivered to
/// every recipient in that same order (spec §8's broadcast ordering
/// property, single-sender case).
#[test]
fn sequential_sends_from_one_sender_preserve_order() {
    let core = test_core();
    let (sid, _handle) = connect_and_auth(&core, "alice");
    let (_sid_b, handle_b) = connect_and_auth(&core, "bob");

    for n in 0..20 {
        core.on_frame(sid, send_message_frame(&format!("m{n}")));
    }

    let received: Vec<String> = handle_b
        .all()
        .into_iter()
        .filter(|f| f.command.is_none() && f.username == "alice")
        .map(|f| f.message)
        .collect();
    let expected: Vec<String> = (0..20).map(|n| format!("m{n}")).collect();
    assert_eq!(received, expected);
}
