//! Property tests for registration matching and queue ordering

use message_queue::{
    prefix_matches, AckStatus, EventMessage, Mailbox, MessageKind, RegisteredMessage,
};
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;

fn arg() -> impl Strategy<Value = Value> {
    prop_oneof![
        (0u8..4).prop_map(|n| json!(n)),
        "[a-c]".prop_map(|s| json!(s)),
    ]
}

proptest! {
    #[test]
    fn non_empty_prefix_always_matches(
        probe in prop::collection::vec(arg(), 1..6),
        cut in 1usize..6,
    ) {
        let cut = cut.min(probe.len());
        prop_assert!(prefix_matches(&probe[..cut], &probe));
    }

    #[test]
    fn longer_pattern_never_matches(
        pattern in prop::collection::vec(arg(), 1..6),
        shorter_by in 1usize..6,
    ) {
        let probe = &pattern[..pattern.len().saturating_sub(shorter_by)];
        prop_assert!(!prefix_matches(&pattern, probe));
    }

    #[test]
    fn match_registered_counts_prefix_hits(
        patterns in prop::collection::vec(prop::collection::vec(arg(), 0..3), 0..6),
        probe in prop::collection::vec(arg(), 0..4),
    ) {
        let server = Mailbox::new("server");
        let client = Mailbox::new("client");
        client.register_receiver("server", server.clone());

        for pattern in &patterns {
            client.send_to(RegisteredMessage::new(pattern.clone()), "server").unwrap();
        }
        let expected = patterns.iter().filter(|p| prefix_matches(p, &probe)).count();
        let delivered = server.match_registered(&probe, AckStatus::Progress, None, None);
        prop_assert_eq!(delivered, expected);
    }

    #[test]
    fn dispatch_preserves_send_order(values in prop::collection::vec(any::<i64>(), 0..50)) {
        let server = Mailbox::new("server");
        let client = Mailbox::new("client");
        client.register_receiver("server", server.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            server.register_callback(MessageKind::Event, move |msg, _| {
                if let Some(event) = msg.as_event() {
                    seen.lock().push(event.args[0].as_i64());
                }
                Ok(())
            });
        }

        for value in &values {
            client.send_to(EventMessage::new([*value]), "server").unwrap();
        }
        server.process_messages();

        let expected: Vec<Option<i64>> = values.iter().map(|v| Some(*v)).collect();
        prop_assert_eq!(seen.lock().clone(), expected);
    }
}
