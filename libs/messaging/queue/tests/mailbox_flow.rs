//! End-to-end message flow between externally driven mailboxes

use message_queue::{
    AckMessage, AckStatus, CommandMessage, EventMessage, InfoMessage, Mailbox, Message,
    MessageKind, RegisteredMessage,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Initialize tracing for tests (call once per test)
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn connected(a: &str, b: &str) -> (Mailbox, Mailbox) {
    let first = Mailbox::new(a);
    let second = Mailbox::new(b);
    first.register_receiver(b, second.clone());
    second.register_receiver(a, first.clone());
    (first, second)
}

#[test]
fn messages_dispatch_in_arrival_order() {
    init_tracing();
    let (client, server) = connected("client", "server");

    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in [MessageKind::Info, MessageKind::Event] {
        let seen = Arc::clone(&seen);
        server.register_callback(kind, move |msg, _| {
            let args = match msg.body() {
                message_queue::MessageBody::Info(info) => info.args.clone(),
                message_queue::MessageBody::Event(event) => event.args.clone(),
                _ => unreachable!(),
            };
            seen.lock().push(args[0].clone());
            Ok(())
        });
    }

    client.send_to(InfoMessage::new([1]), "server").unwrap();
    client.send_to(EventMessage::new([2]), "server").unwrap();
    client.send_to(InfoMessage::new([3]), "server").unwrap();

    assert!(server.process_messages());
    assert_eq!(*seen.lock(), vec![json!(1), json!(2), json!(3)]);
    assert_eq!(server.stats().dispatched, 3);
}

#[test]
fn ack_handler_runs_once_per_ack_until_terminal() {
    init_tracing();
    let (client, server) = connected("client", "server");

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let cmd = {
        let statuses = Arc::clone(&statuses);
        CommandMessage::new(json!({"op": "rebalance"})).with_ack_handler(move |msg, _| {
            let ack = msg.as_ack().expect("command answered with an ack");
            statuses.lock().push((ack.status, ack.correlation));
            Ok(())
        })
    };
    let correlation = Some(cmd.correlation());

    let fallback = Arc::new(AtomicUsize::new(0));
    {
        let fallback = Arc::clone(&fallback);
        client.register_callback(MessageKind::Ack, move |_, _| {
            fallback.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    server.register_callback(MessageKind::Command, |msg, ctx| {
        ctx.ack(msg, AckStatus::Started, None)?;
        ctx.ack(msg, AckStatus::Progress, None)?;
        ctx.ack(msg, AckStatus::Completed, None)?;
        // late duplicate after the terminal status
        ctx.ack(msg, AckStatus::Completed, None)?;
        Ok(())
    });

    client.send_to(cmd, "server").unwrap();
    assert_eq!(client.pending_commands(), 1);

    server.process_messages();
    client.process_messages();

    assert_eq!(
        *statuses.lock(),
        vec![
            (AckStatus::Started, correlation),
            (AckStatus::Progress, correlation),
            (AckStatus::Completed, correlation)
        ]
    );
    assert_eq!(fallback.load(Ordering::SeqCst), 1);
    assert_eq!(client.pending_commands(), 0);
    assert_eq!(client.stats().acks_correlated, 3);
}

#[test]
fn ack_carries_payload() {
    let (client, server) = connected("client", "server");
    let result = Arc::new(Mutex::new(None));

    let cmd = {
        let result = Arc::clone(&result);
        CommandMessage::new("quote").with_ack_handler(move |msg, _| {
            *result.lock() = msg.payload_as::<u64>().copied();
            Ok(())
        })
    };
    server.register_callback(MessageKind::Command, |msg, ctx| {
        ctx.ack(msg, AckStatus::Completed, Some(Arc::new(1_250u64)))?;
        Ok(())
    });

    client.send_to(cmd, "server").unwrap();
    server.process_messages();
    client.process_messages();
    assert_eq!(*result.lock(), Some(1_250));
}

#[test]
fn registrations_match_by_prefix() {
    init_tracing();
    let (client, server) = connected("client", "server");

    let matched = Arc::new(Mutex::new(Vec::new()));
    let registration = {
        let matched = Arc::clone(&matched);
        RegisteredMessage::new([json!("pool"), json!("WETH")]).with_ack_handler(move |msg, _| {
            let ack = msg.as_ack().expect("registration answered with an ack");
            matched.lock().push(ack.match_params.clone());
            Ok(())
        })
    };
    client.send_to(registration, "server").unwrap();
    assert_eq!(server.registrations().len(), 1);

    let hit = [json!("pool"), json!("WETH"), json!(42)];
    let miss = [json!("pool"), json!("USDC")];
    let short = [json!("pool")];
    assert_eq!(server.match_registered(&hit, AckStatus::Completed, None, None), 1);
    assert_eq!(server.match_registered(&miss, AckStatus::Completed, None, None), 0);
    assert_eq!(server.match_registered(&short, AckStatus::Completed, None, None), 0);
    assert_eq!(server.match_registered(&hit, AckStatus::Completed, None, None), 1);

    client.process_messages();
    let expected: Option<Vec<Value>> = Some(hit.to_vec());
    assert_eq!(*matched.lock(), vec![expected.clone(), expected]);
    // registrations survive terminal statuses
    assert_eq!(client.pending_commands(), 1);
}

#[test]
fn unregister_removes_registration() {
    let (client, server) = connected("client", "server");
    client
        .send_to(RegisteredMessage::new(["feed"]), "server")
        .unwrap();
    client
        .send_to(RegisteredMessage::new(["feed"]), "server")
        .unwrap();
    client
        .send_to(RegisteredMessage::new(["other"]), "server")
        .unwrap();
    assert_eq!(server.registrations().len(), 3);

    client
        .send_to(message_queue::UnregisterMessage::new(["feed"]), "server")
        .unwrap();
    let left = server.registrations();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].match_args, vec![json!("other")]);
}

#[test]
fn match_notifications_skip_originator() {
    init_tracing();
    let server = Mailbox::new("server");
    let alice = Mailbox::new("alice");
    let bob = Mailbox::new("bob");
    alice.register_receiver("server", server.clone());
    bob.register_receiver("server", server.clone());

    alice
        .send_to(RegisteredMessage::new(["book"]), "server")
        .unwrap();
    bob.send_to(RegisteredMessage::new(["book"]), "server")
        .unwrap();

    // an update from alice is fanned out to everyone else in alice's name
    server.register_callback(MessageKind::Ack, |msg, ctx| {
        let params = msg
            .as_ack()
            .and_then(|ack| ack.match_params.clone())
            .unwrap_or_default();
        ctx.match_registered(&params, AckStatus::Progress, None, Some(msg));
        Ok(())
    });

    let update = AckMessage::new(AckStatus::Progress).with_match_params(vec![json!("book")]);
    alice.send_to(update, "server").unwrap();
    server.process_messages();

    assert_eq!(alice.messages_waiting(), 0);
    assert_eq!(bob.messages_waiting(), 1);

    let from = Arc::new(Mutex::new(None));
    {
        let from = Arc::clone(&from);
        bob.register_callback(MessageKind::Ack, move |msg, _| {
            *from.lock() = msg.sender().map(|s| s.to_string());
            Ok(())
        });
    }
    bob.process_messages();
    assert_eq!(from.lock().as_deref(), Some("alice"));
}

#[test]
fn commands_sent_from_handlers_wait_for_drain_end() {
    init_tracing();
    let (client, server) = connected("client", "server");

    let observed_during_drain = Arc::new(Mutex::new(Vec::new()));
    {
        let client = client.clone();
        let observed = Arc::clone(&observed_during_drain);
        server.register_callback(MessageKind::Info, move |_, ctx| {
            ctx.send_to(CommandMessage::new("follow-up"), "client")?;
            ctx.send_to(EventMessage::new(["now"]), "client")?;
            observed.lock().push((ctx.staged_len(), client.messages_waiting()));
            Ok(())
        });
    }

    client.send_to(InfoMessage::new(["go"]), "server").unwrap();
    server.process_messages();

    // the event went out immediately, the command only after the drain
    assert_eq!(*observed_during_drain.lock(), vec![(1, 1)]);
    assert_eq!(client.messages_waiting(), 2);
    assert_eq!(server.stats().commands_staged, 1);
}

#[test]
fn failing_callbacks_are_isolated() {
    init_tracing();
    let (client, server) = connected("client", "server");

    let delivered = Arc::new(AtomicUsize::new(0));
    server.register_callback(MessageKind::Event, |_, _| anyhow::bail!("rejected"));
    {
        let delivered = Arc::clone(&delivered);
        server.register_callback(MessageKind::Event, move |_, _| {
            delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    for i in 0..5 {
        client.send_to(EventMessage::new([i]), "server").unwrap();
    }
    server.process_messages();

    assert_eq!(delivered.load(Ordering::SeqCst), 5);
    assert_eq!(server.stats().callback_failures, 5);
}

#[test]
fn bounce_reaches_command_handler() {
    let (client, server) = connected("client", "server");
    let bounced = Arc::new(Mutex::new(None));

    let cmd = {
        let bounced = Arc::clone(&bounced);
        CommandMessage::new("unsupported").with_ack_handler(move |msg, _| {
            *bounced.lock() = msg.as_bounce().and_then(|b| b.reason.clone());
            Ok(())
        })
    };
    server.register_callback(MessageKind::Command, |msg, ctx| {
        ctx.send(msg.bounce(Some("no handler for command")))?;
        Ok(())
    });

    client.send_to(cmd, "server").unwrap();
    server.process_messages();
    client.process_messages();

    assert_eq!(bounced.lock().as_deref(), Some("no handler for command"));
    assert_eq!(client.pending_commands(), 0);
}

#[test]
fn message_without_recipient_is_dropped() {
    let (client, server) = connected("client", "server");
    assert!(client.send(Message::info(InfoMessage::new(["void"]))).is_ok());
    assert_eq!(server.messages_waiting(), 0);
    assert_eq!(client.stats().silent_drops, 1);
}

#[test]
fn unknown_recipient_reports_error_without_bounce() {
    let client = Mailbox::new("client");
    let err = client
        .send_to(CommandMessage::new("x").with_ack_handler(|_, _| Ok(())), "ghost")
        .unwrap_err();
    assert!(err.is_routing_error());
    assert_eq!(client.messages_waiting(), 0);
    assert_eq!(client.pending_commands(), 0);
}
