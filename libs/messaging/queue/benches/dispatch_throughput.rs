//! Dispatch throughput
//!
//! Measures the in-process cost of queueing and draining messages, and of a
//! blocking command round trip through a worker thread.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use message_queue::{
    AckStatus, CommandMessage, EventMessage, Mailbox, MessageKind, RegisteredMessage,
};
use serde_json::json;

fn connected() -> (Mailbox, Mailbox) {
    let client = Mailbox::new("client");
    let server = Mailbox::new("server");
    client.register_receiver("server", server.clone());
    (client, server)
}

/// Queue a batch of events and drain them through one callback
fn bench_send_and_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("send_and_drain");

    for batch in [1usize, 64, 1024] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            let (client, server) = connected();
            server.register_callback(MessageKind::Event, |msg, _| {
                black_box(msg.as_event());
                Ok(())
            });
            b.iter(|| {
                for i in 0..batch {
                    client.send_to(EventMessage::new([i]), "server").unwrap();
                }
                server.process_messages()
            });
        });
    }
    group.finish();
}

/// Fan a probe out to many registrations
fn bench_match_registered(c: &mut Criterion) {
    let mut group = c.benchmark_group("match_registered");

    for subscribers in [10usize, 100] {
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, &subscribers| {
                let server = Mailbox::new("server");
                let clients: Vec<Mailbox> = (0..subscribers)
                    .map(|i| {
                        let client = Mailbox::new(format!("client-{}", i));
                        client.register_receiver("server", server.clone());
                        client
                            .send_to(RegisteredMessage::new(["pool", "WETH"]), "server")
                            .unwrap();
                        client
                    })
                    .collect();
                let probe = [json!("pool"), json!("WETH"), json!(7)];

                b.iter(|| {
                    let delivered =
                        server.match_registered(black_box(&probe), AckStatus::Progress, None, None);
                    for client in &clients {
                        client.process_messages();
                    }
                    delivered
                });
            },
        );
    }
    group.finish();
}

/// Blocking command round trip against a dedicated worker
fn bench_round_trip(c: &mut Criterion) {
    let server = Mailbox::spawn("server").unwrap();
    server.register_callback(MessageKind::Command, |msg, ctx| {
        ctx.ack(msg, AckStatus::Completed, None)?;
        Ok(())
    });
    let client = Mailbox::new("client");
    client.register_receiver("server", server.clone());

    c.bench_function("send_and_wait", |b| {
        b.iter(|| {
            let cmd = CommandMessage::new("ping").with_wait_handle();
            client.send_and_wait(cmd, "server").unwrap()
        })
    });

    server.shutdown();
}

criterion_group!(
    benches,
    bench_send_and_drain,
    bench_match_registered,
    bench_round_trip
);
criterion_main!(benches);
