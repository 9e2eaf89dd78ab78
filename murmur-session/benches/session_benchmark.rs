use std::hint::black_box;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use murmur_proto::{decode_inbound, InboundFrame, OutboundFrame, RoomId};
use murmur_session::backoff::compute_backoff;
use murmur_session::dedup::ProcessedMessageWindow;
use murmur_session::dispatcher::{Dispatcher, OutboundIntent, TempIdGenerator};
use murmur_session::inbound::InboundQueue;
use tokio::time::Instant;

const MESSAGE_FRAME: &str = r#"{"type":"message","id":"6f1c2a","temp_id":"temp-1700000000000-7","content":"hello there","message_type":"text","username":"alice","timestamp":"2024-01-01T00:00:00.000Z","room_id":"general","room_name":"General","reply_to":null,"read_by":["alice"]}"#;

fn bench_dedup_insert_10k(c: &mut Criterion) {
    let keys: Vec<String> = (0..10_000).map(|i| format!("message:{i}")).collect();

    c.bench_function("dedup_insert_10k_cap_1000", |b| {
        b.iter(|| {
            let mut window = ProcessedMessageWindow::new(1000);
            for key in &keys {
                black_box(window.insert(key.clone()));
            }
        })
    });
}

fn bench_dedup_hit(c: &mut Criterion) {
    let mut window = ProcessedMessageWindow::new(1000);
    for i in 0..1000 {
        window.insert(format!("message:{i}"));
    }

    c.bench_function("dedup_contains_hit", |b| {
        b.iter(|| black_box(window.contains(black_box("message:500"))))
    });
}

fn bench_decode_message(c: &mut Criterion) {
    c.bench_function("decode_inbound_message", |b| {
        b.iter(|| black_box(decode_inbound(black_box(MESSAGE_FRAME)).unwrap()))
    });
}

fn bench_decode_pong(c: &mut Criterion) {
    c.bench_function("decode_inbound_pong", |b| {
        b.iter(|| black_box(decode_inbound(black_box("pong")).unwrap()))
    });
}

fn bench_encode_room_switch(c: &mut Criterion) {
    let frame = OutboundFrame::RoomSwitch {
        room_id: RoomId::new("general").unwrap(),
    };

    c.bench_function("encode_room_switch", |b| {
        b.iter(|| black_box(frame.encode().unwrap()))
    });
}

fn bench_inbound_drain_1000_with_duplicates(c: &mut Criterion) {
    let frames: Vec<InboundFrame> = (0..1000)
        .map(|i| InboundFrame::MessageDeleted {
            message_id: format!("m{}", i % 500),
        })
        .collect();

    c.bench_function("inbound_drain_1000_half_duplicates", |b| {
        b.iter(|| {
            let mut queue = InboundQueue::new(1000);
            for frame in &frames {
                queue.push(frame.clone());
            }
            black_box(queue.drain());
        })
    });
}

fn bench_prepare_message(c: &mut Criterion) {
    let room = RoomId::new("general").unwrap();
    let temp_ids = TempIdGenerator::new();
    let mut dispatcher = Dispatcher::new(Duration::from_millis(300));

    c.bench_function("dispatcher_prepare_message", |b| {
        b.iter(|| {
            let intent = OutboundIntent::Message {
                temp_id: temp_ids.next_id(),
                content: "hello".to_string(),
                message_type: Default::default(),
                reply_to: None,
            };
            black_box(dispatcher.prepare(intent, &room, Instant::now()))
        })
    });
}

fn bench_backoff_schedule(c: &mut Criterion) {
    let base = Duration::from_secs(1);
    let cap = Duration::from_secs(30);

    c.bench_function("backoff_attempts_1_to_64", |b| {
        b.iter(|| {
            for attempt in 1..=64 {
                black_box(compute_backoff(black_box(attempt), base, cap));
            }
        })
    });
}

criterion_group!(
    benches,
    bench_dedup_insert_10k,
    bench_dedup_hit,
    bench_decode_message,
    bench_decode_pong,
    bench_encode_room_switch,
    bench_inbound_drain_1000_with_duplicates,
    bench_prepare_message,
    bench_backoff_schedule,
);
criterion_main!(benches);
