use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use ovio_canvas::{ComponentKind, PlacedComponent, Position, ProjectId};
use ovio_sync::broadcast::BroadcastGroup;
use ovio_sync::coordinator::{LocalEdit, SyncCoordinator, DEFAULT_QUIET_PERIOD};
use ovio_sync::persistence::LoadOutcome;
use ovio_sync::protocol::{ClientMessage, Collaborator, ServerMessage};
use std::hint::black_box;
use std::sync::Arc;
use uuid::Uuid;

fn canvas(n: usize) -> Vec<PlacedComponent> {
    (0..n)
        .map(|i| {
            let kind = ComponentKind::ALL[i % ComponentKind::ALL.len()];
            PlacedComponent::new(format!("{}-{i}", kind.as_str()), kind, Position::new(i as f32, 0.0))
        })
        .collect()
}

fn bench_state_update_codec(c: &mut Criterion) {
    let msg = ClientMessage::state_update(ProjectId::from("7"), canvas(100));
    let encoded = msg.encode().unwrap();
    let mut group = c.benchmark_group("State Update Codec");
    group.throughput(Throughput::Bytes(encoded.len() as u64));

    group.bench_function("encode_100", |b| b.iter(|| black_box(msg.encode().unwrap())));
    group.bench_function("decode_100", |b| {
        b.iter(|| black_box(ServerMessage::decode(black_box(&encoded)).unwrap()))
    });
    group.finish();
}

fn bench_room_fan_out(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let group = BroadcastGroup::new(2048);
    let mut receivers = Vec::new();
    for i in 0..50 {
        let rx = rt.block_on(group.join(Uuid::new_v4(), Collaborator::new(i.to_string(), format!("user{i}"))));
        receivers.push(rx);
    }
    let text = Arc::new(
        ServerMessage::StateUpdate {
            project_id: ProjectId::from("7"),
            state: ovio_sync::protocol::CanvasState { canvas: canvas(20) },
        }
        .encode()
        .unwrap(),
    );

    c.bench_function("fan_out_50_members", |b| {
        b.iter(|| {
            black_box(group.broadcast_encoded(None, text.clone()));
            for rx in receivers.iter_mut() {
                let _ = rx.try_recv();
            }
        })
    });
}

fn bench_coordinator_edits(c: &mut Criterion) {
    let mut coordinator = SyncCoordinator::new(ProjectId::from("7"), DEFAULT_QUIET_PERIOD);
    let ticket = coordinator.begin_load();
    coordinator.on_load_complete(ticket, Ok(LoadOutcome::Loaded(canvas(200))));
    let target = coordinator.document().components()[100].unique_id.clone();
    let now = tokio::time::Instant::now();
    let mut x = 0.0f32;

    c.bench_function("coordinator_move_rearm", |b| {
        b.iter(|| {
            x += 1.0;
            let edit = LocalEdit::MoveComponent { id: target.clone(), position: Position::new(x, x) };
            black_box(coordinator.apply_local(edit, now));
        })
    });
}

criterion_group!(benches, bench_state_update_codec, bench_room_fan_out, bench_coordinator_edits);
criterion_main!(benches);
