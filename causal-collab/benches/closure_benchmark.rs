use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use causal_collab::broadcast::SubscriberHub;
use causal_collab::protocol::{parse_frontier, Vertex};
use causal_collab::storage::{GraphStore, StoreConfig};
use std::hint::black_box;
use tempfile::TempDir;

fn open_store() -> (TempDir, GraphStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = GraphStore::open(StoreConfig::for_testing(dir.path().join("bench.db"))).unwrap();
    (dir, store)
}

/// A linear chain `v0 <- v1 <- ... <- v{n-1}`.
fn chain(store: &mut GraphStore, n: usize) {
    store.append(&Vertex::root("v0", "x")).unwrap();
    for i in 1..n {
        store
            .append(&Vertex::new(format!("v{i}"), "x", [format!("v{}", i - 1)]))
            .unwrap();
    }
}

/// `branches` chains of length `depth` forking off one root.
fn fan(store: &mut GraphStore, branches: usize, depth: usize) {
    store.append(&Vertex::root("root", "")).unwrap();
    for b in 0..branches {
        let mut parent = "root".to_string();
        for d in 0..depth {
            let id = format!("b{b}-{d}");
            store.append(&Vertex::new(id.clone(), "", [parent])).unwrap();
            parent = id;
        }
    }
}

fn bench_append(c: &mut Criterion) {
    let (_dir, mut store) = open_store();
    let mut i = 0u64;

    c.bench_function("append_root_vertex", |b| {
        b.iter(|| {
            i += 1;
            black_box(store.append(&Vertex::root(format!("v{i}"), "payload")).unwrap());
        })
    });
}

fn bench_append_with_parents(c: &mut Criterion) {
    let (_dir, mut store) = open_store();
    for p in 0..8 {
        store.append(&Vertex::root(format!("p{p}"), "")).unwrap();
    }
    let parents: Vec<String> = (0..8).map(|p| format!("p{p}")).collect();
    let mut i = 0u64;

    c.bench_function("append_merge_8_parents", |b| {
        b.iter(|| {
            i += 1;
            let vertex = Vertex::new(format!("m{i}"), "", parents.iter().cloned());
            black_box(store.append(&vertex).unwrap());
        })
    });
}

fn bench_closure_chain_tip(c: &mut Criterion) {
    let (_dir, mut store) = open_store();
    chain(&mut store, 1000);
    let frontier = vec!["v999".to_string()];

    // Client fully caught up: everything is in the closure
    c.bench_function("closure_complement_chain_1000_tip", |b| {
        b.iter(|| black_box(store.closure_complement(black_box(&frontier)).unwrap()))
    });
}

fn bench_closure_chain_midpoint(c: &mut Criterion) {
    let (_dir, mut store) = open_store();
    chain(&mut store, 1000);
    let frontier = vec!["v499".to_string()];

    c.bench_function("closure_complement_chain_1000_mid", |b| {
        b.iter(|| black_box(store.closure_complement(black_box(&frontier)).unwrap()))
    });
}

fn bench_closure_fan(c: &mut Criterion) {
    let (_dir, mut store) = open_store();
    fan(&mut store, 16, 32);
    let frontier: Vec<String> = (0..8).map(|b| format!("b{b}-31")).collect();

    c.bench_function("closure_complement_fan_16x32_half", |b| {
        b.iter(|| black_box(store.closure_complement(black_box(&frontier)).unwrap()))
    });
}

fn bench_closure_fresh_client(c: &mut Criterion) {
    let (_dir, mut store) = open_store();
    chain(&mut store, 1000);
    let frontier = parse_frontier(Some("unknown")).unwrap();

    c.bench_function("closure_complement_chain_1000_unknown", |b| {
        b.iter(|| black_box(store.closure_complement(black_box(&frontier)).unwrap()))
    });
}

fn bench_notify(c: &mut Criterion) {
    let vertex = Vertex::new("v", "payload", ["a", "b"]);

    c.bench_function("notify_100_subscribers", |b| {
        b.iter_batched(
            || {
                let mut hub = SubscriberHub::new();
                for _ in 0..100 {
                    hub.subscribe(Box::new(|_: &Vertex| true));
                }
                hub
            },
            |mut hub| black_box(hub.notify(black_box(&vertex))),
            BatchSize::SmallInput,
        )
    });
}

fn bench_vertex_json(c: &mut Criterion) {
    let vertex = Vertex::new("v42", "some payload text", ["v40", "v41"]);
    let encoded = vertex.to_json().unwrap();

    c.bench_function("vertex_json_encode", |b| {
        b.iter(|| black_box(black_box(&vertex).to_json().unwrap()))
    });
    c.bench_function("vertex_json_decode", |b| {
        b.iter(|| black_box(Vertex::from_json(black_box(encoded.as_bytes())).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_append,
    bench_append_with_parents,
    bench_closure_chain_tip,
    bench_closure_chain_midpoint,
    bench_closure_fan,
    bench_closure_fresh_client,
    bench_notify,
    bench_vertex_json,
);
criterion_main!(benches);
