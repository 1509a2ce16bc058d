use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use segstore::{Database, DeferredConfig, FileDefinition, FileSpec, MemoryStore, SegmentConfig};

fn game_spec() -> FileSpec {
    FileSpec::new(vec![FileDefinition::new("games", "game", &["site"])])
}

fn build_db(record_count: u64) -> Database<MemoryStore> {
    let mut db = Database::open(
        MemoryStore::new(),
        &game_spec(),
        SegmentConfig::new(4096).unwrap(),
    )
    .unwrap();
    for record in 0..record_count {
        let value = format!("game record {}", record);
        db.insert_at("games", record, value.as_bytes()).unwrap();
        let site = format!("site-{}", record % 97);
        db.index_add("games", "site", site.as_bytes(), record)
            .unwrap();
    }
    db
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    for count in [1_000u64, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| black_box(build_db(count)));
        });
    }
    group.finish();
}

fn bench_index_lookup(c: &mut Criterion) {
    let db = build_db(10_000);
    c.bench_function("index_lookup", |b| {
        b.iter(|| {
            let found = db
                .index_lookup("games", "site", black_box(b"site-13"))
                .unwrap();
            black_box(found.len())
        });
    });
}

fn bench_secondary_walk(c: &mut Criterion) {
    let db = build_db(10_000);
    c.bench_function("secondary_walk", |b| {
        b.iter(|| {
            let mut cursor = db.secondary_cursor("games", "site").unwrap();
            let mut walked = 0u64;
            let mut row = cursor.first().unwrap();
            while black_box(&row).is_some() {
                walked += 1;
                row = cursor.next().unwrap();
            }
            walked
        });
    });
}

fn bench_deferred_load(c: &mut Criterion) {
    c.bench_function("deferred_load_10k", |b| {
        b.iter(|| {
            let mut db = Database::open(
                MemoryStore::new(),
                &game_spec(),
                SegmentConfig::new(4096).unwrap(),
            )
            .unwrap()
            .with_deferred_config(DeferredConfig { sort_scale: 4 });
            for record in 0..10_000u64 {
                db.insert_at("games", record, b"row").unwrap();
            }
            let mut writer = db.deferred_writer("games").unwrap();
            for record in 0..10_000u64 {
                let site = format!("site-{}", record % 97);
                writer.index("site", site.as_bytes(), record).unwrap();
            }
            writer.finalize().unwrap();
            black_box(db)
        });
    });
}

criterion_group!(
    benches,
    bench_insert,
    bench_index_lookup,
    bench_secondary_walk,
    bench_deferred_load
);
criterion_main!(benches);
