//! End-to-end engine scenarios
//!
//! These tests exercise the engine surface the way an application would:
//! inserting records, maintaining secondary indexes through encoding
//! transitions, recycling freed record numbers and bulk-loading indexes
//! through the deferred writer.

use segstore::{
    Database, DeferredConfig, FileDefinition, FileSpec, MemoryStore, RecordSet, SegmentConfig,
    SegstoreError,
};

const SEGMENT_SLOTS: u32 = 128;

fn game_spec() -> FileSpec {
    FileSpec::new(vec![FileDefinition::new(
        "games",
        "game",
        &["site", "event"],
    )])
}

fn open_db() -> Database<MemoryStore> {
    Database::open(
        MemoryStore::new(),
        &game_spec(),
        SegmentConfig::new(SEGMENT_SLOTS).unwrap(),
    )
    .unwrap()
}

#[test]
fn test_insert_index_and_walk_thirty_records() {
    let mut db = open_db();
    for record in 0..30u64 {
        let value = format!("game {}", record);
        db.insert_at("games", record, value.as_bytes()).unwrap();
        db.index_add("games", "site", b"lyon", record).unwrap();
    }

    assert_eq!(db.record_count("games").unwrap(), 30);
    assert_eq!(db.index_count("games", "site", b"lyon").unwrap(), 30);

    let found = db.index_lookup("games", "site", b"lyon").unwrap();
    let config = SegmentConfig::new(SEGMENT_SLOTS).unwrap();
    let records: Vec<u64> = found.iter_records(&config).collect();
    assert_eq!(records, (0..30).collect::<Vec<u64>>());

    let mut cursor = db.secondary_cursor("games", "site").unwrap();
    let mut walked = Vec::new();
    let mut row = cursor.first().unwrap();
    while let Some((_, record)) = row {
        walked.push(record);
        row = cursor.next().unwrap();
    }
    assert_eq!(walked, records);
}

#[test]
fn test_singleton_grows_into_shared_row() {
    let mut db = open_db();
    db.insert_at("games", 7, b"first").unwrap();
    db.index_add("games", "site", b"oslo", 7).unwrap();

    // One member: resolvable without any blob row behind it.
    assert_eq!(
        db.index_lookup_unique("games", "site", b"oslo").unwrap(),
        Some(7)
    );

    db.insert_at("games", 9, b"second").unwrap();
    db.index_add("games", "site", b"oslo", 9).unwrap();

    let found = db.index_lookup("games", "site", b"oslo").unwrap();
    let config = SegmentConfig::new(SEGMENT_SLOTS).unwrap();
    assert_eq!(found.iter_records(&config).collect::<Vec<_>>(), vec![7, 9]);
    assert!(matches!(
        db.index_lookup_unique("games", "site", b"oslo"),
        Err(SegstoreError::UniquenessViolation { .. })
    ));

    // Shrinking back to one member restores unique resolution.
    db.index_remove("games", "site", b"oslo", 7).unwrap();
    assert_eq!(
        db.index_lookup_unique("games", "site", b"oslo").unwrap(),
        Some(9)
    );
}

#[test]
fn test_freed_record_numbers_are_recycled() {
    let mut db = open_db();
    for record in 0..300u64 {
        db.insert_at("games", record, b"row").unwrap();
    }

    // Freed numbers below the top segment come back lowest first.
    db.delete("games", 10).unwrap();
    db.delete("games", 200).unwrap();
    assert_eq!(db.insert("games", b"reused").unwrap(), 10);
    assert_eq!(db.insert("games", b"reused").unwrap(), 200);

    // Holes in the top segment are never reused, allocation stays append.
    db.delete("games", 290).unwrap();
    assert_eq!(db.insert("games", b"appended").unwrap(), 300);
}

#[test]
fn test_delete_unindexes_nothing_by_itself() {
    let mut db = open_db();
    db.insert_at("games", 0, b"row").unwrap();
    db.index_add("games", "site", b"kyiv", 0).unwrap();

    db.delete("games", 0).unwrap();
    assert_eq!(db.get("games", 0).unwrap(), None);

    // Index maintenance is the caller's responsibility.
    assert_eq!(db.index_count("games", "site", b"kyiv").unwrap(), 1);
    db.index_remove("games", "site", b"kyiv", 0).unwrap();
    assert_eq!(db.index_count("games", "site", b"kyiv").unwrap(), 0);
}

#[test]
fn test_replace_all_rewrites_value_membership() {
    let mut db = open_db();
    for record in [1u64, 2, 200] {
        db.insert_at("games", record, b"row").unwrap();
        db.index_add("games", "event", b"open", record).unwrap();
    }

    let config = SegmentConfig::new(SEGMENT_SLOTS).unwrap();
    let mut replacement = RecordSet::new();
    replacement.insert(5, &config);
    replacement.insert(130, &config);
    db.index_replace_all("games", "event", b"open", &replacement)
        .unwrap();

    let found = db.index_lookup("games", "event", b"open").unwrap();
    assert_eq!(found.iter_records(&config).collect::<Vec<_>>(), vec![5, 130]);
}

#[test]
fn test_deferred_load_matches_incremental() {
    let mut deferred = Database::open(
        MemoryStore::new(),
        &game_spec(),
        SegmentConfig::new(SEGMENT_SLOTS).unwrap(),
    )
    .unwrap()
    .with_deferred_config(DeferredConfig { sort_scale: 2 });

    let mut incremental = open_db();

    for record in 0..300u64 {
        let site: &[u8] = if record % 2 == 0 { b"even" } else { b"odd" };
        deferred.insert_at("games", record, b"row").unwrap();
        incremental.insert_at("games", record, b"row").unwrap();
        incremental.index_add("games", "site", site, record).unwrap();
    }

    let mut writer = deferred.deferred_writer("games").unwrap();
    for record in 0..300u64 {
        let site: &[u8] = if record % 2 == 0 { b"even" } else { b"odd" };
        writer.index("site", site, record).unwrap();
    }
    writer.finalize().unwrap();

    let config = SegmentConfig::new(SEGMENT_SLOTS).unwrap();
    for site in [b"even".as_slice(), b"odd".as_slice()] {
        let a = deferred.index_lookup("games", "site", site).unwrap();
        let b = incremental.index_lookup("games", "site", site).unwrap();
        assert_eq!(
            a.iter_records(&config).collect::<Vec<_>>(),
            b.iter_records(&config).collect::<Vec<_>>()
        );
        assert_eq!(a.len(), 150);
    }
    assert_eq!(deferred.store().temp_table_count(), 0);
}

#[test]
fn test_transaction_rollback_restores_rows_and_indexes() {
    let mut db = open_db();
    db.insert_at("games", 0, b"kept").unwrap();
    db.index_add("games", "site", b"a", 0).unwrap();

    db.begin().unwrap();
    db.insert_at("games", 1, b"doomed").unwrap();
    db.index_add("games", "site", b"a", 1).unwrap();
    db.replace("games", 0, b"mutated").unwrap();
    db.rollback().unwrap();

    assert_eq!(db.get("games", 0).unwrap(), Some(b"kept".to_vec()));
    assert_eq!(db.get("games", 1).unwrap(), None);
    assert_eq!(db.index_count("games", "site", b"a").unwrap(), 1);

    db.begin().unwrap();
    db.insert_at("games", 1, b"committed").unwrap();
    db.commit().unwrap();
    assert_eq!(db.get("games", 1).unwrap(), Some(b"committed".to_vec()));
}

#[test]
fn test_allocation_survives_rolled_back_delete() {
    let mut db = open_db();
    db.insert_at("games", 5, b"row").unwrap();
    db.insert_at("games", 400, b"row").unwrap();

    // The delete registers segment 1 as reusable; the rollback then
    // removes both the registration and segment 1's bitmap row.
    db.begin().unwrap();
    db.insert_at("games", 150, b"doomed").unwrap();
    db.delete("games", 150).unwrap();
    db.rollback().unwrap();

    assert_eq!(db.get("games", 150).unwrap(), None);
    assert_eq!(db.insert("games", b"next").unwrap(), 401);

    // Allocation keeps working across a second rollback of the same kind.
    db.begin().unwrap();
    db.insert_at("games", 150, b"doomed").unwrap();
    db.delete("games", 150).unwrap();
    db.rollback().unwrap();
    assert_eq!(db.insert("games", b"next").unwrap(), 402);
}

#[test]
fn test_reopen_rejects_segment_size_change() {
    let db = open_db();
    let store = db.into_store();

    let err = Database::open(store, &game_spec(), SegmentConfig::new(256).unwrap());
    assert!(matches!(
        err,
        Err(SegstoreError::SegmentSizeMismatch {
            recorded: 128,
            requested: 256,
        })
    ));
}

#[test]
fn test_unknown_file_and_field_errors() {
    let db = open_db();
    assert!(matches!(
        db.index_lookup("players", "site", b"a"),
        Err(SegstoreError::UnknownFile(_))
    ));
    assert!(matches!(
        db.index_lookup("games", "country", b"a"),
        Err(SegstoreError::UnknownField { .. })
    ));
}
