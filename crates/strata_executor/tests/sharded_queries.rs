mod common;

use common::*;
use strata_common::{PlanError, ShardError};
use strata_query::CompiledQuery;

/// Mounts live on the default connection; filecache is sharded and owns its
/// own partition so cross-partition joins exercise the shard path.
fn sharded_setup(shard_count: u32) -> (PartitionedDb, MemoryDb, Vec<MemoryDb>) {
    strata_common::observability::init_tracing();

    let main = MemoryDb::new();
    main.create_table_with_auto_id("mounts", "id", &["storage_id", "root_id", "user_id"]);

    let partitions =
        PartitionMap::new(vec![PartitionSpec::new("filecache", &["filecache"])]).unwrap();
    let mut db = PartitionedDb::new(partitions, main.connection());
    let backends = mount_filecache_shards(&mut db, shard_count);
    (db, main, backends)
}

fn seed_shard(backend: &MemoryDb, fileid: i64, storage: i64, path: &str) {
    backend.insert_row(
        "filecache",
        &[
            ("fileid", Datum::Int64(fileid)),
            ("storage", Datum::Int64(storage)),
            ("path", Datum::Text(path.into())),
            ("size", Datum::Int64(0)),
        ],
    );
}

#[test]
fn unscoped_shard_query_is_rejected() {
    let (db, _main, _backends) = sharded_setup(4);

    let mut qb = db.query();
    qb.select(&["f.path"]).from("filecache", Some("f"));

    let err = qb.execute_rows().unwrap_err();
    assert!(matches!(
        err,
        StrataError::Plan(PlanError::UnscopedShardQuery(_))
    ));
    assert!(!err.is_retryable());
}

#[test]
fn key_hint_routes_to_exactly_one_shard() {
    let (db, _main, backends) = sharded_setup(4);
    // Every shard gets a distinct marker row so the answer reveals which
    // shard served the query.
    for (i, b) in backends.iter().enumerate() {
        seed_shard(b, 100 + i as i64, 7, &format!("shard{}", i));
    }

    let mut qb = db.query();
    qb.select(&["f.fileid", "f.path"])
        .from("filecache", Some("f"))
        .hint_shard_key(7i64);
    let rows = qb.execute_rows().unwrap();

    // One shard's marker, not the union of all four.
    assert_eq!(rows.len(), 1);

    // The same key always lands on the same shard.
    let mut again = db.query();
    again
        .select(&["f.fileid", "f.path"])
        .from("filecache", Some("f"))
        .hint_shard_key(7i64);
    assert_eq!(again.execute_rows().unwrap(), rows);
}

#[test]
fn scan_all_shards_unions_and_dedups_by_primary_key() {
    let (db, _main, backends) = sharded_setup(3);
    seed_shard(&backends[0], 1, 10, "a");
    seed_shard(&backends[1], 2, 11, "b");
    // The same logical row present on two shards collapses to one.
    seed_shard(&backends[1], 3, 12, "dup");
    seed_shard(&backends[2], 3, 12, "dup");

    let mut qb = db.query();
    qb.select(&["f.fileid", "f.path"])
        .from("filecache", Some("f"))
        .scan_all_shards()
        .order_by("f.fileid", OrderDir::Asc);
    let rows = qb.execute_rows().unwrap();

    assert_eq!(rows.len(), 3);
    assert_eq!(rows.value(2, "path"), Datum::Text("dup".into()));
}

#[test]
fn broadcast_applies_window_after_the_union() {
    let (db, _main, backends) = sharded_setup(2);
    seed_shard(&backends[0], 1, 10, "a");
    seed_shard(&backends[0], 4, 13, "d");
    seed_shard(&backends[1], 2, 11, "b");
    seed_shard(&backends[1], 3, 12, "c");

    let mut qb = db.query();
    qb.select(&["f.fileid", "f.path"])
        .from("filecache", Some("f"))
        .scan_all_shards()
        .order_by("f.fileid", OrderDir::Desc)
        .set_max_results(2)
        .set_first_result(1);
    let rows = qb.execute_rows().unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows.value(0, "fileid"), Datum::Int64(3));
    assert_eq!(rows.value(1, "fileid"), Datum::Int64(2));
}

#[test]
fn broadcast_fails_when_any_shard_fails() {
    strata_common::observability::init_tracing();

    struct FailingConnection;
    impl Connection for FailingConnection {
        fn execute_rows(&self, _q: &CompiledQuery) -> Result<ResultSet, StrataError> {
            Err(strata_common::ExecError::Backend("shard 1 down".into()).into())
        }
        fn execute_statement(&self, _q: &CompiledQuery) -> Result<u64, StrataError> {
            Err(strata_common::ExecError::Backend("shard 1 down".into()).into())
        }
        fn last_insert_id(&self) -> Result<i64, StrataError> {
            Ok(0)
        }
    }

    let main = MemoryDb::new();
    let healthy = MemoryDb::new();
    healthy.create_table("filecache", &["fileid", "storage", "path", "size"]);
    seed_shard(&healthy, 1, 10, "a");

    let partitions =
        PartitionMap::new(vec![PartitionSpec::new("filecache", &["filecache"])]).unwrap();
    let mut db = PartitionedDb::new(partitions, main.connection());
    let factory = Arc::new(move |shard: ShardId| -> Result<Arc<dyn Connection>, ShardError> {
        if shard.0 == 1 {
            Ok(Arc::new(FailingConnection))
        } else {
            Ok(healthy.connection())
        }
    });
    db.mount_shards(ShardRuntime::new(
        ShardedSpec {
            table: "filecache".into(),
            shard_key_column: "storage".into(),
            primary_key_column: Some("fileid".into()),
            shard_count: 2,
        },
        ShardPool::new(2, factory),
        None,
    ));

    let mut qb = db.query();
    qb.select(&["f.path"])
        .from("filecache", Some("f"))
        .scan_all_shards();

    // No partial result: the healthy shard's rows never escape.
    let err = qb.execute_rows().unwrap_err();
    assert!(matches!(
        err,
        StrataError::Exec(strata_common::ExecError::Backend(_))
    ));
}

#[test]
fn sharded_insert_reserves_and_reports_surrogate_key() {
    let (db, _main, backends) = sharded_setup(4);

    let mut qb = db.query();
    qb.insert("filecache")
        .set_value("storage", expr::lit(42i64))
        .set_value("path", expr::lit("files/new.txt"))
        .set_value("size", expr::lit(5i64));
    assert_eq!(qb.execute_statement().unwrap(), 1);

    let id = qb.last_insert_id().unwrap();
    assert!(id > 0);

    // Exactly one shard received the row, carrying the injected key.
    let with_row: Vec<&MemoryDb> = backends
        .iter()
        .filter(|b| b.row_count("filecache") == 1)
        .collect();
    assert_eq!(with_row.len(), 1);
    let mut check = db.query();
    check
        .select(&["f.fileid"])
        .from("filecache", Some("f"))
        .hint_shard_key(42i64);
    let rows = check.execute_rows().unwrap();
    assert_eq!(rows.value(0, "fileid"), Datum::Int64(id));
}

#[test]
fn surrogate_keys_stay_unique_across_inserts() {
    let (db, _main, _backends) = sharded_setup(2);

    let mut seen = std::collections::HashSet::new();
    for storage in 0..25i64 {
        let mut qb = db.query();
        qb.insert("filecache")
            .set_value("storage", expr::lit(storage))
            .set_value("path", expr::lit("f"))
            .set_value("size", expr::lit(0i64));
        qb.execute_statement().unwrap();
        assert!(seen.insert(qb.last_insert_id().unwrap()));
    }
}

#[test]
fn explicit_primary_key_is_respected() {
    let (db, _main, _backends) = sharded_setup(2);

    let mut qb = db.query();
    qb.insert("filecache")
        .set_value("fileid", expr::lit(777i64))
        .set_value("storage", expr::lit(1i64))
        .set_value("path", expr::lit("f"))
        .set_value("size", expr::lit(0i64));
    qb.execute_statement().unwrap();

    let mut check = db.query();
    check
        .select(&["f.fileid"])
        .from("filecache", Some("f"))
        .hint_shard_key(1i64);
    let rows = check.execute_rows().unwrap();
    assert_eq!(rows.value(0, "fileid"), Datum::Int64(777));
}

#[test]
fn key_scoped_cross_partition_join() {
    let (db, main, backends) = sharded_setup(2);
    main.insert_row(
        "mounts",
        &[
            ("storage_id", Datum::Int64(9)),
            ("root_id", Datum::Int64(50)),
            ("user_id", Datum::Text("alice".into())),
        ],
    );
    // The joined row exists on every shard, so any routing answers it.
    for b in &backends {
        seed_shard(b, 50, 9, "file50");
    }

    let mut qb = db.query();
    qb.select(&["m.user_id", "f.path"])
        .from("mounts", Some("m"))
        .inner_join(
            "m",
            "filecache",
            "f",
            expr::eq(expr::col("m.root_id"), expr::col("f.fileid")),
        )
        .hint_shard_key(9i64);
    assert_eq!(qb.touched_partitions().unwrap(), 2);

    let rows = qb.execute_rows().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.value(0, "path"), Datum::Text("file50".into()));
}

#[test]
fn broadcast_join_windows_once_after_the_union() {
    let (db, main, backends) = sharded_setup(2);
    for root in [60i64, 61, 62, 63] {
        main.insert_row(
            "mounts",
            &[
                ("storage_id", Datum::Int64(root)),
                ("root_id", Datum::Int64(root)),
                ("user_id", Datum::Text(format!("u{}", root))),
            ],
        );
    }
    seed_shard(&backends[0], 60, 1, "f60");
    seed_shard(&backends[0], 61, 1, "f61");
    seed_shard(&backends[1], 62, 2, "f62");
    seed_shard(&backends[1], 63, 2, "f63");

    let mut qb = db.query();
    qb.select(&["f.fileid"])
        .from("mounts", Some("m"))
        .inner_join(
            "m",
            "filecache",
            "f",
            expr::eq(expr::col("m.root_id"), expr::col("f.fileid")),
        )
        .scan_all_shards()
        .order_by("f.fileid", OrderDir::Asc)
        .set_first_result(1);
    let rows = qb.execute_rows().unwrap();

    // The offset skips one row globally, not one per shard.
    let ids: Vec<Datum> = (0..rows.len()).map(|i| rows.value(i, "fileid")).collect();
    assert_eq!(
        ids,
        vec![Datum::Int64(61), Datum::Int64(62), Datum::Int64(63)]
    );
}

#[test]
fn broadcast_join_orders_by_a_column_outside_the_select_list() {
    let (db, main, backends) = sharded_setup(2);
    main.insert_row(
        "mounts",
        &[
            ("storage_id", Datum::Int64(1)),
            ("root_id", Datum::Int64(60)),
            ("user_id", Datum::Text("alice".into())),
        ],
    );
    main.insert_row(
        "mounts",
        &[
            ("storage_id", Datum::Int64(2)),
            ("root_id", Datum::Int64(61)),
            ("user_id", Datum::Text("bob".into())),
        ],
    );
    seed_shard(&backends[0], 60, 1, "apple");
    seed_shard(&backends[1], 61, 2, "zebra");

    let mut qb = db.query();
    qb.select(&["m.user_id"])
        .from("mounts", Some("m"))
        .inner_join(
            "m",
            "filecache",
            "f",
            expr::eq(expr::col("m.root_id"), expr::col("f.fileid")),
        )
        .scan_all_shards()
        .order_by("f.path", OrderDir::Desc);
    let rows = qb.execute_rows().unwrap();

    // The sort column never reaches the caller, only the ordering does.
    assert_eq!(rows.columns, vec!["user_id".to_string()]);
    assert_eq!(rows.value(0, "user_id"), Datum::Text("bob".into()));
    assert_eq!(rows.value(1, "user_id"), Datum::Text("alice".into()));
}

#[test]
fn undeclared_sharded_table_routes_as_its_own_domain() {
    strata_common::observability::init_tracing();

    let main = MemoryDb::new();
    main.create_table_with_auto_id("mounts", "id", &["storage_id", "root_id", "user_id"]);
    main.insert_row(
        "mounts",
        &[
            ("storage_id", Datum::Int64(9)),
            ("root_id", Datum::Int64(50)),
            ("user_id", Datum::Text("alice".into())),
        ],
    );

    // No partition spec mentions filecache; mounting the shards alone keeps
    // it out of the default domain.
    let mut db = PartitionedDb::new(PartitionMap::new(vec![]).unwrap(), main.connection());
    let backends = mount_filecache_shards(&mut db, 2);
    for b in &backends {
        seed_shard(b, 50, 9, "file50");
    }

    let mut qb = db.query();
    qb.select(&["m.user_id", "f.path"])
        .from("mounts", Some("m"))
        .inner_join(
            "m",
            "filecache",
            "f",
            expr::eq(expr::col("m.root_id"), expr::col("f.fileid")),
        )
        .hint_shard_key(9i64);
    assert_eq!(qb.touched_partitions().unwrap(), 2);

    let rows = qb.execute_rows().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.value(0, "path"), Datum::Text("file50".into()));
}

#[test]
fn broadcast_cross_partition_join_unions_per_shard_merges() {
    let (db, main, backends) = sharded_setup(2);
    main.insert_row(
        "mounts",
        &[
            ("storage_id", Datum::Int64(1)),
            ("root_id", Datum::Int64(60)),
            ("user_id", Datum::Text("alice".into())),
        ],
    );
    main.insert_row(
        "mounts",
        &[
            ("storage_id", Datum::Int64(2)),
            ("root_id", Datum::Int64(61)),
            ("user_id", Datum::Text("bob".into())),
        ],
    );
    seed_shard(&backends[0], 60, 1, "file60");
    seed_shard(&backends[1], 61, 2, "file61");

    let mut qb = db.query();
    qb.select(&["m.user_id", "f.fileid", "f.path"])
        .from("mounts", Some("m"))
        .inner_join(
            "m",
            "filecache",
            "f",
            expr::eq(expr::col("m.root_id"), expr::col("f.fileid")),
        )
        .scan_all_shards()
        .order_by("f.fileid", OrderDir::Asc);

    let rows = qb.execute_rows().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.value(0, "path"), Datum::Text("file60".into()));
    assert_eq!(rows.value(1, "path"), Datum::Text("file61".into()));
}
