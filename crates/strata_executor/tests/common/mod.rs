#![allow(dead_code, unused_imports)]

pub use std::sync::Arc;

pub use strata_common::{Datum, ResultSet, ShardId, StrataError};
pub use strata_executor::{PartitionedDb, PartitionedQueryBuilder, ShardRuntime};
pub use strata_memdb::MemoryDb;
pub use strata_planner::{PartitionMap, PartitionSpec, ShardedSpec};
pub use strata_query::{expr, Connection, OrderDir};
pub use strata_shard::{KeyAllocator, MemoryCounterStore, ShardPool};

/// A default database plus "filecache" and "properties" partitions, seeded
/// with the mount and filecache fixtures used throughout these tests.
pub fn setup() -> (PartitionedDb, MemoryDb, MemoryDb) {
    strata_common::observability::init_tracing();

    let main = MemoryDb::new();
    main.create_table_with_auto_id("mounts", "id", &["storage_id", "root_id", "user_id"]);
    main.insert_row(
        "mounts",
        &[
            ("storage_id", Datum::Int64(1)),
            ("root_id", Datum::Int64(10)),
            ("user_id", Datum::Text("alice".into())),
        ],
    );
    main.insert_row(
        "mounts",
        &[
            ("storage_id", Datum::Int64(2)),
            ("root_id", Datum::Int64(20)),
            ("user_id", Datum::Text("bob".into())),
        ],
    );
    main.insert_row(
        "mounts",
        &[
            ("storage_id", Datum::Int64(3)),
            ("root_id", Datum::Int64(999)),
            ("user_id", Datum::Text("carol".into())),
        ],
    );

    let files = MemoryDb::new();
    files.create_table_with_auto_id("filecache", "fileid", &["storage", "path", "size"]);
    files.create_table("filecache_extended", &["fileid", "upload_time"]);
    seed_file(&files, 10, 1, "file1", 100);
    seed_file(&files, 20, 2, "file2", 200);
    seed_file(&files, 30, 2, "file3", 300);
    files.insert_row(
        "filecache_extended",
        &[("fileid", Datum::Int64(10)), ("upload_time", Datum::Int64(1111))],
    );

    let props = MemoryDb::new();
    props.create_table("properties", &["fileid", "propertyname"]);
    props.insert_row(
        "properties",
        &[
            ("fileid", Datum::Int64(10)),
            ("propertyname", Datum::Text("tag".into())),
        ],
    );

    let partitions = PartitionMap::new(vec![
        PartitionSpec::new("filecache", &["filecache", "filecache_extended"]),
        PartitionSpec::new("properties", &["properties"]),
    ])
    .unwrap();

    let mut db = PartitionedDb::new(partitions, main.connection());
    db.mount_partition("filecache", files.connection());
    db.mount_partition("properties", props.connection());
    (db, main, files)
}

pub fn seed_file(files: &MemoryDb, fileid: i64, storage: i64, path: &str, size: i64) {
    files.insert_row(
        "filecache",
        &[
            ("fileid", Datum::Int64(fileid)),
            ("storage", Datum::Int64(storage)),
            ("path", Datum::Text(path.into())),
            ("size", Datum::Int64(size)),
        ],
    );
}

/// N shard databases with a shared "filecache" schema, mounted on `db` with
/// a surrogate key allocator.
pub fn mount_filecache_shards(db: &mut PartitionedDb, shard_count: u32) -> Vec<MemoryDb> {
    let backends: Vec<MemoryDb> = (0..shard_count)
        .map(|_| {
            let m = MemoryDb::new();
            m.create_table("filecache", &["fileid", "storage", "path", "size"]);
            m
        })
        .collect();
    let for_factory = backends.clone();
    let factory = Arc::new(move |shard: ShardId| -> Result<Arc<dyn Connection>, strata_common::ShardError> {
        Ok(for_factory[shard.0 as usize].connection())
    });
    let allocator = Arc::new(KeyAllocator::new(Arc::new(MemoryCounterStore::new()), 10));
    db.mount_shards(ShardRuntime::new(
        ShardedSpec {
            table: "filecache".into(),
            shard_key_column: "storage".into(),
            primary_key_column: Some("fileid".into()),
            shard_count,
        },
        ShardPool::new(shard_count, factory),
        Some(allocator),
    ));
    backends
}

pub fn paths(rs: &ResultSet) -> Vec<String> {
    (0..rs.len())
        .map(|i| match rs.value(i, "path") {
            Datum::Text(s) => s,
            other => format!("{:?}", other),
        })
        .collect()
}
