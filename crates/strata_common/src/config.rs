use serde::{Deserialize, Serialize};

/// Top-level library configuration, typically embedded in the host
/// application's TOML config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrataConfig {
    /// Named table partitions. Tables not listed anywhere belong to the
    /// implicit default partition.
    #[serde(default)]
    pub partitions: Vec<PartitionConfig>,

    /// Sharded table declarations.
    #[serde(default)]
    pub shards: Vec<ShardConfig>,

    /// Overall deadline for one logical query in milliseconds
    /// (0 = no deadline).
    #[serde(default)]
    pub query_timeout_ms: u64,

    /// Surrogate keys reserved per counter-store round trip.
    #[serde(default = "default_key_batch_size")]
    pub key_batch_size: u64,
}

fn default_key_batch_size() -> u64 {
    10
}

/// One named partition and the tables assigned to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub name: String,
    pub tables: Vec<String>,
}

/// One sharded table set: a logical table whose rows are distributed across
/// `shard_count` schema-identical databases by `shard_key_column`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardConfig {
    pub table: String,
    pub shard_key_column: String,
    /// Column receiving centrally allocated surrogate keys on insert.
    /// None when the table's primary key is supplied by the caller.
    #[serde(default)]
    pub primary_key_column: Option<String>,
    pub shard_count: u32,
}

impl StrataConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}
