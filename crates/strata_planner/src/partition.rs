//! Partition specifications: named groups of tables sharing one physical
//! connection, plus the registry of sharded tables.

use std::collections::{BTreeSet, HashMap};

use strata_common::{PartitionId, PlanError, StrataConfig};

/// A named partition and the tables assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    pub name: String,
    pub tables: BTreeSet<String>,
}

impl PartitionSpec {
    pub fn new(name: &str, tables: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            tables: tables.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// A sharded table declaration: the shard key column that routes rows, the
/// optional surrogate primary key column, and the shard count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardedSpec {
    pub table: String,
    pub shard_key_column: String,
    pub primary_key_column: Option<String>,
    pub shard_count: u32,
}

/// The active set of partition specifications and sharded tables. A table
/// name appears in at most one partition; unlisted tables belong to the
/// implicit default partition.
#[derive(Debug, Clone, Default)]
pub struct PartitionMap {
    specs: Vec<PartitionSpec>,
    sharded: HashMap<String, ShardedSpec>,
}

impl PartitionMap {
    pub fn new(specs: Vec<PartitionSpec>) -> Result<Self, PlanError> {
        let mut owner: HashMap<&str, &str> = HashMap::new();
        for spec in &specs {
            for table in &spec.tables {
                if let Some(first) = owner.insert(table.as_str(), spec.name.as_str()) {
                    return Err(PlanError::TableInMultiplePartitions {
                        table: table.clone(),
                        first: first.to_string(),
                        second: spec.name.clone(),
                    });
                }
            }
        }
        Ok(Self {
            specs,
            sharded: HashMap::new(),
        })
    }

    pub fn from_config(config: &StrataConfig) -> Result<Self, PlanError> {
        let specs = config
            .partitions
            .iter()
            .map(|p| PartitionSpec {
                name: p.name.clone(),
                tables: p.tables.iter().cloned().collect(),
            })
            .collect();
        let mut map = Self::new(specs)?;
        for s in &config.shards {
            map.register_sharded(ShardedSpec {
                table: s.table.clone(),
                shard_key_column: s.shard_key_column.clone(),
                primary_key_column: s.primary_key_column.clone(),
                shard_count: s.shard_count,
            });
        }
        Ok(map)
    }

    /// A sharded table is its own routing domain: unless a partition spec
    /// already claims it, it gets an implicit partition named after itself,
    /// so joins against default-partition tables never pass through to the
    /// shard connection as a whole.
    pub fn register_sharded(&mut self, spec: ShardedSpec) {
        if self.partition_of(&spec.table) == PartitionId::Default {
            self.specs
                .push(PartitionSpec::new(&spec.table, &[&spec.table]));
        }
        self.sharded.insert(spec.table.clone(), spec);
    }

    /// Partition membership by table name lookup.
    pub fn partition_of(&self, table: &str) -> PartitionId {
        for (i, spec) in self.specs.iter().enumerate() {
            if spec.tables.contains(table) {
                return PartitionId::Named(i);
            }
        }
        PartitionId::Default
    }

    pub fn name_of(&self, id: PartitionId) -> &str {
        match id {
            PartitionId::Default => "default",
            PartitionId::Named(i) => self
                .specs
                .get(i)
                .map(|s| s.name.as_str())
                .unwrap_or("default"),
        }
    }

    pub fn sharded_spec(&self, table: &str) -> Option<&ShardedSpec> {
        self.sharded.get(table)
    }

    pub fn specs(&self) -> &[PartitionSpec] {
        &self.specs
    }
}
