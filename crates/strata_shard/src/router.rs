//! Shard routing: maps a shard-key value to a shard index through a pure,
//! stable selection function. The function is injected because the
//! bucketing scheme is deployment-specific; the default hashes the key's
//! type-tagged binary encoding with xxHash3-64 modulo the shard count.

use strata_common::{Datum, ShardId};
use xxhash_rust::xxh3::xxh3_64;

type SelectFn = dyn Fn(&Datum, u32) -> ShardId + Send + Sync;

pub struct ShardRouter {
    shard_count: u32,
    select: Box<SelectFn>,
}

impl ShardRouter {
    /// Router with an injected pure selection function.
    pub fn new(shard_count: u32, select: impl Fn(&Datum, u32) -> ShardId + Send + Sync + 'static) -> Self {
        assert!(shard_count > 0, "shard count must be positive");
        Self {
            shard_count,
            select: Box::new(select),
        }
    }

    /// Router using the default xxHash3 bucketing.
    pub fn with_default_hash(shard_count: u32) -> Self {
        Self::new(shard_count, |key, count| {
            ShardId((xxh3_64(&key.key_bytes()) % count as u64) as u32)
        })
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// Shard for a concrete shard-key value. Deterministic: the same key
    /// always maps to the same shard for a fixed shard count.
    pub fn shard_for_key(&self, key: &Datum) -> ShardId {
        (self.select)(key, self.shard_count)
    }

    pub fn all_shards(&self) -> Vec<ShardId> {
        (0..self.shard_count).map(ShardId).collect()
    }
}

impl std::fmt::Debug for ShardRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardRouter")
            .field("shard_count", &self.shard_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_is_deterministic() {
        let router = ShardRouter::with_default_hash(8);
        let key = Datum::Int64(42);
        assert_eq!(router.shard_for_key(&key), router.shard_for_key(&key));
    }

    #[test]
    fn routing_stays_in_range() {
        let router = ShardRouter::with_default_hash(4);
        for i in 0..1000i64 {
            assert!(router.shard_for_key(&Datum::Int64(i)).0 < 4);
        }
    }

    #[test]
    fn distribution_is_roughly_uniform() {
        let router = ShardRouter::with_default_hash(4);
        let mut counts = [0u32; 4];
        for i in 0..10_000i64 {
            counts[router.shard_for_key(&Datum::Int64(i)).0 as usize] += 1;
        }
        for (i, c) in counts.iter().enumerate() {
            assert!(
                *c > 1500 && *c < 3500,
                "shard {} has {} keys, expected ~2500",
                i,
                c
            );
        }
    }

    #[test]
    fn injected_function_wins() {
        let router = ShardRouter::new(4, |_key, _count| ShardId(3));
        assert_eq!(router.shard_for_key(&Datum::Int64(7)), ShardId(3));
    }

    #[test]
    fn text_and_int_keys_route_independently() {
        let router = ShardRouter::with_default_hash(16);
        // Same rendered value, different types: must not be forced to collide.
        let a = router.shard_for_key(&Datum::Int64(1));
        let b = router.shard_for_key(&Datum::Text("1".into()));
        // Not a strict inequality guarantee, just exercise both paths.
        assert!(a.0 < 16 && b.0 < 16);
    }
}
