//! Simulated entities and the pool that owns them.

use rand::Rng;
use serde::Serialize;

/// A simulated entity.
///
/// The identifier and partition key are fixed at creation. The score only
/// ever increases and the last-update timestamp never moves backward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    user_id: String,
    last_update: i64,
    score: i32,
    partition_key: String,
}

/// The externally visible state of an [`Entity`], as encoded on the wire.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Update<'a> {
    /// The entity identifier
    pub user_id: &'a str,
    /// Milliseconds since the epoch of the most recent update
    pub last_update: i64,
    /// The entity's score
    pub score: i32,
}

impl Entity {
    /// Create the entity at `index` in a pool, routed by `partition_key`.
    #[must_use]
    pub fn new(index: usize, partition_key: String) -> Self {
        Self {
            user_id: format!("entity-{index}"),
            last_update: 0,
            score: 0,
            partition_key,
        }
    }

    /// The entity identifier.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Milliseconds since the epoch of the most recent update.
    #[must_use]
    pub fn last_update(&self) -> i64 {
        self.last_update
    }

    /// The current score.
    #[must_use]
    pub fn score(&self) -> i32 {
        self.score
    }

    /// The key routing this entity's updates to a shard of the stream.
    #[must_use]
    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    /// Apply an update observed at `now_ms`, adding `delta` to the score.
    ///
    /// Negative deltas are ignored and the score saturates at `i32::MAX`. A
    /// `now_ms` earlier than the last update leaves the timestamp alone.
    pub fn advance(&mut self, now_ms: i64, delta: i32) {
        self.last_update = self.last_update.max(now_ms);
        self.score = self.score.saturating_add(delta.max(0));
    }

    /// The externally visible view of this entity.
    #[must_use]
    pub fn update(&self) -> Update<'_> {
        Update {
            user_id: &self.user_id,
            last_update: self.last_update,
            score: self.score,
        }
    }
}

/// The fixed set of simulated entities.
///
/// The pool is the sole owner of every entity. Other components refer to
/// members by index.
#[derive(Debug, Clone)]
pub struct Pool {
    members: Vec<Entity>,
}

impl Pool {
    /// Create a pool of `count` entities, drawing partition keys from `rng`.
    pub fn new<R>(count: usize, rng: &mut R) -> Self
    where
        R: Rng + ?Sized,
    {
        let members = (0..count)
            .map(|index| {
                // Non-negative 63-bit integers, rendered in decimal.
                let key: u64 = rng.random::<u64>() >> 1;
                Entity::new(index, key.to_string())
            })
            .collect();
        Self { members }
    }

    /// Number of entities in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the pool holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The entity at `index`, if any.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Entity> {
        self.members.get(index)
    }

    /// Exclusive access to the entity at `index`, if any.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Entity> {
        self.members.get_mut(index)
    }

    /// Iterate the pool in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.members.iter()
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::SmallRng};
    use rustc_hash::FxHashSet;

    use super::{Entity, Pool};

    #[test]
    fn pool_initializes_entities() {
        let mut rng = SmallRng::seed_from_u64(42);
        let pool = Pool::new(3, &mut rng);
        assert_eq!(pool.len(), 3);
        assert!(!pool.is_empty());
        for (idx, entity) in pool.iter().enumerate() {
            assert_eq!(entity.user_id(), format!("entity-{idx}"));
            assert_eq!(entity.score(), 0);
            assert_eq!(entity.last_update(), 0);
            assert!(entity.partition_key().parse::<i64>().unwrap() >= 0);
        }
        assert!(pool.get(3).is_none());
    }

    #[test]
    fn seed_determines_partition_keys() {
        let a = Pool::new(16, &mut SmallRng::seed_from_u64(1));
        let b = Pool::new(16, &mut SmallRng::seed_from_u64(1));
        let c = Pool::new(16, &mut SmallRng::seed_from_u64(2));
        let keys = |p: &Pool| {
            p.iter()
                .map(|e| e.partition_key().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(keys(&a), keys(&b));
        assert_ne!(keys(&a), keys(&c));
    }

    #[test]
    fn identifiers_are_unique() {
        let pool = Pool::new(1_000, &mut SmallRng::seed_from_u64(0));
        let ids: FxHashSet<&str> = pool.iter().map(Entity::user_id).collect();
        assert_eq!(ids.len(), 1_000);
    }

    #[test]
    fn update_excludes_partition_key() {
        let mut entity = Entity::new(3, "999".to_string());
        entity.advance(1_700_000_000_000, 42);
        let json = serde_json::to_value(entity.update()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "userId": "entity-3",
                "lastUpdate": 1_700_000_000_000_i64,
                "score": 42,
            })
        );
    }

    proptest! {
        #[test]
        fn advance_is_monotonic(steps in proptest::collection::vec((any::<i64>(), any::<i32>()), 1..64)) {
            let mut entity = Entity::new(0, "0".to_string());
            for (now, delta) in steps {
                let before = entity.clone();
                entity.advance(now, delta);
                prop_assert!(entity.score() >= before.score());
                prop_assert!(entity.last_update() >= before.last_update());
                prop_assert_eq!(entity.user_id(), before.user_id());
                prop_assert_eq!(entity.partition_key(), before.partition_key());
            }
        }
    }
}
