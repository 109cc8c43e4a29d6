//! The hash maps and sets used throughout the crate are `hashbrown`'s, keyed with `std`'s
//! randomized `SipHasher` so that attacker-chosen node ids or short channel ids cannot be used to
//! degrade lookups in the reliability store.
//!
//! This module simply re-exports the `HashMap` used here for public consumption.

pub use std::collections::hash_map::RandomState;

/// The HashMap type used in this crate.
pub type HashMap<K, V> = hashbrown::HashMap<K, V, RandomState>;
/// The HashSet type used in this crate.
pub type HashSet<K> = hashbrown::HashSet<K, RandomState>;

pub(crate) use hashbrown::hash_map;

/// Builds a new [`HashMap`].
pub fn new_hash_map<K, V>() -> HashMap<K, V> {
	HashMap::with_hasher(RandomState::new())
}
/// Builds a new [`HashMap`] with the given capacity.
pub fn hash_map_with_capacity<K, V>(cap: usize) -> HashMap<K, V> {
	HashMap::with_capacity_and_hasher(cap, RandomState::new())
}

/// Builds a new [`HashSet`].
pub fn new_hash_set<K>() -> HashSet<K> {
	HashSet::with_hasher(RandomState::new())
}
