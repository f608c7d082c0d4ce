//! Generated-type cache
//!
//! One compiled type per key, process-wide per factory. Concurrent requests
//! for the same key block on a per-key cell while a single caller compiles;
//! requests for other keys are not held up by it. A failed compilation
//! leaves the key empty, so a later request compiles again.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};

use crate::error::BuildResult;
use crate::model::DescriptorId;
use crate::synth::GeneratedType;

/// Component of a cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    /// Source descriptor
    Type(DescriptorId),
    /// Previously generated type (duck-typing targets)
    Generated(u64),
    /// Builder registry revision
    Revision(u64),
    /// Free-form discriminator
    Tag(Arc<str>),
}

/// Composite cache key with a precomputed hash
#[derive(Clone)]
pub struct GeneratedTypeKey {
    parts: Arc<[KeyPart]>,
    hash: u64,
}

impl GeneratedTypeKey {
    /// Key from its components (order matters)
    pub fn new(parts: Vec<KeyPart>) -> Self {
        let mut hasher = FxHasher::default();
        parts.hash(&mut hasher);
        Self {
            hash: hasher.finish(),
            parts: Arc::from(parts),
        }
    }

    /// Components
    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }
}

impl PartialEq for GeneratedTypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.parts == other.parts
    }
}

impl Eq for GeneratedTypeKey {}

impl Hash for GeneratedTypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for GeneratedTypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.parts.iter()).finish()
    }
}

type Slot = Arc<OnceCell<Arc<GeneratedType>>>;

/// Key to compiled type map with at-most-one successful compile per key
#[derive(Default)]
pub struct TypeCache {
    slots: Mutex<FxHashMap<GeneratedTypeKey, Slot>>,
}

impl TypeCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached type, if compiled
    pub fn get(&self, key: &GeneratedTypeKey) -> Option<Arc<GeneratedType>> {
        let slot = self.slots.lock().get(key).cloned()?;
        slot.get().cloned()
    }

    /// Cached type, compiling it with `build` on a miss
    ///
    /// The map lock is only held to find the key's cell; compilation runs
    /// under the cell, so `build` may itself request other keys.
    pub fn get_or_build<F>(
        &self,
        key: &GeneratedTypeKey,
        build: F,
    ) -> BuildResult<Arc<GeneratedType>>
    where
        F: FnOnce() -> BuildResult<Arc<GeneratedType>>,
    {
        let slot = {
            let mut slots = self.slots.lock();
            slots.entry(key.clone()).or_default().clone()
        };
        slot.get_or_try_init(build).cloned()
    }

    /// Drop every key built at a revision other than `current`
    ///
    /// Types already handed out stay alive through their instances; only
    /// the lookup entries go. Returns the number of keys removed.
    pub fn retain_revision(&self, current: u64) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|key, _| {
            key.parts()
                .iter()
                .all(|part| !matches!(part, KeyPart::Revision(r) if *r != current))
        });
        before - slots.len()
    }

    /// Number of compiled types
    pub fn len(&self) -> usize {
        self.slots.lock().values().filter(|s| s.get().is_some()).count()
    }

    /// Check if nothing is compiled
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All compiled types
    pub fn snapshot(&self) -> Vec<Arc<GeneratedType>> {
        self.slots.lock().values().filter_map(|s| s.get().cloned()).collect()
    }
}

impl fmt::Debug for TypeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeCache").field("types", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuildError;
    use rustc_hash::FxHashSet;

    #[test]
    fn test_key_equality() {
        let a = GeneratedTypeKey::new(vec![KeyPart::Type(DescriptorId(1)), KeyPart::Revision(0)]);
        let b = GeneratedTypeKey::new(vec![KeyPart::Type(DescriptorId(1)), KeyPart::Revision(0)]);
        let c = GeneratedTypeKey::new(vec![KeyPart::Revision(0), KeyPart::Type(DescriptorId(1))]);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = FxHashSet::default();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_failed_build_leaves_key_empty() {
        let cache = TypeCache::new();
        let key = GeneratedTypeKey::new(vec![KeyPart::Tag(Arc::from("x"))]);
        let err = cache.get_or_build(&key, || Err(BuildError::InvalidState("boom".into())));
        assert!(err.is_err());
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_retain_revision_drops_stale_keys() {
        let cache = TypeCache::new();
        let keys = [
            GeneratedTypeKey::new(vec![KeyPart::Type(DescriptorId(1)), KeyPart::Revision(0)]),
            GeneratedTypeKey::new(vec![KeyPart::Type(DescriptorId(1)), KeyPart::Revision(1)]),
            GeneratedTypeKey::new(vec![KeyPart::Tag(Arc::from("untagged"))]),
        ];
        for key in &keys {
            let _ = cache.get_or_build(key, || Err(BuildError::InvalidState("skip".into())));
        }
        assert_eq!(cache.slots.lock().len(), 3);

        assert_eq!(cache.retain_revision(1), 1);
        let slots = cache.slots.lock();
        assert!(!slots.contains_key(&keys[0]));
        assert!(slots.contains_key(&keys[1]));
        assert!(slots.contains_key(&keys[2]));
    }
}
