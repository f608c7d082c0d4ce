//! Return-value memoization

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::builder::{priority, BuildContext, BuildStep, TypeBuilder};
use crate::error::BuildResult;
use crate::intercept::{stage, InterceptResult};
use crate::model::{AccessorKind, DescriptorId, MemberFingerprint, TypeRef};
use crate::value::{ArrayRef, Value, ValueType};

const KEY_ITEM: &str = "typeloom.cache.key";

/// Memoization limits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// Entries older than this are recomputed
    pub max_cache_time: Option<Duration>,
    /// Oldest entries are evicted past this count
    pub max_entries: Option<usize>,
}

impl CacheOptions {
    /// Expire entries after `time`
    pub fn max_cache_time(mut self, time: Duration) -> Self {
        self.max_cache_time = Some(time);
        self
    }

    /// Keep at most `count` entries
    pub fn max_entries(mut self, count: usize) -> Self {
        self.max_entries = Some(count);
        self
    }
}

struct Entry {
    value: Value,
    stored: Instant,
}

#[derive(Default)]
struct CacheState {
    unkeyed: Option<Entry>,
    entries: FxHashMap<Vec<Value>, Entry>,
    order: VecDeque<Vec<Value>>,
}

/// Cached results of one member, keyed by argument tuple
///
/// Zero-argument members use a single unkeyed slot.
pub struct MethodCache {
    owner: TypeRef,
    fingerprint: MemberFingerprint,
    options: CacheOptions,
    state: Mutex<CacheState>,
}

impl MethodCache {
    fn new(owner: TypeRef, fingerprint: MemberFingerprint, options: CacheOptions) -> Self {
        Self {
            owner,
            fingerprint,
            options,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Type whose member the cache belongs to
    pub fn owner(&self) -> &TypeRef {
        &self.owner
    }

    /// Cached member
    pub fn fingerprint(&self) -> &MemberFingerprint {
        &self.fingerprint
    }

    fn is_fresh(&self, entry: &Entry) -> bool {
        match self.options.max_cache_time {
            Some(max) => entry.stored.elapsed() < max,
            None => true,
        }
    }

    /// Cached result for `args`
    pub fn get(&self, args: &[Value]) -> Option<Value> {
        let mut state = self.state.lock();
        if args.is_empty() {
            let fresh = state.unkeyed.as_ref().map(|e| self.is_fresh(e))?;
            if fresh {
                return state.unkeyed.as_ref().map(|e| e.value.clone());
            }
            state.unkeyed = None;
            return None;
        }
        let fresh = state.entries.get(args).map(|e| self.is_fresh(e))?;
        if fresh {
            state.entries.get(args).map(|e| e.value.clone())
        } else {
            state.entries.remove(args);
            state.order.retain(|k| k.as_slice() != args);
            None
        }
    }

    /// Store a result
    pub fn insert(&self, args: Vec<Value>, value: Value) {
        let entry = Entry {
            value,
            stored: Instant::now(),
        };
        let mut state = self.state.lock();
        if args.is_empty() {
            state.unkeyed = Some(entry);
            return;
        }
        if state.entries.insert(args.clone(), entry).is_none() {
            state.order.push_back(args);
        }
        if let Some(max) = self.options.max_entries {
            while state.entries.len() > max {
                let Some(oldest) = state.order.pop_front() else {
                    break;
                };
                state.entries.remove(&oldest);
            }
        }
    }

    /// Number of cached results
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.entries.len() + usize::from(state.unkeyed.is_some())
    }

    /// Check if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached result
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.unkeyed = None;
        state.entries.clear();
        state.order.clear();
    }
}

impl fmt::Debug for MethodCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodCache")
            .field("owner", &self.owner)
            .field("member", &self.fingerprint.to_string())
            .field("entries", &self.len())
            .finish()
    }
}

/// Process-wide memoization storage of a factory
#[derive(Default)]
pub struct CacheRegistry {
    caches: DashMap<(DescriptorId, MemberFingerprint), Arc<MethodCache>>,
}

impl CacheRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache of a member of `owner`, created on first use
    pub fn get_or_create(
        &self,
        owner: &TypeRef,
        fingerprint: &MemberFingerprint,
        options: &CacheOptions,
    ) -> Arc<MethodCache> {
        self.caches
            .entry((owner.id(), fingerprint.clone()))
            .or_insert_with(|| {
                Arc::new(MethodCache::new(
                    owner.clone(),
                    fingerprint.clone(),
                    options.clone(),
                ))
            })
            .clone()
    }

    /// Clear the caches of a member of `target` (or of a type derived from
    /// it); `params` narrows to one overload. Returns the number of member
    /// caches cleared.
    pub fn clear_member(
        &self,
        target: &TypeRef,
        name: &str,
        params: Option<&[ValueType]>,
    ) -> usize {
        self.clear_where(|cache| {
            cache.owner.derives_from(target)
                && &*cache.fingerprint.name == name
                && params.map_or(true, |p| &*cache.fingerprint.params == p)
        })
    }

    /// Clear every cached member of `target` (or of a type derived from it)
    pub fn clear_type(&self, target: &TypeRef) -> usize {
        self.clear_where(|cache| cache.owner.derives_from(target))
    }

    /// Clear everything
    pub fn clear_all(&self) {
        for cache in self.caches.iter() {
            cache.value().clear();
        }
    }

    fn clear_where(&self, pred: impl Fn(&MethodCache) -> bool) -> usize {
        let mut cleared = 0;
        for cache in self.caches.iter() {
            if pred(cache.value()) {
                cache.value().clear();
                cleared += 1;
            }
        }
        cleared
    }

    /// Number of member caches
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    /// Check if no member cache exists
    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}

impl fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRegistry").field("members", &self.caches.len()).finish()
    }
}

/// Memoizes the return value of a getter or non-void method
pub struct CacheBuilder {
    options: CacheOptions,
}

impl CacheBuilder {
    /// Builder with `options`
    pub fn new(options: CacheOptions) -> Self {
        Self { options }
    }
}

impl TypeBuilder for CacheBuilder {
    fn name(&self) -> &str {
        "cache"
    }

    fn priority(&self, _ctx: &BuildContext<'_>) -> i32 {
        priority::HIGH
    }

    fn is_applied(&self, ctx: &BuildContext<'_>) -> bool {
        let Some(method) = ctx.method() else {
            return false;
        };
        matches!(ctx.step(), BuildStep::BeforeMember | BuildStep::AfterMember)
            && matches!(method.accessor, AccessorKind::Invoke | AccessorKind::Get)
            && method.return_type != ValueType::Void
            && !method.params.iter().any(|p| p.is_by_ref())
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> BuildResult<()> {
        let Some(plan) = ctx.member_plan() else {
            return Ok(());
        };
        let cache = ctx
            .services()
            .caches()
            .get_or_create(ctx.source(), &plan.member.fingerprint(), &self.options);

        match ctx.step() {
            BuildStep::BeforeMember => ctx.emit_before(stage(move |info| {
                // A value set by an earlier hook stands, and is not cached
                if info.is_short_circuited() {
                    return Ok(());
                }
                if let Some(hit) = cache.get(&info.parameter_values) {
                    trace!(method = %info.method().full_name(), "cache hit");
                    info.set_return_value(hit);
                } else {
                    let key = Value::Array(ArrayRef::new(info.parameter_values.clone()));
                    info.set_item(KEY_ITEM, key);
                }
                Ok(())
            })),
            _ => ctx.emit_after(stage(move |info| {
                let key = info.remove_item(KEY_ITEM);
                if info.exception().is_some()
                    || info.intercept_result != InterceptResult::Continue
                {
                    return Ok(());
                }
                if let Some(Value::Array(key)) = key {
                    cache.insert(key.to_vec(), info.return_value().clone());
                }
                Ok(())
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TypeDescriptor;

    fn cache(options: CacheOptions) -> MethodCache {
        let owner = TypeDescriptor::abstract_class("Owner").build();
        MethodCache::new(owner, MemberFingerprint::method("Get", &[ValueType::Int]), options)
    }

    #[test]
    fn test_unkeyed_slot() {
        let c = cache(CacheOptions::default());
        assert!(c.get(&[]).is_none());
        c.insert(Vec::new(), Value::Int(5));
        assert_eq!(c.get(&[]), Some(Value::Int(5)));
        assert_eq!(c.len(), 1);
        c.clear();
        assert!(c.is_empty());
    }

    #[test]
    fn test_keyed_by_arguments() {
        let c = cache(CacheOptions::default());
        c.insert(vec![Value::Int(1)], Value::str("one"));
        assert_eq!(c.get(&[Value::Int(1)]), Some(Value::str("one")));
        assert!(c.get(&[Value::Int(2)]).is_none());
    }

    #[test]
    fn test_max_entries_evicts_oldest() {
        let c = cache(CacheOptions::default().max_entries(2));
        for i in 0..3 {
            c.insert(vec![Value::Int(i)], Value::Int(i * 10));
        }
        assert_eq!(c.len(), 2);
        assert!(c.get(&[Value::Int(0)]).is_none());
        assert_eq!(c.get(&[Value::Int(2)]), Some(Value::Int(20)));
    }

    #[test]
    fn test_expiry() {
        let c = cache(CacheOptions::default().max_cache_time(Duration::from_millis(0)));
        c.insert(vec![Value::Int(1)], Value::Int(1));
        assert!(c.get(&[Value::Int(1)]).is_none());
        assert!(c.is_empty());
    }

    #[test]
    fn test_registry_clear_by_overload() {
        let base = TypeDescriptor::abstract_class("Base").build();
        let derived = TypeDescriptor::abstract_class("Derived").extends(&base).build();
        let registry = CacheRegistry::new();
        let by_int = MemberFingerprint::method("Find", &[ValueType::Int]);
        let by_str = MemberFingerprint::method("Find", &[ValueType::Str]);
        let a = registry.get_or_create(&derived, &by_int, &CacheOptions::default());
        let b = registry.get_or_create(&derived, &by_str, &CacheOptions::default());
        a.insert(vec![Value::Int(1)], Value::Int(1));
        b.insert(vec![Value::str("x")], Value::Int(2));

        assert_eq!(registry.clear_member(&base, "Find", Some(&[ValueType::Int])), 1);
        assert!(a.is_empty());
        assert_eq!(b.len(), 1);

        assert_eq!(registry.clear_type(&base), 2);
        assert!(b.is_empty());
    }
}
