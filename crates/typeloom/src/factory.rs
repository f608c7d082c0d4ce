//! Type factory: the entry point for generating types and creating instances
//!
//! A [`TypeFactory`] owns the builder registry, the generated-type cache, the
//! method caches and the async worker pool. It is cheap to clone; clones
//! share all state. [`TypeFactory::shared`] is the process-wide instance.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::accessor::TypeAccessor;
use crate::aspects::{AsyncWorkerPool, CacheRegistry, CounterFactory, MethodCallCounter};
use crate::builder::{BuildServices, BuilderRegistry, TypeBuilder};
use crate::cache::{GeneratedTypeKey, KeyPart, TypeCache};
use crate::config::FactoryConfig;
use crate::error::{BuildError, BuildResult, CallResult, WeaveResult};
use crate::model::{DescriptorId, TypeRef};
use crate::resolve::{duck_target_field, BuildPlan, MemberMetadataResolver};
use crate::synth::{GeneratedType, InitContext, Instance, TypeSynthesizer};
use crate::value::Value;

/// Creates instances in place of the generated constructor
///
/// Set per type with the `object_factory` marker or
/// [`TypeFactory::set_object_factory`].
pub trait ObjectFactory: Send + Sync {
    /// Create an instance of `accessor`'s type
    fn create_instance(
        &self,
        accessor: &TypeAccessor,
        ctx: Option<&InitContext>,
    ) -> CallResult<Instance>;
}

struct FactoryInner {
    config: Arc<FactoryConfig>,
    registry: RwLock<Arc<BuilderRegistry>>,
    revision: AtomicU64,
    types: TypeCache,
    caches: Arc<CacheRegistry>,
    workers: Arc<AsyncWorkerPool>,
    implementations: DashMap<DescriptorId, TypeRef>,
    object_factories: DashMap<DescriptorId, Arc<dyn ObjectFactory>>,
    counter_factory: RwLock<Option<Arc<dyn CounterFactory>>>,
}

/// Non-owning reference to a factory, held by generated code
#[derive(Clone)]
pub struct FactoryHandle(Weak<FactoryInner>);

impl FactoryHandle {
    /// The factory, if it is still alive
    pub fn upgrade(&self) -> Option<TypeFactory> {
        self.0.upgrade().map(|inner| TypeFactory { inner })
    }

    pub(crate) fn has_object_factory(&self, ty: &TypeRef) -> bool {
        self.0
            .upgrade()
            .map_or(false, |inner| inner.object_factories.contains_key(&ty.id()))
    }
}

impl fmt::Debug for FactoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FactoryHandle").field(&(self.0.strong_count() > 0)).finish()
    }
}

static SHARED: Lazy<TypeFactory> = Lazy::new(TypeFactory::default);

/// Generates types from descriptors and creates their instances
#[derive(Clone)]
pub struct TypeFactory {
    inner: Arc<FactoryInner>,
}

impl Default for TypeFactory {
    fn default() -> Self {
        Self::new(FactoryConfig::default())
    }
}

impl TypeFactory {
    /// Factory with the standard builders
    pub fn new(config: FactoryConfig) -> Self {
        let workers = config.worker_count();
        Self {
            inner: Arc::new(FactoryInner {
                config: Arc::new(config),
                registry: RwLock::new(Arc::new(BuilderRegistry::with_defaults())),
                revision: AtomicU64::new(0),
                types: TypeCache::new(),
                caches: Arc::new(CacheRegistry::new()),
                workers: Arc::new(AsyncWorkerPool::new(workers)),
                implementations: DashMap::new(),
                object_factories: DashMap::new(),
                counter_factory: RwLock::new(None),
            }),
        }
    }

    /// Process-wide factory with the default configuration
    pub fn shared() -> &'static TypeFactory {
        &SHARED
    }

    /// Configuration
    pub fn config(&self) -> &FactoryConfig {
        &self.inner.config
    }

    /// Handle for generated code
    pub fn handle(&self) -> FactoryHandle {
        FactoryHandle(Arc::downgrade(&self.inner))
    }

    /// Method caches of all generated types
    pub fn caches(&self) -> &Arc<CacheRegistry> {
        &self.inner.caches
    }

    /// Add a global builder; types generated afterwards see it
    pub fn register_builder(&self, builder: Arc<dyn TypeBuilder>) {
        let mut registry = self.inner.registry.write();
        let mut next = BuilderRegistry::clone(&registry);
        next.register(builder);
        *registry = Arc::new(next);
        let revision = self.bump_revision();
        debug!(revision, builders = registry.len(), "builder registered");
    }

    /// Use `factory` for the call counters of types generated afterwards
    pub fn set_counter_factory(&self, factory: Arc<dyn CounterFactory>) {
        *self.inner.counter_factory.write() = Some(factory);
        self.bump_revision();
    }

    fn bump_revision(&self) -> u64 {
        let revision = self.inner.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let pruned = self.inner.types.retain_revision(revision);
        debug!(revision, pruned, "generated types invalidated");
        revision
    }

    /// Instantiate `implementation` wherever `declared` is requested
    pub fn register_implementation(&self, declared: &TypeRef, implementation: &TypeRef) {
        self.inner.implementations.insert(declared.id(), implementation.clone());
    }

    /// Create instances of `ty` through `factory`
    pub fn set_object_factory(&self, ty: &TypeRef, factory: Arc<dyn ObjectFactory>) {
        self.inner.object_factories.insert(ty.id(), factory);
    }

    pub(crate) fn object_factory_for(&self, ty: &TypeRef) -> Option<Arc<dyn ObjectFactory>> {
        self.inner.object_factories.get(&ty.id()).map(|f| f.value().clone())
    }

    /// Type instantiated for `ty`, following registered implementations
    pub fn implementation_of(&self, ty: &TypeRef) -> TypeRef {
        let mut current = ty.clone();
        let mut seen = vec![current.id()];
        while let Some(next) = self
            .inner
            .implementations
            .get(&current.id())
            .map(|t| t.value().clone())
        {
            if seen.contains(&next.id()) {
                break;
            }
            seen.push(next.id());
            current = next;
        }
        current
    }

    fn revision(&self) -> u64 {
        self.inner.revision.load(Ordering::SeqCst)
    }

    fn services(&self) -> BuildServices {
        BuildServices {
            factory: self.handle(),
            caches: self.inner.caches.clone(),
            workers: self.inner.workers.clone(),
            counter_factory: self.inner.counter_factory.read().clone(),
            config: self.inner.config.clone(),
        }
    }

    fn synthesize<F>(&self, key: GeneratedTypeKey, plan: F) -> BuildResult<Arc<GeneratedType>>
    where
        F: FnOnce(&MemberMetadataResolver<'_>) -> BuildResult<BuildPlan>,
    {
        self.inner.types.get_or_build(&key, || {
            let plan = plan(&MemberMetadataResolver::new(&self.inner.config))?;
            let registry = self.inner.registry.read().clone();
            let services = self.services();
            TypeSynthesizer::new(&registry, &services).synthesize(&plan, key.clone())
        })
    }

    /// Generated type for `ty`, compiling it on first use
    pub fn generated_type(&self, ty: &TypeRef) -> BuildResult<Arc<GeneratedType>> {
        let key = GeneratedTypeKey::new(vec![
            KeyPart::Type(ty.id()),
            KeyPart::Revision(self.revision()),
        ]);
        self.synthesize(key, |resolver| resolver.resolve(ty))
    }

    /// Accessor of the type instantiated for `ty`
    pub fn accessor(&self, ty: &TypeRef) -> WeaveResult<TypeAccessor> {
        let ty = self.implementation_of(ty);
        let generated = self.generated_type(&ty)?;
        Ok(TypeAccessor::new(generated, self.clone()))
    }

    /// New instance of `ty`
    pub fn create_instance(&self, ty: &TypeRef) -> WeaveResult<Instance> {
        Ok(self.accessor(ty)?.create_instance()?)
    }

    /// New instance of `ty` built from `ctx`
    pub fn create_instance_with(&self, ty: &TypeRef, ctx: InitContext) -> WeaveResult<Instance> {
        Ok(self.accessor(ty)?.create_instance_with(ctx)?)
    }

    /// Call counters of the types generated since the last revision change
    pub fn counters(&self) -> Vec<Arc<dyn MethodCallCounter>> {
        self.inner
            .types
            .snapshot()
            .iter()
            .flat_map(|t| t.counters().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Drop every method cache entry
    pub fn clear_cache(&self) {
        self.inner.caches.clear_all();
    }

    /// Number of generated types
    pub fn generated_count(&self) -> usize {
        self.inner.types.len()
    }

    fn duck_type(
        &self,
        interface: &TypeRef,
        objects: &[Instance],
    ) -> BuildResult<Arc<GeneratedType>> {
        let backing: Vec<Arc<GeneratedType>> =
            objects.iter().map(|o| o.generated_type().clone()).collect();
        let mut parts = vec![KeyPart::Type(interface.id())];
        parts.extend(backing.iter().map(|t| KeyPart::Generated(t.id())));
        parts.push(KeyPart::Revision(self.revision()));
        self.synthesize(GeneratedTypeKey::new(parts), |resolver| {
            resolver.resolve_duck(interface, backing)
        })
    }

    fn wrap(&self, interface: &TypeRef, objects: &[Instance]) -> WeaveResult<Instance> {
        if objects.is_empty() {
            return Err(BuildError::DuckTyping {
                interface: interface.name().to_string(),
                reason: "no objects to wrap".to_string(),
            }
            .into());
        }
        let ty = self.duck_type(interface, objects)?;
        let instance = ty.construct(None)?;
        for (i, object) in objects.iter().enumerate() {
            instance.set_field(&duck_target_field(i), Value::Object(object.clone()))?;
        }
        Ok(instance)
    }

    /// View `object` as `interface`
    ///
    /// Members are matched by name and signature; members the object lacks
    /// follow the interface's must-implement policy. An object that already
    /// implements the interface is returned unchanged.
    pub fn implement(&self, interface: &TypeRef, object: &Instance) -> WeaveResult<Instance> {
        if object.is_instance_of(interface) {
            return Ok(object.clone());
        }
        self.wrap(interface, std::slice::from_ref(object))
    }

    /// Like [`implement`](Self::implement), but `None` on failure
    pub fn try_implement(&self, interface: &TypeRef, object: &Instance) -> Option<Instance> {
        self.implement(interface, object).ok()
    }

    /// [`implement`](Self::implement) for each object
    pub fn implement_all(
        &self,
        interface: &TypeRef,
        objects: &[Instance],
    ) -> WeaveResult<Vec<Instance>> {
        objects.iter().map(|o| self.implement(interface, o)).collect()
    }

    /// [`implement_all`](Self::implement_all), with `None` for objects that
    /// cannot be wrapped
    pub fn try_implement_all(
        &self,
        interface: &TypeRef,
        objects: &[Instance],
    ) -> Vec<Option<Instance>> {
        objects.iter().map(|o| self.try_implement(interface, o)).collect()
    }

    /// One `interface` view over several objects; each member goes to the
    /// first object that has it
    pub fn aggregate(&self, interface: &TypeRef, objects: &[Instance]) -> WeaveResult<Instance> {
        let instance = self.wrap(interface, objects)?;
        info!(interface = interface.name(), objects = objects.len(), "aggregate created");
        Ok(instance)
    }

    /// Like [`aggregate`](Self::aggregate), but `None` on failure
    pub fn try_aggregate(&self, interface: &TypeRef, objects: &[Instance]) -> Option<Instance> {
        self.aggregate(interface, objects).ok()
    }
}

impl fmt::Debug for TypeFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeFactory")
            .field("config", &self.inner.config)
            .field("revision", &self.revision())
            .field("types", &self.inner.types.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MemberDescriptor, TypeDescriptor};
    use crate::value::ValueType;

    fn shape() -> TypeRef {
        TypeDescriptor::abstract_class("Shape")
            .member(MemberDescriptor::method("Area").returns(ValueType::Float))
            .build()
    }

    #[test]
    fn test_generated_type_is_cached() {
        let factory = TypeFactory::default();
        let ty = shape();
        let a = factory.generated_type(&ty).unwrap();
        let b = factory.generated_type(&ty).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.generated_count(), 1);
    }

    #[test]
    fn test_register_builder_invalidates() {
        struct Noop;
        impl TypeBuilder for Noop {
            fn name(&self) -> &str {
                "noop"
            }
            fn is_applied(&self, _ctx: &crate::builder::BuildContext<'_>) -> bool {
                false
            }
            fn build(&self, _ctx: &mut crate::builder::BuildContext<'_>) -> BuildResult<()> {
                Ok(())
            }
        }

        let factory = TypeFactory::default();
        let ty = shape();
        let before = factory.generated_type(&ty).unwrap();
        factory.register_builder(Arc::new(Noop));
        let after = factory.generated_type(&ty).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(factory.generated_count(), 1);
    }

    #[test]
    fn test_implementation_mapping() {
        let factory = TypeFactory::default();
        let base = shape();
        let square = TypeDescriptor::abstract_class("Square").extends(&base).build();
        factory.register_implementation(&base, &square);
        factory.register_implementation(&square, &base);

        assert_eq!(factory.implementation_of(&base).id(), square.id());
        let obj = factory.create_instance(&base).unwrap();
        assert!(obj.is_instance_of(&square));
        assert_eq!(obj.call("Area", vec![]).unwrap(), Value::Float(0.0));
    }

    #[test]
    fn test_handle_outlives_factory() {
        let handle = {
            let factory = TypeFactory::default();
            factory.handle()
        };
        assert!(handle.upgrade().is_none());
    }
}
