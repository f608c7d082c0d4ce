//! Declarative markers
//!
//! Markers are attached to types, members and parameters. The resolver
//! merges them into a per-member build plan and each one ends up driving a
//! behavior plugin.
//!
//! | Marker                     | Target            | Plugin                      |
//! |----------------------------|-------------------|-----------------------------|
//! | `cache`                    | member / type     | [`CacheBuilder`]            |
//! | `clear_cache`              | member            | [`ClearCacheBuilder`]       |
//! | `counter`                  | member / type     | interceptor (counter)       |
//! | `log`                      | member / type     | interceptor (logging)       |
//! | `intercept`                | member / type     | interceptor                 |
//! | `no_intercept`             | member            | suppresses an interceptor   |
//! | `async_call` / `async_for` | member            | [`AsyncBuilder`]            |
//! | `not_null`                 | param / member    | [`NotNullBuilder`]          |
//! | `return_if_*`              | param             | [`ReturnIfBuilder`]         |
//! | `mixin` / `mixin_override` | type / member     | [`MixinBuilder`]            |
//! | `must_implement`           | interface / member| duck typing, interfaces     |
//! | `implement_interface`      | type              | resolver                    |
//! | `auto_implement_interface` | type              | [`AutoImplementBuilder`]    |
//! | `object_factory`           | type              | instance creation           |
//! | `parameter`                | param / property  | defaults, instance params   |
//! | `no_instance`              | property          | property instances          |
//! | `lazy_instance`            | property          | [`LazyInstanceBuilder`]     |
//! | `instance_type`            | property          | property instances          |
//! | `global_instance_type`     | type              | property instances          |
//!
//! [`CacheBuilder`]: crate::aspects::CacheBuilder
//! [`ClearCacheBuilder`]: crate::aspects::ClearCacheBuilder
//! [`AsyncBuilder`]: crate::aspects::AsyncBuilder
//! [`NotNullBuilder`]: crate::aspects::NotNullBuilder
//! [`ReturnIfBuilder`]: crate::aspects::ReturnIfBuilder
//! [`MixinBuilder`]: crate::aspects::MixinBuilder
//! [`AutoImplementBuilder`]: crate::aspects::AutoImplementBuilder
//! [`LazyInstanceBuilder`]: crate::aspects::LazyInstanceBuilder

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;
use serde::Deserialize;

use super::descriptor::TypeRef;
use crate::aspects::{CacheOptions, LogOptions, LogOutput};
use crate::builder::TypeBuilder;
use crate::factory::ObjectFactory;
use crate::intercept::{InterceptType, Interceptor, InterceptorSpec};
use crate::value::{Value, ValueType};

/// Policy for interface members the implementation does not provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MustImplementPolicy {
    /// Missing member is a build-time error
    Required,
    /// Missing member returns the type default
    OptionalDefault,
    /// Missing member raises an invalid-operation error when called
    OptionalThrow,
}

/// Arguments of the must-implement marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MustImplement {
    /// Member must be implemented
    pub implement: bool,
    /// Throw when an optional member is called but missing
    pub throw: bool,
    /// Message used for the error
    pub message: Option<Arc<str>>,
}

impl MustImplement {
    /// Collapse the flags into a policy
    pub fn policy(&self) -> MustImplementPolicy {
        match (self.implement, self.throw) {
            (true, _) => MustImplementPolicy::Required,
            (false, true) => MustImplementPolicy::OptionalThrow,
            (false, false) => MustImplementPolicy::OptionalDefault,
        }
    }
}

/// What a clear-cache marker addresses
#[derive(Debug, Clone)]
pub struct ClearCacheTarget {
    /// Declaring type of the cached member (the marked member's type when absent)
    pub declaring: Option<TypeRef>,
    /// Member name (all cached members of the type when absent)
    pub method: Option<Arc<str>>,
    /// Overload parameter types (every overload of the name when absent)
    pub param_types: Option<Vec<ValueType>>,
}

/// Target of an async begin/end member
#[derive(Debug, Clone)]
pub struct AsyncTarget {
    /// Name of the synchronous member (derived from Begin/End prefix when absent)
    pub name: Option<Arc<str>>,
    /// Overload parameter types of the synchronous member
    pub param_types: Option<Vec<ValueType>>,
}

/// Mixin declaration
#[derive(Debug, Clone)]
pub struct MixinSpec {
    /// Interface implemented by delegation
    pub interface: TypeRef,
    /// Field or property holding the delegate
    pub member: Arc<str>,
    /// Message when the delegate is null
    pub message: Option<Arc<str>>,
}

/// Discriminant of a marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum MarkerKind {
    Cache,
    ClearCache,
    Counter,
    Log,
    Intercept,
    NoIntercept,
    Async,
    NotNull,
    Mixin,
    MixinOverride,
    MustImplement,
    ImplementInterface,
    ObjectFactory,
    Parameter,
    NoInstance,
    LazyInstance,
    AutoImplementInterface,
    GlobalInstanceType,
    InstanceType,
    ReturnIfTrue,
    ReturnIfFalse,
    ReturnIfNull,
    Builder,
}

impl MarkerKind {
    /// Whether a type-level marker of this kind also applies to every member
    pub fn applies_to_members(self) -> bool {
        matches!(
            self,
            MarkerKind::Cache
                | MarkerKind::Counter
                | MarkerKind::Log
                | MarkerKind::Intercept
                | MarkerKind::NoIntercept
                | MarkerKind::MustImplement
        )
    }

    /// Whether several markers of this kind may stack on one declaration
    pub fn composes(self) -> bool {
        matches!(
            self,
            MarkerKind::ClearCache | MarkerKind::Intercept | MarkerKind::Builder | MarkerKind::Mixin
        )
    }
}

/// Grouping key for marker inheritance: kind plus a discriminator
/// (interceptor handler type, interface id, builder identity)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkerGroup {
    /// Marker kind
    pub kind: MarkerKind,
    /// Kind-specific discriminator
    pub discriminator: u64,
}

fn hash_type_id(id: TypeId) -> u64 {
    let mut hasher = FxHasher::default();
    id.hash(&mut hasher);
    hasher.finish()
}

/// Declarative marker
#[derive(Clone)]
pub enum Marker {
    /// Memoize return values by argument tuple
    Cache(CacheOptions),
    /// Clear cached results after a successful call
    ClearCache(ClearCacheTarget),
    /// Count calls and elapsed time
    Counter,
    /// Log entry, exit and exceptions
    Log(LogOptions),
    /// Attach an interceptor
    Intercept(InterceptorSpec),
    /// Suppress an interceptor type at the given points
    NoIntercept {
        /// Handler type
        handler: TypeId,
        /// Handler type name (diagnostics)
        handler_name: &'static str,
        /// Points suppressed
        points: InterceptType,
    },
    /// Begin/End asynchronous wrapper
    Async(AsyncTarget),
    /// Reject null arguments
    NotNull {
        /// Message template; `{0}` is replaced by the parameter name
        message: Option<Arc<str>>,
    },
    /// Implement an interface by delegating to a held object
    Mixin(MixinSpec),
    /// Member overrides the mixin delegate for one interface
    MixinOverride(TypeRef),
    /// Must-implement policy
    MustImplement(MustImplement),
    /// Declare an implemented interface
    ImplementInterface(TypeRef),
    /// Custom instance construction
    ObjectFactory(Arc<dyn ObjectFactory>),
    /// Parameter values (defaults / constructor arguments)
    Parameter(Vec<Value>),
    /// Do not create a property instance at construction
    NoInstance,
    /// Create the property instance on first access
    LazyInstance,
    /// Generate default implementations of unimplemented interface members
    AutoImplementInterface,
    /// Properties of type `key` get instances of `implementation`
    GlobalInstanceType {
        /// Declared property type
        key: TypeRef,
        /// Type actually instantiated
        implementation: TypeRef,
    },
    /// Property instance type
    InstanceType(TypeRef),
    /// Return immediately when the argument is `true`
    ReturnIfTrue,
    /// Return immediately when the argument is `false`
    ReturnIfFalse,
    /// Return immediately when the argument is null
    ReturnIfNull,
    /// Caller-authored builder
    Builder(Arc<dyn TypeBuilder>),
}

impl Marker {
    /// Cache with default options
    pub fn cache() -> Self {
        Marker::Cache(CacheOptions::default())
    }

    /// Cache with options
    pub fn cache_with(options: CacheOptions) -> Self {
        Marker::Cache(options)
    }

    /// Clear-cache marker
    pub fn clear_cache(target: ClearCacheTarget) -> Self {
        Marker::ClearCache(target)
    }

    /// Clear one member (every overload) of `declaring`, or of the marked
    /// member's own type when `declaring` is `None`
    pub fn clear_cache_of(declaring: Option<&TypeRef>, method: &str) -> Self {
        Marker::ClearCache(ClearCacheTarget {
            declaring: declaring.cloned(),
            method: Some(Arc::from(method)),
            param_types: None,
        })
    }

    /// Clear one overload
    pub fn clear_cache_overload(
        declaring: Option<&TypeRef>,
        method: &str,
        params: Vec<ValueType>,
    ) -> Self {
        Marker::ClearCache(ClearCacheTarget {
            declaring: declaring.cloned(),
            method: Some(Arc::from(method)),
            param_types: Some(params),
        })
    }

    /// Clear every cached member of a type
    pub fn clear_cache_all(declaring: Option<&TypeRef>) -> Self {
        Marker::ClearCache(ClearCacheTarget {
            declaring: declaring.cloned(),
            method: None,
            param_types: None,
        })
    }

    /// Counter marker
    pub fn counter() -> Self {
        Marker::Counter
    }

    /// Logging marker; `options` is e.g. `"LogParameters=true"`
    pub fn log(options: &str) -> Self {
        Marker::Log(LogOptions::parse(options))
    }

    /// Logging marker with an explicit output
    pub fn log_to(options: &str, output: Arc<dyn LogOutput>) -> Self {
        Marker::Log(LogOptions::parse(options).with_output(output))
    }

    /// Attach interceptor `H` at `points` with `priority`
    pub fn intercept<H: Interceptor + Default + 'static>(
        points: InterceptType,
        priority: i32,
    ) -> Self {
        Marker::Intercept(InterceptorSpec::of::<H>(points, priority, None))
    }

    /// Attach interceptor `H` with a parameter string passed to its `init`
    pub fn intercept_with<H: Interceptor + Default + 'static>(
        points: InterceptType,
        priority: i32,
        parameters: &str,
    ) -> Self {
        Marker::Intercept(InterceptorSpec::of::<H>(points, priority, Some(Arc::from(parameters))))
    }

    /// Suppress interceptor `H` at `points`
    pub fn no_intercept<H: Interceptor + 'static>(points: InterceptType) -> Self {
        Marker::NoIntercept {
            handler: TypeId::of::<H>(),
            handler_name: std::any::type_name::<H>(),
            points,
        }
    }

    /// Async wrapper for the member named after the Begin/End prefix
    pub fn async_call() -> Self {
        Marker::Async(AsyncTarget {
            name: None,
            param_types: None,
        })
    }

    /// Async wrapper for an explicitly named (and optionally typed) member
    pub fn async_for(name: &str, param_types: Option<Vec<ValueType>>) -> Self {
        Marker::Async(AsyncTarget {
            name: Some(Arc::from(name)),
            param_types,
        })
    }

    /// Not-null with the default message
    pub fn not_null() -> Self {
        Marker::NotNull { message: None }
    }

    /// Not-null with a message template
    pub fn not_null_msg(template: &str) -> Self {
        Marker::NotNull {
            message: Some(Arc::from(template)),
        }
    }

    /// Mixin marker
    pub fn mixin(interface: &TypeRef, member: &str, message: Option<&str>) -> Self {
        Marker::Mixin(MixinSpec {
            interface: interface.clone(),
            member: Arc::from(member),
            message: message.map(Arc::from),
        })
    }

    /// Mixin-override marker
    pub fn mixin_override(interface: &TypeRef) -> Self {
        Marker::MixinOverride(interface.clone())
    }

    /// Must-implement marker
    pub fn must_implement(implement: bool, throw: bool, message: Option<&str>) -> Self {
        Marker::MustImplement(MustImplement {
            implement,
            throw,
            message: message.map(Arc::from),
        })
    }

    /// Implement-interface marker
    pub fn implement_interface(interface: &TypeRef) -> Self {
        Marker::ImplementInterface(interface.clone())
    }

    /// Object-factory marker
    pub fn object_factory(factory: Arc<dyn ObjectFactory>) -> Self {
        Marker::ObjectFactory(factory)
    }

    /// Parameter marker
    pub fn parameter(values: Vec<Value>) -> Self {
        Marker::Parameter(values)
    }

    /// No-instance marker
    pub fn no_instance() -> Self {
        Marker::NoInstance
    }

    /// Lazy-instance marker
    pub fn lazy_instance() -> Self {
        Marker::LazyInstance
    }

    /// Auto-implement-interface marker
    pub fn auto_implement_interface() -> Self {
        Marker::AutoImplementInterface
    }

    /// Global instance type marker
    pub fn global_instance_type(key: &TypeRef, implementation: &TypeRef) -> Self {
        Marker::GlobalInstanceType {
            key: key.clone(),
            implementation: implementation.clone(),
        }
    }

    /// Instance type marker
    pub fn instance_type(implementation: &TypeRef) -> Self {
        Marker::InstanceType(implementation.clone())
    }

    /// Return-if-true marker
    pub fn return_if_true() -> Self {
        Marker::ReturnIfTrue
    }

    /// Return-if-false marker
    pub fn return_if_false() -> Self {
        Marker::ReturnIfFalse
    }

    /// Return-if-null marker
    pub fn return_if_null() -> Self {
        Marker::ReturnIfNull
    }

    /// Custom builder marker
    pub fn builder(builder: Arc<dyn TypeBuilder>) -> Self {
        Marker::Builder(builder)
    }

    /// Marker discriminant
    pub fn kind(&self) -> MarkerKind {
        match self {
            Marker::Cache(_) => MarkerKind::Cache,
            Marker::ClearCache(_) => MarkerKind::ClearCache,
            Marker::Counter => MarkerKind::Counter,
            Marker::Log(_) => MarkerKind::Log,
            Marker::Intercept(_) => MarkerKind::Intercept,
            Marker::NoIntercept { .. } => MarkerKind::NoIntercept,
            Marker::Async(_) => MarkerKind::Async,
            Marker::NotNull { .. } => MarkerKind::NotNull,
            Marker::Mixin(_) => MarkerKind::Mixin,
            Marker::MixinOverride(_) => MarkerKind::MixinOverride,
            Marker::MustImplement(_) => MarkerKind::MustImplement,
            Marker::ImplementInterface(_) => MarkerKind::ImplementInterface,
            Marker::ObjectFactory(_) => MarkerKind::ObjectFactory,
            Marker::Parameter(_) => MarkerKind::Parameter,
            Marker::NoInstance => MarkerKind::NoInstance,
            Marker::LazyInstance => MarkerKind::LazyInstance,
            Marker::AutoImplementInterface => MarkerKind::AutoImplementInterface,
            Marker::GlobalInstanceType { .. } => MarkerKind::GlobalInstanceType,
            Marker::InstanceType(_) => MarkerKind::InstanceType,
            Marker::ReturnIfTrue => MarkerKind::ReturnIfTrue,
            Marker::ReturnIfFalse => MarkerKind::ReturnIfFalse,
            Marker::ReturnIfNull => MarkerKind::ReturnIfNull,
            Marker::Builder(_) => MarkerKind::Builder,
        }
    }

    /// Inheritance group
    pub fn group(&self) -> MarkerGroup {
        let discriminator = match self {
            Marker::Intercept(spec) => hash_type_id(spec.handler),
            Marker::NoIntercept { handler, .. } => hash_type_id(*handler),
            Marker::MixinOverride(t) | Marker::ImplementInterface(t) => t.id().0,
            Marker::Mixin(spec) => spec.interface.id().0,
            Marker::GlobalInstanceType { key, .. } => key.id().0,
            Marker::Builder(b) => Arc::as_ptr(b) as *const u8 as usize as u64,
            _ => 0,
        };
        MarkerGroup {
            kind: self.kind(),
            discriminator,
        }
    }
}

impl fmt::Debug for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Marker::Intercept(spec) => {
                write!(f, "Intercept({}, {:?})", spec.handler_name, spec.points)
            }
            Marker::NoIntercept {
                handler_name, points, ..
            } => write!(f, "NoIntercept({}, {:?})", handler_name, points),
            Marker::ClearCache(t) => write!(f, "ClearCache({:?})", t.method),
            Marker::Async(t) => write!(f, "Async({:?})", t.name),
            Marker::Mixin(m) => write!(f, "Mixin({:?}, {})", m.interface, m.member),
            Marker::MixinOverride(t) => write!(f, "MixinOverride({:?})", t),
            Marker::ImplementInterface(t) => write!(f, "ImplementInterface({:?})", t),
            Marker::InstanceType(t) => write!(f, "InstanceType({:?})", t),
            Marker::Parameter(v) => write!(f, "Parameter({:?})", v),
            Marker::Builder(b) => write!(f, "Builder({})", b.name()),
            other => write!(f, "{:?}", other.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_must_implement_policy() {
        let required = MustImplement {
            implement: true,
            throw: false,
            message: None,
        };
        assert_eq!(required.policy(), MustImplementPolicy::Required);

        let throw = MustImplement {
            implement: false,
            throw: true,
            message: None,
        };
        assert_eq!(throw.policy(), MustImplementPolicy::OptionalThrow);

        let default = MustImplement {
            implement: false,
            throw: false,
            message: None,
        };
        assert_eq!(default.policy(), MustImplementPolicy::OptionalDefault);
    }

    #[test]
    fn test_groups_split_by_interface() {
        let a = crate::model::TypeDescriptor::interface("IA").build();
        let b = crate::model::TypeDescriptor::interface("IB").build();
        assert_ne!(Marker::mixin_override(&a).group(), Marker::mixin_override(&b).group());
        assert_eq!(Marker::counter().group(), Marker::counter().group());
    }

    #[test]
    fn test_member_applicable_kinds() {
        assert!(MarkerKind::Counter.applies_to_members());
        assert!(!MarkerKind::AutoImplementInterface.applies_to_members());
        assert!(MarkerKind::ClearCache.composes());
        assert!(!MarkerKind::Cache.composes());
    }
}
