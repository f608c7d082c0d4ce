//! Typeloom: runtime type synthesis
//!
//! Describe an abstract class or interface with a [`TypeDescriptor`], attach
//! [`Marker`]s, and the [`TypeFactory`] generates a concrete type for it:
//! - **Resolution**: members, inherited markers and interface obligations are
//!   collected into a build plan (`resolve` module)
//! - **Builders**: plugins selected per member and ordered by priority
//!   contribute bodies and interceptor stages (`builder`, `aspects` modules)
//! - **Synthesis**: a state machine drives the builders and compiles each
//!   member into an interceptor chain (`synth`, `intercept` modules)
//! - **Caching**: one generated type per descriptor and builder set (`cache`)
//!
//! # Example
//!
//! ```rust,ignore
//! use typeloom::{Marker, MemberDescriptor, ParamDescriptor, TypeDescriptor, TypeFactory};
//! use typeloom::{Value, ValueType};
//!
//! let calc = TypeDescriptor::abstract_class("Calculator")
//!     .member(
//!         MemberDescriptor::method("Square")
//!             .param(ParamDescriptor::new("x", ValueType::Int))
//!             .returns(ValueType::Int)
//!             .marker(Marker::cache())
//!             .body(|_, args| Ok(Value::Int(args[0].as_int().unwrap_or(0).pow(2)))),
//!     )
//!     .build();
//!
//! let factory = TypeFactory::default();
//! let obj = factory.create_instance(&calc)?;
//! assert_eq!(obj.call("Square", vec![Value::Int(7)])?, Value::Int(49));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::type_complexity)]

// ============================================================================
// Core Modules
// ============================================================================

/// Values and declared types
pub mod value;

/// Error types
pub mod error;

/// Factory configuration
pub mod config;

/// Type, member and marker descriptors
pub mod model;

/// Call interception: call info, interceptor contract and chains
pub mod intercept;

/// Builder contract, build context and registry
pub mod builder;

/// Member resolution into build plans
pub mod resolve;

/// Type synthesis, generated types and instances
pub mod synth;

/// Generated-type cache
pub mod cache;

/// Standard builders
pub mod aspects;

/// Type factory and duck typing
pub mod factory;

/// Type and member accessors
pub mod accessor;

// ============================================================================
// Re-exports
// ============================================================================

pub use accessor::{MemberAccessor, TypeAccessor};
pub use builder::{priority, BuildContext, BuildStep, BuilderRegistry, TypeBuilder};
pub use config::FactoryConfig;
pub use error::{BuildError, BuildResult, CallError, CallResult, Exception, WeaveError, WeaveResult};
pub use factory::{FactoryHandle, ObjectFactory, TypeFactory};
pub use intercept::{
    CallMethodInfo, InterceptCallInfo, InterceptResult, InterceptType, Interceptor, InterceptorInit,
    InterceptorSpec,
};
pub use model::{
    AccessorKind, ConstructorDescriptor, FieldDescriptor, Marker, MarkerKind, MemberDescriptor,
    MemberKind, MustImplementPolicy, ParamDescriptor, ParamMode, TypeDescriptor, TypeRef,
};
pub use synth::{GeneratedType, InitContext, Instance};
pub use value::{ArrayRef, Callable, Value, ValueType};
