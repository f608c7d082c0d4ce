//! Call interception
//!
//! Every generated member runs through an [`InterceptorChain`]. Builders
//! contribute stages to four hook points, in priority order:
//!
//! | Point        | When                                   | May                                  |
//! |--------------|----------------------------------------|--------------------------------------|
//! | `BeforeCall` | before the real invocation             | set the return value (short-circuit) |
//! | `OnCatch`    | the invocation or a before hook failed | swallow, replace or rethrow          |
//! | `AfterCall`  | always, after the above                | read / overwrite the return value    |
//! | `OnFinally`  | always, last                           | observe                              |
//!
//! A per-call [`InterceptCallInfo`] is shared by all hooks of one invocation.

mod chain;
mod principal;

pub use chain::{body_stage, stage, BodyStage, InterceptorChain, Stage};
pub use principal::{current_principal, set_current_principal, with_principal};

use std::any::TypeId;
use std::fmt;
use std::ops::BitOr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::builder::BuildServices;
use crate::error::{CallError, CallResult};
use crate::model::{AccessorKind, MemberDescriptor, MemberFingerprint, ParamDescriptor};
use crate::synth::Instance;
use crate::value::{Value, ValueType};

/// Hook points (bitflags)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptType(u8);

impl InterceptType {
    /// No hook points
    pub const NONE: Self = Self(0x00);
    /// Before the real call
    pub const BEFORE_CALL: Self = Self(0x01);
    /// After the real call
    pub const AFTER_CALL: Self = Self(0x02);
    /// On exception
    pub const ON_CATCH: Self = Self(0x04);
    /// Always, last
    pub const ON_FINALLY: Self = Self(0x08);
    /// Every point
    pub const ALL: Self = Self(0x0F);

    /// Raw bits
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Check if all flags of `other` are set
    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Check if any flag of `other` is set
    pub const fn intersects(&self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    /// Union
    pub const fn union(&self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Remove flags
    pub const fn difference(&self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Check for no flags
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for InterceptType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for InterceptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        for (flag, name) in [
            (Self::BEFORE_CALL, "BeforeCall"),
            (Self::AFTER_CALL, "AfterCall"),
            (Self::ON_CATCH, "OnCatch"),
            (Self::ON_FINALLY, "OnFinally"),
        ] {
            if self.contains(flag) {
                names.push(name);
            }
        }
        if names.is_empty() {
            f.write_str("None")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// What the chain does next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptResult {
    /// Proceed normally
    Continue,
    /// Skip the real invocation and return the current return value
    Return,
    /// Swallow the captured exception
    Ignore,
    /// Rethrow the captured exception
    Throw,
}

/// Identity of a generated member entry point
#[derive(Debug)]
pub struct CallMethodInfo {
    /// Name of the generated type
    pub type_name: Arc<str>,
    /// Source member
    pub member: Arc<MemberDescriptor>,
    /// Entry point
    pub accessor: AccessorKind,
    /// Parameters of the entry point
    pub params: Vec<ParamDescriptor>,
    /// Return type of the entry point
    pub return_type: ValueType,
    /// Member fingerprint
    pub fingerprint: MemberFingerprint,
    /// Slot in the generated type
    pub slot: usize,
}

impl CallMethodInfo {
    /// Member name
    pub fn name(&self) -> &str {
        &self.member.name
    }

    /// `Type.Member` (with `get_`/`set_` prefixes for accessors)
    pub fn full_name(&self) -> String {
        let prefix = match self.accessor {
            AccessorKind::Invoke => "",
            AccessorKind::Get => "get_",
            AccessorKind::Set => "set_",
        };
        format!("{}.{}{}", self.type_name, prefix, self.member.name)
    }
}

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

/// Per-invocation record shared by every hook of one call
pub struct InterceptCallInfo {
    call_id: u64,
    object: Instance,
    method: Arc<CallMethodInfo>,
    /// Argument values; by-reference slots are copied back to the caller
    pub parameter_values: Vec<Value>,
    return_value: Value,
    /// Chain control
    pub intercept_result: InterceptResult,
    intercept_type: InterceptType,
    exception: Option<CallError>,
    begin_call_time: Instant,
    current_principal: Option<Arc<str>>,
    type_arguments: Vec<ValueType>,
    items: FxHashMap<String, Value>,
}

impl InterceptCallInfo {
    pub(crate) fn new(
        object: Instance,
        method: Arc<CallMethodInfo>,
        parameter_values: Vec<Value>,
        type_arguments: Vec<ValueType>,
    ) -> Self {
        let return_value = method.return_type.default_with(&type_arguments);
        Self {
            call_id: NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed),
            object,
            method,
            parameter_values,
            return_value,
            intercept_result: InterceptResult::Continue,
            intercept_type: InterceptType::NONE,
            exception: None,
            begin_call_time: Instant::now(),
            current_principal: current_principal(),
            type_arguments,
            items: FxHashMap::default(),
        }
    }

    /// Process-unique call id
    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    /// Target instance
    pub fn object(&self) -> &Instance {
        &self.object
    }

    /// Called member
    pub fn method(&self) -> &Arc<CallMethodInfo> {
        &self.method
    }

    /// Current return value
    pub fn return_value(&self) -> &Value {
        &self.return_value
    }

    /// Set the return value and request the real call be skipped
    pub fn set_return_value(&mut self, value: Value) {
        self.return_value = value;
        self.intercept_result = InterceptResult::Return;
    }

    /// Overwrite the return value without changing the chain result
    pub fn replace_return_value(&mut self, value: Value) {
        self.return_value = value;
    }

    pub(crate) fn store_return_value(&mut self, value: Value) {
        self.return_value = value;
    }

    /// Whether a before hook short-circuited the call
    pub fn is_short_circuited(&self) -> bool {
        self.intercept_result == InterceptResult::Return
    }

    /// Hook point currently executing
    pub fn intercept_type(&self) -> InterceptType {
        self.intercept_type
    }

    pub(crate) fn set_intercept_type(&mut self, point: InterceptType) {
        self.intercept_type = point;
    }

    /// Captured exception
    pub fn exception(&self) -> Option<&CallError> {
        self.exception.as_ref()
    }

    /// Replace the captured exception
    pub fn set_exception(&mut self, error: CallError) {
        self.exception = Some(error);
        self.intercept_result = InterceptResult::Throw;
    }

    pub(crate) fn take_exception(&mut self) -> Option<CallError> {
        self.exception.take()
    }

    /// Swallow the captured exception; the current return value is returned
    pub fn ignore_exception(&mut self) {
        self.intercept_result = InterceptResult::Ignore;
    }

    /// Call start time
    pub fn begin_call_time(&self) -> Instant {
        self.begin_call_time
    }

    /// Time since the call started
    pub fn elapsed(&self) -> Duration {
        self.begin_call_time.elapsed()
    }

    /// Ambient identity captured at call start
    pub fn current_principal(&self) -> Option<&str> {
        self.current_principal.as_deref()
    }

    /// Generic type arguments of the call
    pub fn type_arguments(&self) -> &[ValueType] {
        &self.type_arguments
    }

    /// Read an item from the shared bag
    pub fn item(&self, key: &str) -> Option<&Value> {
        self.items.get(key)
    }

    /// Store an item in the shared bag
    pub fn set_item(&mut self, key: &str, value: Value) {
        self.items.insert(key.to_string(), value);
    }

    /// Remove an item from the shared bag
    pub fn remove_item(&mut self, key: &str) -> Option<Value> {
        self.items.remove(key)
    }
}

impl fmt::Debug for InterceptCallInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptCallInfo")
            .field("call_id", &self.call_id)
            .field("method", &self.method.full_name())
            .field("parameter_values", &self.parameter_values)
            .field("return_value", &self.return_value)
            .field("intercept_result", &self.intercept_result)
            .field("intercept_type", &self.intercept_type)
            .field("exception", &self.exception)
            .finish()
    }
}

/// Data handed to an interceptor when it is attached to a member
pub struct InterceptorInit<'a> {
    /// Member being intercepted
    pub method: &'a Arc<CallMethodInfo>,
    /// Parameter string from the marker
    pub parameters: Option<&'a str>,
    /// Factory services
    pub services: &'a BuildServices,
}

/// Call interceptor
///
/// One instance is created per intercepted entry point and shared by every
/// call of it, so implementations keep per-call state in the
/// [`InterceptCallInfo`] item bag.
pub trait Interceptor: Send + Sync {
    /// Called once when the interceptor is attached to a member
    fn init(&mut self, _init: &InterceptorInit<'_>) {}

    /// Before the real call
    fn before_call(&self, _info: &mut InterceptCallInfo) -> CallResult<()> {
        Ok(())
    }

    /// After the real call (always runs)
    fn after_call(&self, _info: &mut InterceptCallInfo) -> CallResult<()> {
        Ok(())
    }

    /// On exception
    fn on_catch(&self, _info: &mut InterceptCallInfo) -> CallResult<()> {
        Ok(())
    }

    /// Last
    fn on_finally(&self, _info: &mut InterceptCallInfo) -> CallResult<()> {
        Ok(())
    }

    /// Dispatch on the current hook point
    fn intercept(&self, info: &mut InterceptCallInfo) -> CallResult<()> {
        let point = info.intercept_type();
        if point == InterceptType::BEFORE_CALL {
            self.before_call(info)
        } else if point == InterceptType::AFTER_CALL {
            self.after_call(info)
        } else if point == InterceptType::ON_CATCH {
            self.on_catch(info)
        } else if point == InterceptType::ON_FINALLY {
            self.on_finally(info)
        } else {
            Ok(())
        }
    }
}

type InterceptorFactoryFn = dyn Fn() -> Box<dyn Interceptor> + Send + Sync;

/// Interceptor attachment: handler type, hook points, priority
#[derive(Clone)]
pub struct InterceptorSpec {
    /// Handler type identity
    pub handler: TypeId,
    /// Handler type name
    pub handler_name: &'static str,
    /// Hook points
    pub points: InterceptType,
    /// Ordering priority (higher runs first)
    pub priority: i32,
    /// Parameter string passed to `init`
    pub parameters: Option<Arc<str>>,
    factory: Arc<InterceptorFactoryFn>,
}

impl InterceptorSpec {
    /// Spec for a default-constructible handler type
    pub fn of<H: Interceptor + Default + 'static>(
        points: InterceptType,
        priority: i32,
        parameters: Option<Arc<str>>,
    ) -> Self {
        Self::from_factory::<H, _>(points, priority, parameters, || Box::new(H::default()))
    }

    /// Spec with an explicit constructor
    pub fn from_factory<H, F>(
        points: InterceptType,
        priority: i32,
        parameters: Option<Arc<str>>,
        factory: F,
    ) -> Self
    where
        H: 'static,
        F: Fn() -> Box<dyn Interceptor> + Send + Sync + 'static,
    {
        Self {
            handler: TypeId::of::<H>(),
            handler_name: std::any::type_name::<H>(),
            points,
            priority,
            parameters,
            factory: Arc::new(factory),
        }
    }

    /// Create and initialize a handler instance
    pub fn instantiate(&self, init: &InterceptorInit<'_>) -> Arc<dyn Interceptor> {
        let mut handler = (self.factory)();
        handler.init(init);
        Arc::from(handler)
    }
}

impl fmt::Debug for InterceptorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorSpec")
            .field("handler", &self.handler_name)
            .field("points", &self.points)
            .field("priority", &self.priority)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intercept_type_flags() {
        let t = InterceptType::BEFORE_CALL | InterceptType::ON_FINALLY;
        assert!(t.contains(InterceptType::BEFORE_CALL));
        assert!(!t.contains(InterceptType::AFTER_CALL));
        assert!(t.intersects(InterceptType::ALL));
        assert_eq!(t.difference(InterceptType::BEFORE_CALL), InterceptType::ON_FINALLY);
        assert_eq!(format!("{:?}", t), "BeforeCall|OnFinally");
        assert_eq!(format!("{:?}", InterceptType::NONE), "None");
    }

    #[derive(Default)]
    struct Noop;
    impl Interceptor for Noop {}

    #[test]
    fn test_spec_identity() {
        let spec = InterceptorSpec::of::<Noop>(InterceptType::ALL, 5, None);
        assert_eq!(spec.handler, TypeId::of::<Noop>());
        assert_eq!(spec.priority, 5);
        assert!(spec.handler_name.ends_with("Noop"));
    }
}
