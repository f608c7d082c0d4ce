//! Dynamic values flowing through generated members
//!
//! Generated members have no static Rust signature, so arguments, return
//! values and field contents are carried as [`Value`]. Equality and hashing
//! follow reference semantics for heap handles (arrays, objects, functions,
//! native handles) and structural semantics for scalars and strings, which
//! is what argument-tuple cache keys need.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::CallResult;
use crate::model::TypeRef;
use crate::synth::Instance;

/// Shared, mutable array storage
#[derive(Clone, Default)]
pub struct ArrayRef(Arc<RwLock<Vec<Value>>>);

impl ArrayRef {
    /// Allocate a new array
    pub fn new(items: Vec<Value>) -> Self {
        Self(Arc::new(RwLock::new(items)))
    }

    /// Allocate an empty array
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    /// Check if the array has no elements
    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Read an element
    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.read().get(index).cloned()
    }

    /// Append an element
    pub fn push(&self, value: Value) {
        self.0.write().push(value);
    }

    /// Copy the contents out
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.read().clone()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &ArrayRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const u8 as usize
    }
}

/// Signature of a first-class function value
pub type CallableFn = dyn Fn(&[Value]) -> CallResult<Value> + Send + Sync;

/// A first-class function value (callbacks, delegates)
#[derive(Clone)]
pub struct Callable(Arc<CallableFn>);

impl Callable {
    /// Wrap a closure
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> CallResult<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Invoke the function
    pub fn call(&self, args: &[Value]) -> CallResult<Value> {
        (self.0)(args)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const u8 as usize
    }
}

/// Runtime value
#[derive(Clone, Default)]
pub enum Value {
    /// Absence of a value
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// Immutable string
    Str(Arc<str>),
    /// Array handle
    Array(ArrayRef),
    /// Instance of a generated type
    Object(Instance),
    /// Function value
    Func(Callable),
    /// Opaque host handle
    Native(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// String value
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    /// Opaque handle value
    pub fn native<T: Any + Send + Sync>(v: T) -> Self {
        Value::Native(Arc::new(v))
    }

    /// Check for null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Boolean content
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer content
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Float content
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// String content
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Array content
    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Object content
    pub fn as_object(&self) -> Option<&Instance> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Function content
    pub fn as_func(&self) -> Option<&Callable> {
        match self {
            Value::Func(f) => Some(f),
            _ => None,
        }
    }

    /// Downcast an opaque handle
    pub fn downcast_native<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Value::Native(n) => n.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Short name of the runtime kind, used in messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Func(_) => "function",
            Value::Native(_) => "native",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Func(a), Value::Func(b)) => a.addr() == b.addr(),
            (Value::Native(a), Value::Native(b)) => {
                Arc::as_ptr(a) as *const u8 == Arc::as_ptr(b) as *const u8
            }
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
            Value::Array(a) => a.addr().hash(state),
            Value::Object(o) => o.id().hash(state),
            Value::Func(f) => f.addr().hash(state),
            Value::Native(n) => (Arc::as_ptr(n) as *const u8 as usize).hash(state),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Array(a) => write!(f, "array[{}]", a.len()),
            Value::Object(o) => write!(f, "{}#{}", o.type_name(), o.id()),
            Value::Func(_) => f.write_str("<function>"),
            Value::Native(_) => f.write_str("<native>"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::str(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<Instance> for Value {
    fn from(v: Instance) -> Self {
        Value::Object(v)
    }
}

impl From<ArrayRef> for Value {
    fn from(v: ArrayRef) -> Self {
        Value::Array(v)
    }
}

/// Declared type of a parameter, return value, property or field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// No value (method returns nothing)
    Void,
    /// Any value
    Any,
    /// Boolean
    Bool,
    /// Integer
    Int,
    /// Float
    Float,
    /// String
    Str,
    /// Array of the element type
    Array(Box<ValueType>),
    /// Instance of the given source type (or something implementing it)
    Object(TypeRef),
    /// Function value
    Func,
    /// Opaque handle
    Native,
    /// Generic type parameter, by position in the member's type arguments
    Generic(u8),
}

impl ValueType {
    /// Array of `elem`
    pub fn array_of(elem: ValueType) -> Self {
        ValueType::Array(Box::new(elem))
    }

    /// The type default: `false`, `0`, `0.0`, otherwise null
    pub fn default_value(&self) -> Value {
        match self {
            ValueType::Bool => Value::Bool(false),
            ValueType::Int => Value::Int(0),
            ValueType::Float => Value::Float(0.0),
            _ => Value::Null,
        }
    }

    /// Type default with generic parameters resolved against `type_args`
    pub fn default_with(&self, type_args: &[ValueType]) -> Value {
        match self {
            ValueType::Generic(i) => type_args
                .get(*i as usize)
                .map(|t| t.default_value())
                .unwrap_or(Value::Null),
            other => other.default_value(),
        }
    }

    /// Whether null is a legal value of this type
    pub fn is_nullable(&self) -> bool {
        !matches!(self, ValueType::Bool | ValueType::Int | ValueType::Float)
    }

    /// Whether `value` is acceptable where this type is expected
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ValueType::Any, _) | (ValueType::Generic(_), _) => true,
            (t, Value::Null) => t.is_nullable(),
            (ValueType::Bool, Value::Bool(_)) => true,
            (ValueType::Int, Value::Int(_)) => true,
            (ValueType::Float, Value::Float(_)) | (ValueType::Float, Value::Int(_)) => true,
            (ValueType::Str, Value::Str(_)) => true,
            (ValueType::Array(_), Value::Array(_)) => true,
            (ValueType::Object(ty), Value::Object(o)) => o.is_instance_of(ty),
            (ValueType::Func, Value::Func(_)) => true,
            (ValueType::Native, Value::Native(_)) => true,
            _ => false,
        }
    }

    /// Whether values of `self` can be passed where `other` is expected
    ///
    /// Used for signature matching during duck typing; generics and `Any`
    /// match everything.
    pub fn is_compatible_with(&self, other: &ValueType) -> bool {
        match (self, other) {
            (ValueType::Any, _) | (_, ValueType::Any) => true,
            (ValueType::Generic(_), _) | (_, ValueType::Generic(_)) => true,
            (ValueType::Array(a), ValueType::Array(b)) => a.is_compatible_with(b),
            (ValueType::Object(a), ValueType::Object(b)) => a.id() == b.id() || a.derives_from(b),
            (a, b) => a == b,
        }
    }

    /// Display name
    pub fn name(&self) -> String {
        match self {
            ValueType::Void => "void".to_string(),
            ValueType::Any => "any".to_string(),
            ValueType::Bool => "bool".to_string(),
            ValueType::Int => "int".to_string(),
            ValueType::Float => "float".to_string(),
            ValueType::Str => "string".to_string(),
            ValueType::Array(e) => format!("{}[]", e.name()),
            ValueType::Object(t) => t.name().to_string(),
            ValueType::Func => "function".to_string(),
            ValueType::Native => "native".to_string(),
            ValueType::Generic(i) => format!("T{}", i),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    #[test]
    fn test_scalar_equality_is_structural() {
        assert_eq!(Value::Int(3), Value::Int(3));
        assert_eq!(Value::str("a"), Value::from("a"));
        assert_ne!(Value::Int(3), Value::Float(3.0));
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    }

    #[test]
    fn test_array_equality_is_identity() {
        let a = ArrayRef::new(vec![Value::Int(1)]);
        let b = ArrayRef::new(vec![Value::Int(1)]);
        assert_eq!(Value::Array(a.clone()), Value::Array(a.clone()));
        assert_ne!(Value::Array(a), Value::Array(b));
    }

    #[test]
    fn test_values_hash_consistently() {
        let mut set = FxHashSet::default();
        set.insert(vec![Value::Int(1), Value::str("x")]);
        assert!(set.contains(&vec![Value::Int(1), Value::str("x")]));
        assert!(!set.contains(&vec![Value::Int(1), Value::str("y")]));
    }

    #[test]
    fn test_defaults() {
        assert_eq!(ValueType::Int.default_value(), Value::Int(0));
        assert_eq!(ValueType::Bool.default_value(), Value::Bool(false));
        assert!(ValueType::Str.default_value().is_null());
        assert_eq!(
            ValueType::Generic(0).default_with(&[ValueType::Float]),
            Value::Float(0.0)
        );
        assert!(ValueType::Generic(1).default_with(&[ValueType::Int]).is_null());
    }

    #[test]
    fn test_accepts() {
        assert!(ValueType::Str.accepts(&Value::Null));
        assert!(!ValueType::Int.accepts(&Value::Null));
        assert!(ValueType::Float.accepts(&Value::Int(1)));
        assert!(ValueType::Generic(0).accepts(&Value::str("x")));
        assert!(!ValueType::Bool.accepts(&Value::Int(1)));
    }

    #[test]
    fn test_native_downcast() {
        let v = Value::native(42u32);
        assert_eq!(v.downcast_native::<u32>().as_deref(), Some(&42));
        assert!(v.downcast_native::<String>().is_none());
    }
}
