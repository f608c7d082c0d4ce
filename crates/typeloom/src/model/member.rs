//! Member, parameter, field and constructor descriptors

use std::fmt;
use std::sync::Arc;

use super::marker::Marker;
use crate::error::CallResult;
use crate::synth::{InitContext, Instance};
use crate::value::{Value, ValueType};

/// Concrete member body: receives the instance and the (mutable) arguments
///
/// For setters the last argument is the assigned value. By-reference and
/// output parameters are written back through the slice.
pub type MethodBody = Arc<dyn Fn(&Instance, &mut [Value]) -> CallResult<Value> + Send + Sync>;

/// Constructor body
pub type ConstructorBody = Arc<dyn Fn(&Instance, &InitContext) -> CallResult<()> + Send + Sync>;

/// Parameter passing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamMode {
    /// Passed by value
    In,
    /// Passed by reference: read and written back
    Ref,
    /// Output only: written back
    Out,
}

/// Parameter descriptor
#[derive(Debug, Clone)]
pub struct ParamDescriptor {
    /// Parameter name
    pub name: Arc<str>,
    /// Declared type
    pub ty: ValueType,
    /// Passing mode
    pub mode: ParamMode,
    /// Parameter-level markers (not-null, return-if-*, parameter default)
    pub markers: Vec<Marker>,
}

impl ParamDescriptor {
    /// Create a by-value parameter
    pub fn new(name: &str, ty: ValueType) -> Self {
        Self {
            name: Arc::from(name),
            ty,
            mode: ParamMode::In,
            markers: Vec::new(),
        }
    }

    /// Mark as by-reference
    pub fn by_ref(mut self) -> Self {
        self.mode = ParamMode::Ref;
        self
    }

    /// Mark as output
    pub fn out(mut self) -> Self {
        self.mode = ParamMode::Out;
        self
    }

    /// Add a marker
    pub fn marker(mut self, marker: Marker) -> Self {
        self.markers.push(marker);
        self
    }

    /// Whether the value is copied back to the caller
    pub fn is_by_ref(&self) -> bool {
        self.mode != ParamMode::In
    }

    /// Value used when the caller supplies nothing
    ///
    /// A `Parameter` marker wins over the type default.
    pub fn default_value(&self) -> Value {
        self.markers
            .iter()
            .find_map(|m| match m {
                Marker::Parameter(values) => values.first().cloned(),
                _ => None,
            })
            .unwrap_or_else(|| self.ty.default_value())
    }
}

/// Shape of a member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// Method
    Method,
    /// Property with optional getter/setter
    Property {
        /// Has a getter
        readable: bool,
        /// Has a setter
        writable: bool,
    },
    /// Indexed property (parameters are the index)
    Indexer {
        /// Has a getter
        readable: bool,
        /// Has a setter
        writable: bool,
    },
}

/// Which entry point of a member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessorKind {
    /// Method invocation
    Invoke,
    /// Property / indexer read
    Get,
    /// Property / indexer write
    Set,
}

/// Coarse shape used in fingerprints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FingerprintKind {
    /// Method
    Method,
    /// Property
    Property,
    /// Indexer
    Indexer,
}

/// Structural identity of a member: name, shape and parameter types
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberFingerprint {
    /// Member name
    pub name: Arc<str>,
    /// Member shape
    pub kind: FingerprintKind,
    /// Parameter types (index types for indexers, empty for properties)
    pub params: Arc<[ValueType]>,
}

impl MemberFingerprint {
    /// Fingerprint of a method
    pub fn method(name: &str, params: &[ValueType]) -> Self {
        Self {
            name: Arc::from(name),
            kind: FingerprintKind::Method,
            params: Arc::from(params),
        }
    }

    /// Fingerprint of a property
    pub fn property(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            kind: FingerprintKind::Property,
            params: Arc::from(Vec::new()),
        }
    }

    /// Whether two fingerprints match loosely (same name, shape and arity,
    /// pairwise compatible parameter types)
    pub fn matches(&self, other: &MemberFingerprint) -> bool {
        self.name == other.name
            && self.kind == other.kind
            && self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(other.params.iter())
                .all(|(a, b)| a.is_compatible_with(b))
    }
}

impl fmt::Display for MemberFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FingerprintKind::Property => f.write_str(&self.name),
            FingerprintKind::Method | FingerprintKind::Indexer => {
                let params: Vec<String> = self.params.iter().map(|p| p.name()).collect();
                let (open, close) = if self.kind == FingerprintKind::Method {
                    ('(', ')')
                } else {
                    ('[', ']')
                };
                write!(f, "{}{}{}{}", self.name, open, params.join(", "), close)
            }
        }
    }
}

/// Member descriptor
#[derive(Clone)]
pub struct MemberDescriptor {
    /// Member name
    pub name: Arc<str>,
    /// Shape
    pub kind: MemberKind,
    /// Method parameters, or index parameters for indexers
    pub params: Vec<ParamDescriptor>,
    /// Return type for methods, value type for properties/indexers
    pub ty: ValueType,
    /// Number of generic type parameters
    pub generic_arity: u8,
    /// Member-level markers
    pub markers: Vec<Marker>,
    /// Concrete body (method) or getter
    pub body: Option<MethodBody>,
    /// Concrete setter
    pub setter: Option<MethodBody>,
}

impl MemberDescriptor {
    /// Start a method descriptor (returns void until `returns` is called)
    pub fn method(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            kind: MemberKind::Method,
            params: Vec::new(),
            ty: ValueType::Void,
            generic_arity: 0,
            markers: Vec::new(),
            body: None,
            setter: None,
        }
    }

    /// Start a read/write property descriptor
    pub fn property(name: &str, ty: ValueType) -> Self {
        Self {
            kind: MemberKind::Property {
                readable: true,
                writable: true,
            },
            ty,
            ..Self::method(name)
        }
    }

    /// Start a read/write indexer descriptor
    pub fn indexer(name: &str, ty: ValueType) -> Self {
        Self {
            kind: MemberKind::Indexer {
                readable: true,
                writable: true,
            },
            ty,
            ..Self::method(name)
        }
    }

    /// Add a parameter (index parameter for indexers)
    pub fn param(mut self, param: ParamDescriptor) -> Self {
        self.params.push(param);
        self
    }

    /// Set the return type
    pub fn returns(mut self, ty: ValueType) -> Self {
        self.ty = ty;
        self
    }

    /// Declare generic type parameters
    pub fn generic(mut self, arity: u8) -> Self {
        self.generic_arity = arity;
        self
    }

    /// Drop the setter of a property/indexer
    pub fn read_only(mut self) -> Self {
        match &mut self.kind {
            MemberKind::Property { writable, .. } | MemberKind::Indexer { writable, .. } => {
                *writable = false
            }
            MemberKind::Method => {}
        }
        self
    }

    /// Drop the getter of a property/indexer
    pub fn write_only(mut self) -> Self {
        match &mut self.kind {
            MemberKind::Property { readable, .. } | MemberKind::Indexer { readable, .. } => {
                *readable = false
            }
            MemberKind::Method => {}
        }
        self
    }

    /// Add a marker
    pub fn marker(mut self, marker: Marker) -> Self {
        self.markers.push(marker);
        self
    }

    /// Provide a concrete (virtual) method body
    pub fn body<F>(mut self, f: F) -> Self
    where
        F: Fn(&Instance, &mut [Value]) -> CallResult<Value> + Send + Sync + 'static,
    {
        self.body = Some(Arc::new(f));
        self
    }

    /// Provide a concrete getter
    pub fn getter<F>(self, f: F) -> Self
    where
        F: Fn(&Instance, &mut [Value]) -> CallResult<Value> + Send + Sync + 'static,
    {
        self.body(f)
    }

    /// Provide a concrete setter (last argument is the value)
    pub fn setter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Instance, &mut [Value]) -> CallResult<Value> + Send + Sync + 'static,
    {
        self.setter = Some(Arc::new(f));
        self
    }

    /// Structural identity
    pub fn fingerprint(&self) -> MemberFingerprint {
        let kind = match self.kind {
            MemberKind::Method => FingerprintKind::Method,
            MemberKind::Property { .. } => FingerprintKind::Property,
            MemberKind::Indexer { .. } => FingerprintKind::Indexer,
        };
        MemberFingerprint {
            name: self.name.clone(),
            kind,
            params: self.params.iter().map(|p| p.ty.clone()).collect(),
        }
    }

    /// Entry points this member exposes
    pub fn accessors(&self) -> Vec<AccessorKind> {
        match self.kind {
            MemberKind::Method => vec![AccessorKind::Invoke],
            MemberKind::Property { readable, writable }
            | MemberKind::Indexer { readable, writable } => {
                let mut out = Vec::with_capacity(2);
                if readable {
                    out.push(AccessorKind::Get);
                }
                if writable {
                    out.push(AccessorKind::Set);
                }
                out
            }
        }
    }

    /// Concrete body for an entry point
    pub fn body_for(&self, accessor: AccessorKind) -> Option<&MethodBody> {
        match accessor {
            AccessorKind::Invoke | AccessorKind::Get => self.body.as_ref(),
            AccessorKind::Set => self.setter.as_ref(),
        }
    }

    /// Whether any entry point lacks a concrete body
    pub fn is_abstract(&self) -> bool {
        self.accessors().into_iter().any(|a| self.body_for(a).is_none())
    }

    /// Whether this is a property or indexer
    pub fn is_property(&self) -> bool {
        !matches!(self.kind, MemberKind::Method)
    }

    /// Parameters of an entry point (setters get a trailing `value`)
    pub fn params_for(&self, accessor: AccessorKind) -> Vec<ParamDescriptor> {
        let mut params = self.params.clone();
        if accessor == AccessorKind::Set {
            params.push(ParamDescriptor::new("value", self.ty.clone()));
        }
        params
    }

    /// Return type of an entry point
    pub fn return_type_for(&self, accessor: AccessorKind) -> ValueType {
        match accessor {
            AccessorKind::Set => ValueType::Void,
            _ => self.ty.clone(),
        }
    }

    /// Whether any parameter is passed by reference
    pub fn has_by_ref_params(&self) -> bool {
        self.params.iter().any(|p| p.is_by_ref())
    }
}

impl fmt::Debug for MemberDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("params", &self.params.len())
            .field("ty", &self.ty)
            .field("markers", &self.markers)
            .field("abstract", &self.is_abstract())
            .finish()
    }
}

/// Field declared on a source type
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Field name
    pub name: Arc<str>,
    /// Declared type
    pub ty: ValueType,
    /// Initial value (type default when absent)
    pub initial: Option<Value>,
}

impl FieldDescriptor {
    /// Create a field
    pub fn new(name: &str, ty: ValueType) -> Self {
        Self {
            name: Arc::from(name),
            ty,
            initial: None,
        }
    }

    /// Set the initial value
    pub fn initial_value(mut self, value: Value) -> Self {
        self.initial = Some(value);
        self
    }
}

/// Constructor shape
#[derive(Debug, Clone)]
pub enum ConstructorKind {
    /// Parameterless
    Default,
    /// Positional parameters filled from the context payload, or defaults
    Params(Vec<ParamDescriptor>),
    /// Receives the whole context payload
    Context,
}

/// Constructor descriptor
#[derive(Clone)]
pub struct ConstructorDescriptor {
    /// Shape
    pub kind: ConstructorKind,
    /// Body (absent means "do nothing")
    pub body: Option<ConstructorBody>,
}

impl ConstructorDescriptor {
    /// Parameterless constructor with no body
    pub fn default_ctor() -> Self {
        Self {
            kind: ConstructorKind::Default,
            body: None,
        }
    }

    /// Parameterless constructor with a body
    pub fn with_body<F>(f: F) -> Self
    where
        F: Fn(&Instance, &InitContext) -> CallResult<()> + Send + Sync + 'static,
    {
        Self {
            kind: ConstructorKind::Default,
            body: Some(Arc::new(f)),
        }
    }

    /// Positional-parameter constructor
    pub fn with_params<F>(params: Vec<ParamDescriptor>, f: F) -> Self
    where
        F: Fn(&Instance, &InitContext) -> CallResult<()> + Send + Sync + 'static,
    {
        Self {
            kind: ConstructorKind::Params(params),
            body: Some(Arc::new(f)),
        }
    }

    /// Context-aware constructor
    pub fn with_context<F>(f: F) -> Self
    where
        F: Fn(&Instance, &InitContext) -> CallResult<()> + Send + Sync + 'static,
    {
        Self {
            kind: ConstructorKind::Context,
            body: Some(Arc::new(f)),
        }
    }
}

impl fmt::Debug for ConstructorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstructorDescriptor")
            .field("kind", &self.kind)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}
