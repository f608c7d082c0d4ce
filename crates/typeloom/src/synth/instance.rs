//! Instances of generated types

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::GeneratedType;
use crate::error::{CallError, CallResult};
use crate::model::{AccessorKind, TypeRef};
use crate::value::{Value, ValueType};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Construction payload
#[derive(Debug, Clone, Default)]
pub struct InitContext {
    /// Positional constructor arguments
    pub parameters: Vec<Value>,
    /// Object that owns the instance being created (property instances)
    pub parent: Option<Instance>,
}

impl InitContext {
    /// Empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Context with positional arguments
    pub fn with_parameters(parameters: Vec<Value>) -> Self {
        Self {
            parameters,
            parent: None,
        }
    }

    /// Set the owning object
    pub fn parent(mut self, parent: &Instance) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Positional argument
    pub fn parameter(&self, index: usize) -> Option<&Value> {
        self.parameters.get(index)
    }
}

struct InstanceData {
    id: u64,
    ty: Arc<GeneratedType>,
    fields: Box<[Mutex<Value>]>,
    indexed: Mutex<FxHashMap<(usize, Vec<Value>), Value>>,
}

/// Object of a generated type
///
/// Cloning shares the object. Fields are individually locked, so a generated
/// type may be used from several threads at once.
#[derive(Clone)]
pub struct Instance(Arc<InstanceData>);

impl Instance {
    pub(crate) fn allocate(ty: Arc<GeneratedType>) -> Self {
        let fields = ty
            .fields()
            .iter()
            .map(|f| Mutex::new(f.initial_value()))
            .collect();
        Self(Arc::new(InstanceData {
            id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            ty,
            fields,
            indexed: Mutex::new(FxHashMap::default()),
        }))
    }

    /// Process-unique object id
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Name of the generated type
    pub fn type_name(&self) -> &str {
        self.0.ty.name()
    }

    /// Generated type
    pub fn generated_type(&self) -> &Arc<GeneratedType> {
        &self.0.ty
    }

    /// Source type the object implements
    pub fn source_type(&self) -> &TypeRef {
        self.0.ty.source()
    }

    /// Check if the object is (or implements) `ty`
    pub fn is_instance_of(&self, ty: &TypeRef) -> bool {
        self.0.ty.implements(ty)
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Invoke a method
    pub fn call(&self, name: &str, args: Vec<Value>) -> CallResult<Value> {
        self.call_generic(name, &[], args)
    }

    /// Invoke a method with by-reference arguments written back into `args`
    pub fn call_ref(&self, name: &str, args: &mut [Value]) -> CallResult<Value> {
        let slot = self.0.ty.resolve_call(name, AccessorKind::Invoke, args, None)?;
        self.invoke_slot(slot, args, &[])
    }

    /// Invoke a generic method
    pub fn call_generic(
        &self,
        name: &str,
        type_args: &[ValueType],
        mut args: Vec<Value>,
    ) -> CallResult<Value> {
        let slot = self.0.ty.resolve_call(name, AccessorKind::Invoke, &args, None)?;
        let arity = self.0.ty.member(slot).method.member.generic_arity as usize;
        if !type_args.is_empty() && type_args.len() != arity {
            return Err(CallError::invalid_operation(format!(
                "'{}' expects {} type argument(s), got {}",
                name,
                arity,
                type_args.len()
            )));
        }
        self.invoke_slot(slot, &mut args, type_args)
    }

    /// Invoke a method through an interface (explicit implementations first)
    pub fn call_via(
        &self,
        interface: &TypeRef,
        name: &str,
        mut args: Vec<Value>,
    ) -> CallResult<Value> {
        let slot = self
            .0
            .ty
            .resolve_call(name, AccessorKind::Invoke, &args, Some(interface))?;
        self.invoke_slot(slot, &mut args, &[])
    }

    /// Read a property through an interface
    pub fn get_via(&self, interface: &TypeRef, name: &str) -> CallResult<Value> {
        let slot = self.0.ty.resolve_call(name, AccessorKind::Get, &[], Some(interface))?;
        self.invoke_slot(slot, &mut [], &[])
    }

    /// Read a property
    pub fn get(&self, name: &str) -> CallResult<Value> {
        let slot = self.0.ty.resolve_call(name, AccessorKind::Get, &[], None)?;
        self.invoke_slot(slot, &mut [], &[])
    }

    /// Write a property
    pub fn set(&self, name: &str, value: Value) -> CallResult<()> {
        let mut args = [value];
        let slot = self.0.ty.resolve_call(name, AccessorKind::Set, &args, None)?;
        self.invoke_slot(slot, &mut args, &[])?;
        Ok(())
    }

    /// Read an indexer
    pub fn get_index(&self, name: &str, index: Vec<Value>) -> CallResult<Value> {
        let mut args = index;
        let slot = self.0.ty.resolve_call(name, AccessorKind::Get, &args, None)?;
        self.invoke_slot(slot, &mut args, &[])
    }

    /// Write an indexer
    pub fn set_index(&self, name: &str, index: Vec<Value>, value: Value) -> CallResult<()> {
        let mut args = index;
        args.push(value);
        let slot = self.0.ty.resolve_call(name, AccessorKind::Set, &args, None)?;
        self.invoke_slot(slot, &mut args, &[])?;
        Ok(())
    }

    /// Invoke an entry point by slot
    pub fn invoke_slot(
        &self,
        slot: usize,
        args: &mut [Value],
        type_args: &[ValueType],
    ) -> CallResult<Value> {
        let member = self.0.ty.member(slot);
        let expected = member.method.params.len();
        if args.len() != expected {
            return Err(CallError::invalid_operation(format!(
                "'{}' expects {} argument(s), got {}",
                member.method.full_name(),
                expected,
                args.len()
            )));
        }
        member.chain.invoke(&member.method, self, args, type_args)
    }

    /// Read a field by name
    pub fn field(&self, name: &str) -> CallResult<Value> {
        let index = self.field_index(name)?;
        Ok(self.field_at(index))
    }

    /// Write a field by name
    pub fn set_field(&self, name: &str, value: Value) -> CallResult<()> {
        let index = self.field_index(name)?;
        self.set_field_at(index, value);
        Ok(())
    }

    fn field_index(&self, name: &str) -> CallResult<usize> {
        self.0.ty.field_index(name).ok_or_else(|| {
            CallError::invalid_operation(format!("'{}' has no field '{}'", self.type_name(), name))
        })
    }

    /// Read a field by index
    pub fn field_at(&self, index: usize) -> Value {
        self.0.fields.get(index).map(|f| f.lock().clone()).unwrap_or_default()
    }

    /// Write a field by index
    pub fn set_field_at(&self, index: usize, value: Value) {
        if let Some(field) = self.0.fields.get(index) {
            *field.lock() = value;
        }
    }

    /// Run `f` with the field locked; lets get-or-create happen atomically
    pub fn with_field<R>(&self, index: usize, f: impl FnOnce(&mut Value) -> R) -> Option<R> {
        self.0.fields.get(index).map(|field| f(&mut field.lock()))
    }

    /// Read per-instance indexed storage
    pub(crate) fn indexed_get(&self, slot: usize, key: &[Value]) -> Option<Value> {
        self.0.indexed.lock().get(&(slot, key.to_vec())).cloned()
    }

    /// Write per-instance indexed storage
    pub(crate) fn indexed_set(&self, slot: usize, key: Vec<Value>, value: Value) {
        self.0.indexed.lock().insert((slot, key), value);
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_name(), self.id())
    }
}
