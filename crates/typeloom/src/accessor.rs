//! Programmatic access to generated types and their members

use std::fmt;
use std::sync::Arc;

use crate::aspects::MethodCallCounter;
use crate::error::{CallError, CallResult};
use crate::factory::TypeFactory;
use crate::model::{AccessorKind, MemberKind, TypeRef};
use crate::synth::{GeneratedType, InitContext, Instance};
use crate::value::{Value, ValueType};

/// How a member is read or written
#[derive(Debug, Clone, Copy)]
enum Access {
    /// Property entry points
    Slots { get: Option<usize>, set: Option<usize> },
    /// Instance field
    Field(usize),
    /// Methods: invoked by name, never read or written
    Method,
}

/// One named member of a generated type: a property, field or method group
#[derive(Debug, Clone)]
pub struct MemberAccessor {
    owner: u64,
    name: Arc<str>,
    ty: ValueType,
    access: Access,
}

impl MemberAccessor {
    /// Member name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type (return type for methods)
    pub fn value_type(&self) -> &ValueType {
        &self.ty
    }

    /// Whether the member can be read
    pub fn has_getter(&self) -> bool {
        match self.access {
            Access::Slots { get, .. } => get.is_some(),
            Access::Field(_) => true,
            Access::Method => false,
        }
    }

    /// Whether the member can be written
    pub fn has_setter(&self) -> bool {
        match self.access {
            Access::Slots { set, .. } => set.is_some(),
            Access::Field(_) => true,
            Access::Method => false,
        }
    }

    fn check_owner(&self, instance: &Instance) -> CallResult<()> {
        if instance.generated_type().id() != self.owner {
            return Err(CallError::invalid_operation(format!(
                "'{}' is not a member of '{}'",
                self.name,
                instance.type_name()
            )));
        }
        Ok(())
    }

    /// Read the member of `instance`
    pub fn get(&self, instance: &Instance) -> CallResult<Value> {
        self.check_owner(instance)?;
        match self.access {
            Access::Slots { get: Some(slot), .. } => instance.invoke_slot(slot, &mut [], &[]),
            Access::Field(index) => Ok(instance.field_at(index)),
            _ => Err(CallError::invalid_operation(format!("'{}' has no getter", self.name))),
        }
    }

    /// Write the member of `instance`
    pub fn set(&self, instance: &Instance, value: Value) -> CallResult<()> {
        self.check_owner(instance)?;
        match self.access {
            Access::Slots { set: Some(slot), .. } => {
                instance.invoke_slot(slot, &mut [value], &[])?;
                Ok(())
            }
            Access::Field(index) => {
                instance.set_field_at(index, value);
                Ok(())
            }
            _ => Err(CallError::invalid_operation(format!("'{}' has no setter", self.name))),
        }
    }

    /// Invoke the method on `instance`
    pub fn invoke(&self, instance: &Instance, args: Vec<Value>) -> CallResult<Value> {
        self.check_owner(instance)?;
        match self.access {
            Access::Method => instance.call(&self.name, args),
            _ => Err(CallError::invalid_operation(format!("'{}' is not a method", self.name))),
        }
    }
}

/// Handle on a generated type: instance creation and member lookup
#[derive(Clone)]
pub struct TypeAccessor {
    ty: Arc<GeneratedType>,
    factory: TypeFactory,
    members: Arc<[MemberAccessor]>,
}

impl TypeAccessor {
    pub(crate) fn new(ty: Arc<GeneratedType>, factory: TypeFactory) -> Self {
        let members = collect_members(&ty).into();
        Self { ty, factory, members }
    }

    /// Generated type
    pub fn generated_type(&self) -> &Arc<GeneratedType> {
        &self.ty
    }

    /// Source descriptor
    pub fn source_type(&self) -> &TypeRef {
        self.ty.source()
    }

    /// Generated type name
    pub fn name(&self) -> &str {
        self.ty.name()
    }

    /// Owning factory
    pub fn factory(&self) -> &TypeFactory {
        &self.factory
    }

    /// New instance through the object factory, if any, else the generated
    /// constructor
    pub fn create_instance(&self) -> CallResult<Instance> {
        self.create(None)
    }

    /// New instance built from `ctx`
    pub fn create_instance_with(&self, ctx: InitContext) -> CallResult<Instance> {
        self.create(Some(&ctx))
    }

    fn create(&self, ctx: Option<&InitContext>) -> CallResult<Instance> {
        let object_factory = self
            .ty
            .object_factory()
            .cloned()
            .or_else(|| self.factory.object_factory_for(self.ty.source()));
        match object_factory {
            Some(f) => f.create_instance(self, ctx),
            None => self.construct(ctx),
        }
    }

    /// Run the generated constructor, bypassing any object factory
    pub fn construct(&self, ctx: Option<&InitContext>) -> CallResult<Instance> {
        self.ty.construct(ctx)
    }

    /// All members, in declaration order
    pub fn members(&self) -> &[MemberAccessor] {
        &self.members
    }

    /// Member by name
    pub fn member(&self, name: &str) -> CallResult<MemberAccessor> {
        self.members
            .iter()
            .find(|m| &*m.name == name)
            .cloned()
            .ok_or_else(|| {
                CallError::invalid_operation(format!(
                    "'{}' has no member '{}'",
                    self.ty.name(),
                    name
                ))
            })
    }

    /// Member by position in [`members`](Self::members)
    pub fn member_at(&self, index: usize) -> CallResult<MemberAccessor> {
        self.members.get(index).cloned().ok_or_else(|| {
            CallError::invalid_operation(format!(
                "'{}' has {} members, no member #{}",
                self.ty.name(),
                self.members.len(),
                index
            ))
        })
    }

    /// Call counter of the member named `name`
    pub fn counter(&self, name: &str) -> Option<Arc<dyn MethodCallCounter>> {
        self.ty.counter(name).cloned()
    }
}

impl fmt::Debug for TypeAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeAccessor")
            .field("type", &self.ty.name())
            .field("members", &self.members.len())
            .finish()
    }
}

fn collect_members(ty: &GeneratedType) -> Vec<MemberAccessor> {
    let owner = ty.id();
    let mut members: Vec<MemberAccessor> = Vec::new();

    for (slot, compiled) in ty.members().iter().enumerate() {
        if compiled.qualifier.is_some() {
            continue;
        }
        let method = &compiled.method;
        let name = method.member.name.clone();
        let existing = members.iter().position(|m| m.name == name);
        match (&method.member.kind, method.accessor) {
            (MemberKind::Property { .. }, accessor) => {
                let index = existing.unwrap_or_else(|| {
                    members.push(MemberAccessor {
                        owner,
                        name,
                        ty: method.member.ty.clone(),
                        access: Access::Slots { get: None, set: None },
                    });
                    members.len() - 1
                });
                if let Access::Slots { get, set } = &mut members[index].access {
                    match accessor {
                        AccessorKind::Get => *get = Some(slot),
                        AccessorKind::Set => *set = Some(slot),
                        AccessorKind::Invoke => {}
                    }
                }
            }
            (MemberKind::Method, _) if existing.is_none() => members.push(MemberAccessor {
                owner,
                name,
                ty: method.return_type.clone(),
                access: Access::Method,
            }),
            // Indexers take arguments; they are reached through Instance
            _ => {}
        }
    }

    for (index, field) in ty.fields().iter().enumerate() {
        if field.name.starts_with('$') || members.iter().any(|m| m.name == field.name) {
            continue;
        }
        members.push(MemberAccessor {
            owner,
            name: field.name.clone(),
            ty: field.ty.clone(),
            access: Access::Field(index),
        });
    }
    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldDescriptor, MemberDescriptor, TypeDescriptor};

    fn person() -> TypeRef {
        TypeDescriptor::abstract_class("Person")
            .field(FieldDescriptor::new("Age", ValueType::Int).initial_value(Value::Int(30)))
            .member(MemberDescriptor::property("Name", ValueType::Str))
            .member(MemberDescriptor::property("Id", ValueType::Int).read_only())
            .member(MemberDescriptor::method("Greet").returns(ValueType::Str))
            .build()
    }

    #[test]
    fn test_member_lookup() {
        let factory = TypeFactory::default();
        let accessor = factory.accessor(&person()).unwrap();
        let names: Vec<&str> = accessor.members().iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["Name", "Id", "Greet", "Age"]);

        let id = accessor.member("Id").unwrap();
        assert!(id.has_getter());
        assert!(!id.has_setter());
        assert_eq!(accessor.member_at(0).unwrap().name(), "Name");
        assert!(accessor.member("Missing").is_err());
        assert!(accessor.member_at(10).is_err());
    }

    #[test]
    fn test_get_and_set() {
        let factory = TypeFactory::default();
        let accessor = factory.accessor(&person()).unwrap();
        let obj = accessor.create_instance().unwrap();

        let name = accessor.member("Name").unwrap();
        name.set(&obj, Value::str("Ada")).unwrap();
        assert_eq!(name.get(&obj).unwrap(), Value::str("Ada"));

        let age = accessor.member("Age").unwrap();
        assert_eq!(age.get(&obj).unwrap(), Value::Int(30));
        age.set(&obj, Value::Int(31)).unwrap();
        assert_eq!(obj.field("Age").unwrap(), Value::Int(31));

        let id = accessor.member("Id").unwrap();
        assert!(matches!(id.set(&obj, Value::Int(1)), Err(CallError::InvalidOperation(_))));
        assert_eq!(accessor.member("Greet").unwrap().invoke(&obj, vec![]).unwrap(), Value::Null);
    }

    #[test]
    fn test_foreign_instance_rejected() {
        let factory = TypeFactory::default();
        let accessor = factory.accessor(&person()).unwrap();
        let other = TypeDescriptor::abstract_class("Other")
            .member(MemberDescriptor::property("Name", ValueType::Str))
            .build();
        let obj = factory.create_instance(&other).unwrap();
        assert!(accessor.member("Name").unwrap().get(&obj).is_err());
    }
}
