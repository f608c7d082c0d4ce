//! Property instances created on first access, and array properties

use tracing::trace;

use crate::builder::{priority, BuildContext, BuildStep, FieldInit, TypeBuilder};
use crate::error::{BuildError, BuildResult, CallError, CallResult};
use crate::factory::FactoryHandle;
use crate::intercept::body_stage;
use crate::model::{AccessorKind, Marker, MarkerKind, MemberKind, TypeRef};
use crate::synth::{InitContext, Instance};
use crate::value::{ArrayRef, Value, ValueType};

use super::abstract_member::{generates_default, property_field};
use super::auto_impl::auto_implemented;

/// What to instantiate for an object-typed property
#[derive(Debug, Clone)]
pub struct InstanceRequest {
    /// Declared property type
    pub declared: TypeRef,
    /// Type named by `instance_type` or a matching `global_instance_type`
    pub implementation: Option<TypeRef>,
    /// Constructor arguments from a `parameter` marker
    pub parameters: Vec<Value>,
}

impl InstanceRequest {
    /// Request for the property in scope, if it is object-typed
    pub fn from_context(ctx: &BuildContext<'_>) -> Option<Self> {
        let member = ctx.member()?;
        let ValueType::Object(declared) = &member.ty else {
            return None;
        };
        let implementation = ctx
            .markers()
            .iter()
            .find_map(|m| match m {
                Marker::InstanceType(ty) => Some(ty.clone()),
                _ => None,
            })
            .or_else(|| {
                ctx.plan().type_markers.iter().find_map(|m| match m {
                    Marker::GlobalInstanceType {
                        key,
                        implementation,
                    } if key.id() == declared.id() => Some(implementation.clone()),
                    _ => None,
                })
            });
        let parameters = ctx
            .markers()
            .iter()
            .find_map(|m| match m {
                Marker::Parameter(values) => Some(values.clone()),
                _ => None,
            })
            .unwrap_or_default();
        Some(Self {
            declared: declared.clone(),
            implementation,
            parameters,
        })
    }

    /// Create the instance for `parent`
    ///
    /// Interfaces with no registered implementation that do not ask for
    /// generated members yield null.
    pub fn create(&self, factory: &FactoryHandle, parent: &Instance) -> CallResult<Value> {
        let factory = factory
            .upgrade()
            .ok_or_else(|| CallError::invalid_operation("the type factory has been dropped"))?;
        let requested = self.implementation.as_ref().unwrap_or(&self.declared);
        let ty = factory.implementation_of(requested);
        if ty.is_interface() && !auto_implemented(&ty) {
            trace!(property_type = %ty.name(), "no instantiable type for property");
            return Ok(Value::Null);
        }
        let init = InitContext::with_parameters(self.parameters.clone()).parent(parent);
        let accessor = factory.accessor(&ty).map_err(|e| e.into_call())?;
        Ok(Value::Object(accessor.create_instance_with(init)?))
    }
}

fn is_plain_property(ctx: &BuildContext<'_>) -> bool {
    ctx.member().map_or(false, |m| matches!(m.kind, MemberKind::Property { .. }))
}

/// Creates the instance of an object-typed property on first read
///
/// Creation happens under the field lock, so concurrent first reads see the
/// same instance.
pub struct LazyInstanceBuilder;

impl TypeBuilder for LazyInstanceBuilder {
    fn name(&self) -> &str {
        "lazy_instance"
    }

    fn priority(&self, _ctx: &BuildContext<'_>) -> i32 {
        priority::BELOW_NORMAL
    }

    fn is_applied(&self, ctx: &BuildContext<'_>) -> bool {
        ctx.step() == BuildStep::BuildMember
            && ctx.has_marker(MarkerKind::LazyInstance)
            && is_plain_property(ctx)
            && ctx.member().map_or(false, |m| matches!(m.ty, ValueType::Object(_)))
            && generates_default(ctx)
    }

    fn owns_body(&self) -> bool {
        true
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> BuildResult<()> {
        let (Some(member), Some(accessor)) = (ctx.member().cloned(), ctx.accessor()) else {
            return Ok(());
        };
        let request = InstanceRequest::from_context(ctx).ok_or_else(|| BuildError::InvalidMarker {
            member: ctx.member_label(),
            detail: "lazy_instance applies to object-typed properties".to_string(),
        })?;
        let field = ctx.define_field(
            &property_field(&member.name),
            member.ty.clone(),
            FieldInit::Default,
        );

        match accessor {
            AccessorKind::Set => ctx.emit_body(body_stage(move |info| {
                let value = info.parameter_values.last().cloned().unwrap_or_default();
                info.object().set_field_at(field, value);
                Ok(Value::Null)
            })),
            _ => {
                let factory = ctx.services().factory().clone();
                ctx.emit_body(body_stage(move |info| {
                    let this = info.object().clone();
                    this.with_field(field, |slot| -> CallResult<Value> {
                        if slot.is_null() {
                            *slot = request.create(&factory, &this)?;
                        }
                        Ok(slot.clone())
                    })
                    .unwrap_or_else(|| {
                        Err(CallError::invalid_operation("property field is missing"))
                    })
                }))
            }
        }
    }
}

/// Array properties never read as null
///
/// Without `lazy_instance` an unset property reads as a fresh empty array
/// each time; with it the empty array is created once and kept.
pub struct ArrayLazyInitBuilder;

impl TypeBuilder for ArrayLazyInitBuilder {
    fn name(&self) -> &str {
        "array_lazy_init"
    }

    fn priority(&self, _ctx: &BuildContext<'_>) -> i32 {
        priority::BELOW_NORMAL
    }

    fn is_applied(&self, ctx: &BuildContext<'_>) -> bool {
        ctx.step() == BuildStep::BuildMember
            && is_plain_property(ctx)
            && ctx.member().map_or(false, |m| matches!(m.ty, ValueType::Array(_)))
            && generates_default(ctx)
    }

    fn owns_body(&self) -> bool {
        true
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> BuildResult<()> {
        let (Some(member), Some(accessor)) = (ctx.member().cloned(), ctx.accessor()) else {
            return Ok(());
        };
        let keep = ctx.has_marker(MarkerKind::LazyInstance);
        let field = ctx.define_field(
            &property_field(&member.name),
            member.ty.clone(),
            FieldInit::Default,
        );

        match accessor {
            AccessorKind::Set => ctx.emit_body(body_stage(move |info| {
                let value = info.parameter_values.last().cloned().unwrap_or_default();
                info.object().set_field_at(field, value);
                Ok(Value::Null)
            })),
            _ if keep => ctx.emit_body(body_stage(move |info| {
                info.object()
                    .with_field(field, |slot| {
                        if slot.is_null() {
                            *slot = Value::Array(ArrayRef::empty());
                        }
                        slot.clone()
                    })
                    .ok_or_else(|| CallError::invalid_operation("property field is missing"))
            })),
            _ => ctx.emit_body(body_stage(move |info| {
                let value = info.object().field_at(field);
                Ok(if value.is_null() { Value::Array(ArrayRef::empty()) } else { value })
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::TypeFactory;
    use crate::model::{MemberDescriptor, TypeDescriptor};

    #[test]
    fn test_array_property_reads_empty() {
        let holder = TypeDescriptor::abstract_class("Holder")
            .member(MemberDescriptor::property("Items", ValueType::array_of(ValueType::Int)))
            .build();
        let factory = TypeFactory::default();
        let obj = factory.create_instance(&holder).unwrap();

        let first = obj.get("Items").unwrap();
        let second = obj.get("Items").unwrap();
        assert_eq!(first.as_array().map(|a| a.len()), Some(0));
        assert!(!first.as_array().unwrap().ptr_eq(second.as_array().unwrap()));

        let items = ArrayRef::new(vec![Value::Int(1)]);
        obj.set("Items", Value::Array(items.clone())).unwrap();
        assert!(obj.get("Items").unwrap().as_array().unwrap().ptr_eq(&items));
    }

    #[test]
    fn test_lazy_array_is_kept() {
        let holder = TypeDescriptor::abstract_class("LazyHolder")
            .member(
                MemberDescriptor::property("Items", ValueType::array_of(ValueType::Str))
                    .marker(Marker::lazy_instance()),
            )
            .build();
        let factory = TypeFactory::default();
        let obj = factory.create_instance(&holder).unwrap();

        let first = obj.get("Items").unwrap();
        let second = obj.get("Items").unwrap();
        assert!(first.as_array().unwrap().ptr_eq(second.as_array().unwrap()));
    }

    #[test]
    fn test_lazy_instance_created_once() {
        let child = TypeDescriptor::abstract_class("Child")
            .member(MemberDescriptor::property("Name", ValueType::Str))
            .build();
        let parent = TypeDescriptor::abstract_class("Parent")
            .member(
                MemberDescriptor::property("Child", ValueType::Object(child.clone()))
                    .marker(Marker::lazy_instance()),
            )
            .build();
        let factory = TypeFactory::default();
        let obj = factory.create_instance(&parent).unwrap();

        let slot = obj.generated_type().field_index(&property_field("Child")).unwrap();
        assert!(obj.field_at(slot).is_null());

        let first = obj.get("Child").unwrap();
        let second = obj.get("Child").unwrap();
        let first = first.as_object().unwrap();
        assert!(first.is_instance_of(&child));
        assert!(first.ptr_eq(second.as_object().unwrap()));
    }
}
