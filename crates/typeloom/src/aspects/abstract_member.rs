//! Default bodies for abstract members

use std::sync::Arc;

use crate::builder::{priority, BuildContext, BuildStep, CtorHook, FieldInit, TypeBuilder};
use crate::error::BuildResult;
use crate::intercept::body_stage;
use crate::model::{AccessorKind, Marker, MarkerKind, MemberKind, ParamMode};
use crate::resolve::MemberOrigin;
use crate::synth::{InitContext, Instance};
use crate::value::{Value, ValueType};

use super::auto_impl::auto_implement_in_effect;
use super::lazy::InstanceRequest;

/// Name of the field backing a generated property
pub(crate) fn property_field(name: &str) -> String {
    format!("$prop_{}", name)
}

/// Whether the current entry point gets a generated body
pub(super) fn generates_default(ctx: &BuildContext<'_>) -> bool {
    if ctx.concrete_body().is_some() {
        return false;
    }
    match ctx.member_plan().map(|p| &p.origin) {
        Some(MemberOrigin::Declared | MemberOrigin::Inherited) => true,
        Some(MemberOrigin::Interface(_)) => auto_implement_in_effect(ctx),
        _ => false,
    }
}

/// First value of a `parameter` marker on the member
fn parameter_value(ctx: &BuildContext<'_>) -> Option<Value> {
    ctx.markers().iter().find_map(|m| match m {
        Marker::Parameter(values) => values.first().cloned(),
        _ => None,
    })
}

/// Emit the default body of the current entry point
///
/// Methods zero their out parameters and return the default of the return
/// type (the type argument's default for generic returns). Properties read
/// and write a backing field; object-typed ones get an instance at
/// construction. Indexers store per-instance values by index.
pub(super) fn emit_default_body(ctx: &mut BuildContext<'_>) -> BuildResult<()> {
    let (Some(member), Some(unit)) = (ctx.member().cloned(), ctx.unit()) else {
        return Ok(());
    };
    let accessor = unit.accessor;
    let plan_index = unit.plan_index;

    match member.kind {
        MemberKind::Method => {
            let outs: Vec<(usize, ValueType)> = member
                .params
                .iter()
                .enumerate()
                .filter(|(_, p)| p.mode == ParamMode::Out)
                .map(|(i, p)| (i, p.ty.clone()))
                .collect();
            ctx.emit_body(body_stage(move |info| {
                let type_args = info.type_arguments().to_vec();
                for (i, ty) in &outs {
                    if let Some(slot) = info.parameter_values.get_mut(*i) {
                        *slot = ty.default_with(&type_args);
                    }
                }
                Ok(info.method().return_type.default_with(&type_args))
            }))
        }
        MemberKind::Property { .. } => {
            // On object properties the parameter values go to the instance constructor
            let is_object = matches!(member.ty, ValueType::Object(_));
            let initial = if is_object { None } else { parameter_value(ctx) };
            let eager = is_object
                && !ctx.has_marker(MarkerKind::NoInstance)
                && !ctx.has_marker(MarkerKind::LazyInstance);
            let init = initial.map(FieldInit::Value).unwrap_or(FieldInit::Default);
            let field = ctx.define_field(&property_field(&member.name), member.ty.clone(), init);

            // One hook per property, registered with its first accessor
            if eager && member.accessors().first() == Some(&accessor) {
                if let Some(request) = InstanceRequest::from_context(ctx) {
                    let factory = ctx.services().factory().clone();
                    let hook: CtorHook =
                        Arc::new(move |this: &Instance, _init: Option<&InitContext>| {
                            if this.field_at(field).is_null() {
                                let value = request.create(&factory, this)?;
                                this.set_field_at(field, value);
                            }
                            Ok(())
                        });
                    ctx.add_constructor_hook(hook);
                }
            }

            match accessor {
                AccessorKind::Set => ctx.emit_body(body_stage(move |info| {
                    let value = info.parameter_values.last().cloned().unwrap_or_default();
                    info.object().set_field_at(field, value);
                    Ok(Value::Null)
                })),
                _ => ctx.emit_body(body_stage(move |info| Ok(info.object().field_at(field)))),
            }
        }
        MemberKind::Indexer { .. } => {
            let ty = member.ty.clone();
            match accessor {
                AccessorKind::Set => ctx.emit_body(body_stage(move |info| {
                    let Some((value, index)) = info.parameter_values.split_last() else {
                        return Ok(Value::Null);
                    };
                    info.object().indexed_set(plan_index, index.to_vec(), value.clone());
                    Ok(Value::Null)
                })),
                _ => ctx.emit_body(body_stage(move |info| {
                    Ok(info
                        .object()
                        .indexed_get(plan_index, &info.parameter_values)
                        .unwrap_or_else(|| ty.default_value()))
                })),
            }
        }
    }
}

/// Gives abstract members of a class a default body
///
/// Runs last among the body owners, so any plugin that claims a member
/// takes precedence.
pub struct AbstractMemberBuilder;

impl TypeBuilder for AbstractMemberBuilder {
    fn name(&self) -> &str {
        "abstract_member"
    }

    fn priority(&self, _ctx: &BuildContext<'_>) -> i32 {
        priority::LOWEST
    }

    fn is_applied(&self, ctx: &BuildContext<'_>) -> bool {
        ctx.step() == BuildStep::BuildMember
            && ctx.concrete_body().is_none()
            && matches!(
                ctx.member_plan().map(|p| &p.origin),
                Some(MemberOrigin::Declared | MemberOrigin::Inherited)
            )
    }

    fn owns_body(&self) -> bool {
        true
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> BuildResult<()> {
        emit_default_body(ctx)
    }
}
