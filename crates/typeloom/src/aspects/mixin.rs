//! Interface implementation by delegation to a held object

use std::sync::Arc;

use crate::builder::{priority, BuildContext, BuildStep, TypeBuilder};
use crate::error::{BuildError, BuildResult, CallError, CallResult};
use crate::intercept::body_stage;
use crate::model::AccessorKind;
use crate::resolve::MemberOrigin;
use crate::synth::Instance;
use crate::value::Value;

#[derive(Clone, Copy)]
enum Holder {
    Field(usize),
    Property(usize),
}

impl Holder {
    fn read(self, this: &Instance) -> CallResult<Value> {
        match self {
            Holder::Field(index) => Ok(this.field_at(index)),
            Holder::Property(slot) => this.invoke_slot(slot, &mut [], &[]),
        }
    }
}

/// Forwards interface members to the object held in a field or property
///
/// Members the type declares itself with `mixin_override` are not routed
/// here; the resolver maps them to the class member.
pub struct MixinBuilder;

impl TypeBuilder for MixinBuilder {
    fn name(&self) -> &str {
        "mixin"
    }

    fn priority(&self, _ctx: &BuildContext<'_>) -> i32 {
        priority::ABOVE_NORMAL
    }

    fn is_applied(&self, ctx: &BuildContext<'_>) -> bool {
        ctx.step() == BuildStep::BuildMember
            && matches!(ctx.member_plan().map(|p| &p.origin), Some(MemberOrigin::Mixin(_)))
    }

    fn owns_body(&self) -> bool {
        true
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> BuildResult<()> {
        let (Some(plan), Some(accessor)) = (ctx.member_plan(), ctx.accessor()) else {
            return Ok(());
        };
        let MemberOrigin::Mixin(spec) = &plan.origin else {
            return Ok(());
        };
        let spec = spec.clone();
        let fingerprint = plan.member.fingerprint();

        let holder = match ctx.field_index(&spec.member) {
            Some(index) => Holder::Field(index),
            None => ctx
                .units()
                .iter()
                .find(|u| {
                    u.accessor == AccessorKind::Get
                        && u.method.name() == &*spec.member
                        && u.method.params.is_empty()
                })
                .map(|u| Holder::Property(u.slot))
                .ok_or_else(|| BuildError::InvalidMarker {
                    member: ctx.source().name().to_string(),
                    detail: format!(
                        "mixin of '{}' names '{}', neither a field nor a readable property",
                        spec.interface.name(),
                        spec.member
                    ),
                })?,
        };

        let null_message: Arc<str> = spec
            .message
            .clone()
            .unwrap_or_else(|| Arc::from(format!("'{}' is null", spec.member)));
        let member = spec.member.clone();
        ctx.emit_body(body_stage(move |info| {
            let held = holder.read(info.object())?;
            let target = match &held {
                Value::Null => return Err(CallError::invalid_operation(null_message.to_string())),
                Value::Object(o) => o.clone(),
                other => {
                    return Err(CallError::invalid_operation(format!(
                        "'{}' holds a {}, not an object",
                        member,
                        other.kind_name()
                    )))
                }
            };
            let slot = target
                .generated_type()
                .find_slot(&fingerprint, accessor)
                .ok_or_else(|| {
                    CallError::invalid_operation(format!(
                        "'{}' does not provide '{}'",
                        target.type_name(),
                        fingerprint
                    ))
                })?;
            let type_args = info.type_arguments().to_vec();
            target.invoke_slot(slot, &mut info.parameter_values, &type_args)
        }))
    }
}
