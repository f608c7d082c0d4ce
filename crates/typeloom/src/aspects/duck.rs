//! Duck-typed interface members

use crate::builder::{priority, BuildContext, BuildStep, TypeBuilder};
use crate::error::{BuildError, BuildResult, CallError};
use crate::intercept::body_stage;
use crate::model::MustImplementPolicy;
use crate::resolve::{duck_target_field, Delegation, MemberOrigin};

/// Forwards each interface member to the backing object picked when the
/// type was resolved
///
/// Members no backing object provides follow the must-implement policy:
/// return the type default, or fail with an invalid-operation error.
pub struct DuckTypeBuilder;

impl TypeBuilder for DuckTypeBuilder {
    fn name(&self) -> &str {
        "duck_type"
    }

    fn priority(&self, _ctx: &BuildContext<'_>) -> i32 {
        priority::HIGH
    }

    fn is_applied(&self, ctx: &BuildContext<'_>) -> bool {
        ctx.step() == BuildStep::BuildMember
            && matches!(ctx.member_plan().map(|p| &p.origin), Some(MemberOrigin::Duck))
    }

    fn owns_body(&self) -> bool {
        true
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> BuildResult<()> {
        let (Some(plan), Some(method), Some(accessor)) =
            (ctx.member_plan(), ctx.method(), ctx.accessor())
        else {
            return Ok(());
        };
        let method = method.clone();
        let policy = plan.policy;
        let policy_message = plan.policy_message.clone();

        match plan.delegation.clone() {
            Some(Delegation::Target { backing, fingerprint }) => {
                let field = ctx.field_index(&duck_target_field(backing));
                let slot = ctx
                    .plan()
                    .backing()
                    .get(backing)
                    .and_then(|ty| ty.find_slot(&fingerprint, accessor));
                let (Some(field), Some(slot)) = (field, slot) else {
                    return Err(BuildError::DuckTyping {
                        interface: ctx.source().name().to_string(),
                        reason: format!("lost the target of '{}'", method.full_name()),
                    });
                };
                ctx.emit_body(body_stage(move |info| {
                    let target = info.object().field_at(field);
                    let target = target.as_object().ok_or_else(|| {
                        CallError::invalid_operation(format!(
                            "'{}' has no target object",
                            info.object().type_name()
                        ))
                    })?;
                    let type_args = info.type_arguments().to_vec();
                    target.invoke_slot(slot, &mut info.parameter_values, &type_args)
                }))
            }
            Some(Delegation::Missing) => {
                let message = policy_message
                    .as_deref()
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        format!(
                            "'{}' is not implemented by the target object",
                            method.full_name()
                        )
                    });
                match policy {
                    MustImplementPolicy::OptionalThrow => ctx.emit_body(body_stage(move |_| {
                        Err(CallError::invalid_operation(message.clone()))
                    })),
                    MustImplementPolicy::OptionalDefault => ctx.emit_body(body_stage(|info| {
                        Ok(info.method().return_type.default_with(info.type_arguments()))
                    })),
                    MustImplementPolicy::Required => Err(BuildError::DuckTyping {
                        interface: ctx.source().name().to_string(),
                        reason: message,
                    }),
                }
            }
            None => Err(BuildError::InvalidState(format!(
                "duck member '{}' has no delegation",
                method.full_name()
            ))),
        }
    }
}
