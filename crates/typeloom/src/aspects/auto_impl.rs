//! Default implementations for interface members

use crate::builder::{priority, BuildContext, BuildStep, TypeBuilder};
use crate::error::BuildResult;
use crate::model::{MarkerKind, TypeRef};
use crate::resolve::MemberOrigin;

use super::abstract_member::emit_default_body;

/// Whether `ty` or anything it extends asks for generated interface members
pub(crate) fn auto_implemented(ty: &TypeRef) -> bool {
    ty.hierarchy()
        .iter()
        .any(|t| t.markers().iter().any(|m| m.kind() == MarkerKind::AutoImplementInterface))
}

/// Whether the current interface member should get a generated default
pub(super) fn auto_implement_in_effect(ctx: &BuildContext<'_>) -> bool {
    let Some(MemberOrigin::Interface(interface)) = ctx.member_plan().map(|p| &p.origin) else {
        return false;
    };
    ctx.plan().has_type_marker(MarkerKind::AutoImplementInterface)
        || ctx.has_marker(MarkerKind::AutoImplementInterface)
        || auto_implemented(interface)
}

/// Implements interface members the type leaves open with default bodies,
/// when the type or the interface carries `auto_implement_interface`
///
/// Properties get a backing field; methods return the default of their
/// return type.
pub struct AutoImplementBuilder;

impl TypeBuilder for AutoImplementBuilder {
    fn name(&self) -> &str {
        "auto_implement_interface"
    }

    fn priority(&self, _ctx: &BuildContext<'_>) -> i32 {
        priority::LOW
    }

    fn is_applied(&self, ctx: &BuildContext<'_>) -> bool {
        ctx.step() == BuildStep::BuildMember
            && ctx.concrete_body().is_none()
            && auto_implement_in_effect(ctx)
    }

    fn owns_body(&self) -> bool {
        true
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> BuildResult<()> {
        emit_default_body(ctx)
    }
}
