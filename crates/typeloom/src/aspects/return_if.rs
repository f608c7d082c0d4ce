//! Early return on argument values

use crate::builder::{priority, BuildContext, BuildStep, TypeBuilder};
use crate::error::BuildResult;
use crate::intercept::stage;
use crate::model::Marker;
use crate::value::Value;

#[derive(Clone, Copy)]
enum Condition {
    True,
    False,
    Null,
}

impl Condition {
    fn holds(self, value: &Value) -> bool {
        match self {
            Condition::True => value.as_bool() == Some(true),
            Condition::False => value.as_bool() == Some(false),
            Condition::Null => value.is_null(),
        }
    }
}

/// Returns the type default without running the member when a
/// `return_if_*` parameter has the given value
pub struct ReturnIfBuilder;

impl ReturnIfBuilder {
    fn conditions(ctx: &BuildContext<'_>) -> Vec<(usize, Condition)> {
        let Some(method) = ctx.method() else {
            return Vec::new();
        };
        method
            .params
            .iter()
            .enumerate()
            .flat_map(|(i, p)| {
                p.markers.iter().filter_map(move |m| match m {
                    Marker::ReturnIfTrue => Some((i, Condition::True)),
                    Marker::ReturnIfFalse => Some((i, Condition::False)),
                    Marker::ReturnIfNull => Some((i, Condition::Null)),
                    _ => None,
                })
            })
            .collect()
    }
}

impl TypeBuilder for ReturnIfBuilder {
    fn name(&self) -> &str {
        "return_if"
    }

    fn priority(&self, _ctx: &BuildContext<'_>) -> i32 {
        priority::HIGHEST - 1
    }

    fn is_applied(&self, ctx: &BuildContext<'_>) -> bool {
        ctx.step() == BuildStep::BeforeMember && !Self::conditions(ctx).is_empty()
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> BuildResult<()> {
        let conditions = Self::conditions(ctx);
        ctx.emit_before(stage(move |info| {
            if info.is_short_circuited() {
                return Ok(());
            }
            let hit = conditions
                .iter()
                .any(|(i, c)| info.parameter_values.get(*i).map_or(false, |v| c.holds(v)));
            if hit {
                let value = info.method().return_type.default_with(info.type_arguments());
                info.set_return_value(value);
            }
            Ok(())
        }))
    }
}
