//! Null argument checks

use std::sync::Arc;

use crate::builder::{priority, BuildContext, BuildStep, TypeBuilder};
use crate::error::{BuildResult, CallError};
use crate::intercept::stage;
use crate::model::Marker;

const DEFAULT_MESSAGE: &str = "Value cannot be null. Parameter name: {0}";

struct Check {
    index: usize,
    param: Arc<str>,
    message: String,
}

fn template(markers: &[Marker]) -> Option<Option<Arc<str>>> {
    markers.iter().find_map(|m| match m {
        Marker::NotNull { message } => Some(message.clone()),
        _ => None,
    })
}

/// Rejects null arguments before the call
///
/// A `not_null` marker on a parameter checks that parameter; on the member
/// it checks every nullable parameter. `{0}` in the message is replaced by
/// the parameter name.
pub struct NotNullBuilder;

impl NotNullBuilder {
    fn checks(ctx: &BuildContext<'_>) -> Vec<Check> {
        let Some(method) = ctx.method() else {
            return Vec::new();
        };
        let member_level = template(ctx.markers());
        method
            .params
            .iter()
            .enumerate()
            .filter_map(|(index, param)| {
                let message = template(&param.markers)
                    .or_else(|| member_level.clone().filter(|_| param.ty.is_nullable()))?;
                let message = message
                    .as_deref()
                    .unwrap_or(DEFAULT_MESSAGE)
                    .replace("{0}", &param.name);
                Some(Check {
                    index,
                    param: param.name.clone(),
                    message,
                })
            })
            .collect()
    }
}

impl TypeBuilder for NotNullBuilder {
    fn name(&self) -> &str {
        "not_null"
    }

    fn priority(&self, _ctx: &BuildContext<'_>) -> i32 {
        priority::HIGHEST
    }

    fn is_applied(&self, ctx: &BuildContext<'_>) -> bool {
        ctx.step() == BuildStep::BeforeMember && !Self::checks(ctx).is_empty()
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> BuildResult<()> {
        let checks = Self::checks(ctx);
        ctx.emit_before(stage(move |info| {
            for check in &checks {
                if info.parameter_values.get(check.index).map_or(true, |v| v.is_null()) {
                    return Err(CallError::Argument {
                        param: check.param.to_string(),
                        message: check.message.clone(),
                    });
                }
            }
            Ok(())
        }))
    }
}
