//! Caller-supplied interceptors

use super::{attach_interceptor, effective_points, hooks_at_step};
use crate::builder::{BuildContext, TypeBuilder};
use crate::error::{BuildError, BuildResult};
use crate::intercept::{InterceptType, InterceptorInit, InterceptorSpec};

/// Attaches the handler of an `intercept` marker
///
/// Runs at the marker's priority; `no_intercept` markers naming the same
/// handler type remove hook points.
pub struct InterceptorBuilder {
    spec: InterceptorSpec,
}

impl InterceptorBuilder {
    /// Builder for `spec`
    pub fn new(spec: InterceptorSpec) -> Self {
        Self { spec }
    }

    fn points(&self, ctx: &BuildContext<'_>) -> InterceptType {
        effective_points(ctx.markers(), self.spec.handler, self.spec.points)
    }
}

impl TypeBuilder for InterceptorBuilder {
    fn name(&self) -> &str {
        self.spec.handler_name
    }

    fn priority(&self, _ctx: &BuildContext<'_>) -> i32 {
        self.spec.priority
    }

    fn is_applied(&self, ctx: &BuildContext<'_>) -> bool {
        ctx.unit().is_some() && hooks_at_step(ctx, self.points(ctx))
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> BuildResult<()> {
        let points = self.points(ctx);
        let key = format!("typeloom.intercept:{:p}", self);
        attach_interceptor(ctx, &key, points, |ctx| {
            let method = ctx
                .method()
                .cloned()
                .ok_or_else(|| {
                    BuildError::InvalidState("interceptor outside a member".to_string())
                })?;
            Ok(self.spec.instantiate(&InterceptorInit {
                method: &method,
                parameters: self.spec.parameters.as_deref(),
                services: ctx.services(),
            }))
        })
    }
}
