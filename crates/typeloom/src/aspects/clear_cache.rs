//! Cache invalidation after a successful call

use std::sync::Arc;

use tracing::trace;

use crate::builder::{BuildContext, BuildStep, TypeBuilder};
use crate::error::{BuildResult, CallError};
use crate::intercept::stage;
use crate::model::{ClearCacheTarget, TypeRef};

/// Clears cached results of one member, one overload, or a whole type
///
/// The target is checked when the type is built; a target that does not
/// exist makes every call of the marked member fail with an argument error.
pub struct ClearCacheBuilder {
    target: ClearCacheTarget,
}

impl ClearCacheBuilder {
    /// Builder for `target`
    pub fn new(target: ClearCacheTarget) -> Self {
        Self { target }
    }

    fn check(&self, ty: &TypeRef) -> Result<(), String> {
        let Some(name) = &self.target.method else {
            return Ok(());
        };
        let candidates: Vec<_> = ty
            .hierarchy()
            .iter()
            .flat_map(|t| t.members().to_vec())
            .filter(|m| m.name == *name)
            .collect();
        if candidates.is_empty() {
            return Err(format!("'{}' has no member '{}'", ty.name(), name));
        }
        if let Some(params) = &self.target.param_types {
            if !candidates.iter().any(|m| &*m.fingerprint().params == params.as_slice()) {
                let names: Vec<String> = params.iter().map(|p| p.name()).collect();
                return Err(format!(
                    "'{}' has no overload '{}({})'",
                    ty.name(),
                    name,
                    names.join(", ")
                ));
            }
        }
        Ok(())
    }
}

impl TypeBuilder for ClearCacheBuilder {
    fn name(&self) -> &str {
        "clear_cache"
    }

    fn is_applied(&self, ctx: &BuildContext<'_>) -> bool {
        ctx.step() == BuildStep::AfterMember && ctx.unit().is_some()
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> BuildResult<()> {
        let target = self.target.declaring.clone().unwrap_or_else(|| ctx.source().clone());
        let invalid: Option<Arc<str>> = self.check(&target).err().map(Arc::from);
        let method = self.target.method.clone();
        let params = self.target.param_types.clone();
        let caches = ctx.services().caches().clone();

        ctx.emit_after(stage(move |info| {
            if let Some(message) = &invalid {
                return Err(CallError::Argument {
                    param: "method".to_string(),
                    message: message.to_string(),
                });
            }
            if info.exception().is_some() {
                return Ok(());
            }
            let cleared = match &method {
                Some(name) => caches.clear_member(&target, name, params.as_deref()),
                None => caches.clear_type(&target),
            };
            trace!(method = %info.method().full_name(), cleared, "caches cleared");
            Ok(())
        }))
    }
}
