//! Builder selection and ordering

use std::sync::Arc;

use tracing::trace;

use super::{BuildContext, BuildStep, TypeBuilder};
use crate::aspects;
use crate::error::{BuildError, BuildResult};

/// Ordered set of global builders
///
/// Global builders are considered for every member of every type; builders
/// derived from markers are passed per member to [`BuilderRegistry::resolve`]
/// and come first in declaration order.
#[derive(Clone, Default)]
pub struct BuilderRegistry {
    builders: Vec<Arc<dyn TypeBuilder>>,
}

impl BuilderRegistry {
    /// Registry without any builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the standard plugins
    pub fn with_defaults() -> Self {
        Self {
            builders: aspects::standard_builders(),
        }
    }

    /// Add a global builder
    pub fn register(&mut self, builder: Arc<dyn TypeBuilder>) {
        self.builders.push(builder);
    }

    /// Number of global builders
    pub fn len(&self) -> usize {
        self.builders.len()
    }

    /// Check if no global builder is registered
    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    /// Global builders in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn TypeBuilder>> {
        self.builders.iter()
    }

    /// Builders that apply at the context's step, highest priority first
    ///
    /// Ties keep declaration order (`local` first, then globals). At
    /// `BuildMember` only body owners take part and the highest one wins;
    /// two owners of equal top priority are ambiguous. Everywhere else body
    /// owners are skipped.
    pub fn resolve(
        &self,
        ctx: &BuildContext<'_>,
        local: &[Arc<dyn TypeBuilder>],
    ) -> BuildResult<Vec<Arc<dyn TypeBuilder>>> {
        let body_step = ctx.step() == BuildStep::BuildMember;
        let candidates: Vec<(i32, Arc<dyn TypeBuilder>)> = local
            .iter()
            .chain(self.builders.iter())
            .filter(|b| b.owns_body() == body_step && b.is_applied(ctx))
            .map(|b| (b.priority(ctx), b.clone()))
            .collect();

        let selected = order(candidates, body_step, &ctx.member_label())?;

        for (i, a) in selected.iter().enumerate() {
            for b in &selected[i + 1..] {
                if !a.is_compatible(ctx, b.as_ref()) || !b.is_compatible(ctx, a.as_ref()) {
                    return Err(BuildError::IncompatibleBuilders {
                        member: ctx.member_label(),
                        builder: a.name().to_string(),
                        other: b.name().to_string(),
                    });
                }
            }
        }

        if !selected.is_empty() {
            trace!(
                step = ?ctx.step(),
                member = %ctx.member_label(),
                builders = ?selected.iter().map(|b| b.name()).collect::<Vec<_>>(),
                "builders resolved"
            );
        }
        Ok(selected)
    }
}

/// Stable sort by descending priority; at most one body owner survives
fn order(
    mut candidates: Vec<(i32, Arc<dyn TypeBuilder>)>,
    body_step: bool,
    member: &str,
) -> BuildResult<Vec<Arc<dyn TypeBuilder>>> {
    candidates.sort_by(|a, b| b.0.cmp(&a.0));

    if !body_step {
        return Ok(candidates.into_iter().map(|(_, b)| b).collect());
    }

    let mut iter = candidates.into_iter();
    let Some((top, winner)) = iter.next() else {
        return Ok(Vec::new());
    };
    for (p, other) in iter {
        if p == top && !Arc::ptr_eq(&winner, &other) {
            return Err(BuildError::AmbiguousBuilders {
                member: member.to_string(),
                first: winner.name().to_string(),
                second: other.name().to_string(),
            });
        }
        trace!(member, suppressed = other.name(), winner = winner.name(), "body owner suppressed");
    }
    Ok(vec![winner])
}

impl std::fmt::Debug for BuilderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.builders.iter().map(|b| b.name())).finish()
    }
}
