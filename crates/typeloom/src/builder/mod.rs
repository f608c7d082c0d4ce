//! Behavior plugins
//!
//! A [`TypeBuilder`] contributes code to a generated type. The synthesizer
//! walks a fixed sequence of [`BuildStep`]s and, at every step, asks the
//! [`BuilderRegistry`] which builders apply, in which order.
//!
//! | Step           | Scope  | Typical contribution                         |
//! |----------------|--------|----------------------------------------------|
//! | `BeforeType`   | type   | fields, constructor hooks                    |
//! | `BeforeMember` | member | before stages (validation, cache lookup)     |
//! | `BuildMember`  | member | the body (exactly one body owner wins)       |
//! | `AfterMember`  | member | after / catch / finally stages               |
//! | `AfterType`    | type   | static state (counters)                      |
//!
//! Body owners ([`TypeBuilder::owns_body`]) only take part in `BuildMember`;
//! every other builder only takes part in the remaining steps.

mod context;
mod registry;

pub use context::{
    BuildContext, BuildServices, CtorHook, FieldInit, FieldSlot, MemberEmitter, MemberUnit,
    TypeState,
};
pub use registry::BuilderRegistry;

use crate::error::BuildResult;

/// Builder priorities (higher runs first)
pub mod priority {
    /// Fallback default bodies
    pub const LOWEST: i32 = -10_000;
    /// Generated interface implementations
    pub const LOW: i32 = -1_000;
    /// Property storage strategies
    pub const BELOW_NORMAL: i32 = -100;
    /// Default
    pub const NORMAL: i32 = 0;
    /// Delegation
    pub const ABOVE_NORMAL: i32 = 100;
    /// Caching, async, duck typing
    pub const HIGH: i32 = 1_000;
    /// Argument validation
    pub const HIGHEST: i32 = 10_000;
}

/// Phase of the synthesis state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BuildStep {
    /// Plan accepted
    Begin,
    /// Type-level preparation
    BeforeType,
    /// Per-member preparation
    BeforeMember,
    /// Per-member body
    BuildMember,
    /// Per-member completion
    AfterMember,
    /// Type-level completion
    AfterType,
    /// Assembly
    End,
}

impl BuildStep {
    /// Step that follows this one
    pub fn next(self) -> Option<BuildStep> {
        match self {
            BuildStep::Begin => Some(BuildStep::BeforeType),
            BuildStep::BeforeType => Some(BuildStep::BeforeMember),
            BuildStep::BeforeMember => Some(BuildStep::BuildMember),
            BuildStep::BuildMember => Some(BuildStep::AfterMember),
            BuildStep::AfterMember => Some(BuildStep::AfterType),
            BuildStep::AfterType => Some(BuildStep::End),
            BuildStep::End => None,
        }
    }

    /// Whether the step runs once per member entry point
    pub fn is_member_step(self) -> bool {
        matches!(
            self,
            BuildStep::BeforeMember | BuildStep::BuildMember | BuildStep::AfterMember
        )
    }
}

/// Behavior plugin
pub trait TypeBuilder: Send + Sync {
    /// Name used in diagnostics and conflict errors
    fn name(&self) -> &str;

    /// Ordering priority at the current step (higher runs first)
    fn priority(&self, _ctx: &BuildContext<'_>) -> i32 {
        priority::NORMAL
    }

    /// Whether the builder contributes at the current step
    fn is_applied(&self, ctx: &BuildContext<'_>) -> bool;

    /// Whether the builder supplies the member body
    fn owns_body(&self) -> bool {
        false
    }

    /// Whether the builder may be combined with `other` on the same member
    fn is_compatible(&self, _ctx: &BuildContext<'_>, _other: &dyn TypeBuilder) -> bool {
        true
    }

    /// Contribute to the type
    fn build(&self, ctx: &mut BuildContext<'_>) -> BuildResult<()>;
}
