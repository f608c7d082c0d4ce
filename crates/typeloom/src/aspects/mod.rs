//! Behavior plugins
//!
//! | Plugin                   | Kind        | Driven by                         |
//! |--------------------------|-------------|-----------------------------------|
//! | [`NotNullBuilder`]       | hooks       | `not_null` on params / members    |
//! | [`ReturnIfBuilder`]      | hooks       | `return_if_*` on params           |
//! | [`CacheBuilder`]         | hooks       | `cache`                           |
//! | [`ClearCacheBuilder`]    | hooks       | `clear_cache`                     |
//! | [`CounterBuilder`]       | hooks       | `counter`                         |
//! | [`LogBuilder`]           | hooks       | `log`                             |
//! | [`InterceptorBuilder`]   | hooks       | `intercept`                       |
//! | [`AsyncBuilder`]         | body owner  | `async_call` / `async_for`        |
//! | [`DuckTypeBuilder`]      | body owner  | duck-typing plans                 |
//! | [`MixinBuilder`]         | body owner  | `mixin`                           |
//! | [`LazyInstanceBuilder`]  | body owner  | `lazy_instance`                   |
//! | [`ArrayLazyInitBuilder`] | body owner  | abstract array properties         |
//! | [`AutoImplementBuilder`] | body owner  | `auto_implement_interface`        |
//! | [`AbstractMemberBuilder`]| body owner  | any other abstract member         |
//!
//! Hook plugins that come from markers are created per member by
//! [`marker_builder`]; the rest are global and registered by
//! [`standard_builders`].

mod abstract_member;
mod async_call;
mod auto_impl;
mod cache;
mod clear_cache;
mod counter;
mod duck;
mod interceptor;
mod lazy;
mod logging;
mod mixin;
mod not_null;
mod return_if;

pub use abstract_member::AbstractMemberBuilder;
pub use async_call::{AsyncBuilder, AsyncResult, AsyncWorkerPool};
pub use auto_impl::AutoImplementBuilder;
pub use cache::{CacheBuilder, CacheOptions, CacheRegistry, MethodCache};
pub use clear_cache::ClearCacheBuilder;
pub use counter::{
    CallSnapshot, CounterAspect, CounterBuilder, CounterFactory, DefaultMethodCallCounter,
    MethodCallCounter,
};
pub use duck::DuckTypeBuilder;
pub use interceptor::InterceptorBuilder;
pub use lazy::{ArrayLazyInitBuilder, InstanceRequest, LazyInstanceBuilder};
pub use logging::{
    LogBuilder, LogEvent, LogOptions, LogOutput, LogRecord, LoggingAspect, TracingLogOutput,
};
pub use mixin::MixinBuilder;
pub use not_null::NotNullBuilder;
pub use return_if::ReturnIfBuilder;

use std::any::TypeId;
use std::sync::Arc;

use crate::builder::{BuildContext, BuildStep, TypeBuilder};
use crate::error::{BuildError, BuildResult};
use crate::intercept::{stage, InterceptType, Interceptor};
use crate::model::Marker;

/// Global plugins every registry starts with
pub fn standard_builders() -> Vec<Arc<dyn TypeBuilder>> {
    vec![
        Arc::new(NotNullBuilder),
        Arc::new(ReturnIfBuilder),
        Arc::new(DuckTypeBuilder),
        Arc::new(MixinBuilder),
        Arc::new(LazyInstanceBuilder),
        Arc::new(ArrayLazyInitBuilder),
        Arc::new(AutoImplementBuilder),
        Arc::new(AbstractMemberBuilder),
    ]
}

/// Builder a member-level marker drives, if any
pub fn marker_builder(marker: &Marker) -> Option<Arc<dyn TypeBuilder>> {
    let builder: Arc<dyn TypeBuilder> = match marker {
        Marker::Cache(options) => Arc::new(CacheBuilder::new(options.clone())),
        Marker::ClearCache(target) => Arc::new(ClearCacheBuilder::new(target.clone())),
        Marker::Counter => Arc::new(CounterBuilder),
        Marker::Log(options) => Arc::new(LogBuilder::new(options.clone())),
        Marker::Intercept(spec) => Arc::new(InterceptorBuilder::new(spec.clone())),
        Marker::Async(target) => Arc::new(AsyncBuilder::new(target.clone())),
        Marker::Builder(b) => b.clone(),
        _ => return None,
    };
    Some(builder)
}

/// `points` of `handler` left after the no-intercept markers in effect
pub(crate) fn effective_points(
    markers: &[Marker],
    handler: TypeId,
    points: InterceptType,
) -> InterceptType {
    markers.iter().fold(points, |acc, m| match m {
        Marker::NoIntercept {
            handler: h, points: p, ..
        } if *h == handler => acc.difference(*p),
        _ => acc,
    })
}

/// Whether an interceptor attached at `points` contributes at this step
pub(crate) fn hooks_at_step(ctx: &BuildContext<'_>, points: InterceptType) -> bool {
    match ctx.step() {
        BuildStep::BeforeMember => points.contains(InterceptType::BEFORE_CALL),
        BuildStep::AfterMember => points.intersects(
            InterceptType::AFTER_CALL | InterceptType::ON_CATCH | InterceptType::ON_FINALLY,
        ),
        _ => false,
    }
}

struct HandlerSlot(Arc<dyn Interceptor>);

/// Attach one interceptor instance to the current entry point
///
/// The instance is created on first use (by `make`) and shared between the
/// before and after steps under `key`.
pub(crate) fn attach_interceptor<F>(
    ctx: &mut BuildContext<'_>,
    key: &str,
    points: InterceptType,
    make: F,
) -> BuildResult<()>
where
    F: FnOnce(&mut BuildContext<'_>) -> BuildResult<Arc<dyn Interceptor>>,
{
    let handler = match ctx.scratch::<HandlerSlot>(key) {
        Some(slot) => slot.0.clone(),
        None => {
            let handler = make(ctx)?;
            ctx.set_scratch(key, Arc::new(HandlerSlot(handler.clone())));
            handler
        }
    };

    let hook = |handler: &Arc<dyn Interceptor>| {
        let handler = handler.clone();
        stage(move |info| handler.intercept(info))
    };
    match ctx.step() {
        BuildStep::BeforeMember => {
            if points.contains(InterceptType::BEFORE_CALL) {
                ctx.emit_before(hook(&handler))?;
            }
        }
        BuildStep::AfterMember => {
            if points.contains(InterceptType::ON_CATCH) {
                ctx.emit_catch(hook(&handler))?;
            }
            if points.contains(InterceptType::AFTER_CALL) {
                ctx.emit_after(hook(&handler))?;
            }
            if points.contains(InterceptType::ON_FINALLY) {
                ctx.emit_finally(hook(&handler))?;
            }
        }
        other => {
            return Err(BuildError::InvalidState(format!(
                "interceptor attached at {:?} for '{}'",
                other,
                ctx.member_label()
            )))
        }
    }
    Ok(())
}
