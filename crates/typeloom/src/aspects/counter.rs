//! Call counting

use std::any::TypeId;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::{attach_interceptor, effective_points, hooks_at_step};
use crate::builder::{BuildContext, TypeBuilder};
use crate::error::{BuildError, BuildResult, CallResult};
use crate::intercept::{CallMethodInfo, InterceptCallInfo, InterceptType, Interceptor};
use crate::value::Value;

/// An in-flight call
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    /// Call id
    pub call_id: u64,
    /// Start time
    pub begin: Instant,
    /// Principal at call start
    pub principal: Option<Arc<str>>,
    /// Argument values at call start
    pub parameters: Vec<Value>,
}

/// Statistics of one member
pub trait MethodCallCounter: Send + Sync {
    /// Record a finished call
    fn add_call(&self, elapsed: Duration);

    /// Record a call start
    fn add_in_flight(&self, call: CallSnapshot);

    /// Forget a call start
    fn remove_in_flight(&self, call_id: u64);

    /// Finished calls
    fn total_calls(&self) -> u64;

    /// Accumulated time of finished calls
    fn total_time(&self) -> Duration;

    /// Calls currently executing
    fn current_calls(&self) -> Vec<CallSnapshot>;

    /// Reset the statistics
    fn reset(&self);

    /// Mean time of finished calls
    fn average_time(&self) -> Duration {
        match self.total_calls() {
            0 => Duration::ZERO,
            n => self.total_time() / n as u32,
        }
    }
}

/// Lock-free totals plus a locked in-flight table
#[derive(Default)]
pub struct DefaultMethodCallCounter {
    calls: AtomicU64,
    nanos: AtomicU64,
    in_flight: Mutex<FxHashMap<u64, CallSnapshot>>,
}

impl DefaultMethodCallCounter {
    /// Zeroed counter
    pub fn new() -> Self {
        Self::default()
    }
}

impl MethodCallCounter for DefaultMethodCallCounter {
    fn add_call(&self, elapsed: Duration) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    fn add_in_flight(&self, call: CallSnapshot) {
        self.in_flight.lock().insert(call.call_id, call);
    }

    fn remove_in_flight(&self, call_id: u64) {
        self.in_flight.lock().remove(&call_id);
    }

    fn total_calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn total_time(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }

    fn current_calls(&self) -> Vec<CallSnapshot> {
        let mut calls: Vec<CallSnapshot> = self.in_flight.lock().values().cloned().collect();
        calls.sort_by_key(|c| c.call_id);
        calls
    }

    fn reset(&self) {
        self.calls.store(0, Ordering::Relaxed);
        self.nanos.store(0, Ordering::Relaxed);
        self.in_flight.lock().clear();
    }
}

impl fmt::Debug for DefaultMethodCallCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultMethodCallCounter")
            .field("calls", &self.total_calls())
            .field("total_time", &self.total_time())
            .finish()
    }
}

/// Supplies counters for counted members
///
/// Returning `None` falls back to [`DefaultMethodCallCounter`].
pub trait CounterFactory: Send + Sync {
    /// Counter for `method`
    fn create(&self, method: &CallMethodInfo) -> Option<Arc<dyn MethodCallCounter>>;
}

/// Interceptor feeding a [`MethodCallCounter`]
pub struct CounterAspect {
    counter: Arc<dyn MethodCallCounter>,
}

impl CounterAspect {
    /// Aspect writing into `counter`
    pub fn new(counter: Arc<dyn MethodCallCounter>) -> Self {
        Self { counter }
    }

    /// Target counter
    pub fn counter(&self) -> &Arc<dyn MethodCallCounter> {
        &self.counter
    }
}

impl Interceptor for CounterAspect {
    fn before_call(&self, info: &mut InterceptCallInfo) -> CallResult<()> {
        self.counter.add_in_flight(CallSnapshot {
            call_id: info.call_id(),
            begin: info.begin_call_time(),
            principal: info.current_principal().map(Arc::from),
            parameters: info.parameter_values.clone(),
        });
        Ok(())
    }

    fn on_finally(&self, info: &mut InterceptCallInfo) -> CallResult<()> {
        self.counter.remove_in_flight(info.call_id());
        self.counter.add_call(info.elapsed());
        Ok(())
    }
}

const POINTS: InterceptType = InterceptType::BEFORE_CALL.union(InterceptType::ON_FINALLY);

/// Attaches a [`CounterAspect`] and registers its counter on the type
pub struct CounterBuilder;

impl CounterBuilder {
    fn points(ctx: &BuildContext<'_>) -> InterceptType {
        effective_points(ctx.markers(), TypeId::of::<CounterAspect>(), POINTS)
    }
}

impl TypeBuilder for CounterBuilder {
    fn name(&self) -> &str {
        "counter"
    }

    fn is_applied(&self, ctx: &BuildContext<'_>) -> bool {
        ctx.unit().is_some() && hooks_at_step(ctx, Self::points(ctx))
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> BuildResult<()> {
        let points = Self::points(ctx);
        attach_interceptor(ctx, "typeloom.counter", points, |ctx| {
            let method = ctx
                .method()
                .cloned()
                .ok_or_else(|| BuildError::InvalidState("counter outside a member".to_string()))?;
            let counter: Arc<dyn MethodCallCounter> = match ctx.services().counter_factory() {
                Some(factory) => factory
                    .create(&method)
                    .unwrap_or_else(|| Arc::new(DefaultMethodCallCounter::new())),
                None => Arc::new(DefaultMethodCallCounter::new()),
            };
            ctx.register_counter(counter.clone())?;
            let aspect: Arc<dyn Interceptor> = Arc::new(CounterAspect::new(counter));
            Ok(aspect)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_counter_totals() {
        let c = DefaultMethodCallCounter::new();
        c.add_call(Duration::from_millis(10));
        c.add_call(Duration::from_millis(30));
        assert_eq!(c.total_calls(), 2);
        assert_eq!(c.total_time(), Duration::from_millis(40));
        assert_eq!(c.average_time(), Duration::from_millis(20));
        c.reset();
        assert_eq!(c.total_calls(), 0);
        assert_eq!(c.average_time(), Duration::ZERO);
    }

    #[test]
    fn test_in_flight_tracking() {
        let c = DefaultMethodCallCounter::new();
        for id in [3, 1] {
            c.add_in_flight(CallSnapshot {
                call_id: id,
                begin: Instant::now(),
                principal: None,
                parameters: vec![Value::Int(id as i64)],
            });
        }
        let ids: Vec<u64> = c.current_calls().iter().map(|s| s.call_id).collect();
        assert_eq!(ids, vec![1, 3]);
        c.remove_in_flight(1);
        assert_eq!(c.current_calls().len(), 1);
    }
}
