//! Composed call pipeline of one generated entry point

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use super::{CallMethodInfo, InterceptCallInfo, InterceptResult, InterceptType};
use crate::error::CallResult;
use crate::synth::Instance;
use crate::value::{Value, ValueType};

/// Hook stage
pub type Stage = Arc<dyn Fn(&mut InterceptCallInfo) -> CallResult<()> + Send + Sync>;

/// Body stage: produces the return value
pub type BodyStage = Arc<dyn Fn(&mut InterceptCallInfo) -> CallResult<Value> + Send + Sync>;

/// Wrap a closure as a hook stage
pub fn stage<F>(f: F) -> Stage
where
    F: Fn(&mut InterceptCallInfo) -> CallResult<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a body stage
pub fn body_stage<F>(f: F) -> BodyStage
where
    F: Fn(&mut InterceptCallInfo) -> CallResult<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Stages of one entry point, in execution order per hook point
///
/// Execution of a call:
///
/// 1. every before stage runs; an error stops the remaining before stages
/// 2. the body runs unless a before stage set the return value
/// 3. an error from 1 or 2 is captured and every catch stage runs; a catch
///    stage may swallow it (`Ignore`) or replace it
/// 4. every after stage runs, also when an error is pending
/// 5. every finally stage runs
/// 6. by-reference arguments are copied back to the caller
#[derive(Clone, Default)]
pub struct InterceptorChain {
    before: Vec<Stage>,
    body: Option<BodyStage>,
    after: Vec<Stage>,
    catch: Vec<Stage>,
    finally: Vec<Stage>,
}

impl InterceptorChain {
    /// Empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a before stage
    pub fn push_before(&mut self, stage: Stage) {
        self.before.push(stage);
    }

    /// Set the body
    pub fn set_body(&mut self, body: BodyStage) {
        self.body = Some(body);
    }

    /// Append an after stage
    pub fn push_after(&mut self, stage: Stage) {
        self.after.push(stage);
    }

    /// Append a catch stage
    pub fn push_catch(&mut self, stage: Stage) {
        self.catch.push(stage);
    }

    /// Append a finally stage
    pub fn push_finally(&mut self, stage: Stage) {
        self.finally.push(stage);
    }

    /// Whether a body is present
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Number of hook stages (excluding the body)
    pub fn hook_count(&self) -> usize {
        self.before.len() + self.after.len() + self.catch.len() + self.finally.len()
    }

    /// Run the pipeline
    pub fn invoke(
        &self,
        method: &Arc<CallMethodInfo>,
        this: &Instance,
        args: &mut [Value],
        type_args: &[ValueType],
    ) -> CallResult<Value> {
        // Fast path: nothing woven, no copy of the arguments needed
        if self.hook_count() == 0 {
            if let Some(body) = &self.body {
                if !method.params.iter().any(|p| p.is_by_ref()) {
                    let mut info = InterceptCallInfo::new(
                        this.clone(),
                        method.clone(),
                        args.to_vec(),
                        type_args.to_vec(),
                    );
                    return body(&mut info);
                }
            }
        }

        let mut info = InterceptCallInfo::new(
            this.clone(),
            method.clone(),
            args.to_vec(),
            type_args.to_vec(),
        );
        let mut failure = None;

        info.set_intercept_type(InterceptType::BEFORE_CALL);
        for stage in &self.before {
            if let Err(e) = stage(&mut info) {
                failure = Some(e);
                break;
            }
        }

        if failure.is_none() && !info.is_short_circuited() {
            if let Some(body) = &self.body {
                match body(&mut info) {
                    Ok(value) => info.store_return_value(value),
                    Err(e) => failure = Some(e),
                }
            }
        } else if info.is_short_circuited() {
            trace!(method = %method.full_name(), "call short-circuited");
        }

        if let Some(error) = failure {
            info.set_exception(error);
            info.set_intercept_type(InterceptType::ON_CATCH);
            for stage in &self.catch {
                if let Err(e) = stage(&mut info) {
                    info.set_exception(e);
                }
            }
            if info.intercept_result == InterceptResult::Ignore {
                info.take_exception();
            }
        }

        info.set_intercept_type(InterceptType::AFTER_CALL);
        for stage in &self.after {
            if let Err(e) = stage(&mut info) {
                if info.exception().is_none() {
                    info.set_exception(e);
                }
            }
        }

        info.set_intercept_type(InterceptType::ON_FINALLY);
        for stage in &self.finally {
            if let Err(e) = stage(&mut info) {
                if info.exception().is_none() {
                    info.set_exception(e);
                }
            }
        }

        for (i, param) in method.params.iter().enumerate() {
            if param.is_by_ref() && i < args.len() && i < info.parameter_values.len() {
                args[i] = std::mem::take(&mut info.parameter_values[i]);
            }
        }

        match info.take_exception() {
            Some(error) => Err(error),
            None => Ok(info.return_value().clone()),
        }
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("before", &self.before.len())
            .field("body", &self.body.is_some())
            .field("after", &self.after.len())
            .field("catch", &self.catch.len())
            .field("finally", &self.finally.len())
            .finish()
    }
}
