//! Begin/End asynchronous members
//!
//! `BeginX(args.., [callback], [state])` submits `X(args..)` to the
//! factory's worker pool and returns an [`AsyncResult`] handle at once.
//! `EndX(handle)` blocks until the work is done and returns its result or
//! error. The callback, if given, runs on the worker with the handle.

use std::fmt;
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{unbounded, Sender};
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::builder::{priority, BuildContext, BuildStep, TypeBuilder};
use crate::error::{BuildError, BuildResult, CallError, CallResult};
use crate::intercept::body_stage;
use crate::model::{AccessorKind, AsyncTarget, MemberKind};
use crate::value::{Value, ValueType};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Worker threads running asynchronous member calls
///
/// Threads start on the first submitted job and stop when the pool is
/// dropped.
pub struct AsyncWorkerPool {
    size: usize,
    sender: OnceCell<Sender<Job>>,
}

impl AsyncWorkerPool {
    /// Pool of `size` workers (at least one)
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            sender: OnceCell::new(),
        }
    }

    /// Number of workers
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the workers are running
    pub fn is_started(&self) -> bool {
        self.sender.get().is_some()
    }

    fn sender(&self) -> CallResult<&Sender<Job>> {
        self.sender.get_or_try_init(|| {
            let (tx, rx) = unbounded::<Job>();
            for i in 0..self.size {
                let rx = rx.clone();
                thread::Builder::new()
                    .name(format!("typeloom-async-{}", i))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            job();
                        }
                    })
                    .map_err(|e| {
                        CallError::invalid_operation(format!("failed to start async worker: {}", e))
                    })?;
            }
            debug!(workers = self.size, "async worker pool started");
            Ok(tx)
        })
    }

    /// Run `job` on a worker
    pub fn spawn<F>(&self, job: F) -> CallResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender()?
            .send(Box::new(job))
            .map_err(|_| CallError::invalid_operation("async worker pool is shut down"))
    }
}

impl fmt::Debug for AsyncWorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncWorkerPool")
            .field("size", &self.size)
            .field("started", &self.is_started())
            .finish()
    }
}

/// Pending result of a Begin call
pub struct AsyncResult {
    state: Value,
    result: Mutex<Option<CallResult<Value>>>,
    done: Condvar,
}

impl AsyncResult {
    fn new(state: Value) -> Self {
        Self {
            state,
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn complete(&self, result: CallResult<Value>) {
        let mut slot = self.result.lock();
        *slot = Some(result);
        self.done.notify_all();
    }

    /// Caller-supplied state object
    pub fn state(&self) -> &Value {
        &self.state
    }

    /// Whether the work has finished
    pub fn is_completed(&self) -> bool {
        self.result.lock().is_some()
    }

    /// Block until the work has finished and return its outcome
    pub fn wait(&self) -> CallResult<Value> {
        let mut slot = self.result.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            self.done.wait(&mut slot);
        }
    }
}

impl fmt::Debug for AsyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResult")
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Generates Begin/End members for a synchronous member
pub struct AsyncBuilder {
    target: AsyncTarget,
}

enum Role {
    Begin(String),
    End(String),
}

impl AsyncBuilder {
    /// Builder for `target`
    pub fn new(target: AsyncTarget) -> Self {
        Self { target }
    }

    fn role(&self, member: &str) -> Option<Role> {
        let named = |prefix: &str| {
            self.target
                .name
                .as_deref()
                .map(str::to_string)
                .unwrap_or_else(|| member[prefix.len()..].to_string())
        };
        if member.starts_with("Begin") {
            Some(Role::Begin(named("Begin")))
        } else if member.starts_with("End") {
            Some(Role::End(named("End")))
        } else {
            None
        }
    }

    fn build_begin(&self, ctx: &mut BuildContext<'_>, target_name: &str) -> BuildResult<()> {
        let label = ctx.member_label();
        let begin_params = ctx.method().map(|m| m.params.clone()).unwrap_or_default();

        // Longest overload whose parameters prefix the Begin parameters,
        // restricted to the named overload when the marker gives one
        let target = ctx
            .units()
            .iter()
            .filter(|u| u.accessor == AccessorKind::Invoke && u.method.name() == target_name)
            .filter(|u| {
                self.target
                    .param_types
                    .as_ref()
                    .map_or(true, |types| &*u.method.fingerprint.params == types.as_slice())
            })
            .filter(|u| {
                u.method.params.len() <= begin_params.len()
                    && u.method
                        .params
                        .iter()
                        .zip(&begin_params)
                        .all(|(t, b)| b.ty.is_compatible_with(&t.ty))
            })
            .max_by_key(|u| u.method.params.len())
            .map(|u| (u.slot, u.method.params.len()))
            .ok_or_else(|| BuildError::InvalidMarker {
                member: label.clone(),
                detail: format!("no member '{}' matches the asynchronous signature", target_name),
            })?;
        let (slot, arity) = target;
        match begin_params.len().checked_sub(arity) {
            Some(extra) if extra <= 2 => {}
            _ => {
                return Err(BuildError::InvalidMarker {
                    member: label,
                    detail: "Begin takes the target arguments, then an optional callback and state"
                        .to_string(),
                });
            }
        }

        let workers = ctx.services().workers().clone();
        ctx.emit_body(body_stage(move |info| {
            let args: Vec<Value> = info.parameter_values[..arity].to_vec();
            let callback = info.parameter_values.get(arity).and_then(|v| v.as_func()).cloned();
            let state = info.parameter_values.get(arity + 1).cloned().unwrap_or_default();
            let this = info.object().clone();
            let handle = Arc::new(AsyncResult::new(state));
            let pending = handle.clone();

            workers.spawn(move || {
                let mut args = args;
                let result = this.invoke_slot(slot, &mut args, &[]);
                pending.complete(result);
                if let Some(callback) = callback {
                    if let Err(e) = callback.call(&[Value::Native(pending)]) {
                        warn!(error = %e, "async completion callback failed");
                    }
                }
            })?;
            Ok(Value::Native(handle))
        }))
    }

    fn build_end(&self, ctx: &mut BuildContext<'_>, target_name: &str) -> BuildResult<()> {
        let label = ctx.member_label();
        let exists = ctx
            .units()
            .iter()
            .any(|u| u.accessor == AccessorKind::Invoke && u.method.name() == target_name);
        let takes_handle = ctx.method().map_or(false, |m| m.params.len() == 1);
        if !exists || !takes_handle {
            return Err(BuildError::InvalidMarker {
                member: label,
                detail: format!(
                    "End member must take one handle of an asynchronous '{}'",
                    target_name
                ),
            });
        }

        let returns = ctx.method().map(|m| m.return_type.clone()).unwrap_or(ValueType::Void);
        ctx.emit_body(body_stage(move |info| {
            let handle = info
                .parameter_values
                .first()
                .and_then(|v| v.downcast_native::<AsyncResult>())
                .ok_or_else(|| CallError::Argument {
                    param: info
                        .method()
                        .params
                        .first()
                        .map(|p| p.name.to_string())
                        .unwrap_or_default(),
                    message: "Argument is not an asynchronous call handle".to_string(),
                })?;
            let value = handle.wait()?;
            Ok(if returns == ValueType::Void { Value::Null } else { value })
        }))
    }
}

impl TypeBuilder for AsyncBuilder {
    fn name(&self) -> &str {
        "async"
    }

    fn priority(&self, _ctx: &BuildContext<'_>) -> i32 {
        priority::HIGH
    }

    fn is_applied(&self, ctx: &BuildContext<'_>) -> bool {
        ctx.step() == BuildStep::BuildMember
            && ctx.member().map_or(false, |m| m.kind == MemberKind::Method)
    }

    fn owns_body(&self) -> bool {
        true
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> BuildResult<()> {
        let name = ctx.member().map(|m| m.name.to_string()).unwrap_or_default();
        match self.role(&name) {
            Some(Role::Begin(target)) => self.build_begin(ctx, &target),
            Some(Role::End(target)) => self.build_end(ctx, &target),
            None => Err(BuildError::InvalidMarker {
                member: ctx.member_label(),
                detail: "asynchronous members must be named Begin* or End*".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pool_runs_jobs() {
        let pool = AsyncWorkerPool::new(2);
        assert!(!pool.is_started());
        let result = Arc::new(AsyncResult::new(Value::Int(9)));
        let pending = result.clone();
        pool.spawn(move || {
            thread::sleep(Duration::from_millis(20));
            pending.complete(Ok(Value::str("done")));
        })
        .unwrap();
        assert!(pool.is_started());
        assert_eq!(result.wait().unwrap(), Value::str("done"));
        assert!(result.is_completed());
        assert_eq!(result.state(), &Value::Int(9));
    }

    #[test]
    fn test_wait_returns_error() {
        let result = AsyncResult::new(Value::Null);
        result.complete(Err(CallError::invalid_operation("boom")));
        assert!(result.wait().is_err());
    }
}
