//! Call logging

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::{attach_interceptor, effective_points, hooks_at_step};
use crate::builder::{BuildContext, TypeBuilder};
use crate::error::{BuildResult, CallResult};
use crate::intercept::{InterceptCallInfo, InterceptType, Interceptor};
use crate::value::Value;

/// Logged event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEvent {
    /// Call started
    Enter,
    /// Call returned
    Exit,
    /// Call failed
    Exception,
}

/// One log entry
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Event
    pub event: LogEvent,
    /// `Type.Member`
    pub method: String,
    /// Argument values, when parameter logging is on
    pub parameters: Option<Vec<Value>>,
    /// Time since the call started
    pub elapsed: Duration,
    /// Error text for [`LogEvent::Exception`]
    pub error: Option<String>,
    /// Principal at call start
    pub principal: Option<String>,
}

/// Log sink
pub trait LogOutput: Send + Sync {
    /// Write one record
    fn write(&self, record: &LogRecord);
}

/// Writes records as `tracing` events under the `typeloom::call` target
#[derive(Debug, Clone)]
pub struct TracingLogOutput {
    logger: String,
}

impl TracingLogOutput {
    /// Output tagging every event with `logger`
    pub fn new(logger: &str) -> Self {
        Self {
            logger: logger.to_string(),
        }
    }
}

impl LogOutput for TracingLogOutput {
    fn write(&self, record: &LogRecord) {
        let params = record.parameters.as_ref().map(|p| format!("{:?}", p));
        match record.event {
            LogEvent::Enter => trace!(
                target: "typeloom::call",
                logger = %self.logger,
                method = %record.method,
                params = params.as_deref(),
                principal = record.principal.as_deref(),
                "enter"
            ),
            LogEvent::Exit => debug!(
                target: "typeloom::call",
                logger = %self.logger,
                method = %record.method,
                params = params.as_deref(),
                elapsed_us = record.elapsed.as_micros() as u64,
                "exit"
            ),
            LogEvent::Exception => warn!(
                target: "typeloom::call",
                logger = %self.logger,
                method = %record.method,
                params = params.as_deref(),
                elapsed_us = record.elapsed.as_micros() as u64,
                error = record.error.as_deref(),
                "exception"
            ),
        }
    }
}

/// Logging settings, parsed from an options string such as
/// `"LogParameters=true; MinCallTime=50"`
#[derive(Clone)]
pub struct LogOptions {
    /// Logging on at all
    pub enabled: bool,
    /// Include argument values
    pub log_parameters: bool,
    /// Log failed calls
    pub log_exceptions: bool,
    /// Successful calls faster than this are not logged on exit
    pub min_call_time: Duration,
    /// Sink (the factory's tracing output when absent)
    pub output: Option<Arc<dyn LogOutput>>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            log_parameters: false,
            log_exceptions: true,
            min_call_time: Duration::ZERO,
            output: None,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

impl LogOptions {
    /// Parse `key=value` pairs separated by `;` or `,`
    ///
    /// Keys are case-insensitive. Unknown keys and unparsable values are
    /// ignored and keep their defaults.
    pub fn parse(options: &str) -> Self {
        let mut out = Self::default();
        for pair in options.split([';', ',']) {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "enabled" => out.enabled = parse_bool(value).unwrap_or(out.enabled),
                "logparameters" => {
                    out.log_parameters = parse_bool(value).unwrap_or(out.log_parameters)
                }
                "logexceptions" => {
                    out.log_exceptions = parse_bool(value).unwrap_or(out.log_exceptions)
                }
                "mincalltime" => {
                    if let Ok(ms) = value.parse::<u64>() {
                        out.min_call_time = Duration::from_millis(ms);
                    }
                }
                _ => {}
            }
        }
        out
    }

    /// Use `output` as the sink
    pub fn with_output(mut self, output: Arc<dyn LogOutput>) -> Self {
        self.output = Some(output);
        self
    }
}

impl fmt::Debug for LogOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogOptions")
            .field("enabled", &self.enabled)
            .field("log_parameters", &self.log_parameters)
            .field("log_exceptions", &self.log_exceptions)
            .field("min_call_time", &self.min_call_time)
            .field("custom_output", &self.output.is_some())
            .finish()
    }
}

/// Interceptor writing enter / exit / exception records
pub struct LoggingAspect {
    options: LogOptions,
    output: Arc<dyn LogOutput>,
}

impl LoggingAspect {
    /// Aspect writing to `output`
    pub fn new(options: LogOptions, output: Arc<dyn LogOutput>) -> Self {
        Self { options, output }
    }

    fn record(&self, info: &InterceptCallInfo, event: LogEvent) -> LogRecord {
        LogRecord {
            event,
            method: info.method().full_name(),
            parameters: self.options.log_parameters.then(|| info.parameter_values.clone()),
            elapsed: info.elapsed(),
            error: info.exception().map(|e| e.to_string()),
            principal: info.current_principal().map(str::to_string),
        }
    }
}

impl Interceptor for LoggingAspect {
    fn before_call(&self, info: &mut InterceptCallInfo) -> CallResult<()> {
        self.output.write(&self.record(info, LogEvent::Enter));
        Ok(())
    }

    fn on_finally(&self, info: &mut InterceptCallInfo) -> CallResult<()> {
        if info.exception().is_some() {
            if self.options.log_exceptions {
                self.output.write(&self.record(info, LogEvent::Exception));
            }
        } else if info.elapsed() >= self.options.min_call_time {
            self.output.write(&self.record(info, LogEvent::Exit));
        }
        Ok(())
    }
}

const POINTS: InterceptType = InterceptType::BEFORE_CALL.union(InterceptType::ON_FINALLY);

/// Attaches a [`LoggingAspect`]
pub struct LogBuilder {
    options: LogOptions,
}

impl LogBuilder {
    /// Builder with `options`
    pub fn new(options: LogOptions) -> Self {
        Self { options }
    }

    fn points(ctx: &BuildContext<'_>) -> InterceptType {
        effective_points(ctx.markers(), TypeId::of::<LoggingAspect>(), POINTS)
    }
}

impl TypeBuilder for LogBuilder {
    fn name(&self) -> &str {
        "log"
    }

    fn is_applied(&self, ctx: &BuildContext<'_>) -> bool {
        self.options.enabled && ctx.unit().is_some() && hooks_at_step(ctx, Self::points(ctx))
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> BuildResult<()> {
        let points = Self::points(ctx);
        attach_interceptor(ctx, "typeloom.log", points, |ctx| {
            let output: Arc<dyn LogOutput> = match &self.options.output {
                Some(output) => output.clone(),
                None => Arc::new(TracingLogOutput::new(&ctx.services().config().log_target)),
            };
            let aspect: Arc<dyn Interceptor> =
                Arc::new(LoggingAspect::new(self.options.clone(), output));
            Ok(aspect)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options() {
        let o = LogOptions::parse("LogParameters=true; mincalltime=25, LOGEXCEPTIONS=false");
        assert!(o.enabled);
        assert!(o.log_parameters);
        assert!(!o.log_exceptions);
        assert_eq!(o.min_call_time, Duration::from_millis(25));
    }

    #[test]
    fn test_parse_ignores_garbage() {
        let o = LogOptions::parse("nonsense; Enabled=maybe; =1");
        assert!(o.enabled);
        assert!(!o.log_parameters);
        assert_eq!(o.min_call_time, Duration::ZERO);

        assert!(!LogOptions::parse("Enabled=false").enabled);
    }
}
