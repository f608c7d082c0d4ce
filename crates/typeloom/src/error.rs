//! Error types
//!
//! Three families, split by when the failure happens:
//!
//! - [`BuildError`]: raised while a type is being synthesized. Always surfaces
//!   from the type-cache lookup, never on first use of a member.
//! - [`CallError`]: raised while a generated member runs (argument
//!   validation, accessor misuse, exceptions thrown by user bodies).
//! - [`WeaveError`]: union of the two plus configuration failures, returned
//!   by the factory entry points that may both build and construct.

use std::fmt;
use std::sync::Arc;

/// Build-time failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum BuildError {
    /// The type has no usable constructor and no instance-creation strategy
    #[error("Type '{type_name}' has no usable constructor")]
    NoConstructor {
        /// Source type name
        type_name: String,
    },

    /// An abstract member no builder could implement
    #[error("Member '{type_name}.{member}' cannot be implemented: {reason}")]
    UnresolvableMember {
        /// Source type name
        type_name: String,
        /// Member name
        member: String,
        /// Why nothing applied
        reason: String,
    },

    /// An interface member is missing under a throwing must-implement policy
    #[error("{0}")]
    MustImplement(String),

    /// Duck typing could not map an interface onto the supplied object(s)
    #[error("Duck typing failed for interface '{interface}': {reason}")]
    DuckTyping {
        /// Interface name
        interface: String,
        /// Why the mapping failed
        reason: String,
    },

    /// Two exclusive body strategies of equal priority claim the same member
    #[error("Ambiguous builders for '{member}': '{first}' and '{second}' both own the body")]
    AmbiguousBuilders {
        /// Member name
        member: String,
        /// First builder
        first: String,
        /// Second builder
        second: String,
    },

    /// A builder refused to be composed with another one on the same member
    #[error("Builder '{builder}' is incompatible with '{other}' on member '{member}'")]
    IncompatibleBuilders {
        /// Member name
        member: String,
        /// Refusing builder
        builder: String,
        /// The other builder
        other: String,
    },

    /// Markers on the same member contradict each other
    #[error("Conflicting markers on '{member}': {detail}")]
    ConflictingMarkers {
        /// Member name
        member: String,
        /// Description of the conflict
        detail: String,
    },

    /// A marker is malformed or points at something that does not exist
    #[error("Invalid marker on '{member}': {detail}")]
    InvalidMarker {
        /// Member name
        member: String,
        /// Description of the problem
        detail: String,
    },

    /// The synthesizer was driven out of order (builder bug)
    #[error("Invalid build state: {0}")]
    InvalidState(String),
}

/// An exception raised by user-authored member logic
#[derive(Clone, PartialEq, Eq)]
pub struct Exception {
    kind: Arc<str>,
    message: Arc<str>,
}

impl Exception {
    /// Create an exception with a kind tag and a message
    pub fn new(kind: impl Into<Arc<str>>, message: impl Into<Arc<str>>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Exception kind (free-form tag chosen by the thrower)
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Exception message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.kind, self.message)
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Call-time failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// Argument validation failed
    #[error("{message}")]
    Argument {
        /// Parameter name
        param: String,
        /// Formatted message
        message: String,
    },

    /// API misuse or an operation the generated member refuses
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Exception thrown by user logic
    #[error("{0}")]
    Exception(Exception),
}

impl CallError {
    /// Shorthand for a user exception
    pub fn exception(kind: impl Into<Arc<str>>, message: impl Into<Arc<str>>) -> Self {
        CallError::Exception(Exception::new(kind, message))
    }

    /// Shorthand for an invalid-operation error
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        CallError::InvalidOperation(message.into())
    }
}

/// Errors from factory entry points
#[derive(Debug, Clone, thiserror::Error)]
pub enum WeaveError {
    /// Synthesis failed
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Construction or invocation failed
    #[error(transparent)]
    Call(#[from] CallError),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),
}

impl WeaveError {
    /// Returns the build error, if this is one
    pub fn as_build(&self) -> Option<&BuildError> {
        match self {
            WeaveError::Build(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the call error, if this is one
    pub fn as_call(&self) -> Option<&CallError> {
        match self {
            WeaveError::Call(e) => Some(e),
            _ => None,
        }
    }

    /// Collapse into a call error; build and configuration failures become
    /// invalid operations
    pub fn into_call(self) -> CallError {
        match self {
            WeaveError::Call(e) => e,
            other => CallError::InvalidOperation(other.to_string()),
        }
    }
}

/// Build result
pub type BuildResult<T> = Result<T, BuildError>;

/// Call result
pub type CallResult<T> = Result<T, CallError>;

/// Factory result
pub type WeaveResult<T> = Result<T, WeaveError>;
