//! The seam between the dispatch core and the embedded scripting runtime.
//!
//! Real bindings (an embedded R, Lua, JS, ... interpreter) implement
//! [`ScriptEngine`]; the dispatch core never links against a concrete runtime.
//! The contract mirrors how such runtimes actually fail:
//!
//! - a *soft* failure (parse error, script-level exception the runtime caught
//!   itself) comes back as `Err(String)`;
//! - a *hard* abort (the runtime's longjmp-equivalent escaping the call) is
//!   modeled as a panic and contained by
//!   [`ExecutionGuard`](crate::dispatch_guard::ExecutionGuard).
//!
//! Implementations may assume every method is called from the single owner
//! thread; the router enforces that invariant.

/// Reserved binding name for an injected scalar parameter.
///
/// `evaluate_with_scalar`/`evaluate_with_string` define this variable in the
/// runtime's global evaluation context before evaluating the expression.
pub const SCALAR_BINDING: &str = ".x";

/// A dynamically-typed value produced by the embedded runtime.
///
/// The runtime's native value model is vector-shaped: every value is a
/// homogeneous vector and a length-1 vector is what callers think of as a
/// scalar. Missing elements are first-class (`None`); for floats the
/// runtime's missing marker is NaN-tagged, so the float payload stays `f64`
/// and NaN is interpreted at the conversion boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeValue {
    /// The runtime's null/unit value.
    Null,
    /// Logical vector; `None` is the runtime's missing logical.
    Logical(Vec<Option<bool>>),
    /// Integer vector; `None` is the runtime's sentinel missing integer.
    Int(Vec<Option<i32>>),
    /// Float vector; NaN is the runtime's missing marker.
    Float(Vec<f64>),
    /// String vector; `None` is the runtime's missing string.
    Str(Vec<Option<String>>),
    /// Raw byte vector.
    Bytes(Vec<u8>),
}

impl RuntimeValue {
    /// Runtime-facing type name, used in mismatch diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Logical(_) => "logical",
            Self::Int(_) => "integer",
            Self::Float(_) => "double",
            Self::Str(_) => "character",
            Self::Bytes(_) => "raw",
        }
    }

    /// Element count; `Null` and `Bytes` report their natural lengths.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Null => 0,
            Self::Logical(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Str(v) => v.len(),
            Self::Bytes(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The embedded scripting runtime behind the dispatch boundary.
///
/// `Send` is required so the engine can live inside the shared dispatcher
/// handle; it is still thread-confined at runtime — only the owner thread
/// ever reaches it, through the guard's engine lock.
pub trait ScriptEngine: Send {
    /// Evaluate an expression and return its value.
    ///
    /// `Err` carries the runtime's own error message (soft failure). A panic
    /// models the runtime's non-local exit and is caught by the guard.
    fn eval(&mut self, code: &str) -> std::result::Result<RuntimeValue, String>;

    /// Define a numeric variable in the global evaluation context.
    /// `None` binds the runtime's missing marker.
    fn bind_scalar(&mut self, name: &str, value: Option<f64>);

    /// Define a string variable in the global evaluation context.
    /// `None` binds the runtime's missing marker.
    fn bind_string(&mut self, name: &str, value: Option<&str>);
}
