//! Tagged result variant carried back across the dispatch boundary.
//!
//! [`EvalValue`] is the closed protocol between the owner thread (which
//! produces one per request) and the calling thread (which consumes it). Per
//! the runtime's value model, "missing" is orthogonal to type: a scalar can be
//! present-but-unknown, which `Option::None` encodes without losing the tag.
//! Ownership-based destructors replace the manual per-field free logic a
//! hand-rolled tagged union would need.

use crate::engine::RuntimeValue;
use crate::error::Error;

/// Expected-type hint supplied by the caller.
///
/// `Any` accepts whatever the runtime produced. The typed hints trigger
/// lossless coercion where possible and a `TypeMismatch` error otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeHint {
    #[default]
    Any,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    BoolVec,
    IntVec,
    FloatVec,
    StrVec,
}

impl TypeHint {
    #[must_use]
    const fn name(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Bool => "boolean",
            Self::Int => "integer",
            Self::Float => "double",
            Self::Str => "string",
            Self::Bytes => "raw",
            Self::BoolVec => "boolean vector",
            Self::IntVec => "integer vector",
            Self::FloatVec => "double vector",
            Self::StrVec => "string vector",
        }
    }
}

/// Outcome of one runtime invocation.
///
/// Exactly one payload is active per tag; `None` inside a scalar tag (or a
/// vector element) is the runtime's missing marker, not an absent payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Null,
    Bool(Option<bool>),
    Int(Option<i32>),
    Float(Option<f64>),
    Str(Option<String>),
    Bytes(Vec<u8>),
    BoolVec(Vec<Option<bool>>),
    IntVec(Vec<Option<i32>>),
    FloatVec(Vec<Option<f64>>),
    StrVec(Vec<Option<String>>),
    Error(Error),
}

impl EvalValue {
    /// Convert the runtime's dynamically-typed value into the wire variant.
    ///
    /// A length-1 vector becomes the most specific scalar tag; anything else
    /// keeps the vector tag (including length 0). The runtime's missing
    /// markers (sentinel integer, missing logical/string, NaN-tagged float)
    /// become `None` rather than a type error.
    #[must_use]
    pub fn from_runtime(value: RuntimeValue) -> Self {
        match value {
            RuntimeValue::Null => Self::Null,
            RuntimeValue::Logical(mut v) => {
                if v.len() == 1 {
                    Self::Bool(v.pop().flatten())
                } else {
                    Self::BoolVec(v)
                }
            }
            RuntimeValue::Int(mut v) => {
                if v.len() == 1 {
                    Self::Int(v.pop().flatten())
                } else {
                    Self::IntVec(v)
                }
            }
            RuntimeValue::Float(v) => {
                if v.len() == 1 {
                    Self::Float(float_slot(v[0]))
                } else {
                    Self::FloatVec(v.into_iter().map(float_slot).collect())
                }
            }
            RuntimeValue::Str(mut v) => {
                if v.len() == 1 {
                    Self::Str(v.pop().flatten())
                } else {
                    Self::StrVec(v)
                }
            }
            RuntimeValue::Bytes(v) => Self::Bytes(v),
        }
    }

    /// Rebuild the runtime-side value, preserving missing markers.
    ///
    /// `Error` has no runtime representation and returns `None`.
    #[must_use]
    pub fn to_runtime(&self) -> Option<RuntimeValue> {
        match self {
            Self::Null => Some(RuntimeValue::Null),
            Self::Bool(b) => Some(RuntimeValue::Logical(vec![*b])),
            Self::Int(i) => Some(RuntimeValue::Int(vec![*i])),
            Self::Float(f) => Some(RuntimeValue::Float(vec![f.unwrap_or(f64::NAN)])),
            Self::Str(s) => Some(RuntimeValue::Str(vec![s.clone()])),
            Self::Bytes(b) => Some(RuntimeValue::Bytes(b.clone())),
            Self::BoolVec(v) => Some(RuntimeValue::Logical(v.clone())),
            Self::IntVec(v) => Some(RuntimeValue::Int(v.clone())),
            Self::FloatVec(v) => Some(RuntimeValue::Float(
                v.iter().map(|f| f.unwrap_or(f64::NAN)).collect(),
            )),
            Self::StrVec(v) => Some(RuntimeValue::Str(v.clone())),
            Self::Error(_) => None,
        }
    }

    /// Apply an expected-type hint, coercing only when lossless.
    ///
    /// Int widens to float, bool widens to either number, and a float
    /// narrows to int only when integral and in range. Missing scalars
    /// re-tag freely. A scalar matches its own vector hint as a length-1
    /// vector. Everything else is a `TypeMismatch` naming the actual type
    /// and arity.
    #[must_use]
    pub fn apply_hint(self, hint: TypeHint) -> Self {
        if matches!(hint, TypeHint::Any) || matches!(self, Self::Null | Self::Error(_)) {
            return self;
        }
        if self.is_missing() {
            if let Some(retagged) = missing_for(hint) {
                return retagged;
            }
        }
        let (actual, len) = (self.type_name(), self.len());
        let mismatch = || {
            Self::Error(Error::TypeMismatch {
                expected: hint.name(),
                actual,
                len,
            })
        };
        match (hint, self) {
            (TypeHint::Bool, v @ Self::Bool(_)) => v,
            (TypeHint::Int, v @ Self::Int(_)) => v,
            (TypeHint::Int, Self::Bool(b)) => Self::Int(b.map(i32::from)),
            (TypeHint::Int, Self::Float(f)) => match f.map(narrow_to_int) {
                Some(None) => mismatch(),
                narrowed => Self::Int(narrowed.flatten()),
            },
            (TypeHint::Float, v @ Self::Float(_)) => v,
            (TypeHint::Float, Self::Int(i)) => Self::Float(i.map(f64::from)),
            (TypeHint::Float, Self::Bool(b)) => Self::Float(b.map(|b| f64::from(u8::from(b)))),
            (TypeHint::Str, v @ Self::Str(_)) => v,
            (TypeHint::Bytes, v @ Self::Bytes(_)) => v,
            (TypeHint::BoolVec, v @ Self::BoolVec(_)) => v,
            (TypeHint::BoolVec, Self::Bool(b)) => Self::BoolVec(vec![b]),
            (TypeHint::IntVec, v @ Self::IntVec(_)) => v,
            (TypeHint::IntVec, Self::Int(i)) => Self::IntVec(vec![i]),
            (TypeHint::FloatVec, v @ Self::FloatVec(_)) => v,
            (TypeHint::FloatVec, Self::Float(f)) => Self::FloatVec(vec![f]),
            (TypeHint::FloatVec, Self::IntVec(v)) => {
                Self::FloatVec(v.into_iter().map(|i| i.map(f64::from)).collect())
            }
            (TypeHint::FloatVec, Self::Int(i)) => Self::FloatVec(vec![i.map(f64::from)]),
            (TypeHint::StrVec, v @ Self::StrVec(_)) => v,
            (TypeHint::StrVec, Self::Str(s)) => Self::StrVec(vec![s]),
            _ => mismatch(),
        }
    }

    /// True for a scalar tag carrying the missing marker.
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(
            self,
            Self::Bool(None) | Self::Int(None) | Self::Float(None) | Self::Str(None)
        )
    }

    /// The error payload, if this is the `Error` tag.
    #[must_use]
    pub const fn error(&self) -> Option<&Error> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Tag name, used in mismatch diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "double",
            Self::Str(_) => "string",
            Self::Bytes(_) => "raw",
            Self::BoolVec(_) => "boolean vector",
            Self::IntVec(_) => "integer vector",
            Self::FloatVec(_) => "double vector",
            Self::StrVec(_) => "string vector",
            Self::Error(_) => "error",
        }
    }

    /// Payload arity: 1 for scalars, element count for vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Null | Self::Error(_) => 0,
            Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::Str(_) => 1,
            Self::Bytes(v) => v.len(),
            Self::BoolVec(v) => v.len(),
            Self::IntVec(v) => v.len(),
            Self::FloatVec(v) => v.len(),
            Self::StrVec(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Error> for EvalValue {
    fn from(err: Error) -> Self {
        Self::Error(err)
    }
}

/// The hint-shaped missing value, where one exists (`raw` has no missing
/// representation and falls through to the mismatch path).
fn missing_for(hint: TypeHint) -> Option<EvalValue> {
    match hint {
        TypeHint::Bool => Some(EvalValue::Bool(None)),
        TypeHint::Int => Some(EvalValue::Int(None)),
        TypeHint::Float => Some(EvalValue::Float(None)),
        TypeHint::Str => Some(EvalValue::Str(None)),
        TypeHint::BoolVec => Some(EvalValue::BoolVec(vec![None])),
        TypeHint::IntVec => Some(EvalValue::IntVec(vec![None])),
        TypeHint::FloatVec => Some(EvalValue::FloatVec(vec![None])),
        TypeHint::StrVec => Some(EvalValue::StrVec(vec![None])),
        TypeHint::Any | TypeHint::Bytes => None,
    }
}

fn float_slot(f: f64) -> Option<f64> {
    if f.is_nan() { None } else { Some(f) }
}

/// Lossless float→int narrowing: integral and within `i32` range.
fn narrow_to_int(f: f64) -> Option<i32> {
    if f.fract() == 0.0 && f >= f64::from(i32::MIN) && f <= f64::from(i32::MAX) {
        #[allow(clippy::cast_possible_truncation)]
        Some(f as i32)
    } else {
        None
    }
}
