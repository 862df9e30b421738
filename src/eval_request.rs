//! Request lifecycle: one in-flight evaluation and its completion handshake.
//!
//! A request is created by the calling thread and shared by `Arc`: the
//! channel and the consumer hold their own clones, so a worker that times out
//! and drops its handle cannot invalidate the slot the owner thread will
//! later write into. The consumer only ever writes the output slot and flips
//! the completed flag — it never frees the request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::config::WaitPolicy;
use crate::error::{Error, Result};
use crate::eval_value::{EvalValue, TypeHint};

/// What the owner thread should do with the request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    /// Evaluate the expression as-is.
    Eval,
    /// Evaluate and enforce an expected result shape.
    TypedEval,
    /// Bind the numeric parameter as `.x`, then evaluate.
    WithScalar(Option<f64>),
    /// Bind the string parameter as `.x`, then evaluate.
    WithString(Option<String>),
}

/// One evaluation request crossing the thread boundary.
#[derive(Debug)]
pub struct EvalRequest {
    kind: RequestKind,
    code: String,
    hint: TypeHint,
    slot: Mutex<Option<EvalValue>>,
    done: Condvar,
    completed: AtomicBool,
}

impl EvalRequest {
    /// Create a request ready for submission.
    #[must_use]
    pub fn new(kind: RequestKind, code: impl Into<String>, hint: TypeHint) -> Arc<Self> {
        Arc::new(Self {
            kind,
            code: code.into(),
            hint,
            slot: Mutex::new(None),
            done: Condvar::new(),
            completed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[must_use]
    pub const fn hint(&self) -> TypeHint {
        self.hint
    }

    /// Whether the consumer has finished writing the output slot.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Post-completion inspection of the output slot.
    #[must_use]
    pub fn result(&self) -> Option<EvalValue> {
        self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// Consumer side: write the output and wake the submitter.
    ///
    /// The flag flips under the same mutex the waiter's condvar uses, and
    /// only after the slot is fully written, so a woken waiter always
    /// observes the value.
    pub fn complete(&self, value: EvalValue) {
        let mut slot = self
            .slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = Some(value);
        self.completed.store(true, Ordering::Release);
        drop(slot);
        self.done.notify_all();
    }

    /// Submitter side: block until completion or the policy's deadline.
    ///
    /// Short timed waits in a retry loop guard against spurious wakeups and
    /// keep the total budget fixed to the deadline computed at submit time.
    /// On timeout the request stays valid; a late `complete` is still
    /// observable through [`result`](Self::result).
    pub fn await_completion(&self, policy: &WaitPolicy) -> Result<EvalValue> {
        let mut slot = self
            .slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            if self.completed.load(Ordering::Acquire) {
                return Ok(slot.clone().unwrap_or(EvalValue::Null));
            }
            let Some(remaining) = policy.remaining() else {
                tracing::debug!(
                    target: "evalbridge.request",
                    event = "request.timeout",
                    code = self.code.as_str(),
                    "wait ceiling exceeded before completion"
                );
                return Err(Error::Timeout);
            };
            let wait = policy.interval.min(remaining);
            let (guard, _timed_out) = self
                .done
                .wait_timeout(slot, wait)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            slot = guard;
        }
    }
}
