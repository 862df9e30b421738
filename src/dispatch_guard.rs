//! Crash-contained, re-entrance-guarded runtime invocation.
//!
//! [`ExecutionGuard::run`] is the only place in the crate allowed to invoke
//! the embedded runtime. Two invariants hold around every invocation:
//!
//! 1. at most one invocation is in flight process-wide — a nested attempt
//!    (a runtime-side callback dispatching again) fails loud with
//!    `ReentranceDenied` instead of deadlocking;
//! 2. a non-local exit inside the call (the runtime's longjmp-equivalent,
//!    modeled as a panic) is caught at this boundary and converted into an
//!    `ExecutionAborted` result, never a half-written one.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use crate::dispatcher::DispatchState;
use crate::engine::{ScriptEngine, SCALAR_BINDING};
use crate::error::Error;
use crate::eval_request::{EvalRequest, RequestKind};
use crate::eval_value::EvalValue;

pub struct ExecutionGuard {
    // Uncontended by construction: only the owner thread reaches this lock.
    // It exists so the engine can live inside the Sync dispatcher handle.
    engine: Mutex<Box<dyn ScriptEngine>>,
    state: Arc<DispatchState>,
}

impl ExecutionGuard {
    pub(crate) fn new(engine: Box<dyn ScriptEngine>, state: Arc<DispatchState>) -> Self {
        Self {
            engine: Mutex::new(engine),
            state,
        }
    }

    /// Execute one request and signal its completion.
    ///
    /// Completion is signaled strictly after the re-entrance flag is cleared
    /// and the output slot is fully written, never interleaved.
    pub fn run(&self, request: &EvalRequest) {
        // The flag check must come before the engine lock: a nested call
        // from inside `eval` already holds the lock, and taking it again
        // would deadlock the owner thread.
        if !self.state.enter_runtime_call() {
            tracing::warn!(
                target: "evalbridge.guard",
                event = "guard.reentrance_denied",
                code = request.code(),
                "nested runtime invocation rejected"
            );
            request.complete(EvalValue::Error(Error::ReentranceDenied));
            return;
        }
        let outcome = self.invoke(request);
        self.state.exit_runtime_call();
        request.complete(outcome);
    }

    fn invoke(&self, request: &EvalRequest) -> EvalValue {
        // A missing injected parameter short-circuits to a missing result of
        // the parameter's own kind, without ever touching the runtime's
        // parser or evaluator.
        match request.kind() {
            RequestKind::WithScalar(None) => {
                return EvalValue::Float(None).apply_hint(request.hint());
            }
            RequestKind::WithString(None) => {
                return EvalValue::Str(None).apply_hint(request.hint());
            }
            _ => {}
        }

        // Poison from an engine panic is recovered here; what state the
        // engine itself is left in after an abort is the runtime's concern.
        let mut engine = self
            .engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let caught = catch_unwind(AssertUnwindSafe(|| {
            match request.kind() {
                RequestKind::WithScalar(Some(value)) => {
                    engine.bind_scalar(SCALAR_BINDING, Some(*value));
                }
                RequestKind::WithString(Some(value)) => {
                    engine.bind_string(SCALAR_BINDING, Some(value.as_str()));
                }
                RequestKind::Eval | RequestKind::TypedEval | RequestKind::WithScalar(None)
                | RequestKind::WithString(None) => {}
            }
            engine.eval(request.code())
        }));

        match caught {
            Ok(Ok(raw)) => EvalValue::from_runtime(raw).apply_hint(request.hint()),
            Ok(Err(message)) => EvalValue::Error(Error::Script(message)),
            Err(_) => {
                tracing::warn!(
                    target: "evalbridge.guard",
                    event = "guard.execution_aborted",
                    code = request.code(),
                    "runtime call exited non-locally; contained"
                );
                EvalValue::Error(Error::ExecutionAborted)
            }
        }
    }
}
