//! Thread-affinity router and public dispatch surface.
//!
//! Exactly one thread — the one that called [`Dispatcher::initialize`] — may
//! execute embedded-runtime code. Calls from that owner thread drain any
//! queued worker requests first (so a busy owner cannot starve them waiting
//! for an event-loop tick that will not come), then execute directly. Calls
//! from any other thread are enqueued and the caller parks on its request's
//! private condition variable until the owner completes it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use serde::Serialize;

use crate::config::DispatchConfig;
use crate::dispatch_channel::DispatchChannel;
use crate::dispatch_guard::ExecutionGuard;
use crate::engine::ScriptEngine;
use crate::error::{Error, Result};
use crate::eval_request::{EvalRequest, RequestKind};
use crate::eval_value::{EvalValue, TypeHint};
use crate::event_bridge::EventLoopBridge;

/// Process-wide dispatch state shared by the router, guard and bridge.
///
/// Owner identity is set once at initialization; the rest is atomics. No
/// lock is taken for any of it beyond what the channel and per-request
/// mutexes already provide.
#[derive(Debug)]
pub struct DispatchState {
    owner: OnceLock<ThreadId>,
    initialized: AtomicBool,
    in_runtime_call: AtomicBool,
    direct_calls: AtomicU64,
    dispatched_calls: AtomicU64,
}

impl DispatchState {
    pub(crate) fn new() -> Self {
        Self {
            owner: OnceLock::new(),
            initialized: AtomicBool::new(false),
            in_runtime_call: AtomicBool::new(false),
            direct_calls: AtomicU64::new(0),
            dispatched_calls: AtomicU64::new(0),
        }
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn on_owner_thread(&self) -> bool {
        self.owner.get() == Some(&thread::current().id())
    }

    /// Try to mark a runtime call in flight; false if one already is.
    pub(crate) fn enter_runtime_call(&self) -> bool {
        !self.in_runtime_call.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn exit_runtime_call(&self) {
        self.in_runtime_call.store(false, Ordering::SeqCst);
    }

    pub(crate) fn runtime_call_in_flight(&self) -> bool {
        self.in_runtime_call.load(Ordering::SeqCst)
    }
}

/// Diagnostics snapshot; no correctness implications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchStatus {
    pub initialized: bool,
    pub direct_calls: u64,
    pub dispatched_calls: u64,
    pub queue_depth: usize,
}

/// The dispatch context handle. Shared as `Arc` between the owner thread and
/// any number of worker threads.
pub struct Dispatcher {
    state: Arc<DispatchState>,
    channel: DispatchChannel<Arc<EvalRequest>>,
    guard: ExecutionGuard,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Build the dispatch context around an engine.
    ///
    /// Fails only if the doorbell fd pair cannot be created. The context is
    /// not yet usable: every call routes to `NotInitialized` until
    /// [`initialize`](Self::initialize) runs on the owner thread.
    pub fn new(engine: Box<dyn ScriptEngine>, config: DispatchConfig) -> Result<Arc<Self>> {
        let state = Arc::new(DispatchState::new());
        Ok(Arc::new(Self {
            guard: ExecutionGuard::new(engine, Arc::clone(&state)),
            state,
            channel: DispatchChannel::new()?,
            config,
        }))
    }

    /// Record the calling thread as the runtime owner and arm dispatch.
    ///
    /// Idempotent: second and later calls are success no-ops and do not move
    /// ownership.
    pub fn initialize(&self) -> Result<()> {
        let owner = *self.state.owner.get_or_init(|| thread::current().id());
        self.state.initialized.store(true, Ordering::Release);
        tracing::debug!(
            target: "evalbridge.dispatch",
            event = "dispatch.initialized",
            owner = ?owner,
            "dispatch initialized"
        );
        Ok(())
    }

    /// Evaluate an expression, optionally enforcing a result shape.
    #[must_use]
    pub fn evaluate(&self, code: &str, hint: TypeHint) -> EvalValue {
        let kind = if hint == TypeHint::Any {
            RequestKind::Eval
        } else {
            RequestKind::TypedEval
        };
        self.submit_and_await(EvalRequest::new(kind, code, hint))
    }

    /// Evaluate with a numeric scalar bound as `.x`. A `None` value yields a
    /// missing result without invoking the runtime at all.
    #[must_use]
    pub fn evaluate_with_scalar(&self, code: &str, value: Option<f64>) -> EvalValue {
        self.submit_and_await(EvalRequest::new(
            RequestKind::WithScalar(value),
            code,
            TypeHint::Float,
        ))
    }

    /// Evaluate with a string scalar bound as `.x`. A `None` value yields a
    /// missing string result without invoking the runtime.
    #[must_use]
    pub fn evaluate_with_string(&self, code: &str, value: Option<&str>) -> EvalValue {
        self.submit_and_await(EvalRequest::new(
            RequestKind::WithString(value.map(ToOwned::to_owned)),
            code,
            TypeHint::Str,
        ))
    }

    /// Route one request per the calling thread's identity and wait for its
    /// result. Callers always get an `EvalValue` back synchronously, whether
    /// the call executed directly or round-tripped through the channel.
    #[must_use]
    pub fn submit_and_await(&self, request: Arc<EvalRequest>) -> EvalValue {
        if !self.state.is_initialized() {
            return EvalValue::Error(Error::NotInitialized);
        }

        if self.state.on_owner_thread() {
            // Deadlock avoidance: queued worker requests run before the
            // owner's own, in FIFO order, because no event-loop tick will
            // happen while the owner executes guard code synchronously.
            let drained = self.drain_owner_queue();
            self.guard.run(&request);
            self.state.direct_calls.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                target: "evalbridge.dispatch",
                event = "dispatch.direct",
                drained_first = drained,
                "request executed on owner thread"
            );
            request.result().unwrap_or(EvalValue::Null)
        } else {
            if let Err(err) = self.channel.send(Arc::clone(&request)) {
                return EvalValue::Error(err);
            }
            self.state.dispatched_calls.fetch_add(1, Ordering::Relaxed);
            match request.await_completion(&self.config.wait_policy()) {
                Ok(value) => value,
                Err(err) => EvalValue::Error(err),
            }
        }
    }

    /// Diagnostics only.
    #[must_use]
    pub fn status(&self) -> DispatchStatus {
        DispatchStatus {
            initialized: self.state.is_initialized(),
            direct_calls: self.state.direct_calls.load(Ordering::Relaxed),
            dispatched_calls: self.state.dispatched_calls.load(Ordering::Relaxed),
            queue_depth: self.channel.len(),
        }
    }

    /// Close the channel; subsequent sends fail with `ChannelClosed`.
    ///
    /// When called on the owner thread the remaining backlog is drained
    /// first — close means "no more sends", not "abandon waiters".
    /// Idempotent.
    pub fn shutdown(&self) {
        self.channel.close();
        if self.state.on_owner_thread() {
            let drained = self.drain_owner_queue();
            tracing::debug!(
                target: "evalbridge.dispatch",
                event = "dispatch.shutdown",
                drained,
                "dispatch shut down"
            );
        }
    }

    /// The event-loop integration handle for the host's reactor.
    #[must_use]
    pub fn bridge(&self) -> EventLoopBridge<'_> {
        EventLoopBridge::new(self)
    }

    /// Drain the channel fully: repeated non-blocking receive + execute.
    /// Owner thread only; stops at empty (or closed-and-empty).
    pub(crate) fn drain_owner_queue(&self) -> usize {
        // A nested dispatch from inside the engine must not consume queued
        // worker requests: the guard would deny each one and their real
        // results would be lost. They stay queued for the outer drain.
        if self.state.runtime_call_in_flight() {
            return 0;
        }
        self.channel.drain_wakeup();
        let mut drained = 0;
        while let Ok(Some(request)) = self.channel.try_recv() {
            self.guard.run(&request);
            drained += 1;
        }
        drained
    }

    pub(crate) fn state(&self) -> &DispatchState {
        &self.state
    }

    pub(crate) fn channel(&self) -> &DispatchChannel<Arc<EvalRequest>> {
        &self.channel
    }
}
