//! evalbridge - cross-thread dispatch core for an embedded scripting runtime
//!
//! This library lets a multithreaded host engine and a single-threaded,
//! non-reentrant embedded scripting runtime call into each other safely:
//! - Thread affinity: runtime code only ever executes on its owner thread
//! - No deadlock when the owner thread itself issues a call while worker
//!   requests are queued
//! - Bounded worker waits with a fixed timeout ceiling
//! - Crash containment: a non-local exit inside the runtime call becomes an
//!   error result, never a corrupted dispatch state
//!
//! ## Public API policy
//!
//! A host embeds this crate by implementing [`ScriptEngine`] for its runtime
//! binding, constructing a [`Dispatcher`], calling
//! [`initialize`](Dispatcher::initialize) on the runtime's owner thread and
//! registering the [`EventLoopBridge`] with its event loop (or polling
//! `drain_pending` where no loop exists). Worker threads then call the
//! `evaluate*` entry points freely.

#![forbid(unsafe_code)]
#![allow(
    clippy::must_use_candidate,
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod config;
pub mod dispatch_channel;
pub mod dispatch_guard;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod eval_request;
pub mod eval_value;
pub mod event_bridge;

pub use config::DispatchConfig;
pub use dispatch_channel::{DispatchChannel, RecvTimeout};
pub use dispatcher::{DispatchStatus, Dispatcher};
pub use engine::{RuntimeValue, ScriptEngine, SCALAR_BINDING};
pub use error::{Error, Result};
pub use eval_request::{EvalRequest, RequestKind};
pub use eval_value::{EvalValue, TypeHint};
pub use event_bridge::EventLoopBridge;
