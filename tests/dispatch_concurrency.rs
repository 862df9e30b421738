//! End-to-end dispatch tests over a scripted mock engine.
//!
//! Covers the contracts that only show up with real threads:
//! - FIFO delivery of queued worker requests
//! - deadlock-freedom when the owner thread calls while workers are queued
//! - re-entrance denial from a runtime-side callback
//! - scalar/string parameter injection and the missing-parameter fast path
//! - worker timeout with safe late completion
//! - abort containment and recovery through the public surface

use evalbridge::{
    DispatchConfig, Dispatcher, Error, EvalRequest, EvalValue, RequestKind, RuntimeValue,
    ScriptEngine, TypeHint, SCALAR_BINDING,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Scripted stand-in for the embedded runtime. Records every invocation so
/// tests can assert execution order and count.
struct MiniEngine {
    order: Arc<Mutex<Vec<String>>>,
    eval_count: Arc<AtomicUsize>,
    bound_scalar: Option<f64>,
    bound_string: Option<String>,
    nested: Arc<OnceLock<Weak<Dispatcher>>>,
    victim: Arc<Mutex<Option<thread::JoinHandle<EvalValue>>>>,
}

impl ScriptEngine for MiniEngine {
    fn eval(&mut self, code: &str) -> Result<RuntimeValue, String> {
        self.eval_count.fetch_add(1, Ordering::SeqCst);
        self.order.lock().unwrap().push(code.to_string());

        if code == "panic" {
            panic!("simulated non-local exit");
        }
        if code == "nest" {
            // A runtime-side callback dispatching again must fail loud.
            let denied = self
                .nested
                .get()
                .and_then(Weak::upgrade)
                .is_some_and(|dispatcher| {
                    let inner = dispatcher.evaluate("1", TypeHint::Any);
                    inner.error() == Some(&Error::ReentranceDenied)
                });
            return Ok(RuntimeValue::Logical(vec![Some(denied)]));
        }
        if code == "nest-queued" {
            // A worker request parked mid-call must survive the nested
            // (denied) dispatch and be served by the outer drain.
            let dispatcher = self
                .nested
                .get()
                .and_then(Weak::upgrade)
                .expect("dispatcher hook");
            let worker = {
                let dispatcher = Arc::clone(&dispatcher);
                thread::spawn(move || dispatcher.evaluate("victim", TypeHint::Any))
            };
            let deadline = Instant::now() + Duration::from_secs(5);
            while dispatcher.status().queue_depth < 1 {
                assert!(Instant::now() < deadline, "victim never queued");
                thread::sleep(Duration::from_millis(2));
            }
            let denied = dispatcher.evaluate("1", TypeHint::Any).error()
                == Some(&Error::ReentranceDenied);
            let untouched = dispatcher.status().queue_depth == 1;
            *self.victim.lock().unwrap() = Some(worker);
            return Ok(RuntimeValue::Logical(vec![Some(denied && untouched)]));
        }
        if code == "return .x * 2" {
            return match self.bound_scalar {
                Some(x) => Ok(RuntimeValue::Float(vec![x * 2.0])),
                None => Err("object '.x' not found".to_string()),
            };
        }
        if code == "paste(.x)" {
            return match &self.bound_string {
                Some(s) => Ok(RuntimeValue::Str(vec![Some(s.clone())])),
                None => Err("object '.x' not found".to_string()),
            };
        }
        Ok(RuntimeValue::Str(vec![Some(code.to_string())]))
    }

    fn bind_scalar(&mut self, name: &str, value: Option<f64>) {
        assert_eq!(name, SCALAR_BINDING);
        self.bound_scalar = value;
    }

    fn bind_string(&mut self, name: &str, value: Option<&str>) {
        assert_eq!(name, SCALAR_BINDING);
        self.bound_string = value.map(ToOwned::to_owned);
    }
}

struct Harness {
    dispatcher: Arc<Dispatcher>,
    order: Arc<Mutex<Vec<String>>>,
    eval_count: Arc<AtomicUsize>,
    victim: Arc<Mutex<Option<thread::JoinHandle<EvalValue>>>>,
}

impl Harness {
    /// Build and initialize a dispatcher on the calling (owner) thread.
    fn new(config: DispatchConfig) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .try_init();

        let order = Arc::new(Mutex::new(Vec::new()));
        let eval_count = Arc::new(AtomicUsize::new(0));
        let nested = Arc::new(OnceLock::new());
        let victim = Arc::new(Mutex::new(None));
        let engine = MiniEngine {
            order: Arc::clone(&order),
            eval_count: Arc::clone(&eval_count),
            bound_scalar: None,
            bound_string: None,
            nested: Arc::clone(&nested),
            victim: Arc::clone(&victim),
        };
        let dispatcher = Dispatcher::new(Box::new(engine), config).expect("dispatcher");
        dispatcher.initialize().expect("initialize");
        nested
            .set(Arc::downgrade(&dispatcher))
            .expect("nested hook set once");
        Self {
            dispatcher,
            order,
            eval_count,
            victim,
        }
    }

    fn executed(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    fn wait_for_queue_depth(&self, depth: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.dispatcher.status().queue_depth < depth {
            assert!(
                Instant::now() < deadline,
                "queue never reached depth {depth}"
            );
            thread::sleep(Duration::from_millis(2));
        }
    }
}

#[test]
fn worker_requests_flow_fifo_through_the_polling_bridge() {
    let harness = Harness::new(DispatchConfig::default());
    let dispatcher = Arc::clone(&harness.dispatcher);

    let worker = thread::spawn(move || {
        (0..5)
            .map(|i| dispatcher.evaluate(&format!("req-{i}"), TypeHint::Any))
            .collect::<Vec<_>>()
    });

    // Polling fallback mode: the owner drains periodically instead of
    // reacting to the doorbell fd.
    let bridge = harness.dispatcher.bridge();
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut served = 0_usize;
    while served < 5 {
        assert!(Instant::now() < deadline, "polling drain starved");
        served += bridge.drain_pending().expect("drain");
        thread::sleep(Duration::from_millis(1));
    }

    let results = worker.join().expect("worker join");
    for (i, value) in results.iter().enumerate() {
        assert_eq!(*value, EvalValue::Str(Some(format!("req-{i}"))));
    }
    // Sequential submissions arrive in send order.
    assert_eq!(
        harness.executed(),
        (0..5).map(|i| format!("req-{i}")).collect::<Vec<_>>()
    );
}

#[test]
fn owner_call_drains_fifty_queued_workers_first() {
    let harness = Harness::new(DispatchConfig::default());

    let workers: Vec<_> = (0..50)
        .map(|i| {
            let dispatcher = Arc::clone(&harness.dispatcher);
            thread::spawn(move || dispatcher.evaluate(&format!("w-{i}"), TypeHint::Any))
        })
        .collect();

    harness.wait_for_queue_depth(50);

    // The owner's own call must drain the backlog before running, or the
    // 50 parked workers would wait for an event-loop tick that never comes.
    let own = harness.dispatcher.evaluate("owner", TypeHint::Any);
    assert_eq!(own, EvalValue::Str(Some("owner".into())));

    for (i, worker) in workers.into_iter().enumerate() {
        let got = worker.join().expect("worker join");
        assert_eq!(got, EvalValue::Str(Some(format!("w-{i}"))));
    }

    let executed = harness.executed();
    assert_eq!(executed.len(), 51);
    assert_eq!(executed[50], "owner", "owner's request must run last");

    let status = harness.dispatcher.status();
    assert_eq!(status.direct_calls, 1);
    assert_eq!(status.dispatched_calls, 50);
    assert_eq!(status.queue_depth, 0);
}

#[test]
fn nested_dispatch_from_inside_the_runtime_is_denied() {
    let harness = Harness::new(DispatchConfig::default());
    let outer = harness.dispatcher.evaluate("nest", TypeHint::Any);
    // The engine reports whether the nested call was denied; the outer
    // call's own result is unaffected.
    assert_eq!(outer, EvalValue::Bool(Some(true)));
}

#[test]
fn nested_call_leaves_queued_worker_requests_untouched() {
    let harness = Harness::new(DispatchConfig::default());

    // The engine queues a worker request mid-call, attempts a nested
    // dispatch (denied), and reports whether the worker's entry survived.
    let outer = harness.dispatcher.evaluate("nest-queued", TypeHint::Any);
    assert_eq!(outer, EvalValue::Bool(Some(true)));

    // The outer drain serves the parked worker with its real result.
    let served = harness.dispatcher.bridge().drain_pending().expect("drain");
    assert_eq!(served, 1);
    let worker = harness
        .victim
        .lock()
        .unwrap()
        .take()
        .expect("worker handle stashed by the engine");
    assert_eq!(
        worker.join().expect("worker join"),
        EvalValue::Str(Some("victim".into()))
    );
}

#[test]
fn scalar_injection_doubles_and_missing_skips_the_runtime() {
    let harness = Harness::new(DispatchConfig::default());

    let got = harness
        .dispatcher
        .evaluate_with_scalar("return .x * 2", Some(21.0));
    assert_eq!(got, EvalValue::Float(Some(42.0)));
    assert!(!got.is_missing());
    assert_eq!(harness.eval_count.load(Ordering::SeqCst), 1);

    let got = harness.dispatcher.evaluate_with_scalar("return .x * 2", None);
    assert_eq!(got, EvalValue::Float(None));
    assert!(got.is_missing());
    // The parser/evaluator was never invoked for the missing parameter.
    assert_eq!(harness.eval_count.load(Ordering::SeqCst), 1);
}

#[test]
fn string_injection_returns_a_string_and_missing_skips_the_runtime() {
    let harness = Harness::new(DispatchConfig::default());

    // A string-in, string-out expression comes back with the string tag.
    let got = harness
        .dispatcher
        .evaluate_with_string("paste(.x)", Some("abc"));
    assert_eq!(got, EvalValue::Str(Some("abc".into())));
    assert_eq!(harness.eval_count.load(Ordering::SeqCst), 1);

    // A missing parameter yields a missing *string*, runtime untouched.
    let got = harness.dispatcher.evaluate_with_string("paste(.x)", None);
    assert_eq!(got, EvalValue::Str(None));
    assert!(got.is_missing());
    assert_eq!(harness.eval_count.load(Ordering::SeqCst), 1);
}

#[test]
fn timed_out_request_survives_until_the_owner_drains_it() {
    let config = DispatchConfig {
        wait_interval: Duration::from_millis(5),
        wait_ceiling: Duration::from_millis(40),
    };
    let harness = Harness::new(config);

    let request = EvalRequest::new(RequestKind::Eval, "late-bloomer", TypeHint::Any);
    let worker = {
        let dispatcher = Arc::clone(&harness.dispatcher);
        let request = Arc::clone(&request);
        thread::spawn(move || dispatcher.submit_and_await(request))
    };

    // Nobody drains: the worker gives up at its ceiling.
    assert_eq!(
        worker.join().expect("worker join"),
        EvalValue::Error(Error::Timeout)
    );
    assert!(!request.is_completed());

    // The owner eventually drains; the completion lands in live memory.
    let served = harness.dispatcher.bridge().drain_pending().expect("drain");
    assert_eq!(served, 1);
    assert_eq!(
        request.result(),
        Some(EvalValue::Str(Some("late-bloomer".into())))
    );
}

#[test]
fn abort_is_contained_and_dispatch_keeps_working() {
    let harness = Harness::new(DispatchConfig::default());

    let got = harness.dispatcher.evaluate("panic", TypeHint::Any);
    assert_eq!(got, EvalValue::Error(Error::ExecutionAborted));

    // Dispatch state survived the contained abort.
    let got = harness.dispatcher.evaluate("still-alive", TypeHint::Any);
    assert_eq!(got, EvalValue::Str(Some("still-alive".into())));
}

#[test]
fn typed_evaluation_applies_hints_across_the_boundary() {
    let harness = Harness::new(DispatchConfig::default());

    // The mock echoes strings, so a Float hint is an honest mismatch.
    let got = harness.dispatcher.evaluate("text", TypeHint::Float);
    assert_eq!(
        got.error(),
        Some(&Error::TypeMismatch {
            expected: "double",
            actual: "string",
            len: 1,
        })
    );

    let got = harness.dispatcher.evaluate("as-is", TypeHint::Str);
    assert_eq!(got, EvalValue::Str(Some("as-is".into())));
}

#[test]
fn status_snapshot_serializes_for_host_diagnostics() {
    let harness = Harness::new(DispatchConfig::default());
    let _ = harness.dispatcher.evaluate("one", TypeHint::Any);

    let status = harness.dispatcher.status();
    let json = serde_json::to_value(&status).expect("serialize status");
    assert_eq!(json["initialized"], serde_json::json!(true));
    assert_eq!(json["direct_calls"], serde_json::json!(1));
    assert_eq!(json["dispatched_calls"], serde_json::json!(0));
    assert_eq!(json["queue_depth"], serde_json::json!(0));
}
