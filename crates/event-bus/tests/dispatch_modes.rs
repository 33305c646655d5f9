//! Delivery guarantees of each dispatch mode, exercised through the public API.

use event_bus::{emit, BackpressureStrategy, DispatchMode, EventBus, Handler};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

fn bus(mode: DispatchMode, parallelism: usize) -> EventBus {
    EventBus::builder()
        .dispatch_mode(mode)
        .parallelism(parallelism)
        .build()
        .expect("bus starts")
}

#[test]
fn test_current_thread_runs_handlers_in_order_before_emit_returns() {
    let bus = bus(DispatchMode::CurrentThread, 0);
    let log = Arc::new(Mutex::new(Vec::new()));

    let first = log.clone();
    bus.subscribe(
        "greet",
        Handler::unary(move |name| {
            first.lock().push(format!("a:{}", name.and_then(|v| v.as_str()).unwrap_or("?")));
            Ok(())
        }),
    )
    .expect("subscribe");
    let second = log.clone();
    bus.subscribe(
        "greet",
        Handler::unary(move |name| {
            second.lock().push(format!("b:{}", name.and_then(|v| v.as_str()).unwrap_or("?")));
            Ok(())
        }),
    )
    .expect("subscribe");

    emit!(bus, "greet", "x").expect("emit");

    assert_eq!(*log.lock(), vec!["a:x".to_string(), "b:x".to_string()]);
}

#[test]
fn test_fixed_pool_preserves_per_key_order() {
    let bus = bus(DispatchMode::FixedPool, 4);
    let seen: Arc<Mutex<HashMap<String, Vec<i64>>>> = Arc::default();
    let total = Arc::new(AtomicUsize::new(0));

    for k in 0..10 {
        let key = format!("key-{k}");
        let seen = seen.clone();
        let total = total.clone();
        let name = key.clone();
        bus.subscribe(
            key.as_str(),
            Handler::unary(move |n| {
                let n = n.and_then(|v| v.as_i64()).unwrap_or(-1);
                seen.lock().entry(name.clone()).or_default().push(n);
                total.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .expect("subscribe");
    }

    for i in 0..1000_i64 {
        let key = format!("key-{}", i % 10);
        bus.emit(key, vec![json!(i)]).expect("emit");
    }

    assert!(wait_until(Duration::from_secs(10), || total.load(Ordering::SeqCst) == 1000));
    bus.shutdown();

    let seen = seen.lock();
    assert_eq!(seen.len(), 10);
    for (key, values) in seen.iter() {
        assert_eq!(values.len(), 100, "{key}");
        assert!(values.windows(2).all(|w| w[0] < w[1]), "{key} out of order");
    }
}

#[test]
fn test_single_thread_preserves_global_order() {
    let bus = bus(DispatchMode::SingleThread, 0);
    let order = Arc::new(Mutex::new(Vec::new()));
    let threads = Arc::new(Mutex::new(Vec::new()));

    for key in ["a", "b", "c"] {
        let order = order.clone();
        let threads = threads.clone();
        bus.subscribe(
            key,
            Handler::for_event(move |event| {
                order.lock().push(event.sequence());
                threads.lock().push(thread::current().id());
                Ok(())
            }),
        )
        .expect("subscribe");
    }

    for i in 0..300 {
        bus.emit(["a", "b", "c"][i % 3], vec![]).expect("emit");
    }
    bus.shutdown();

    let order = order.lock();
    assert_eq!(order.len(), 300);
    assert!(order.windows(2).all(|w| w[0] < w[1]));

    let threads = threads.lock();
    assert!(threads.iter().all(|t| *t == threads[0]));
    assert_ne!(threads[0], thread::current().id());
}

#[test]
fn test_work_stealing_delivers_everything() {
    let bus = bus(DispatchMode::WorkStealing, 4);
    let count = Arc::new(AtomicUsize::new(0));
    let per_key: Arc<Mutex<HashMap<u64, Vec<u64>>>> = Arc::default();

    for k in 0..8_u64 {
        let count = count.clone();
        let per_key = per_key.clone();
        bus.subscribe(
            format!("ws-{k}"),
            Handler::for_event(move |event| {
                per_key.lock().entry(k).or_default().push(event.sequence());
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .expect("subscribe");
    }

    for i in 0..800_u64 {
        bus.emit(format!("ws-{}", i % 8), vec![]).expect("emit");
    }
    bus.shutdown();

    assert_eq!(count.load(Ordering::SeqCst), 800);
    for values in per_key.lock().values() {
        assert!(values.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn test_emit_does_not_wait_for_pooled_handlers() {
    let bus = bus(DispatchMode::FixedPool, 2);
    let release = Arc::new(Mutex::new(()));
    let held = release.lock();
    let done = Arc::new(AtomicUsize::new(0));

    let gate = release.clone();
    let finished = done.clone();
    bus.subscribe(
        "slow",
        Handler::nullary(move || {
            drop(gate.lock());
            finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    )
    .expect("subscribe");

    let started = Instant::now();
    for _ in 0..5 {
        bus.emit("slow", vec![]).expect("emit");
    }
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(done.load(Ordering::SeqCst), 0);

    drop(held);
    bus.shutdown();
    assert_eq!(done.load(Ordering::SeqCst), 5);
}

#[test]
fn test_concurrent_emitters_are_all_delivered() {
    let bus = bus(DispatchMode::FixedPool, 4);
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    bus.subscribe(
        "hits",
        Handler::nullary(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    )
    .expect("subscribe");

    let emitters: Vec<_> = (0..4)
        .map(|_| {
            let bus = bus.clone();
            thread::spawn(move || {
                for _ in 0..250 {
                    bus.emit("hits", vec![]).expect("emit");
                }
            })
        })
        .collect();
    for emitter in emitters {
        emitter.join().expect("emitter thread");
    }
    bus.shutdown();

    assert_eq!(count.load(Ordering::SeqCst), 1000);
    assert_eq!(bus.stats().emitted, 1000);
}

#[test]
fn test_handler_may_emit_reentrantly() {
    let bus = bus(DispatchMode::CurrentThread, 0);
    let log = Arc::new(Mutex::new(Vec::new()));

    let inner_bus = bus.clone();
    let outer_log = log.clone();
    bus.subscribe(
        "outer",
        Handler::nullary(move || {
            outer_log.lock().push("outer");
            inner_bus.emit("inner", vec![])?;
            Ok(())
        }),
    )
    .expect("subscribe");
    let inner_log = log.clone();
    bus.subscribe(
        "inner",
        Handler::nullary(move || {
            inner_log.lock().push("inner");
            Ok(())
        }),
    )
    .expect("subscribe");

    bus.emit("outer", vec![]).expect("emit");

    assert_eq!(*log.lock(), vec!["outer", "inner"]);
    // The handler holds a clone of the bus.
    bus.shutdown();
}

#[test]
fn test_current_thread_keeps_registration_order_with_overrides() {
    let bus = bus(DispatchMode::CurrentThread, 0);
    let log = Arc::new(Mutex::new(Vec::new()));
    let record = |name: &'static str| {
        let log = log.clone();
        Handler::nullary(move || {
            log.lock().push(name);
            Ok(())
        })
    };

    bus.subscribe("e1", record("A")).expect("subscribe");
    bus.subscribe("e1", record("B").with_backpressure(BackpressureStrategy::Drop))
        .expect("subscribe");
    bus.subscribe("e1", record("C").on_caller_thread())
        .expect("subscribe");

    bus.emit("e1", vec![]).expect("emit");

    assert_eq!(*log.lock(), vec!["A", "B", "C"]);
    assert_eq!(bus.stats().subscriptions, 1);
}

/// Handler for `key` that, on a `start` event, meets the other producer at
/// `barrier` and then emits `next`. Nested events are only recorded.
fn relay(
    bus: &EventBus,
    key: &'static str,
    next: &'static str,
    barrier: &Arc<Barrier>,
    log: &Arc<Mutex<Vec<(&'static str, String, thread::ThreadId)>>>,
) -> Handler {
    let bus = bus.clone();
    let barrier = barrier.clone();
    let log = log.clone();
    Handler::unary(move |arg| {
        let tag = arg.and_then(|v| v.as_str()).unwrap_or("?").to_string();
        log.lock().push((key, tag.clone(), thread::current().id()));
        if tag == "start" {
            barrier.wait();
            bus.emit(next, vec![json!("nested")])?;
        }
        Ok(())
    })
}

#[test]
fn test_cross_key_inline_emits_from_two_producers_complete() {
    let bus = bus(DispatchMode::CurrentThread, 0);
    let barrier = Arc::new(Barrier::new(2));
    let log = Arc::new(Mutex::new(Vec::new()));
    bus.subscribe("a", relay(&bus, "a", "b", &barrier, &log))
        .expect("subscribe");
    bus.subscribe("b", relay(&bus, "b", "a", &barrier, &log))
        .expect("subscribe");

    let (done_tx, done_rx) = mpsc::channel();
    for key in ["a", "b"] {
        let bus = bus.clone();
        let done = done_tx.clone();
        thread::spawn(move || {
            let result = bus.emit(key, vec![json!("start")]);
            let _ = done.send((key, thread::current().id(), result.is_ok()));
        });
    }

    let mut producers = HashMap::new();
    for _ in 0..2 {
        let (key, thread, ok) = done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("both emits return");
        assert!(ok);
        producers.insert(key, thread);
    }

    // Each nested event ran on the producer that emitted it.
    let log = log.lock();
    assert_eq!(log.len(), 4);
    for (key, tag, thread) in log.iter() {
        let producer = match (*key, tag.as_str()) {
            ("a", "start") | ("b", "nested") => producers["a"],
            _ => producers["b"],
        };
        assert_eq!(*thread, producer, "{key}:{tag}");
    }
    drop(log);
    bus.shutdown();
}

#[test]
fn test_caller_affinity_cross_key_emits_on_pooled_bus_complete() {
    let bus = bus(DispatchMode::FixedPool, 2);
    let barrier = Arc::new(Barrier::new(2));
    let log = Arc::new(Mutex::new(Vec::new()));
    bus.subscribe("a", relay(&bus, "a", "b", &barrier, &log).on_caller_thread())
        .expect("subscribe");
    bus.subscribe("b", relay(&bus, "b", "a", &barrier, &log).on_caller_thread())
        .expect("subscribe");

    let (done_tx, done_rx) = mpsc::channel();
    for key in ["a", "b"] {
        let bus = bus.clone();
        let done = done_tx.clone();
        thread::spawn(move || {
            let _ = done.send(bus.emit(key, vec![json!("start")]).is_ok());
        });
    }

    for _ in 0..2 {
        assert!(done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("both emits return"));
    }
    assert_eq!(log.lock().len(), 4);
    bus.shutdown();
}
