//! Handler shapes, argument binding and the failure boundary.

use event_bus::{emit, DispatchMode, EventBus, Handler, RecordingMetrics, MAX_ARITY};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

fn current_thread() -> EventBus {
    EventBus::builder()
        .dispatch_mode(DispatchMode::CurrentThread)
        .build()
        .expect("bus starts")
}

/// Counts log events at one level.
struct LevelCounter {
    level: Level,
    count: Arc<AtomicUsize>,
}

impl<S: tracing::Subscriber> Layer<S> for LevelCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == self.level {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn counting(level: Level) -> (Arc<AtomicUsize>, impl tracing::Subscriber + Send + Sync) {
    let count = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(LevelCounter {
        level,
        count: count.clone(),
    });
    (count, subscriber)
}

#[test]
fn test_missing_arguments_are_none() {
    let bus = current_thread();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    bus.subscribe(
        "triple",
        Handler::ternary(move |a, b, c| {
            sink.lock().push((a.cloned(), b.cloned(), c.cloned()));
            Ok(())
        }),
    )
    .expect("subscribe");

    emit!(bus, "triple", 1).expect("emit");

    assert_eq!(*seen.lock(), vec![(Some(json!(1)), None, None)]);
}

#[test]
fn test_surplus_arguments_are_ignored() {
    let bus = current_thread();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    bus.subscribe(
        "pair",
        Handler::binary(move |a, b| {
            sink.lock().push(vec![a.cloned(), b.cloned()]);
            Ok(())
        }),
    )
    .expect("subscribe");

    emit!(bus, "pair", "a", "b", "c", "d").expect("emit");

    assert_eq!(*seen.lock(), vec![vec![Some(json!("a")), Some(json!("b"))]]);
}

#[test]
fn test_variadic_gets_declared_arity() {
    let bus = current_thread();
    let widths = Arc::new(Mutex::new(Vec::new()));
    let sink = widths.clone();
    bus.subscribe(
        "wide",
        Handler::variadic(5, move |args| {
            sink.lock().push(args.iter().filter(|a| a.is_some()).count());
            assert_eq!(args.len(), 5);
            Ok(())
        }),
    )
    .expect("subscribe");

    bus.emit("wide", vec![json!(1), json!(2)]).expect("emit");
    bus.emit("wide", (0..9).map(Value::from).collect()).expect("emit");

    assert_eq!(*widths.lock(), vec![2, 5]);
}

#[test]
fn test_arity_above_maximum_is_rejected() {
    let bus = current_thread();
    let result = bus.subscribe("k", Handler::variadic(MAX_ARITY + 1, |_| Ok(())));
    assert!(result.is_err());
    assert!(!bus.has_subscribers("k"));
}

#[test]
fn test_failing_handler_does_not_block_sibling() {
    let metrics = Arc::new(RecordingMetrics::new());
    let bus = EventBus::builder()
        .dispatch_mode(DispatchMode::CurrentThread)
        .metrics(metrics.clone())
        .build()
        .expect("bus starts");
    let ran = Arc::new(AtomicUsize::new(0));

    bus.subscribe(
        "boom",
        Handler::nullary(|| Err(anyhow::anyhow!("broken"))).named("failing"),
    )
    .expect("subscribe");
    bus.subscribe(
        "boom",
        Handler::nullary(|| panic!("handler panicked")).named("panicking"),
    )
    .expect("subscribe");
    let counter = ran.clone();
    bus.subscribe(
        "boom",
        Handler::nullary(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    )
    .expect("subscribe");

    let (errors, subscriber) = counting(Level::ERROR);
    tracing::subscriber::with_default(subscriber, || {
        bus.emit("boom", vec![]).expect("emit succeeds despite failures");
        bus.emit("boom", vec![]).expect("emit succeeds despite failures");
    });

    assert_eq!(ran.load(Ordering::SeqCst), 2);
    assert_eq!(errors.load(Ordering::SeqCst), 4);
    assert_eq!(
        metrics.counter_tagged(event_bus::metrics::HANDLER_FAILURES, ("handler", "failing")),
        2
    );
    assert_eq!(
        metrics.counter_tagged(event_bus::metrics::HANDLER_FAILURES, ("handler", "panicking")),
        2
    );
}

#[test]
fn test_unhandled_event_logged_once_per_emit() {
    let bus = current_thread();
    let (warnings, subscriber) = counting(Level::WARN);
    tracing::subscriber::with_default(subscriber, || {
        bus.emit("orphan", vec![]).expect("emit");
        bus.emit("orphan", vec![]).expect("emit");
        bus.emit("orphan", vec![]).expect("emit");
    });

    assert_eq!(warnings.load(Ordering::SeqCst), 3);
    assert_eq!(bus.stats().unhandled, 3);
}

#[test]
fn test_unhandled_event_silent_when_disabled() {
    let bus = EventBus::builder()
        .dispatch_mode(DispatchMode::CurrentThread)
        .warn_on_unhandled_event(false)
        .build()
        .expect("bus starts");
    let (warnings, subscriber) = counting(Level::WARN);
    tracing::subscriber::with_default(subscriber, || {
        bus.emit("orphan", vec![]).expect("emit");
    });

    assert_eq!(warnings.load(Ordering::SeqCst), 0);
}

#[test]
fn test_timing_can_be_disabled_per_handler() {
    let metrics = Arc::new(RecordingMetrics::new());
    let bus = EventBus::builder()
        .dispatch_mode(DispatchMode::CurrentThread)
        .metrics(metrics.clone())
        .build()
        .expect("bus starts");
    bus.subscribe("t", Handler::nullary(|| Ok(())).named("timed"))
        .expect("subscribe");
    bus.subscribe(
        "t",
        Handler::nullary(|| Ok(())).named("untimed").with_metrics(false),
    )
    .expect("subscribe");

    bus.emit("t", vec![]).expect("emit");

    let duration = event_bus::metrics::HANDLER_DURATION;
    assert_eq!(metrics.timer_samples(duration, ("handler", "timed")).len(), 1);
    assert!(metrics.timer_samples(duration, ("handler", "untimed")).is_empty());
}

#[test]
fn test_typed_keys_are_distinct_from_names() {
    struct OrderPlaced;

    let bus = current_thread();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    bus.subscribe(
        event_bus::EventKey::of::<OrderPlaced>(),
        Handler::nullary(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    )
    .expect("subscribe");

    bus.emit(event_bus::EventKey::of::<OrderPlaced>(), vec![]).expect("emit");
    bus.emit("OrderPlaced", vec![]).expect("emit");

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
