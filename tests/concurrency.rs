//! Multi-threaded access, listener dispatch and long-poll waits

use exposed_model::notify::{EventForwarder, EventKind, Interest, OwnedModelEvent};
use exposed_model::{Error, ExposedModel, ModelEvent, ModelListener, Revision, WaitOutcome};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn disjoint_writers_never_lose_updates() {
    const THREADS: usize = 8;
    const UPDATES: usize = 250;

    let model = Arc::new(ExposedModel::new());
    for t in 0..THREADS {
        model.add_element(&format!("worker{}", t), 0).unwrap();
    }
    let base = model.current_revision();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let model = model.clone();
            thread::spawn(move || {
                let key = format!("worker{}", t);
                let mut revisions = Vec::with_capacity(UPDATES);
                for i in 1..=UPDATES {
                    revisions.push(model.update_element(&key, i as i64).unwrap());
                }
                revisions
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        let revisions = handle.join().unwrap();
        assert!(revisions.windows(2).all(|w| w[0] < w[1]));
        for rev in revisions {
            assert!(seen.insert(rev), "revision {} committed twice", rev);
        }
    }

    assert_eq!(model.current_revision() - base, (THREADS * UPDATES) as Revision);
    for t in 0..THREADS {
        assert_eq!(
            model.get::<i64>(&format!("worker{}", t)).unwrap(),
            UPDATES as i64
        );
    }
}

#[derive(Default)]
struct Counter {
    events: Mutex<Vec<(EventKind, String, Revision)>>,
}

impl ModelListener for Counter {
    fn on_event(&self, event: &ModelEvent<'_>, revision: Revision) {
        self.events
            .lock()
            .push((event.kind(), event.element().key().to_string(), revision));
    }
}

#[test]
fn listeners_see_every_mutation_once_while_registered() {
    let model = ExposedModel::new();
    let counter = Arc::new(Counter::default());
    let id = model.register_listener(counter.clone()).unwrap();

    model.add_element("a", 1).unwrap();
    model.update_element("a", 2).unwrap();
    model.annotate("a", "note").unwrap();
    model.remove_element("a").unwrap();
    assert!(model.update_element("a", 3).is_err());

    assert!(model.unregister_listener(id).unwrap());
    model.add_element("b", 1).unwrap();

    let events = counter.events.lock().clone();
    let kinds: Vec<_> = events.iter().map(|(k, _, _)| *k).collect();
    assert_eq!(
        kinds,
        [
            EventKind::SchemaAdded,
            EventKind::ElementChanged,
            EventKind::ElementChanged,
            EventKind::SchemaModified,
            EventKind::SchemaRemoved,
        ]
    );
    let revisions: Vec<_> = events.iter().map(|(_, _, r)| *r).collect();
    assert_eq!(revisions, [1, 1, 2, 3, 4]);
}

struct Mutator {
    model: Weak<ExposedModel>,
    errors: Mutex<Vec<String>>,
}

impl ModelListener for Mutator {
    fn interest(&self) -> Interest {
        Interest::STATE
    }

    fn on_event(&self, _event: &ModelEvent<'_>, _revision: Revision) {
        let Some(model) = self.model.upgrade() else {
            return;
        };
        match model.update_element("mirror", 1) {
            Err(Error::ReentrantAccess) => self.errors.lock().push("reentrant".to_string()),
            other => self.errors.lock().push(format!("{:?}", other)),
        }
        // Reading the revision mirror does not need the guard.
        assert!(model.current_revision() > 0);
    }
}

#[test]
fn mutating_from_a_callback_fails_fast() {
    let model = Arc::new(ExposedModel::new());
    model.add_element("mirror", 0).unwrap();
    let mutator = Arc::new(Mutator {
        model: Arc::downgrade(&model),
        errors: Mutex::new(Vec::new()),
    });
    model.register_listener(mutator.clone()).unwrap();

    model.update_element("mirror", 5).unwrap();
    assert_eq!(*mutator.errors.lock(), ["reentrant"]);
    assert_eq!(model.get::<i64>("mirror").unwrap(), 5);
}

#[test]
fn forwarded_events_allow_deferred_mutation() {
    let model = Arc::new(ExposedModel::new());
    model.add_element("source", 0).unwrap();
    model.add_element("derived", 0).unwrap();

    let (forwarder, events) = EventForwarder::channel(Interest::STATE);
    model.register_listener(forwarder).unwrap();

    let worker = {
        let model = model.clone();
        thread::spawn(move || {
            let event: OwnedModelEvent = events.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(event.element.key(), "source");
            let value: i64 = event.element.value().clone().try_into().unwrap();
            model.update_element("derived", value * 10).unwrap();
        })
    };

    model.update_element("source", 4).unwrap();
    worker.join().unwrap();
    assert_eq!(model.get::<i64>("derived").unwrap(), 40);
}

#[test]
fn blocking_wait_is_released_by_a_commit() {
    let model = Arc::new(ExposedModel::new());
    model.add_element("a", 0).unwrap();
    let seen = model.current_revision();
    let token = model.cancel_token();

    let waiter = {
        let model = model.clone();
        thread::spawn(move || model.wait_for_revision(seen, Duration::from_secs(10), &token))
    };
    thread::sleep(Duration::from_millis(20));
    model.update_element("a", 1).unwrap();

    assert_eq!(waiter.join().unwrap(), WaitOutcome::Advanced(seen + 1));
}

#[test]
fn blocking_wait_does_not_hold_the_guard() {
    let model = Arc::new(ExposedModel::new());
    model.add_element("a", 0).unwrap();
    let token = model.cancel_token();

    let waiter = {
        let model = model.clone();
        let token = token.clone();
        thread::spawn(move || model.wait_for_revision(100, Duration::from_secs(30), &token))
    };
    thread::sleep(Duration::from_millis(20));

    // Writers keep making progress while the waiter sleeps.
    for i in 1..=10 {
        model.update_element("a", i).unwrap();
    }
    let started = Instant::now();
    token.cancel();
    assert_eq!(waiter.join().unwrap(), WaitOutcome::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn blocking_wait_accepts_an_unbounded_timeout() {
    let model = Arc::new(ExposedModel::new());
    let token = model.cancel_token();

    let waiter = {
        let model = model.clone();
        let token = token.clone();
        thread::spawn(move || model.wait_for_revision(0, Duration::MAX, &token))
    };
    thread::sleep(Duration::from_millis(20));
    token.cancel();
    assert_eq!(waiter.join().unwrap(), WaitOutcome::Cancelled);
}

#[tokio::test]
async fn async_wait_times_out_then_advances() {
    let model = Arc::new(ExposedModel::new());
    model.add_element("a", 0).unwrap();
    let seen = model.current_revision();

    assert_eq!(
        model.wait_for_revision_async(seen, Duration::from_millis(30)).await,
        WaitOutcome::TimedOut
    );

    let writer = {
        let model = model.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            model.update_element("a", 1).unwrap();
        })
    };
    assert_eq!(
        model.wait_for_revision_async(seen, Duration::from_secs(10)).await,
        WaitOutcome::Advanced(seen + 1)
    );
    writer.join().unwrap();
}
