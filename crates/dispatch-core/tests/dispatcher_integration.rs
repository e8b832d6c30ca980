// crates/dispatch-core/tests/dispatcher_integration.rs
//
// End-to-end tests against a dispatcher with real worker threads draining
// the queue, as opposed to the unit tests in src/dispatcher.rs (many of
// which run with threads: 0 to keep descriptors observable mid-flight).

use dispatch_core::{Admission, DispatchConfig, Dispatcher, Entry, Identified, Pack};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

struct VecPack {
    ids: Mutex<Vec<String>>,
    running: AtomicI64,
}

impl VecPack {
    fn new(ids: &[&str]) -> Arc<Self> {
        Arc::new(VecPack {
            ids: Mutex::new(ids.iter().map(|s| s.to_string()).collect()),
            running: AtomicI64::new(0),
        })
    }
}

impl Identified for VecPack {
    fn len(&self) -> usize {
        self.ids.lock().unwrap().len()
    }

    fn id_at(&self, index: usize) -> String {
        self.ids.lock().unwrap()[index].clone()
    }
}

impl Pack for VecPack {
    fn swap(&self, i: usize, j: usize) {
        self.ids.lock().unwrap().swap(i, j);
    }

    fn resize(&self, new_len: usize) {
        self.ids.lock().unwrap().truncate(new_len);
    }

    fn running(&self, delta: i64) -> i64 {
        self.running.fetch_add(delta, Ordering::AcqRel) + delta
    }
}

/// A one-shot latch a `done` callback can signal and the test thread can
/// block on, since `done` only receives `&dyn Pack`.
struct Latch {
    mutex: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    fn new() -> Arc<Self> {
        Arc::new(Latch {
            mutex: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    fn signal(&self) {
        *self.mutex.lock().unwrap() = true;
        self.cond.notify_all();
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let (guard, result) = self
            .cond
            .wait_timeout_while(self.mutex.lock().unwrap(), timeout, |done| !*done)
            .unwrap();
        let _ = guard;
        !result.timed_out()
    }
}

fn entry(service: &str, function: &str) -> Entry {
    Entry::new(service, function)
}

#[test]
fn real_workers_drain_queue_and_fire_done_exactly_once() {
    let d = Dispatcher::new(DispatchConfig {
        threads: 4,
        queue_size: 16,
        filter_size: 1024,
        filter_ttl: Duration::from_secs(15),
    });

    let processed = Arc::new(AtomicUsize::new(0));
    let processed_for_do = Arc::clone(&processed);
    let done_count = Arc::new(AtomicUsize::new(0));
    let done_for_cb = Arc::clone(&done_count);
    let latch = Latch::new();
    let latch_for_cb = Arc::clone(&latch);

    let ids: Vec<String> = (0..12).map(|i| format!("id-{i}")).collect();
    let ids_ref: Vec<&str> = ids.iter().map(String::as_str).collect();
    let pack = VecPack::new(&ids_ref);

    let result = d.run_any(
        Instant::now(),
        &entry("svc", "fn"),
        Arc::new(move |_pack, begin, end| {
            processed_for_do.fetch_add(end - begin, Ordering::SeqCst);
        }),
        Arc::new(move |_pack| {
            done_for_cb.fetch_add(1, Ordering::SeqCst);
            latch_for_cb.signal();
        }),
        pack,
        3,
    );

    assert_eq!(result, Admission { parts: 4, input: 12, queued: 12 });
    assert!(latch.wait_timeout(Duration::from_secs(5)), "done callback never fired");
    assert_eq!(processed.load(Ordering::SeqCst), 12);
    assert_eq!(done_count.load(Ordering::SeqCst), 1);

    // counters settle back to empty after the last descriptor completes.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let mut empty = true;
        d.range_services(|_, _| {
            empty = false;
            false
        });
        if empty || Instant::now() > deadline {
            assert!(empty, "services map did not drain");
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    d.close();
}

#[test]
fn service_wait_variant_unblocks_once_in_flight_work_completes() {
    let d = Arc::new(Dispatcher::new(DispatchConfig {
        threads: 2,
        queue_size: 16,
        filter_size: 1024,
        filter_ttl: Duration::from_secs(15),
    }));

    let release = Arc::new((Mutex::new(false), Condvar::new()));
    let release_for_do = Arc::clone(&release);

    // Admit one slow descriptor that blocks until the test releases it,
    // holding the "svc" service at one in-flight descriptor.
    let blocker = d.run_any(
        Instant::now(),
        &entry("svc", "fn"),
        Arc::new(move |_pack, _begin, _end| {
            let (lock, cond) = &*release_for_do;
            let mut go = lock.lock().unwrap();
            while !*go {
                go = cond.wait(go).unwrap();
            }
        }),
        Arc::new(|_pack| {}),
        VecPack::new(&["blocker"]),
        1,
    );
    assert_eq!(blocker.queued, 1);

    let d_for_wait = Arc::clone(&d);
    let waiter = std::thread::spawn(move || {
        d_for_wait.run_any_service_wait(
            1,
            Instant::now(),
            &entry("svc", "fn"),
            Arc::new(|_pack, _begin, _end| {}),
            Arc::new(|_pack| {}),
            VecPack::new(&["waiter"]),
            1,
        )
    });

    // give the waiter time to actually block on the condvar.
    std::thread::sleep(Duration::from_millis(100));
    assert!(!waiter.is_finished());

    {
        let (lock, cond) = &*release;
        *lock.lock().unwrap() = true;
        cond.notify_all();
    }

    let result = waiter.join().expect("waiter thread panicked");
    assert_eq!(result.queued, 1);

    d.close();
}

#[test]
fn worker_panic_inside_do_still_decrements_counters() {
    let d = Dispatcher::new(DispatchConfig {
        threads: 1,
        queue_size: 16,
        filter_size: 1024,
        filter_ttl: Duration::from_secs(15),
    });

    // suppress the default panic-to-stderr noise for this expected panic.
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(|_| {}));

    let result = d.run_any(
        Instant::now(),
        &entry("svc", "panics"),
        Arc::new(|_pack, _begin, _end| panic!("boom")),
        Arc::new(|_pack| {}),
        VecPack::new(&["x"]),
        1,
    );
    assert_eq!(result.queued, 1);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let mut empty = true;
        d.range_functions(|_, _| {
            empty = false;
            false
        });
        if empty {
            break;
        }
        assert!(Instant::now() < deadline, "function counters never drained after panic");
        std::thread::sleep(Duration::from_millis(10));
    }

    std::panic::set_hook(prev_hook);
    d.close();
}
