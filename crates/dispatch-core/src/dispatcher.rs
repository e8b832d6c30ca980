//! Dispatcher core: under one mutex, dedup-filter a pack, compute
//! partitioning, check concurrency caps (immediate or wait-until-free),
//! enqueue descriptors, and update counters.
//!
//! This is the hard part: consistency of the filter, the queue, and the
//! counters has to be maintained atomically across admission and worker
//! completion, across partial-admission/rollback-on-queue-full/eviction
//! paths, and across a second cooperative blocking mode (the `*_wait`
//! variants). A single mutex `M` protects `services`, `functions`,
//! `queue_size`, and every call into the filter; a condition variable on
//! `M` is used only by the `*_wait` variants and is broadcast by every
//! worker on completion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::time::Instant;

use crate::admission::{Admission, BatchAdmission, BatchResult};
use crate::config::DispatchConfig;
use crate::entry::{Entry, FilterKey};
use crate::filter::TtlFilter;
use crate::pack::{Identified, Pack};
use crate::pool::WorkerPool;
use crate::queue::WorkQueue;

/// The `do` callback: processes the sub-range `[begin, end)` of `pack`.
pub type Do = Arc<dyn Fn(&dyn Pack, usize, usize) + Send + Sync>;
/// The `done` callback: fires once a pack's last descriptor completes.
pub type Done = Arc<dyn Fn(&dyn Pack) + Send + Sync>;

struct Descriptor {
    entry: Entry,
    do_fn: Do,
    done_fn: Done,
    pack: Arc<dyn Pack>,
    begin: usize,
    end: usize,
}

struct State {
    filter: TtlFilter<FilterKey>,
    services: HashMap<String, usize>,
    functions: HashMap<Entry, usize>,
    queue_size: usize,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
    queue: WorkQueue<Descriptor>,
    executing: AtomicI64,
}

/// A concurrent work dispatcher with content-level, TTL-bounded
/// deduplication. Construct with [`Dispatcher::new`], or use the
/// process-wide [`Dispatcher::global`] singleton.
pub struct Dispatcher {
    shared: Arc<Shared>,
    pool: WorkerPool,
}

fn div_ceil(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

fn decrement_service(services: &mut HashMap<String, usize>, service: &str) {
    if let Some(count) = services.get_mut(service) {
        if *count <= 1 {
            services.remove(service);
        } else {
            *count -= 1;
        }
    }
}

fn decrement_function(functions: &mut HashMap<Entry, usize>, entry: &Entry) {
    if let Some(count) = functions.get_mut(entry) {
        if *count <= 1 {
            functions.remove(entry);
        } else {
            *count -= 1;
        }
    }
}

/// RAII bookkeeping for one descriptor's execution: increments the
/// dispatcher-wide `executing` counter on construction and, on `Drop` (so it
/// runs on a panic unwind as well as normal completion), decrements it and
/// the per-service/per-function counters, then broadcasts `cond`. This is
/// how "an unrecovered failure must still decrement the counters" is
/// satisfied without the worker loop catching panics itself.
struct CompletionGuard<'a> {
    shared: &'a Shared,
    entry: Entry,
}

impl<'a> CompletionGuard<'a> {
    fn new(shared: &'a Shared, entry: Entry) -> Self {
        shared.executing.fetch_add(1, Ordering::AcqRel);
        CompletionGuard { shared, entry }
    }
}

impl<'a> Drop for CompletionGuard<'a> {
    fn drop(&mut self) {
        self.shared.executing.fetch_sub(1, Ordering::AcqRel);
        let mut state = self.shared.state.lock().expect("dispatcher mutex poisoned");
        decrement_service(&mut state.services, &self.entry.service);
        decrement_function(&mut state.functions, &self.entry);
        drop(state);
        self.shared.cond.notify_all();
    }
}

fn worker_loop(id: usize, shared: &Arc<Shared>) {
    tracing::debug!(worker = id, "dispatch worker starting");
    loop {
        let descriptor = match shared.queue.recv() {
            Ok(d) => d,
            Err(_) => break,
        };
        let _guard = CompletionGuard::new(shared, descriptor.entry.clone());
        (descriptor.do_fn)(descriptor.pack.as_ref(), descriptor.begin, descriptor.end);
        if descriptor.pack.running(-1) == 0 {
            (descriptor.done_fn)(descriptor.pack.as_ref());
        }
    }
    tracing::debug!(worker = id, "dispatch worker exiting");
}

/// The admission/repack algorithm shared by `run_any` and its
/// service/function-gated variants. Executed with `state` already locked.
#[allow(clippy::too_many_arguments)]
fn admit_locked(
    state: &mut State,
    queue: &WorkQueue<Descriptor>,
    ts: Instant,
    entry: &Entry,
    do_fn: &Do,
    done_fn: &Done,
    pack: &Arc<dyn Pack>,
    step: usize,
) -> Admission {
    let input = pack.len();
    if input == 0 || step == 0 || state.queue_size == 0 {
        return Admission {
            parts: 0,
            input,
            queued: 0,
        };
    }

    let free = state.queue_size.saturating_sub(queue.len());
    let parts_upper = div_ceil(input, step);
    let target = if parts_upper > free { free * step } else { input };
    if target == 0 {
        tracing::debug!(
            service = %entry.service,
            function = %entry.function,
            input,
            "run_any found zero queue capacity"
        );
        return Admission {
            parts: 0,
            input,
            queued: 0,
        };
    }

    let mut added = 0usize;
    let mut length = target;
    while added < length {
        let key = FilterKey::new(entry.service.clone(), pack.id_at(added));
        if state.filter.create(ts, key) {
            added += 1;
        } else {
            length -= 1;
            pack.swap(added, length);
        }
    }
    pack.resize(added);

    let kept = pack.len();
    if kept > target || kept == 0 {
        return Admission {
            parts: 0,
            input,
            queued: 0,
        };
    }

    let parts = div_ceil(kept, step);
    pack.running(parts as i64);

    let mut begin = 0usize;
    while begin < kept {
        let end = (begin + step).min(kept);
        *state.services.entry(entry.service.clone()).or_insert(0) += 1;
        *state.functions.entry(entry.clone()).or_insert(0) += 1;
        queue.push(Descriptor {
            entry: entry.clone(),
            do_fn: Arc::clone(do_fn),
            done_fn: Arc::clone(done_fn),
            pack: Arc::clone(pack),
            begin,
            end,
        });
        begin = end;
    }

    Admission {
        parts,
        input,
        queued: kept,
    }
}

impl Dispatcher {
    /// Allocates everything and spawns `config.threads` workers. All four
    /// config fields may be zero; `queue_size == 0` or `filter_size == 0`
    /// degenerate the corresponding subsystem but never deadlock or panic.
    pub fn new(config: DispatchConfig) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                filter: TtlFilter::new(config.filter_size, config.filter_ttl),
                services: HashMap::new(),
                functions: HashMap::new(),
                queue_size: config.queue_size,
            }),
            cond: Condvar::new(),
            queue: WorkQueue::new(config.queue_size),
            executing: AtomicI64::new(0),
        });
        let worker_shared = Arc::clone(&shared);
        let pool = WorkerPool::spawn(config.threads, "dispatch-worker", move |id| {
            worker_loop(id, &worker_shared);
        });
        Dispatcher { shared, pool }
    }

    /// The process-wide dispatcher singleton, built on first use from
    /// [`DispatchConfig::from_env`].
    pub fn global() -> &'static Dispatcher {
        static INSTANCE: OnceLock<Dispatcher> = OnceLock::new();
        INSTANCE.get_or_init(|| Dispatcher::new(DispatchConfig::from_env()))
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().expect("dispatcher mutex poisoned")
    }

    /// Unconditional admission: filter-dedups `pack`, partitions survivors
    /// into sub-ranges of width `step`, and enqueues them.
    pub fn run_any(
        &self,
        ts: Instant,
        entry: &Entry,
        do_fn: Do,
        done_fn: Done,
        pack: Arc<dyn Pack>,
        step: usize,
    ) -> Admission {
        let mut state = self.lock();
        admit_locked(&mut state, &self.shared.queue, ts, entry, &do_fn, &done_fn, &pack, step)
    }

    /// Like [`Dispatcher::run_any`], but first checks `services[entry.service]
    /// < count`; returns `(0, 0, 0)` without any filter mutation if the cap
    /// is already met.
    pub fn run_any_service(
        &self,
        count: usize,
        ts: Instant,
        entry: &Entry,
        do_fn: Do,
        done_fn: Done,
        pack: Arc<dyn Pack>,
        step: usize,
    ) -> Admission {
        let mut state = self.lock();
        if *state.services.get(&entry.service).unwrap_or(&0) >= count {
            return Admission::default();
        }
        admit_locked(&mut state, &self.shared.queue, ts, entry, &do_fn, &done_fn, &pack, step)
    }

    /// Like [`Dispatcher::run_any`], but gates on `functions[entry] < count`.
    pub fn run_any_function(
        &self,
        count: usize,
        ts: Instant,
        entry: &Entry,
        do_fn: Do,
        done_fn: Done,
        pack: Arc<dyn Pack>,
        step: usize,
    ) -> Admission {
        let mut state = self.lock();
        if *state.functions.get(entry).unwrap_or(&0) >= count {
            return Admission::default();
        }
        admit_locked(&mut state, &self.shared.queue, ts, entry, &do_fn, &done_fn, &pack, step)
    }

    /// Like [`Dispatcher::run_any_service`], but waits on the condition
    /// variable instead of returning while the cap is exceeded. Never times
    /// out; spurious wake-ups re-check the predicate.
    pub fn run_any_service_wait(
        &self,
        count: usize,
        ts: Instant,
        entry: &Entry,
        do_fn: Do,
        done_fn: Done,
        pack: Arc<dyn Pack>,
        step: usize,
    ) -> Admission {
        let mut state = self.lock();
        loop {
            if *state.services.get(&entry.service).unwrap_or(&0) < count {
                let result =
                    admit_locked(&mut state, &self.shared.queue, ts, entry, &do_fn, &done_fn, &pack, step);
                if result.parts != 0 {
                    return result;
                }
            }
            state = self.shared.cond.wait(state).expect("dispatcher mutex poisoned");
        }
    }

    /// Like [`Dispatcher::run_any_function`], but waits instead of returning.
    pub fn run_any_function_wait(
        &self,
        count: usize,
        ts: Instant,
        entry: &Entry,
        do_fn: Do,
        done_fn: Done,
        pack: Arc<dyn Pack>,
        step: usize,
    ) -> Admission {
        let mut state = self.lock();
        loop {
            if *state.functions.get(entry).unwrap_or(&0) < count {
                let result =
                    admit_locked(&mut state, &self.shared.queue, ts, entry, &do_fn, &done_fn, &pack, step);
                if result.parts != 0 {
                    return result;
                }
            }
            state = self.shared.cond.wait(state).expect("dispatcher mutex poisoned");
        }
    }

    /// Walks `packs` in order, filter-admitting each as a single whole-pack
    /// descriptor under the lock until queue capacity is exhausted. Each
    /// admitted pack consumes exactly one queue slot, regardless of its
    /// length (batches are not sub-chunked by `step` — see `DESIGN.md` for
    /// why). `result.total(queued)` fires exactly once, after every pack
    /// has been visited and before any descriptor from this call is
    /// enqueued.
    pub fn run_batch(
        &self,
        ts: Instant,
        entry: &Entry,
        do_fn: Do,
        done_fn: Done,
        result: Arc<dyn BatchResult>,
        packs: &[Arc<dyn Pack>],
    ) -> BatchAdmission {
        struct Staged {
            pack: Arc<dyn Pack>,
            kept: usize,
        }

        let mut state = self.lock();
        let mut total_input = 0usize;
        let mut total_queued = 0usize;
        let mut last = 0usize;
        let mut reserved = 0usize;
        let mut staged: Vec<Staged> = Vec::new();

        for pack in packs {
            let free = state
                .queue_size
                .saturating_sub(self.shared.queue.len() + reserved);
            if free == 0 {
                break;
            }
            last += 1;

            let input = pack.len();
            total_input += input;
            if input == 0 {
                continue;
            }

            let mut added = 0usize;
            let mut length = input;
            while added < length {
                let key = FilterKey::new(entry.service.clone(), pack.id_at(added));
                if state.filter.create(ts, key) {
                    added += 1;
                } else {
                    length -= 1;
                    pack.swap(added, length);
                }
            }
            pack.resize(added);

            let kept = pack.len();
            if kept == 0 {
                continue;
            }
            pack.running(1);
            total_queued += kept;
            reserved += 1;
            staged.push(Staged {
                pack: Arc::clone(pack),
                kept,
            });
        }

        result.total(total_queued);

        for item in staged {
            *state.services.entry(entry.service.clone()).or_insert(0) += 1;
            *state.functions.entry(entry.clone()).or_insert(0) += 1;
            self.shared.queue.push(Descriptor {
                entry: entry.clone(),
                do_fn: Arc::clone(&do_fn),
                done_fn: Arc::clone(&done_fn),
                pack: item.pack,
                begin: 0,
                end: item.kept,
            });
        }

        BatchAdmission {
            input: total_input,
            queued: total_queued,
            last,
        }
    }

    /// Removes every id of `pack` from the filter namespace of `service`.
    /// Does not touch counters or the queue. Returns the number removed.
    pub fn remove(&self, ts: Instant, service: &str, pack: &dyn Identified) -> usize {
        let mut state = self.lock();
        let mut removed = 0usize;
        for i in 0..pack.len() {
            let key = FilterKey::new(service.to_string(), pack.id_at(i));
            if state.filter.remove(ts, &key) {
                removed += 1;
            }
        }
        removed
    }

    /// Count of live (unexpired) filter entries.
    pub fn size_filter(&self, ts: Instant) -> usize {
        self.lock().filter.size(ts)
    }

    /// Number of descriptors currently sitting in the work queue.
    pub fn size_queue(&self) -> usize {
        self.shared.queue.len()
    }

    /// Total descriptors currently executing across all workers.
    pub fn running(&self) -> i64 {
        self.shared.executing.load(Ordering::Acquire)
    }

    /// Visits `(service, outstanding_count)` pairs; `fn` returning `false`
    /// halts iteration early.
    pub fn range_services<F: FnMut(&str, usize) -> bool>(&self, mut f: F) {
        let state = self.lock();
        for (service, count) in state.services.iter() {
            if !f(service, *count) {
                return;
            }
        }
    }

    /// Visits `(entry, outstanding_count)` pairs; `fn` returning `false`
    /// halts iteration early.
    pub fn range_functions<F: FnMut(&Entry, usize) -> bool>(&self, mut f: F) {
        let state = self.lock();
        for (entry, count) in state.functions.iter() {
            if !f(entry, *count) {
                return;
            }
        }
    }

    /// Visits live filter keys; `fn` returning `false` halts iteration early.
    pub fn range_filter<F: FnMut(&FilterKey) -> bool>(&self, ts: Instant, f: F) {
        self.lock().filter.range(ts, f)
    }

    /// Number of worker threads this dispatcher was constructed with.
    pub fn worker_count(&self) -> usize {
        self.pool.size()
    }

    /// Sets `queue_size = 0` (future `Run*` observe no capacity), closes
    /// the queue, and waits for every worker to exit after draining
    /// already-enqueued descriptors. Does not abort in-flight work.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.queue_size = 0;
        }
        self.shared.queue.close();
        self.shared.cond.notify_all();
        self.pool.join_all();
        tracing::debug!("dispatcher closed");
    }
}
