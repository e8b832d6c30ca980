//! Thin demo binary for `dispatch-core`: reads newline-delimited ids from
//! stdin, admits them as a single pack under one service/function entry,
//! waits for the admitted descriptors to drain, and prints the resulting
//! [`dispatch_core::Admission`] as JSON.
//!
//! Not part of the dispatcher's own interface — the library never touches a
//! CLI, a file, or an env var directly; this binary exists purely as the
//! workspace's end-to-end demo/integration surface, the same role
//! `llm-pyexec-cli` plays for `llm-pyexec`.

use clap::Parser;
use dispatch_core::{Admission, DispatchConfig, Dispatcher, Entry, Identified, Pack};
use std::io::{self, Read};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Admit newline-delimited stdin ids into a dispatch-core dispatcher.
#[derive(Parser, Debug)]
#[command(name = "dispatch-cli", about = "Admit newline-delimited stdin ids into a dispatch-core dispatcher")]
struct Args {
    /// Service name for the admitted entry.
    #[arg(long, default_value = "cli")]
    service: String,

    /// Function name for the admitted entry.
    #[arg(long, default_value = "run")]
    function: String,

    /// Sub-range width each descriptor covers.
    #[arg(long, default_value_t = 1)]
    step: usize,

    /// Worker thread count.
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Bounded work queue capacity.
    #[arg(long, default_value_t = 256)]
    queue_size: usize,

    /// Dedup filter capacity.
    #[arg(long, default_value_t = 4096)]
    filter_size: usize,

    /// Dedup filter time-to-live, in seconds.
    #[arg(long, default_value_t = 15)]
    filter_ttl_secs: u64,
}

struct StdinPack {
    ids: Mutex<Vec<String>>,
    running: AtomicI64,
}

impl StdinPack {
    fn new(ids: Vec<String>) -> Arc<Self> {
        Arc::new(StdinPack {
            ids: Mutex::new(ids),
            running: AtomicI64::new(0),
        })
    }
}

impl Identified for StdinPack {
    fn len(&self) -> usize {
        self.ids.lock().expect("pack mutex poisoned").len()
    }

    fn id_at(&self, index: usize) -> String {
        self.ids.lock().expect("pack mutex poisoned")[index].clone()
    }
}

impl Pack for StdinPack {
    fn swap(&self, i: usize, j: usize) {
        self.ids.lock().expect("pack mutex poisoned").swap(i, j);
    }

    fn resize(&self, new_len: usize) {
        self.ids.lock().expect("pack mutex poisoned").truncate(new_len);
    }

    fn running(&self, delta: i64) -> i64 {
        self.running.fetch_add(delta, Ordering::AcqRel) + delta
    }
}

/// Signals pack completion back to the main thread: a `done` callback can
/// only observe `&dyn Pack`, so it can't join a thread directly.
struct Completion {
    mutex: Mutex<bool>,
    cond: Condvar,
}

impl Completion {
    fn new() -> Arc<Self> {
        Arc::new(Completion {
            mutex: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    fn signal(&self) {
        *self.mutex.lock().expect("completion mutex poisoned") = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut done = self.mutex.lock().expect("completion mutex poisoned");
        while !*done {
            done = self.cond.wait(done).expect("completion mutex poisoned");
        }
    }
}

fn main() {
    let args = Args::parse();

    let mut input = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut input) {
        println!("{}", serde_json::json!({ "error": format!("reading stdin: {e}") }));
        std::process::exit(1);
    }

    let ids: Vec<String> = input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    let pack = StdinPack::new(ids);

    let dispatcher = Dispatcher::new(DispatchConfig {
        threads: args.threads,
        queue_size: args.queue_size,
        filter_size: args.filter_size,
        filter_ttl: Duration::from_secs(args.filter_ttl_secs),
    });

    let completion = Completion::new();
    let completion_for_done = Arc::clone(&completion);
    let admission: Admission = dispatcher.run_any(
        Instant::now(),
        &Entry::new(args.service, args.function),
        Arc::new(|_pack, _begin, _end| {}),
        Arc::new(move |_pack| completion_for_done.signal()),
        pack,
        args.step.max(1),
    );

    if admission.queued > 0 {
        completion.wait();
    }
    dispatcher.close();

    let json = serde_json::to_string(&admission).expect("Admission is always serializable");
    println!("{json}");
}
