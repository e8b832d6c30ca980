//! Result types returned by admission calls.

use serde::{Deserialize, Serialize};

/// Outcome of a single-pack admission call (`run_any` and its variants).
///
/// - `parts`: number of descriptors the admitted range was split into.
/// - `input`: the pack's length as observed at the start of the call
///   (before any repack), echoed back even on rejection so callers can
///   tell "nothing admitted" from "empty pack".
/// - `queued`: number of items actually enqueued (`kept`, after repack).
///
/// All three fields are `0` on a capacity-gated rejection
/// (`run_any_service`/`run_any_function` with the cap already met); `parts
/// == 0, queued == 0` with `input` echoed on a no-capacity or
/// fully-duplicated rejection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
    pub parts: usize,
    pub input: usize,
    pub queued: usize,
}

/// Outcome of a multi-pack admission call (`run_batch`).
///
/// - `input`: sum of `len()` across every pack actually visited.
/// - `queued`: sum of admitted items across every pack actually visited.
/// - `last`: the number of packs visited before the walk stopped (either
///   because the pack list was exhausted or because queue capacity ran
///   out).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAdmission {
    pub input: usize,
    pub queued: usize,
    pub last: usize,
}

/// Aggregate result sink for `run_batch`. `total` is invoked exactly once
/// per call, after every pack has been walked and before any descriptor for
/// that call is pushed onto the queue.
pub trait BatchResult: Send + Sync {
    fn total(&self, queued: usize);
}
