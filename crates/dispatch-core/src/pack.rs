//! Pack capability traits.
//!
//! A pack is the caller's ordered collection of identified items processed
//! as a unit. The dispatcher only ever needs a narrow slice of a pack's
//! behavior per operation, so the capability is split into two traits
//! rather than one monolithic interface: [`Identified`] (read-only,
//! sufficient for [`crate::Dispatcher::remove`]) and [`Pack`] (adds the
//! mutation and completion-tracking needed by admission).
//!
//! Packs are shared as `Arc<dyn Pack>` between the admitting thread and the
//! worker(s) that later execute sub-ranges of them, so every method here
//! takes `&self`. An implementation that needs to mutate its backing storage
//! (for `swap`/`resize`) must do so through its own interior mutability.

/// Read-only pack capability: size and per-index identifier.
pub trait Identified: Send + Sync {
    /// Number of items currently in the pack.
    fn len(&self) -> usize;

    /// `true` if the pack currently holds no items.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The stable string identifier of the item at `index`.
    ///
    /// `index` is always `< self.len()` when called by the dispatcher.
    fn id_at(&self, index: usize) -> String;
}

/// Full pack capability: adds in-place rearrangement and the running
/// counter used to detect a pack's last completing descriptor.
pub trait Pack: Identified {
    /// Exchange the items at `i` and `j`. Must be deterministic and
    /// non-throwing. The dispatcher's repack step depends on a real
    /// exchange to bring unexamined items into play once it starts
    /// skipping duplicates — a pack whose ids cluster duplicates early and
    /// whose `swap` is a no-op will under-admit, since the same rejected
    /// index is simply re-examined forever. The capability a pack is free
    /// to decline is the *shrink* ([`Pack::resize`]), not this exchange.
    fn swap(&self, i: usize, j: usize);

    /// Shrink (or otherwise adjust) the pack to report `new_len` from
    /// [`Identified::len`] afterwards. Must be deterministic and
    /// non-throwing. A pack may implement this as a no-op to decline the
    /// in-place shrink entirely; the dispatcher treats that as "caller
    /// requests no shrink" and enqueues the full post-repack length
    /// (including any duplicates that were swapped toward the tail but
    /// never actually dropped) — see the dispatcher's repack step.
    fn resize(&self, new_len: usize);

    /// Atomically add `delta` to the pack's in-flight descriptor counter
    /// and return the post-add value. Must be linearizable across worker
    /// threads: its return value is the only way a worker learns it is the
    /// last one to finish.
    fn running(&self, delta: i64) -> i64;
}
