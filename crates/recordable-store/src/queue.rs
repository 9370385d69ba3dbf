#![forbid(unsafe_code)]

//! Breadth-first notification queue shared by every store on a thread.
//!
//! A [`Writable::set`](crate::Writable::set) never calls subscribers
//! directly. It first invalidates every subscriber, then enqueues one run
//! per subscriber and asks the queue to drain. Draining only happens when no
//! drain is already in progress further up the stack and no [`BatchScope`]
//! is open, so a `set` issued from inside a subscriber callback is delivered
//! after the current wave instead of recursing into it.
//!
//! # Invariants
//!
//! 1. Queued runs execute in FIFO order.
//! 2. At most one drain loop is active per thread.
//! 3. Nested batches are supported: only the outermost scope drains.
//! 4. Within a batch, `get()` always returns the latest value (values are
//!    stored immediately, only runs are deferred).
//!
//! # Failure Modes
//!
//! - **Callback panics during drain**: Remaining callbacks are still called.
//!   The first panic is re-raised after the queue is empty.

use std::cell::RefCell;
use std::collections::VecDeque;
use tracing::trace_span;
use web_time::Instant;

/// A deferred subscriber run.
pub(crate) type DeferredRun = Box<dyn FnOnce()>;

/// Thread-local notification state.
struct NotifyQueue {
    /// Open [`BatchScope`] nesting depth.
    batch_depth: u32,
    /// Whether a drain loop is running on this thread.
    draining: bool,
    /// Runs waiting to be delivered.
    pending: VecDeque<DeferredRun>,
}

thread_local! {
    static QUEUE: RefCell<NotifyQueue> = const {
        RefCell::new(NotifyQueue {
            batch_depth: 0,
            draining: false,
            pending: VecDeque::new(),
        })
    };
}

/// Returns true if a batch is currently open on this thread.
pub fn is_batching() -> bool {
    QUEUE.with(|q| q.borrow().batch_depth > 0)
}

/// Returns true while the queue is delivering runs on this thread.
pub fn is_draining() -> bool {
    QUEUE.with(|q| q.borrow().draining)
}

/// Number of runs waiting in the queue.
pub fn pending_count() -> usize {
    QUEUE.with(|q| q.borrow().pending.len())
}

/// Append a run to the back of the queue.
pub(crate) fn enqueue(run: DeferredRun) {
    QUEUE.with(|q| q.borrow_mut().pending.push_back(run));
}

/// Deliver queued runs unless a drain is already active or a batch is open.
pub(crate) fn drain() {
    let owns_drain = QUEUE.with(|q| {
        let mut queue = q.borrow_mut();
        if queue.draining || queue.batch_depth > 0 || queue.pending.is_empty() {
            false
        } else {
            queue.draining = true;
            true
        }
    });
    if !owns_drain {
        return;
    }

    let started = Instant::now();
    let span = trace_span!(
        "store.drain",
        delivered = tracing::field::Empty,
        duration_us = tracing::field::Empty
    );
    let _entered = span.enter();

    let mut delivered = 0_u64;
    let mut first_panic: Option<Box<dyn std::any::Any + Send>> = None;
    loop {
        // Pop outside the callback so runs may enqueue more work.
        let next = QUEUE.with(|q| q.borrow_mut().pending.pop_front());
        let Some(run) = next else {
            break;
        };
        delivered += 1;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(run));
        if let Err(payload) = result
            && first_panic.is_none()
        {
            first_panic = Some(payload);
        }
    }

    QUEUE.with(|q| q.borrow_mut().draining = false);
    span.record("delivered", delivered);
    span.record("duration_us", started.elapsed().as_micros() as u64);

    if let Some(payload) = first_panic {
        std::panic::resume_unwind(payload);
    }
}

/// RAII guard that holds back queue delivery.
///
/// While a `BatchScope` is alive, every store write still updates its value
/// and invalidates subscribers immediately, but the runs wait in the queue.
/// When the outermost scope drops, the queue drains. This is what lets a
/// derived store see all of its sources settle before it recombines.
pub struct BatchScope {
    is_root: bool,
}

impl BatchScope {
    /// Open a new batch scope.
    #[must_use]
    pub fn new() -> Self {
        let is_root = QUEUE.with(|q| {
            let mut queue = q.borrow_mut();
            queue.batch_depth += 1;
            queue.batch_depth == 1
        });
        Self { is_root }
    }

    /// Number of runs queued so far.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        pending_count()
    }
}

impl Default for BatchScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        let outermost = QUEUE.with(|q| {
            let mut queue = q.borrow_mut();
            queue.batch_depth = queue.batch_depth.saturating_sub(1);
            queue.batch_depth == 0
        });
        if outermost {
            drain();
        }
    }
}

impl std::fmt::Debug for BatchScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScope")
            .field("is_root", &self.is_root)
            .field("pending", &self.pending_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Store, Writable};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn batch_defers_runs() {
        let store = Writable::new(0);
        let count = Rc::new(Cell::new(0u32));
        let count_clone = Rc::clone(&count);

        let _sub = store.subscribe(move |_| count_clone.set(count_clone.get() + 1));
        assert_eq!(count.get(), 1, "subscribe runs once on attach");

        {
            let _batch = BatchScope::new();
            store.set(1);
            store.set(2);
            assert_eq!(count.get(), 1);
        }
        // Writes are not coalesced: each set delivers once.
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn batch_values_updated_immediately() {
        let store = Writable::new(0);
        let _sub = store.subscribe(|_| {});
        {
            let _batch = BatchScope::new();
            store.set(42);
            assert_eq!(store.get(), 42);
        }
    }

    #[test]
    fn nested_batch_only_outermost_drains() {
        let store = Writable::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let _sub = store.subscribe(move |v| seen_clone.borrow_mut().push(*v));

        {
            let _outer = BatchScope::new();
            store.set(1);
            {
                let _inner = BatchScope::new();
                store.set(2);
            }
            assert_eq!(*seen.borrow(), vec![0]);
        }
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn is_batching_flag() {
        assert!(!is_batching());
        {
            let _batch = BatchScope::new();
            assert!(is_batching());
        }
        assert!(!is_batching());
    }

    #[test]
    fn pending_count_tracks_queued_runs() {
        let store = Writable::new(0);
        let _a = store.subscribe(|_| {});
        let _b = store.subscribe(|_| {});

        let batch = BatchScope::new();
        assert_eq!(batch.pending_count(), 0);
        store.set(1);
        assert_eq!(batch.pending_count(), 2);
        drop(batch);
        assert_eq!(pending_count(), 0);
    }

    #[test]
    fn nested_set_runs_after_current_wave() {
        let store = Writable::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let inner_store = store.clone();
        let log_a = Rc::clone(&log);
        let _a = store.subscribe(move |v| {
            log_a.borrow_mut().push(format!("a{v}"));
            if *v == 1 {
                inner_store.set(2);
            }
        });
        let log_b = Rc::clone(&log);
        let _b = store.subscribe(move |v| log_b.borrow_mut().push(format!("b{v}")));
        log.borrow_mut().clear();

        store.set(1);
        assert_eq!(*log.borrow(), vec!["a1", "b1", "a2", "b2"]);
        assert!(!is_draining());
    }

    #[test]
    fn panicking_run_does_not_starve_queue() {
        let store = Writable::new(0);
        let reached = Rc::new(Cell::new(false));
        let reached_clone = Rc::clone(&reached);

        let _bad = store.subscribe(|v| {
            if *v == 1 {
                panic!("boom");
            }
        });
        let _good = store.subscribe(move |v| {
            if *v == 1 {
                reached_clone.set(true);
            }
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| store.set(1)));
        assert!(result.is_err());
        assert!(reached.get());
        assert!(!is_draining());
    }

    #[test]
    fn empty_batch_no_panic() {
        let _batch = BatchScope::default();
    }

    #[test]
    fn debug_format() {
        let batch = BatchScope::new();
        let dbg = format!("{batch:?}");
        assert!(dbg.contains("BatchScope"));
        assert!(dbg.contains("is_root"));
    }
}
