#![forbid(unsafe_code)]

//! Writable store with lazy activation and breadth-first notification.
//!
//! # Design
//!
//! [`Writable<T>`] wraps a value of type `T` in shared, reference-counted
//! storage (`Rc<RefCell<..>>`). Every [`set`](Writable::set) replaces the
//! value unconditionally, invalidates each attached subscriber and then
//! queues one run per subscriber on the thread's notification queue (see
//! [`crate::queue`]).
//!
//! A store may carry a *start* callback. It runs when the first subscriber
//! attaches and may return a *stop* callback, which runs when the last
//! subscriber detaches. Writes made from inside the start callback update
//! the value silently; the attaching subscriber then receives the final
//! value once.
//!
//! # Failure Modes
//!
//! - **Subscriber leak**: An [`Unsubscriber`] kept alive forever keeps its
//!   callback attached. Dropping the guard (or calling
//!   [`Unsubscriber::unsubscribe`]) detaches it.
//! - **Detached before delivery**: A run that was queued for a subscriber
//!   which detached before the queue reached it is skipped.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::Store;
use crate::queue;

/// Callback returned by a start notifier; runs when the last subscriber
/// detaches.
pub type Stop = Box<dyn FnOnce()>;

/// Start notifier: runs when the first subscriber attaches.
pub type StartNotifier<T> = dyn Fn(Setter<T>) -> Option<Stop>;

struct Subscriber<T> {
    id: u64,
    attached: Cell<bool>,
    run: Box<dyn Fn(&T)>,
    invalidate: Box<dyn Fn()>,
}

struct WritableInner<T> {
    value: T,
    version: u64,
    next_id: u64,
    subscribers: Vec<Rc<Subscriber<T>>>,
    start: Option<Rc<StartNotifier<T>>>,
    stop: Option<Stop>,
    /// True between the end of the start callback and the last detach.
    active: bool,
}

/// A shared, writable value with subscriber notification.
///
/// Cloning a `Writable` creates a new handle to the **same** inner state.
///
/// # Invariants
///
/// 1. `set` never short-circuits on equal values.
/// 2. `version` increments by exactly 1 on every write.
/// 3. A new subscriber is called once immediately with the current value.
/// 4. Runs are delivered in subscription order within one write.
pub struct Writable<T> {
    inner: Rc<RefCell<WritableInner<T>>>,
}

impl<T> Clone for Writable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Writable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Writable")
            .field("value", &inner.value)
            .field("version", &inner.version)
            .field("subscriber_count", &inner.subscribers.len())
            .field("lazy", &inner.start.is_some())
            .finish()
    }
}

impl<T: Clone + 'static> Writable<T> {
    /// Create a store with the given initial value and no start notifier.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::from_parts(value, None)
    }

    /// Create a lazily activated store.
    ///
    /// `start` runs when the first subscriber attaches. It receives a
    /// [`Setter`] and may return a [`Stop`] callback that runs when the last
    /// subscriber detaches.
    #[must_use]
    pub fn with_start(value: T, start: impl Fn(Setter<T>) -> Option<Stop> + 'static) -> Self {
        Self::from_parts(value, Some(Rc::new(start)))
    }

    fn from_parts(value: T, start: Option<Rc<StartNotifier<T>>>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(WritableInner {
                value,
                version: 0,
                next_id: 0,
                subscribers: Vec::new(),
                start,
                stop: None,
                active: false,
            })),
        }
    }

    /// Replace the value and notify every attached subscriber.
    pub fn set(&self, value: T) {
        let subscribers = {
            let mut inner = self.inner.borrow_mut();
            inner.value = value;
            inner.version += 1;
            if !inner.active {
                return;
            }
            inner.subscribers.clone()
        };
        if subscribers.is_empty() {
            return;
        }

        let value = self.inner.borrow().value.clone();
        for sub in &subscribers {
            (sub.invalidate)();
        }
        for sub in subscribers {
            let value = value.clone();
            queue::enqueue(Box::new(move || {
                if sub.attached.get() {
                    (sub.run)(&value);
                }
            }));
        }
        queue::drain();
    }

    /// Replace the value with `f(current)`.
    pub fn update(&self, f: impl FnOnce(T) -> T) {
        let next = f(self.get());
        self.set(next);
    }

    /// Handle that writes into this store without keeping it alive.
    #[must_use]
    pub fn setter(&self) -> Setter<T> {
        Setter {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Number of writes since creation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Number of attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }

    fn attach(&self, run: Box<dyn Fn(&T)>, invalidate: Box<dyn Fn()>) -> Unsubscriber {
        let (sub, start) = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            let sub = Rc::new(Subscriber {
                id,
                attached: Cell::new(true),
                run,
                invalidate,
            });
            inner.subscribers.push(Rc::clone(&sub));
            let start = if inner.subscribers.len() == 1 {
                inner.start.clone()
            } else {
                None
            };
            if start.is_none() && inner.subscribers.len() == 1 {
                inner.active = true;
            }
            (sub, start)
        };

        if let Some(start) = start {
            let stop = start(self.setter());
            let mut inner = self.inner.borrow_mut();
            inner.stop = stop;
            inner.active = true;
        }

        let value = self.inner.borrow().value.clone();
        (sub.run)(&value);

        let weak = Rc::downgrade(&self.inner);
        let id = sub.id;
        Unsubscriber::new(move || detach(&weak, id))
    }
}

fn detach<T>(weak: &Weak<RefCell<WritableInner<T>>>, id: u64) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let stop = {
        let mut inner = inner.borrow_mut();
        let Some(pos) = inner.subscribers.iter().position(|s| s.id == id) else {
            return;
        };
        let sub = inner.subscribers.remove(pos);
        sub.attached.set(false);
        if inner.subscribers.is_empty() {
            inner.active = false;
            inner.stop.take()
        } else {
            None
        }
    };
    if let Some(stop) = stop {
        stop();
    }
}

impl<T: Clone + 'static> Store<T> for Writable<T> {
    /// Current value.
    ///
    /// An inactive lazy store is activated for the duration of the call so
    /// the returned value matches what the start notifier would produce.
    fn get(&self) -> T {
        let transient = {
            let inner = self.inner.borrow();
            !inner.active && inner.start.is_some()
        };
        if transient {
            let captured = Rc::new(RefCell::new(None));
            let captured_clone = Rc::clone(&captured);
            let guard = self.attach(
                Box::new(move |v: &T| *captured_clone.borrow_mut() = Some(v.clone())),
                Box::new(|| {}),
            );
            drop(guard);
            let value = captured.borrow_mut().take();
            if let Some(value) = value {
                return value;
            }
        }
        self.inner.borrow().value.clone()
    }

    fn subscribe_with_invalidate(
        &self,
        run: Box<dyn Fn(&T)>,
        invalidate: Box<dyn Fn()>,
    ) -> Unsubscriber {
        self.attach(run, invalidate)
    }
}

/// Weak write handle passed to start notifiers and manual derivations.
pub struct Setter<T> {
    inner: Weak<RefCell<WritableInner<T>>>,
}

impl<T> Clone for Setter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Setter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setter")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl<T: Clone + 'static> Setter<T> {
    /// Write into the store. A no-op once the store is gone.
    pub fn set(&self, value: T) {
        if let Some(inner) = self.inner.upgrade() {
            Writable { inner }.set(value);
        }
    }
}

/// RAII guard for a subscription.
///
/// Dropping the guard detaches the subscriber. [`unsubscribe`](Self::unsubscribe)
/// detaches eagerly; further calls are no-ops.
#[must_use = "dropping an Unsubscriber detaches the subscriber immediately"]
pub struct Unsubscriber {
    detach: Cell<Option<Box<dyn FnOnce()>>>,
}

impl Unsubscriber {
    pub(crate) fn new(detach: impl FnOnce() + 'static) -> Self {
        Self {
            detach: Cell::new(Some(Box::new(detach))),
        }
    }

    /// Detach now. Idempotent.
    pub fn unsubscribe(&self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }

    /// Whether this guard still holds an attached subscriber.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        let detach = self.detach.take();
        let attached = detach.is_some();
        self.detach.set(detach);
        attached
    }
}

impl Drop for Unsubscriber {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Unsubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscriber")
            .field("attached", &self.is_attached())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
