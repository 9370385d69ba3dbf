#![forbid(unsafe_code)]

//! Read-only store handle.

use std::fmt;
use std::rc::Rc;

use crate::writable::{Setter, Stop, Unsubscriber, Writable};

/// Anything that can be read and subscribed to.
///
/// `subscribe_with_invalidate` is the object-safe primitive; `invalidate`
/// runs immediately before a run is queued for the subscriber, which is what
/// derived stores use to mark a source as stale during a wave.
pub trait Store<T> {
    /// Current value.
    fn get(&self) -> T;

    /// Attach `run` (called immediately, then on every write) and
    /// `invalidate` (called when a write is about to be delivered).
    fn subscribe_with_invalidate(
        &self,
        run: Box<dyn Fn(&T)>,
        invalidate: Box<dyn Fn()>,
    ) -> Unsubscriber;

    /// Attach `run` without an invalidation hook.
    fn subscribe(&self, run: impl Fn(&T) + 'static) -> Unsubscriber
    where
        Self: Sized,
    {
        self.subscribe_with_invalidate(Box::new(run), Box::new(|| {}))
    }
}

impl<T, S: Store<T> + ?Sized> Store<T> for Rc<S> {
    fn get(&self) -> T {
        (**self).get()
    }

    fn subscribe_with_invalidate(
        &self,
        run: Box<dyn Fn(&T)>,
        invalidate: Box<dyn Fn()>,
    ) -> Unsubscriber {
        (**self).subscribe_with_invalidate(run, invalidate)
    }
}

/// A store that can only be read and subscribed to.
///
/// Its value changes only through its start notifier.
pub struct Readable<T> {
    store: Writable<T>,
}

impl<T> Clone for Readable<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Readable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Readable").field(&self.store).finish()
    }
}

impl<T: Clone + 'static> Readable<T> {
    /// A constant store.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            store: Writable::new(value),
        }
    }

    /// A store driven by `start` while it has subscribers.
    #[must_use]
    pub fn with_start(value: T, start: impl Fn(Setter<T>) -> Option<Stop> + 'static) -> Self {
        Self {
            store: Writable::with_start(value, start),
        }
    }

    /// Number of attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.store.subscriber_count()
    }
}

impl<T: Clone + 'static> Store<T> for Readable<T> {
    fn get(&self) -> T {
        self.store.get()
    }

    fn subscribe_with_invalidate(
        &self,
        run: Box<dyn Fn(&T)>,
        invalidate: Box<dyn Fn()>,
    ) -> Unsubscriber {
        self.store.subscribe_with_invalidate(run, invalidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn constant_readable() {
        let store = Readable::new("hi");
        assert_eq!(store.get(), "hi");
    }

    #[test]
    fn readable_driven_by_start() {
        let setter_slot: Rc<RefCell<Option<Setter<u32>>>> = Rc::new(RefCell::new(None));
        let slot_clone = Rc::clone(&setter_slot);
        let store = Readable::with_start(0, move |set| {
            *slot_clone.borrow_mut() = Some(set);
            None
        });

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let _sub = store.subscribe(move |v| seen_clone.borrow_mut().push(*v));

        let setter = setter_slot.borrow().clone().expect("start ran");
        setter.set(5);
        assert_eq!(*seen.borrow(), vec![0, 5]);
        assert_eq!(store.get(), 5);
    }

    #[test]
    fn rc_dyn_store_forwards() {
        let source: Rc<dyn Store<i32>> = Rc::new(Writable::new(3));
        assert_eq!(source.get(), 3);
        let _sub = source.subscribe(|_| {});
    }
}
