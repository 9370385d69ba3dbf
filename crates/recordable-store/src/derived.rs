#![forbid(unsafe_code)]

//! Stores computed from other stores.
//!
//! A derived store subscribes to its sources only while it has subscribers
//! of its own. Each source owns one slot and one pending flag: `invalidate`
//! raises the flag, `run` stores the value and lowers it. Recombination is
//! skipped while any flag is raised, so a wave that touches several sources
//! inside a [`BatchScope`](crate::BatchScope) recombines once, with every
//! slot already holding its final value.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::readable::{Readable, Store};
use crate::writable::{Setter, Stop, Unsubscriber};

/// Cleanup returned by a manual derivation; runs before the next
/// recombination and on teardown.
pub type Cleanup = Box<dyn FnOnce()>;

enum Combiner<V, T> {
    Auto(Box<dyn Fn(&[V]) -> T>),
    Manual(Box<dyn Fn(&[V], Setter<T>) -> Option<Cleanup>>),
}

/// Per-activation state of a derived store.
struct Wave<V> {
    values: RefCell<Vec<Option<V>>>,
    pending: RefCell<Vec<bool>>,
    inited: Cell<bool>,
    cleanup: RefCell<Option<Cleanup>>,
}

impl<V: Clone> Wave<V> {
    fn new(len: usize) -> Self {
        Self {
            values: RefCell::new(vec![None; len]),
            pending: RefCell::new(vec![false; len]),
            inited: Cell::new(false),
            cleanup: RefCell::new(None),
        }
    }

    fn sync<T: Clone + 'static>(&self, combiner: &Combiner<V, T>, set: &Setter<T>) {
        if self.pending.borrow().iter().any(|p| *p) {
            return;
        }
        let values: Option<Vec<V>> = self.values.borrow().iter().cloned().collect();
        let Some(values) = values else {
            return;
        };
        let previous = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = previous {
            cleanup();
        }
        match combiner {
            Combiner::Auto(f) => set.set(f(&values)),
            Combiner::Manual(f) => {
                let cleanup = f(&values, set.clone());
                *self.cleanup.borrow_mut() = cleanup;
            }
        }
    }
}

fn activate<S, V, T>(
    sources: &Rc<Vec<S>>,
    combiner: &Rc<Combiner<V, T>>,
    set: Setter<T>,
) -> Option<Stop>
where
    S: Store<V> + 'static,
    V: Clone + 'static,
    T: Clone + 'static,
{
    let wave = Rc::new(Wave::new(sources.len()));

    let unsubscribers: Vec<Unsubscriber> = sources
        .iter()
        .enumerate()
        .map(|(i, source)| {
            let run_wave = Rc::clone(&wave);
            let run_combiner = Rc::clone(combiner);
            let run_set = set.clone();
            let invalidate_wave = Rc::clone(&wave);
            source.subscribe_with_invalidate(
                Box::new(move |value: &V| {
                    run_wave.values.borrow_mut()[i] = Some(value.clone());
                    run_wave.pending.borrow_mut()[i] = false;
                    if run_wave.inited.get() {
                        run_wave.sync(&run_combiner, &run_set);
                    }
                }),
                Box::new(move || invalidate_wave.pending.borrow_mut()[i] = true),
            )
        })
        .collect();

    wave.inited.set(true);
    wave.sync(combiner, &set);

    Some(Box::new(move || {
        drop(unsubscribers);
        let cleanup = wave.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }))
}

/// Derive a store whose value is `combine(source values)`.
///
/// The combiner reruns after every source write, once all sources touched by
/// the current wave have delivered.
#[must_use]
pub fn derived<S, V, T>(sources: Vec<S>, combine: impl Fn(&[V]) -> T + 'static) -> Readable<T>
where
    S: Store<V> + 'static,
    V: Clone + 'static,
    T: Clone + 'static,
{
    let current: Vec<V> = sources.iter().map(|source| source.get()).collect();
    let initial = combine(&current);
    let sources = Rc::new(sources);
    let combiner = Rc::new(Combiner::Auto(Box::new(combine)));
    Readable::with_start(initial, move |set| activate(&sources, &combiner, set))
}

/// Derive a store whose value is pushed through a [`Setter`].
///
/// `combine` may set zero or more values, now or later, and may return a
/// [`Cleanup`] that runs before the next recombination and on teardown.
#[must_use]
pub fn derived_with<S, V, T>(
    sources: Vec<S>,
    initial: T,
    combine: impl Fn(&[V], Setter<T>) -> Option<Cleanup> + 'static,
) -> Readable<T>
where
    S: Store<V> + 'static,
    V: Clone + 'static,
    T: Clone + 'static,
{
    let sources = Rc::new(sources);
    let combiner = Rc::new(Combiner::Manual(Box::new(combine)));
    Readable::with_start(initial, move |set| activate(&sources, &combiner, set))
}

/// Single-source [`derived`].
#[must_use]
pub fn map<S, V, T>(source: S, f: impl Fn(&V) -> T + 'static) -> Readable<T>
where
    S: Store<V> + 'static,
    V: Clone + 'static,
    T: Clone + 'static,
{
    derived(vec![source], move |values: &[V]| f(&values[0]))
}
