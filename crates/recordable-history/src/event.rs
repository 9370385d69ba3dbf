#![forbid(unsafe_code)]

//! History events and listener registration.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use serde::Serialize;

/// Why the record index or the record list changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// A change was recorded.
    New,
    /// A record was undone.
    Undo,
    /// A record was redone.
    Redo,
    /// The oldest record was evicted to respect the limit.
    Calibrate,
}

/// Something observable happened to a history.
///
/// Events are delivered synchronously, in emission order, after the engine
/// has finished updating its own state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordEvent {
    /// The current record index moved.
    IndexChanged { index: i64, status: RecordStatus },
    /// The record list changed.
    RecordsChanged {
        records: Vec<String>,
        status: RecordStatus,
    },
    /// The record list was cleared.
    RecordsCleared { records: Vec<String>, index: i64 },
}

type Listener = Rc<dyn Fn(&RecordEvent)>;

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: Cell<u64>,
    entries: RefCell<Vec<(u64, Listener)>>,
}

impl Listeners {
    pub(crate) fn add(self: &Rc<Self>, listener: impl Fn(&RecordEvent) + 'static) -> EventSubscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.entries.borrow_mut().push((id, Rc::new(listener)));
        EventSubscription {
            listeners: Rc::downgrade(self),
            id,
            attached: Cell::new(true),
        }
    }

    fn remove(&self, id: u64) {
        self.entries.borrow_mut().retain(|(entry, _)| *entry != id);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Deliver `events` to a snapshot of the current listeners.
    pub(crate) fn dispatch(&self, events: &[RecordEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners: Vec<Listener> = self
            .entries
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for event in events {
            for listener in &listeners {
                listener(event);
            }
        }
    }
}

/// RAII guard for an event listener.
#[must_use = "dropping an EventSubscription removes the listener immediately"]
pub struct EventSubscription {
    listeners: Weak<Listeners>,
    id: u64,
    attached: Cell<bool>,
}

impl EventSubscription {
    /// Remove the listener now. Idempotent.
    pub fn unsubscribe(&self) {
        if self.attached.replace(false)
            && let Some(listeners) = self.listeners.upgrade()
        {
            listeners.remove(self.id);
        }
    }

    /// Whether the listener is still registered.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached.get() && self.listeners.strong_count() > 0
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSubscription")
            .field("id", &self.id)
            .field("attached", &self.is_attached())
            .finish()
    }
}
