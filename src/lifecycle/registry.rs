//! Exit handler registry and completion tracking.
//!
//! # Responsibilities
//! - Hold exit handlers subscribed to the shutdown broadcast
//! - Hand the whole subscriber set to the broadcast exactly once
//! - Assign 1-based completion slots as handlers are notified
//! - Count completions per slot and report when the set is drained
//!
//! # Design Decisions
//! - Completions are counted, not flagged, so a handler completing twice
//!   is harmless
//! - The subscriber count is snapshotted before the first handler runs;
//!   handlers completing synchronously during the broadcast can never make
//!   the set look drained early
//! - No locking here: the coordinator owns the registry behind its own lock

use crate::lifecycle::coordinator::Completion;

/// Callback invoked once when shutdown is triggered.
pub type ExitHandlerFn = Box<dyn FnOnce(Completion) + Send + 'static>;

/// Identifies a registration so it can be unbound before shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// A handler waiting for the shutdown broadcast.
pub struct Subscriber {
    pub id: HandlerId,
    pub description: Option<String>,
    pub handler: ExitHandlerFn,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Subscribers plus the per-slot completion counters of the current cycle.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    next_id: u64,
    subscribers: Vec<Subscriber>,
    completions: Vec<u32>,
    /// Subscriber count captured when the broadcast fired.
    snapshot: Option<usize>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id without subscribing. Ids are never reused, even
    /// across [`HandlerRegistry::clear`].
    pub fn allocate_id(&mut self) -> HandlerId {
        self.next_id += 1;
        HandlerId(self.next_id)
    }

    /// Subscribe a handler to the next broadcast.
    pub fn subscribe(&mut self, description: Option<String>, handler: ExitHandlerFn) -> HandlerId {
        let id = self.allocate_id();
        self.subscribers.push(Subscriber {
            id,
            description,
            handler,
        });
        id
    }

    /// Remove a handler that has not been notified yet.
    pub fn unsubscribe(&mut self, id: HandlerId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    /// Number of handlers waiting for the broadcast.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Take every subscriber for the broadcast, recording how many there were.
    pub fn take_for_broadcast(&mut self) -> Vec<Subscriber> {
        let subscribers = std::mem::take(&mut self.subscribers);
        self.snapshot = Some(subscribers.len());
        subscribers
    }

    /// Open a new completion slot. Slots are 1-based.
    pub fn open_slot(&mut self) -> usize {
        self.completions.push(0);
        self.completions.len()
    }

    /// Count a completion for `slot`, returning the new count.
    ///
    /// Returns `None` for a slot that was never opened.
    pub fn complete(&mut self, slot: usize) -> Option<u32> {
        let counter = slot
            .checked_sub(1)
            .and_then(|index| self.completions.get_mut(index))?;
        *counter = counter.saturating_add(1);
        Some(*counter)
    }

    /// Number of slots opened in this cycle.
    pub fn slot_count(&self) -> usize {
        self.completions.len()
    }

    /// Start a fresh cycle, returning the subscribers that never ran.
    ///
    /// The id counter survives so handles from earlier cycles cannot match
    /// new registrations.
    pub fn clear(&mut self) -> Vec<Subscriber> {
        self.completions.clear();
        self.snapshot = None;
        std::mem::take(&mut self.subscribers)
    }

    /// Subscriber count captured at broadcast time, if the broadcast fired.
    pub fn snapshot(&self) -> Option<usize> {
        self.snapshot
    }

    /// True once every notified handler has completed.
    pub fn is_fully_drained(&self) -> bool {
        match self.snapshot {
            Some(expected) => {
                expected <= self.completions.len() && self.completions.iter().all(|&c| c >= 1)
            }
            None => false,
        }
    }
}
