//! # Event-change mailbox
//!
//! Registration changes for one multiplexer thread. Any thread may push; only
//! the owning multiplexer thread drains. A push is followed by a wake of the
//! owner's eventfd (done by the caller, which knows the thread).
//!
//! A drained batch is applied deletes first, then adds, so slots freed in
//! this batch can be reused by it. A delete for an item this thread does not
//! hold yet (its add is still behind it in the queue) is deferred to the
//! next pass rather than dropped.

use crossbeam_queue::SegQueue;

/// Deferred deletes give up after this many passes.
pub(crate) const MAX_DEFERRALS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Add,
    Delete,
}

#[derive(Debug)]
pub(crate) struct EventChange<T> {
    pub(crate) item: T,
    pub(crate) action: Action,
    pub(crate) deferrals: u32,
}

impl<T> EventChange<T> {
    pub(crate) fn add(item: T) -> Self {
        Self {
            item,
            action: Action::Add,
            deferrals: 0,
        }
    }

    pub(crate) fn delete(item: T) -> Self {
        Self {
            item,
            action: Action::Delete,
            deferrals: 0,
        }
    }
}

/// One registration held by a multiplexer thread.
#[derive(Debug)]
pub(crate) struct Registration<T> {
    pub(crate) item: T,
    /// Interest mask at the time the slot was muted.
    pub(crate) muted_interest: Option<u32>,
}

impl<T> Registration<T> {
    pub(crate) fn new(item: T) -> Self {
        Self {
            item,
            muted_interest: None,
        }
    }
}

/// What applying a batch did.
#[derive(Debug)]
pub(crate) struct Applied<T> {
    /// Registrations dropped by deletes. The caller releases them outside
    /// any lock.
    pub(crate) removed: Vec<Registration<T>>,
    /// Deletes to retry on the next pass.
    pub(crate) deferred: Vec<EventChange<T>>,
    /// Deletes abandoned after `MAX_DEFERRALS` passes.
    pub(crate) dropped: Vec<EventChange<T>>,
    pub(crate) added: usize,
}

#[derive(Debug)]
pub(crate) struct Mailbox<T> {
    queue: SegQueue<EventChange<T>>,
}

impl<T> Mailbox<T> {
    pub(crate) fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    pub(crate) fn push(&self, change: EventChange<T>) {
        self.queue.push(change);
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Take everything currently queued.
    pub(crate) fn drain(&self) -> Vec<EventChange<T>> {
        let mut batch = Vec::new();
        while let Some(change) = self.queue.pop() {
            batch.push(change);
        }
        batch
    }
}

/// Apply `batch` to `slots`: deletes, then adds. `same` decides whether a
/// delete names a held registration.
pub(crate) fn apply_batch<T>(
    slots: &mut Vec<Registration<T>>,
    batch: Vec<EventChange<T>>,
    same: impl Fn(&T, &T) -> bool,
) -> Applied<T> {
    let (deletes, adds): (Vec<_>, Vec<_>) =
        batch.into_iter().partition(|c| c.action == Action::Delete);

    let mut applied = Applied {
        removed: Vec::new(),
        deferred: Vec::new(),
        dropped: Vec::new(),
        added: 0,
    };

    for mut change in deletes {
        match slots.iter().position(|r| same(&r.item, &change.item)) {
            // Vec::remove keeps the remaining slots packed and in order.
            Some(pos) => applied.removed.push(slots.remove(pos)),
            None if change.deferrals < MAX_DEFERRALS => {
                change.deferrals += 1;
                applied.deferred.push(change);
            }
            None => applied.dropped.push(change),
        }
    }

    for change in adds {
        slots.push(Registration::new(change.item));
        applied.added += 1;
    }

    applied
}
