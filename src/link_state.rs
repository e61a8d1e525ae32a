use log::*;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No description processed yet, or a rebuild is in progress
    Waiting,
    /// A description has been fully processed
    Ready,
}

/// Proof that a description rebuild was started at a given generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildTicket {
    generation: u64,
}

/// Generation a frame conversion started under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTicket {
    generation: u64,
}

#[derive(Debug)]
struct Inner {
    state: LinkState,
    generation: u64,
    disposed: bool,
}

/// WAITING/READY gate between description rebuilds and frame conversion.
///
/// Every rebuild and every dispose bumps the generation, so work started
/// under an older generation can never publish.
#[derive(Debug)]
pub struct LinkStateMachine {
    inner: Mutex<Inner>,
}

impl Default for LinkStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkStateMachine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: LinkState::Waiting,
                generation: 0,
                disposed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == LinkState::Ready
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    /// READY -> WAITING at the start of a description rebuild.
    /// Returns `None` once disposed.
    pub fn begin_rebuild(&self) -> Option<RebuildTicket> {
        let mut inner = self.lock();
        if inner.disposed {
            return None;
        }
        inner.state = LinkState::Waiting;
        inner.generation += 1;
        trace!("Rebuild started at generation {}", inner.generation);
        Some(RebuildTicket {
            generation: inner.generation,
        })
    }

    /// WAITING -> READY once the rebuilt model is ready.
    ///
    /// `publish` runs under the state guard, right before the transition, and
    /// only if no newer rebuild or dispose happened in the meantime.
    pub fn complete_rebuild<F: FnOnce()>(&self, ticket: RebuildTicket, publish: F) -> bool {
        let mut inner = self.lock();
        if inner.disposed || inner.generation != ticket.generation {
            debug!(
                "Discarding rebuild from generation {}, current is {}",
                ticket.generation,
                inner.generation
            );
            return false;
        }
        publish();
        inner.state = LinkState::Ready;
        true
    }

    /// Leave a failed rebuild. Goes back to READY only when `keep_previous`
    /// says the previously published model is still usable.
    pub fn abort_rebuild(&self, ticket: RebuildTicket, keep_previous: bool) {
        let mut inner = self.lock();
        if inner.disposed || inner.generation != ticket.generation {
            return;
        }
        inner.state = if keep_previous {
            LinkState::Ready
        } else {
            LinkState::Waiting
        };
    }

    /// Ticket for a frame conversion, only handed out while READY
    pub fn frame_ticket(&self) -> Option<FrameTicket> {
        let inner = self.lock();
        if inner.state == LinkState::Ready && !inner.disposed {
            Some(FrameTicket {
                generation: inner.generation,
            })
        } else {
            None
        }
    }

    /// Run `publish` only if the link is still READY at the ticket's generation
    pub fn publish_frame<F: FnOnce()>(&self, ticket: FrameTicket, publish: F) -> bool {
        let inner = self.lock();
        if inner.state != LinkState::Ready || inner.disposed || inner.generation != ticket.generation
        {
            return false;
        }
        publish();
        true
    }

    /// Any state -> WAITING, permanently
    pub fn dispose(&self) {
        let mut inner = self.lock();
        inner.state = LinkState::Waiting;
        inner.generation += 1;
        inner.disposed = true;
    }
}
