//! Deferred completion scheduling
//!
//! [`Completion`] is a single-resolution future with an ordered listener list. A
//! listener can be attached at any moment:
//!
//! - while pending, it is stored and runs when the completion is released;
//! - after release, it is dispatched right away with the stored value;
//! - after the completion is abandoned (the request was canceled), it is dropped.
//!
//! Listeners are handed to their [`Dispatcher`] while the internal lock is held, so
//! listeners sharing a dispatcher always run in registration order, whichever side
//! of the release they were attached on.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::dispatcher::Dispatcher;

type Unit<R> = Box<dyn FnOnce(R) -> BoxFuture<'static, ()> + Send>;

struct Listener<R> {
    dispatcher: Dispatcher,
    unit: Unit<R>,
}

impl<R> Listener<R> {
    fn fire(self, value: R) {
        let Listener { dispatcher, unit } = self;
        if !dispatcher.dispatch(unit(value)) {
            tracing::warn!(
                dispatcher = dispatcher.name(),
                "Delivery context is gone; dropping callback"
            );
        }
    }
}

enum Phase<R> {
    Pending(Vec<Listener<R>>),
    Released(R),
    Abandoned,
}

/// Observable phase of a [`Completion`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionPhase {
    /// Not released yet; listeners are being held
    Pending,
    /// Released; listeners run immediately
    Released,
    /// Will never be released; listeners are dropped
    Abandoned,
}

/// Held queue of callback units, released exactly once
pub struct Completion<R> {
    phase: Mutex<Phase<R>>,
}

impl<R: Clone + Send + 'static> Completion<R> {
    /// Create a pending completion with no listeners
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Pending(Vec::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Phase<R>> {
        // Listeners never run under the lock, so poisoning cannot leave the
        // phase half-updated
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a listener that runs on `dispatcher` once the value is available
    pub fn register<F, Fut>(&self, dispatcher: &Dispatcher, unit: F)
    where
        F: FnOnce(R) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = Listener {
            dispatcher: dispatcher.clone(),
            unit: Box::new(move |value| Box::pin(unit(value))),
        };

        let mut phase = self.lock();
        match &mut *phase {
            Phase::Pending(listeners) => listeners.push(listener),
            Phase::Released(value) => listener.fire(value.clone()),
            Phase::Abandoned => {
                tracing::trace!("Completion abandoned; listener dropped");
            }
        }
    }

    /// Release the held listeners with `value`
    ///
    /// Only the first call on a pending completion has any effect; it returns true.
    pub fn release(&self, value: R) -> bool {
        let mut phase = self.lock();
        let listeners = match &mut *phase {
            Phase::Pending(listeners) => std::mem::take(listeners),
            Phase::Released(_) | Phase::Abandoned => return false,
        };
        *phase = Phase::Released(value.clone());

        for listener in listeners {
            listener.fire(value.clone());
        }
        true
    }

    /// Give up on this completion; held and future listeners are dropped
    ///
    /// Returns true if the completion was still pending.
    pub fn abandon(&self) -> bool {
        let mut phase = self.lock();
        match &*phase {
            Phase::Pending(listeners) => {
                tracing::trace!(dropped = listeners.len(), "Abandoning completion");
                *phase = Phase::Abandoned;
                true
            }
            Phase::Released(_) | Phase::Abandoned => false,
        }
    }

    /// Current phase
    pub fn phase(&self) -> CompletionPhase {
        match &*self.lock() {
            Phase::Pending(_) => CompletionPhase::Pending,
            Phase::Released(_) => CompletionPhase::Released,
            Phase::Abandoned => CompletionPhase::Abandoned,
        }
    }

    /// Number of listeners waiting for release
    pub fn held_listeners(&self) -> usize {
        match &*self.lock() {
            Phase::Pending(listeners) => listeners.len(),
            Phase::Released(_) | Phase::Abandoned => 0,
        }
    }
}

impl<R: Clone + Send + 'static> Default for Completion<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> std::fmt::Debug for Completion<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match &*self.phase.lock().unwrap_or_else(PoisonError::into_inner) {
            Phase::Pending(listeners) => format!("Pending({} held)", listeners.len()),
            Phase::Released(_) => "Released".to_string(),
            Phase::Abandoned => "Abandoned".to_string(),
        };
        f.debug_struct("Completion").field("phase", &phase).finish()
    }
}
