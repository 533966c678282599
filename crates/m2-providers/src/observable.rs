use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tracing::trace;

use crate::diff::{Changeset, Differentiable};

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Publish/subscribe primitive. Handlers run synchronously, in binding
/// order, on the notifying thread.
pub struct Observable<E> {
    inner: Arc<ObservableInner<E>>,
}

struct ObservableInner<E> {
    handlers: RwLock<Vec<(u64, Handler<E>)>>,
    next_id: AtomicU64,
}

trait Unbind: Send + Sync {
    fn unbind(&self, id: u64);
}

impl<E> Unbind for ObservableInner<E> {
    fn unbind(&self, id: u64) {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|(handler_id, _)| *handler_id != id);
    }
}

/// Keeps a handler bound until dropped.
#[must_use = "dropping an Observation unbinds the handler"]
pub struct Observation {
    id: u64,
    observable: Weak<dyn Unbind>,
}

impl Observation {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Observation {
    fn drop(&mut self) {
        if let Some(observable) = self.observable.upgrade() {
            observable.unbind(self.id);
        }
    }
}

impl<E: 'static> Observable<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ObservableInner {
                handlers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn bind<F>(&self, handler: F) -> Observation
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, Arc::new(handler)));
        let observable: Weak<dyn Unbind> = Arc::downgrade(&self.inner) as Weak<dyn Unbind>;
        Observation { id, observable }
    }

    pub fn unbind(&self, id: u64) {
        self.inner.unbind(id);
    }

    pub fn notify(&self, event: &E) {
        let handlers: Vec<Handler<E>> = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        trace!("Notifying {} observers", handlers.len());
        for handler in handlers {
            handler(event);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl Observable<()> {
    /// Payload-free "state changed" signal.
    pub fn signal(&self) {
        self.notify(&());
    }
}

impl<E: 'static> Default for Observable<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A before/after pair and the edit script between them.
#[derive(Debug, Clone)]
pub struct Update<T> {
    pub old: Vec<T>,
    pub new: Vec<T>,
    pub changeset: Changeset,
}

/// Observable over ordered snapshots that delivers an edit script.
pub struct DiffObservable<T> {
    observable: Observable<Update<T>>,
}

impl<T: Differentiable + Clone + 'static> DiffObservable<T> {
    pub fn new() -> Self {
        Self {
            observable: Observable::new(),
        }
    }

    pub fn bind<F>(&self, handler: F) -> Observation
    where
        F: Fn(&Update<T>) + Send + Sync + 'static,
    {
        self.observable.bind(handler)
    }

    pub fn unbind(&self, id: u64) {
        self.observable.unbind(id);
    }

    pub fn notify_diff(&self, old: &[T], new: &[T]) {
        let update = Update {
            old: old.to_vec(),
            new: new.to_vec(),
            changeset: Changeset::compute(old, new),
        };
        self.observable.notify(&update);
    }

    pub fn observer_count(&self) -> usize {
        self.observable.observer_count()
    }
}

impl<T: Differentiable + Clone + 'static> Default for DiffObservable<T> {
    fn default() -> Self {
        Self::new()
    }
}
