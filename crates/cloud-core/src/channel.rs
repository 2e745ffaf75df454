use std::sync::Arc;

use tokio::sync::watch;

/// Receiver type handed to observers of a binding.
pub type StateStream<T> = watch::Receiver<T>;

/// Observable state cell backing every reactive binding.
///
/// Writers replace or mutate the value; observers either read the latest
/// snapshot or await changes through a [`StateStream`].
#[derive(Debug)]
pub struct StateCell<T> {
    tx: Arc<watch::Sender<T>>,
}

impl<T> Clone for StateCell<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T: Clone> StateCell<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Latest published value.
    pub fn snapshot(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Subscribe to future changes.
    pub fn subscribe(&self) -> StateStream<T> {
        self.tx.subscribe()
    }

    /// Replace the published value and notify observers.
    pub fn replace(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Mutate the published value in place and notify observers.
    pub fn update(&self, apply: impl FnOnce(&mut T)) {
        self.tx.send_modify(apply);
    }

    /// Mutate only when `apply` returns `true`; observers are notified only then.
    ///
    /// The check runs under the cell's lock, so it is atomic with respect to
    /// every other writer.
    pub fn update_if(&self, apply: impl FnOnce(&mut T) -> bool) -> bool {
        self.tx.send_if_modified(apply)
    }
}
