//! Latest-value publish/subscribe cells for external observers.
//!
//! Publishing never fails or blocks, subscribers are optional, and a late
//! subscriber sees the current value immediately.

use tokio::sync::watch;

/// A single observable value.
#[derive(Debug)]
pub struct Observable<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone> Observable<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Replace the value and wake subscribers.
    pub fn publish(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// New receiver; `borrow()` on it yields the current value right away.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Modify in place and notify.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.tx.send_modify(f);
    }
}

impl<T: Clone + Default> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
