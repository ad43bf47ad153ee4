//! Swap-on-write snapshot cell for hot-reloadable configuration.
//!
//! Readers take an `Arc` snapshot and keep matching against it even if a reload
//! lands mid-evaluation. Writers replace the whole value; nothing is patched in place.

use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug)]
pub struct SwapCell<T> {
    inner: RwLock<Arc<T>>,
}

impl<T> SwapCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(Arc::new(value)),
        }
    }

    /// Current snapshot. Always a fully-formed value, old or new.
    pub fn load(&self) -> Arc<T> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Replace the value and return the previous snapshot.
    pub fn store(&self, value: T) -> Arc<T> {
        let next = Arc::new(value);
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, next)
    }
}

impl<T: Default> Default for SwapCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn old_snapshot_survives_store() {
        let cell = SwapCell::new(vec![1, 2]);
        let before = cell.load();
        let previous = cell.store(vec![3]);
        assert_eq!(*before, vec![1, 2]);
        assert_eq!(*previous, vec![1, 2]);
        assert_eq!(*cell.load(), vec![3]);
    }
}
