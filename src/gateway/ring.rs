use std::sync::atomic::{AtomicUsize, Ordering};

use chagall_query::ClientAdapter;

/// Fixed-size round-robin ring of adapter handles.
///
/// All slots share the same underlying raw client, so this is not a real
/// connection pool; it keeps the rotation seam in place so a genuine pool can
/// slot in without touching the dispatcher or batcher.
pub struct AdapterRing {
    slots: Vec<ClientAdapter>,
    cursor: AtomicUsize,
}

impl AdapterRing {
    pub fn new(adapter: ClientAdapter, size: usize) -> Self {
        let size = size.max(1);
        Self {
            slots: vec![adapter; size],
            cursor: AtomicUsize::new(0),
        }
    }

    /// Next adapter in rotation.
    pub fn next(&self) -> ClientAdapter {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.slots[idx % self.slots.len()].clone()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_wraps_around() {
        let ring = AdapterRing::new(ClientAdapter::wrap(None), 3);
        assert_eq!(ring.len(), 3);
        for _ in 0..10 {
            let _ = ring.next();
        }
        assert_eq!(ring.cursor.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn zero_size_is_clamped_to_one() {
        let ring = AdapterRing::new(ClientAdapter::wrap(None), 0);
        assert_eq!(ring.len(), 1);
        let _ = ring.next();
    }
}
