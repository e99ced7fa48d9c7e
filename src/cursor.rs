use std::sync::atomic::{AtomicU32, Ordering};

/// Shared claim counter over an inclusive port range.
///
/// `claim` is a single `fetch_add`, so concurrent callers always observe
/// distinct values and no port in range is skipped. The counter is wider
/// than `u16` so overshooting `limit` (one extra claim per worker) cannot
/// wrap.
#[derive(Debug)]
pub struct PortCursor {
    next: AtomicU32,
    limit: u32,
}

impl PortCursor {
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            next: AtomicU32::new(u32::from(start)),
            limit: u32::from(end),
        }
    }

    /// Take the next unclaimed port, or `None` once the range is exhausted.
    pub fn claim(&self) -> Option<u16> {
        // Cheap exit for workers that keep polling after exhaustion.
        if self.next.load(Ordering::Relaxed) > self.limit {
            return None;
        }
        let port = self.next.fetch_add(1, Ordering::Relaxed);
        if port > self.limit {
            return None;
        }
        Some(port as u16)
    }
}
