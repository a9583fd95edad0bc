// Deferred destruction of segments still referenced by a remote process
use super::segment::ShmSegment;
use parking_lot::Mutex;
use std::sync::atomic::Ordering;

/// A data/flag pair whose owner is gone but whose OS objects must outlive
/// the remote borrower. Holding the segments by value keeps the flag mapping
/// alive so a sweep can still read it.
struct PendingRelease {
    data: ShmSegment,
    flag: ShmSegment,
}

/// Process-wide registry of buffers whose ownership was transferred out but
/// whose backing segments this process must still eventually destroy.
///
/// The registry is an explicitly owned object rather than an ambient
/// singleton: create one per process (or per test) and hand it to
/// [`SharedBuffer::allocate`](super::buffer::SharedBuffer::allocate) through
/// an `Arc`.
///
/// A consumer that never signals completion stalls its entry forever; the
/// collector reports such entries when it is dropped instead of silently
/// leaking them.
#[derive(Default)]
pub struct ReleaseCollector {
    pending: Mutex<Vec<PendingRelease>>,
}

impl ReleaseCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment pair to the pending list and immediately try to
    /// release whatever has become safe.
    pub fn enqueue(&self, data: ShmSegment, flag: ShmSegment) {
        log::debug!(
            "deferring release of segment '{}' until the borrower is done",
            data.name()
        );
        self.pending.lock().push(PendingRelease { data, flag });
        self.sweep();
    }

    /// One pass over the pending list: destroy every entry whose flag reads
    /// "safe to release" and keep the rest for a future sweep.
    ///
    /// Returns the number of entries released. Idempotent; an empty list is
    /// a no-op.
    pub fn sweep(&self) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|entry| {
            if entry.flag.flag_cell().load(Ordering::Acquire) != 0 {
                log::debug!("releasing segment '{}'", entry.data.name());
                entry.data.unlink();
                entry.flag.unlink();
                false
            } else {
                true
            }
        });
        before - pending.len()
    }

    /// Number of segment pairs still waiting for the borrower to finish.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Drop for ReleaseCollector {
    fn drop(&mut self) {
        self.sweep();
        let pending = self.pending.lock();
        for entry in pending.iter() {
            // Known leak path: the borrower never signaled completion
            // (e.g. the consumer process crashed). The OS objects stay
            // behind so a still-live consumer keeps working.
            log::warn!(
                "shutting down with segment '{}' still borrowed; its OS objects are leaked",
                entry.data.name()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::segment::SegmentPair;

    fn pair(tag: &str) -> (String, ShmSegment, ShmSegment) {
        let id = format!("gctest_{}_{}", tag, std::process::id());
        let (data, flag) = SegmentPair::create(&id, 8, 1).unwrap();
        (id, data, flag)
    }

    #[test]
    fn test_enqueue_with_flag_set_releases_immediately() {
        let collector = ReleaseCollector::new();
        let (_id, data, flag) = pair("immediate");
        // Flag starts true, so the enqueue-triggered sweep fires at once.
        collector.enqueue(data, flag);
        assert_eq!(collector.pending_count(), 0);
    }

    #[test]
    fn test_sweep_waits_for_the_flag() {
        let collector = ReleaseCollector::new();
        let (id, data, flag) = pair("waits");
        flag.flag_cell().store(0, Ordering::Release);
        collector.enqueue(data, flag);
        assert_eq!(collector.pending_count(), 1);
        assert_eq!(collector.sweep(), 0);

        // Simulate the borrower signaling completion through its own mapping.
        let borrower_flag = ShmSegment::open(&SegmentPair::flag_name(&id), 1).unwrap();
        borrower_flag.flag_cell().store(1, Ordering::Release);
        drop(borrower_flag);

        assert_eq!(collector.sweep(), 1);
        assert_eq!(collector.pending_count(), 0);
        // A second sweep is a no-op.
        assert_eq!(collector.sweep(), 0);
    }
}
