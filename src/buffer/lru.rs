use std::sync::Mutex;

use hashlink::LinkedHashSet;

use super::{FrameId, Replacer};

/// LRUReplacer implements the least-recently-used replacement policy over
/// unpinned frames. A frame's recency is the time of its last unpin: the
/// victim is always the frame whose unpin is the oldest. Pinning a frame
/// removes it from the set, so a pin/unpin cycle resets its recency.
pub struct LRUReplacer {
    /// Evictable frames in unpin order. The front is the least recently
    /// unpinned frame, i.e. the next victim.
    frames: LinkedHashSet<FrameId>,
    capacity: usize,
}

impl LRUReplacer {
    pub fn new(capacity: usize) -> Self {
        LRUReplacer { frames: LinkedHashSet::with_capacity(capacity), capacity }
    }

    fn victim(&mut self) -> Option<FrameId> {
        self.frames.pop_front()
    }

    fn pin(&mut self, frame_id: FrameId) {
        self.frames.remove(&frame_id);
    }

    fn unpin(&mut self, frame_id: FrameId) {
        // already evictable, or the set is full. The capacity branch is
        // unreachable when capacity equals the pool size, since a frame
        // cannot be both evictable and pinned or free.
        if self.frames.contains(&frame_id) || self.frames.len() == self.capacity {
            return;
        }
        self.frames.insert(frame_id);
    }

    fn size(&self) -> usize {
        self.frames.len()
    }
}

/// SyncLRUReplacer is the thread-safe version of the LRU policy,
/// basically all the heavy lifting are happens in the LRUReplacer.
pub struct SyncLRUReplacer {
    inner: Mutex<LRUReplacer>,
}

impl SyncLRUReplacer {
    pub fn new(capacity: usize) -> Self {
        SyncLRUReplacer { inner: Mutex::new(LRUReplacer::new(capacity)) }
    }
}

impl Replacer for SyncLRUReplacer {
    fn victim(&self) -> Option<FrameId> {
        let mut guard = self.inner.lock().unwrap();
        guard.victim()
    }

    fn pin(&self, frame_id: FrameId) {
        let mut guard = self.inner.lock().unwrap();
        guard.pin(frame_id)
    }

    fn unpin(&self, frame_id: FrameId) {
        let mut guard = self.inner.lock().unwrap();
        guard.unpin(frame_id)
    }

    fn size(&self) -> usize {
        let guard = self.inner.lock().unwrap();
        guard.size()
    }
}
