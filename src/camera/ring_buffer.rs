use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::frame::Frame;

/// Bounded thread-safe queue of timestamped frames for continuous mode.
///
/// `append` is O(1) and drops the oldest frame on overflow. Safe under
/// concurrent producers (at most one in practice) and multiple consumers;
/// the lock is never held across I/O.
pub struct RingBuffer {
    inner: Mutex<VecDeque<Arc<Frame>>>,
    max_size: usize,
}

impl RingBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(max_size.min(4096))),
            max_size: max_size.max(1),
        }
    }

    /// Capacity computed from `buffer_duration (s) * buffer_fps`, per §4.2.
    pub fn from_duration_and_fps(buffer_duration_secs: u32, buffer_fps: u32) -> Self {
        let size = (buffer_duration_secs as usize * buffer_fps as usize).max(1);
        Self::new(size)
    }

    pub fn append(&self, frame: Frame) {
        let mut guard = self.inner.lock();
        if guard.len() >= self.max_size {
            guard.pop_front();
        }
        guard.push_back(Arc::new(frame));
    }

    /// Shallow copy of the current contents, newest last.
    pub fn snapshot(&self) -> Vec<Arc<Frame>> {
        self.inner.lock().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.inner.lock().back().cloned()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(ts: i64) -> Frame {
        Frame::new(vec![0u8; 3], 1, 1, ts)
    }

    #[test]
    fn drops_oldest_on_overflow() {
        let rb = RingBuffer::new(3);
        for i in 0..5 {
            rb.append(f(i));
        }
        let snap = rb.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap.first().unwrap().timestamp_us, 2);
        assert_eq!(snap.last().unwrap().timestamp_us, 4);
    }

    #[test]
    fn clear_empties_atomically() {
        let rb = RingBuffer::new(10);
        rb.append(f(1));
        rb.append(f(2));
        rb.clear();
        assert!(rb.is_empty());
    }

    #[test]
    fn capacity_from_duration_and_fps() {
        let rb = RingBuffer::from_duration_and_fps(5, 60);
        for i in 0..400 {
            rb.append(f(i));
        }
        assert_eq!(rb.len(), 300);
    }
}
