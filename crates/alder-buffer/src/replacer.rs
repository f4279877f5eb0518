//! Page replacement policy for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Clock (second-chance) replacement.
///
/// Reference bits are recorded lock-free on access; eviction sweeps the
/// clock hand under a mutex. Whether a frame is a legal victim at all is
/// the caller's call (it knows the pin counts), so `evict` takes a
/// predicate instead of tracking an evictable set of its own.
pub struct ClockReplacer {
    /// Number of frames.
    num_frames: usize,
    /// Reference bits for each frame.
    reference_bits: Vec<AtomicBool>,
    /// Current clock hand position.
    clock_hand: Mutex<usize>,
}

impl ClockReplacer {
    /// Creates a new clock replacer with the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        let reference_bits: Vec<AtomicBool> =
            (0..num_frames).map(|_| AtomicBool::new(false)).collect();

        Self {
            num_frames,
            reference_bits,
            clock_hand: Mutex::new(0),
        }
    }

    /// Returns the total capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.num_frames
    }

    /// Records that the given frame was accessed (sets its reference bit).
    #[inline]
    pub fn record_access(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.reference_bits[idx].store(true, Ordering::Relaxed);
        }
    }

    /// Removes a frame from consideration (clears its reference bit).
    #[inline]
    pub fn remove(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.reference_bits[idx].store(false, Ordering::Relaxed);
        }
    }

    /// Selects a victim frame for eviction.
    ///
    /// `can_evict` reports whether a frame is currently unpinned. Frames
    /// with their reference bit set get a second chance: the bit is
    /// cleared and the hand moves on, so two full rotations always find a
    /// victim if one exists.
    pub fn evict<F>(&self, can_evict: F) -> Option<FrameId>
    where
        F: Fn(FrameId) -> bool,
    {
        let mut hand = self.clock_hand.lock();

        for _ in 0..(2 * self.num_frames) {
            let idx = *hand;
            *hand = (idx + 1) % self.num_frames;

            let frame_id = FrameId(idx as u32);
            if !can_evict(frame_id) {
                continue;
            }

            if self.reference_bits[idx].swap(false, Ordering::Relaxed) {
                // Second chance
                continue;
            }

            return Some(frame_id);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_replacer_new() {
        let replacer = ClockReplacer::new(10);
        assert_eq!(replacer.capacity(), 10);
    }

    #[test]
    fn test_evict_none_evictable() {
        let replacer = ClockReplacer::new(10);
        assert!(replacer.evict(|_| false).is_none());
    }

    #[test]
    fn test_evict_single() {
        let replacer = ClockReplacer::new(10);

        let victim = replacer.evict(|fid| fid == FrameId(5));
        assert_eq!(victim, Some(FrameId(5)));
    }

    #[test]
    fn test_evict_second_chance() {
        let replacer = ClockReplacer::new(3);

        // Frames 0 and 1 were recently accessed; frame 2 was not.
        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));

        let victim = replacer.evict(|_| true);
        assert_eq!(victim, Some(FrameId(2)));
    }

    #[test]
    fn test_evict_all_referenced() {
        let replacer = ClockReplacer::new(3);

        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        replacer.record_access(FrameId(2));

        // All bits get cleared on the first rotation; the second finds a victim.
        let victim = replacer.evict(|_| true);
        assert!(victim.is_some());
    }

    #[test]
    fn test_remove_clears_reference_bit() {
        let replacer = ClockReplacer::new(3);

        replacer.record_access(FrameId(0));
        replacer.remove(FrameId(0));

        // With its bit cleared, frame 0 is the first victim again.
        let victim = replacer.evict(|fid| fid == FrameId(0));
        assert_eq!(victim, Some(FrameId(0)));
    }

    #[test]
    fn test_out_of_bounds_ignored() {
        let replacer = ClockReplacer::new(5);

        // These should not panic
        replacer.record_access(FrameId(100));
        replacer.remove(FrameId(100));
    }

    #[test]
    fn test_evict_skips_pinned() {
        let replacer = ClockReplacer::new(4);

        // Only frame 3 is unpinned.
        let victim = replacer.evict(|fid| fid.0 == 3);
        assert_eq!(victim, Some(FrameId(3)));
    }
}
