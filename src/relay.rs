//! Double-buffered hand-off between the capture producer and the render loop.
//!
//! The producer writes the slot that is not current and flips the current
//! index only after the write finished, so the consumer never sees a slot
//! that is still being written. While the consumer still reads the inactive
//! slot, the producer overwrites the current one in place instead; the newest
//! frame always wins. Neither side ever waits for the other.
use std::convert::Infallible;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};

/// Number of slots the producer rotates through.
pub const SLOT_COUNT: usize = 2;

struct Slot<T> {
    value: Option<T>,
    sequence: u64,
}

/// Outcome of a publish attempt.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum Publish {
    /// The frame is now the latest, with this sequence number.
    Published(u64),
    /// Both slots were busy, the frame was skipped. Only possible with more
    /// than one concurrent reader.
    Dropped,
}

/// Bounded, non-blocking frame relay with [`SLOT_COUNT`] reusable slots.
pub struct FrameRelay<T> {
    slots: [Mutex<Slot<T>>; SLOT_COUNT],
    current: AtomicUsize,
    sequence: AtomicU64,
    taken: AtomicU64,
}

impl<T> FrameRelay<T> {
    /// Creates an empty relay.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Mutex::new(Slot { value: None, sequence: 0 })),
            current: AtomicUsize::new(0),
            sequence: AtomicU64::new(0),
            taken: AtomicU64::new(0),
        }
    }

    /// Writes into a slot in place and publishes it once `write` returns
    /// `Ok`.
    ///
    /// The slot keeps whatever the producer left there last time, so GPU
    /// textures can be reused across frames. The inactive slot is preferred;
    /// when the consumer still holds it, the current slot is overwritten so
    /// the newest frame is never lost. `write` must leave the slot untouched
    /// when it fails, in which case nothing is published.
    pub fn publish_with<E>(&self, write: impl FnOnce(&mut Option<T>) -> Result<(), E>) -> Result<Publish, E> {
        let current = self.current.load(Ordering::Acquire);
        let inactive = (current + 1) % SLOT_COUNT;

        let (target, mut slot) = match self.slots[inactive].try_lock() {
            Some(slot) => (inactive, slot),
            None => match self.slots[current].try_lock() {
                Some(slot) => (current, slot),
                None => return Ok(Publish::Dropped),
            },
        };

        write(&mut slot.value)?;

        let sequence = self.sequence.load(Ordering::Relaxed) + 1;
        slot.sequence = sequence;
        drop(slot);

        self.current.store(target, Ordering::Release);
        self.sequence.store(sequence, Ordering::Release);

        Ok(Publish::Published(sequence))
    }

    /// Replaces the inactive slot with `value` and publishes it.
    pub fn publish(&self, value: T) -> Publish {
        match self.publish_with(|slot| {
            *slot = Some(value);
            Ok::<(), Infallible>(())
        }) {
            Ok(publish) => publish,
            Err(never) => match never {},
        }
    }

    /// Returns the newest frame if one was published since the last call,
    /// without waiting for the producer.
    pub fn take_latest(&self) -> Option<Published<'_, T>> {
        if self.sequence.load(Ordering::Acquire) == self.taken.load(Ordering::Relaxed) {
            return None;
        }

        let frame = self.latest()?;
        // Older than the last take when the current slot is being rewritten.
        if frame.sequence() <= self.taken.load(Ordering::Relaxed) {
            return None;
        }
        self.taken.store(frame.sequence(), Ordering::Relaxed);

        Some(frame)
    }

    /// Returns the newest complete frame, whether or not it was taken before.
    ///
    /// Never waits: while the producer rewrites the current slot the previous
    /// complete frame is returned instead.
    pub fn latest(&self) -> Option<Published<'_, T>> {
        let current = self.current.load(Ordering::Acquire);

        (0..SLOT_COUNT)
            .map(|offset| (current + SLOT_COUNT - offset) % SLOT_COUNT)
            .filter_map(|index| self.slots[index].try_lock())
            .find(|guard| guard.value.is_some())
            .map(|guard| Published { guard })
    }

    /// Gets the sequence number of the newest published frame, `0` when none.
    #[must_use]
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Returns `true` once any frame was published.
    #[must_use]
    #[inline]
    pub fn published(&self) -> bool {
        self.sequence() != 0
    }
}

impl<T> Default for FrameRelay<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Read access to a published frame. The producer cannot overwrite the slot
/// while this is alive.
pub struct Published<'a, T> {
    guard: MutexGuard<'a, Slot<T>>,
}

impl<T> Published<'_, T> {
    /// Gets the acquisition order of this frame.
    #[must_use]
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.guard.sequence
    }
}

impl<T> Deref for Published<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.guard.value {
            Some(value) => value,
            // `Published` is only built for occupied slots and the producer
            // never clears a slot.
            None => unreachable!("published slot is empty"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::thread;

    use super::*;

    #[test]
    fn empty_relay_has_nothing() {
        let relay = FrameRelay::<u32>::new();
        assert!(relay.take_latest().is_none());
        assert!(relay.latest().is_none());
        assert!(!relay.published());
    }

    #[test]
    fn take_latest_sees_each_frame_once() {
        let relay = FrameRelay::new();
        assert_eq!(relay.publish("a"), Publish::Published(1));

        let frame = relay.take_latest().unwrap();
        assert_eq!((*frame, frame.sequence()), ("a", 1));
        drop(frame);

        assert!(relay.take_latest().is_none(), "nothing new was published");
        // The last frame stays available for re-presentation.
        assert_eq!(*relay.latest().unwrap(), "a");
        assert_eq!(*relay.latest().unwrap(), "a");
    }

    #[test]
    fn newest_frame_wins() {
        let relay = FrameRelay::new();
        for value in 1..=5 {
            relay.publish(value);
        }

        let frame = relay.take_latest().unwrap();
        assert_eq!((*frame, frame.sequence()), (5, 5));
    }

    #[test]
    fn newest_frame_wins_while_consumer_reads() {
        let relay = FrameRelay::new();
        relay.publish(1);

        let held = relay.latest().unwrap();
        assert_eq!(relay.publish(2), Publish::Published(2));
        // The inactive slot is still being read, so the current one is rewritten.
        assert_eq!(relay.publish(3), Publish::Published(3));
        assert_eq!(*held, 1);
        drop(held);

        let frame = relay.take_latest().unwrap();
        assert_eq!((*frame, frame.sequence()), (3, 3));
    }

    #[test]
    fn consumer_reads_previous_frame_during_rewrite() {
        let relay = FrameRelay::new();
        relay.publish(1);

        let mut held = Some(relay.latest().unwrap());
        relay.publish(2);
        assert_eq!(*relay.take_latest().unwrap(), 2);

        let result = relay.publish_with(|slot| {
            drop(held.take());
            // The current slot is being written, the previous one is served.
            let previous = relay.latest().unwrap();
            assert_eq!(*previous, 1);
            drop(previous);
            assert!(relay.take_latest().is_none(), "an older frame is never reported as new");

            *slot = Some(3);
            Ok::<(), ()>(())
        });

        assert_eq!(result, Ok(Publish::Published(3)));
        assert_eq!(*relay.latest().unwrap(), 3);
    }

    #[test]
    fn failed_write_keeps_current_frame() {
        let relay = FrameRelay::new();
        relay.publish(10);

        let result = relay.publish_with(|_| Err("copy failed"));
        assert_eq!(result, Err("copy failed"));
        assert_eq!(relay.sequence(), 1);
        assert_eq!(*relay.latest().unwrap(), 10);
    }

    #[test]
    fn slots_are_reused_in_place() {
        let relay = FrameRelay::new();
        let mut allocations = 0;

        for frame in 1..=6u32 {
            relay
                .publish_with(|slot: &mut Option<Vec<u32>>| {
                    let buffer = slot.get_or_insert_with(|| {
                        allocations += 1;
                        vec![0; 4]
                    });
                    buffer.fill(frame);
                    Ok::<(), ()>(())
                })
                .unwrap();
        }

        assert_eq!(allocations, SLOT_COUNT);
        assert_eq!(*relay.latest().unwrap(), vec![6; 4]);
    }

    #[test]
    fn consumer_never_observes_torn_frames() {
        const PIXELS: usize = 4096;
        const FRAMES: u64 = 2000;

        let relay = FrameRelay::<Vec<u64>>::new();
        let done = AtomicBool::new(false);

        thread::scope(|scope| {
            scope.spawn(|| {
                for frame in 1..=FRAMES {
                    let _ = relay.publish_with(|slot| {
                        let pixels = slot.get_or_insert_with(|| vec![0; PIXELS]);
                        for (i, pixel) in pixels.iter_mut().enumerate() {
                            *pixel = frame;
                            if i == PIXELS / 2 {
                                thread::yield_now();
                            }
                        }
                        Ok::<(), ()>(())
                    });
                }
                done.store(true, Ordering::Release);
            });

            let mut last_sequence = 0;
            let mut last_value = 0;
            let mut observed = 0;
            loop {
                let finished = done.load(Ordering::Acquire);
                match relay.take_latest() {
                    Some(frame) => {
                        let first = frame[0];
                        assert!(frame.iter().all(|pixel| *pixel == first), "torn frame");
                        assert!(frame.sequence() > last_sequence, "sequence went backwards");
                        assert!(first > last_value, "older frame returned after a newer one");
                        last_sequence = frame.sequence();
                        last_value = first;
                        observed += 1;
                    }
                    None if finished => break,
                    None => thread::yield_now(),
                }
            }

            assert!(observed > 0);
            assert_eq!(last_sequence, relay.sequence(), "final frame must be observed");
        });
    }
}
