//! Offline retention buffer.
//!
//! A fixed-capacity circular queue that owns its storage inline. One slot is
//! always left unused so `head == tail` means empty and
//! `head == (tail + 1) % N` means full; `N - 1` records are usable.
//!
//! Writes never fail: committing into a full buffer evicts the oldest record
//! first. Reads copy the record out, so nothing handed to the drainer can be
//! overwritten by a later write.
//!
//! Every mutating call takes `&mut self`, which makes the buffer single-owner.
//! A producer and a drainer on separate tasks must share it behind a lock;
//! the lock supplies the acquire/release ordering the indices need. Eviction
//! moves `head` from the producer side, so there is no lock-free split.

use crate::measurement::MeasurementRecord;

#[cfg(not(feature = "low-memory"))]
pub const OFFLINE_BUFFER_SIZE: usize = 600;
#[cfg(feature = "low-memory")]
pub const OFFLINE_BUFFER_SIZE: usize = 120;

pub type OfflineBuffer = RetentionBuffer<MeasurementRecord, OFFLINE_BUFFER_SIZE>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Empty,
    PartiallyFull,
    Full,
}

#[derive(Debug)]
pub struct RetentionBuffer<T, const N: usize> {
    slots: [T; N],
    /// Oldest committed record.
    head: usize,
    /// Next write position, never committed.
    tail: usize,
    dropped: u64,
}

impl<T: Copy, const N: usize> RetentionBuffer<T, N> {
    const VALID_CAPACITY: () = assert!(N >= 2, "retention buffer needs at least two slots");

    /// Creates an empty buffer with every slot set to `fill`.
    pub const fn new(fill: T) -> Self {
        let () = Self::VALID_CAPACITY;
        Self {
            slots: [fill; N],
            head: 0,
            tail: 0,
            dropped: 0,
        }
    }

    const fn advance(index: usize) -> usize {
        (index + 1) % N
    }

    /// Returns the uncommitted slot at `tail`.
    ///
    /// The slot still holds whatever was last written there; the caller is
    /// expected to overwrite every field. Repeated calls without a
    /// [`commit`](Self::commit) return the same slot.
    pub fn acquire_write_slot(&mut self) -> &mut T {
        &mut self.slots[self.tail]
    }

    /// Appends the slot returned by the last
    /// [`acquire_write_slot`](Self::acquire_write_slot).
    ///
    /// Returns `true` if the oldest record had to be evicted to make room.
    pub fn commit(&mut self) -> bool {
        let evicted = self.is_full();
        if evicted {
            self.head = Self::advance(self.head);
            self.dropped = self.dropped.saturating_add(1);
        }
        self.tail = Self::advance(self.tail);
        debug_assert!(self.head < N && self.tail < N);
        evicted
    }

    /// Removes and returns a copy of the oldest record, or `None` when empty.
    pub fn dequeue_oldest(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let record = self.slots[self.head];
        self.head = Self::advance(self.head);
        debug_assert!(self.head < N);
        Some(record)
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        self.head == Self::advance(self.tail)
    }

    /// Number of committed records.
    pub fn len(&self) -> usize {
        if self.tail >= self.head {
            self.tail - self.head
        } else {
            N - (self.head - self.tail)
        }
    }

    /// Usable capacity, one less than the slot count.
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Total records evicted since start.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn state(&self) -> BufferState {
        if self.is_empty() {
            BufferState::Empty
        } else if self.is_full() {
            BufferState::Full
        } else {
            BufferState::PartiallyFull
        }
    }
}

impl<const N: usize> Default for RetentionBuffer<MeasurementRecord, N> {
    fn default() -> Self {
        Self::new(MeasurementRecord::EMPTY)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use proptest::prelude::*;

    use super::*;
    use crate::measurement::Location;

    fn push<const N: usize>(
        buffer: &mut RetentionBuffer<MeasurementRecord, N>,
        timestamp: u64,
    ) -> bool {
        buffer
            .acquire_write_slot()
            .reset(Location::DEFAULT, timestamp);
        buffer.commit()
    }

    #[test]
    fn test_new_buffer_is_empty() {
        let mut buffer = RetentionBuffer::<MeasurementRecord, 4>::default();

        assert!(buffer.is_empty());
        assert!(!buffer.is_full());
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.capacity(), 3);
        assert_eq!(buffer.state(), BufferState::Empty);
        assert!(buffer.dequeue_oldest().is_none());
    }

    #[test]
    fn test_overflow_keeps_newest_three() {
        let mut buffer = RetentionBuffer::<MeasurementRecord, 4>::default();

        let evictions: Vec<bool> = (1..=5).map(|ts| push(&mut buffer, ts)).collect();

        assert_eq!(evictions, [false, false, false, true, true]);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.dropped(), 2);
        assert_eq!(buffer.dequeue_oldest().map(|r| r.timestamp), Some(3));
        assert_eq!(buffer.dequeue_oldest().map(|r| r.timestamp), Some(4));
        assert_eq!(buffer.dequeue_oldest().map(|r| r.timestamp), Some(5));
        assert!(buffer.dequeue_oldest().is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_state_transitions() {
        let mut buffer = RetentionBuffer::<u32, 3>::new(0);
        assert_eq!(buffer.state(), BufferState::Empty);

        *buffer.acquire_write_slot() = 1;
        buffer.commit();
        assert_eq!(buffer.state(), BufferState::PartiallyFull);

        *buffer.acquire_write_slot() = 2;
        buffer.commit();
        assert_eq!(buffer.state(), BufferState::Full);

        *buffer.acquire_write_slot() = 3;
        assert!(buffer.commit());
        assert_eq!(buffer.state(), BufferState::Full);

        buffer.dequeue_oldest();
        assert_eq!(buffer.state(), BufferState::PartiallyFull);
        buffer.dequeue_oldest();
        assert_eq!(buffer.state(), BufferState::Empty);
    }

    #[test]
    fn test_acquire_without_commit_returns_same_slot() {
        let mut buffer = RetentionBuffer::<u32, 4>::new(0);

        *buffer.acquire_write_slot() = 7;
        assert_eq!(*buffer.acquire_write_slot(), 7);
        *buffer.acquire_write_slot() += 1;

        assert!(buffer.is_empty());
        buffer.commit();
        assert_eq!(buffer.dequeue_oldest(), Some(8));
    }

    #[test]
    fn test_round_trip_preserves_nan_fields() {
        let mut buffer = RetentionBuffer::<MeasurementRecord, 4>::default();
        let slot = buffer.acquire_write_slot();
        slot.reset(Location::DEFAULT, 1_700_000_000_000);
        slot.temperature = 22.75;
        slot.pressure = 1001.5;
        buffer.commit();

        let record = buffer.dequeue_oldest().unwrap();

        assert_eq!(record.temperature, 22.75);
        assert_eq!(record.pressure, 1001.5);
        assert!(record.humidity.is_nan());
        assert!(record.co2.is_nan());
        assert!(record.tvoc.is_nan());
        assert_eq!(record.location(), Location::DEFAULT);
        assert_eq!(record.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_dequeued_copy_survives_slot_reuse() {
        let mut buffer = RetentionBuffer::<u32, 2>::new(0);
        *buffer.acquire_write_slot() = 1;
        buffer.commit();

        let first = buffer.dequeue_oldest();
        for value in 2..6 {
            *buffer.acquire_write_slot() = value;
            buffer.commit();
        }

        assert_eq!(first, Some(1));
        assert_eq!(buffer.dequeue_oldest(), Some(5));
    }

    #[test]
    fn test_len_across_wrap_around() {
        let mut buffer = RetentionBuffer::<u32, 5>::new(0);
        for value in 0..3 {
            *buffer.acquire_write_slot() = value;
            buffer.commit();
        }
        buffer.dequeue_oldest();
        buffer.dequeue_oldest();
        // tail wraps past the end while head stays at 2
        for value in 3..6 {
            *buffer.acquire_write_slot() = value;
            buffer.commit();
        }

        assert!(buffer.tail < buffer.head);
        assert_eq!(buffer.len(), 4);
        assert!(buffer.is_full());
    }

    #[test]
    fn test_static_storage() {
        static BUFFER: RetentionBuffer<MeasurementRecord, 8> =
            RetentionBuffer::new(MeasurementRecord::EMPTY);

        assert!(BUFFER.is_empty());
        assert_eq!(BUFFER.capacity(), 7);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Commit(u32),
        Dequeue,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![any::<u32>().prop_map(Op::Commit), Just(Op::Dequeue)]
    }

    proptest! {
        #[test]
        fn test_behaves_like_bounded_queue(ops in proptest::collection::vec(op(), 0..256)) {
            let mut buffer = RetentionBuffer::<u32, 6>::new(0);
            let mut model = VecDeque::new();
            let mut dropped = 0u64;

            for op in ops {
                match op {
                    Op::Commit(value) => {
                        *buffer.acquire_write_slot() = value;
                        let expect_evict = model.len() == buffer.capacity();
                        if expect_evict {
                            model.pop_front();
                            dropped += 1;
                        }
                        model.push_back(value);
                        prop_assert_eq!(buffer.commit(), expect_evict);
                    }
                    Op::Dequeue => {
                        prop_assert_eq!(buffer.dequeue_oldest(), model.pop_front());
                    }
                }

                prop_assert_eq!(buffer.len(), model.len());
                prop_assert_eq!(buffer.is_empty(), buffer.len() == 0);
                prop_assert_eq!(buffer.is_full(), buffer.len() == buffer.capacity());
                prop_assert_eq!(buffer.dropped(), dropped);
            }
        }

        #[test]
        fn test_fifo_below_capacity(values in proptest::collection::vec(any::<u32>(), 0..15)) {
            let mut buffer = RetentionBuffer::<u32, 16>::new(0);
            for &value in &values {
                *buffer.acquire_write_slot() = value;
                prop_assert!(!buffer.commit());
            }

            let drained: Vec<u32> = std::iter::from_fn(|| buffer.dequeue_oldest()).collect();
            prop_assert_eq!(drained, values);
        }

        #[test]
        fn test_overflow_keeps_most_recent(k in 8usize..64) {
            const N: usize = 8;
            let mut buffer = RetentionBuffer::<usize, N>::new(0);
            for i in 1..=k {
                *buffer.acquire_write_slot() = i;
                buffer.commit();
            }

            prop_assert_eq!(buffer.len(), N - 1);
            prop_assert_eq!(buffer.dequeue_oldest(), Some(k - N + 2));
        }
    }
}
