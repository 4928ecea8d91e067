//! Multi-producer, single-consumer circular queue.
//!
//! # Overview
//! Built on [`CircularQueue`]: same storage, same read index, same consumer side. The
//! write index becomes the *committed* index, and a second *reserved* index lets several
//! producers (normal code and interrupt handlers) claim slots concurrently.
//! The borrowing views (`peek`, `iter`, `for_each`) need `T: Sync`, as on the base queue.
//!
//! # Push protocol
//! 1. Load the reserved index; fail with [`Full`] if advancing it would hit the read index.
//! 2. Advance the reserved index with a compare-and-exchange loop. The slot is now owned.
//! 3. Write the value into the owned slot.
//! 4. Spin until the committed index equals the slot's position, then advance it by one.
//!
//! Step 4 keeps commits in reservation order even when producers finish writing out of
//! order. The consumer only reads up to the committed index, so it never sees a slot whose
//! write is still in progress.
//!
//! # Interrupts
//! On a single core the spin in step 4 never ends if an interrupt handler pushes while it
//! has preempted another producer between steps 2 and 4: the handler waits for a commit
//! that can only happen after it returns. [`MpQueue::push`] therefore runs the protocol
//! inside an [`InterruptGuard`], which makes the window atomic with respect to same-core
//! interrupts. [`MpQueue::push_unguarded`] skips the guard and is only safe when no
//! producer can preempt another one on the same core.
//!
//! ```
//! use ph_dispatch::MpQueue;
//!
//! let mut queue = MpQueue::<u8, 4>::new();
//! let (producer, mut consumer) = queue.split();
//!
//! let isr = producer;
//! isr.push(1).unwrap();
//! producer.push(2).unwrap();
//! assert_eq!(consumer.pop(), Some(1));
//! assert_eq!(consumer.pop(), Some(2));
//! ```

use core::hint;

use crate::critical::{CriticalSectionControl, InterruptControl, InterruptGuard};
use crate::error::Full;
use crate::fmt::trace;
use crate::queue::{CircularQueue, Iter, visit};
use crate::sync::{AtomicUsize, Ordering};

/// Circular queue of capacity `N` accepting concurrent producers.
pub struct MpQueue<T, const N: usize, I = CriticalSectionControl> {
    ring: CircularQueue<T, N>,
    reserved: AtomicUsize,
    control: I,
}

impl<T, const N: usize> MpQueue<T, N, CriticalSectionControl> {
    /// An empty queue guarded by the `critical-section` implementation.
    pub const fn new() -> Self {
        Self::with_control(CriticalSectionControl)
    }
}

impl<T, const N: usize, I: InterruptControl> MpQueue<T, N, I> {
    /// An empty queue guarded by `control`.
    pub const fn with_control(control: I) -> Self {
        Self {
            ring: CircularQueue::new(),
            reserved: AtomicUsize::new(0),
            control,
        }
    }

    /// The interrupt control guarding pushes.
    #[inline]
    pub fn control(&self) -> &I {
        &self.control
    }

    /// Maximum number of queued elements.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of committed elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Whether no committed element is waiting.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Whether the next reservation would fail.
    #[inline]
    pub fn is_full(&self) -> bool {
        let reserved = self.reserved.load(Ordering::Relaxed);
        CircularQueue::<T, N>::advance(reserved) == self.ring.read.load(Ordering::Acquire)
    }

    /// Enqueue `value` with interrupts masked for the reserve-write-publish window.
    ///
    /// Safe from any context on the core, including interrupt handlers.
    pub fn push(&self, value: T) -> Result<(), Full<T>> {
        InterruptGuard::with(&self.control, || self.push_unguarded(value))
    }

    /// Enqueue `value` without masking interrupts.
    ///
    /// Lock-free and FIFO across producers. Callers must make sure a producer never
    /// preempts another producer of this queue on the same core between reservation and
    /// publication; otherwise the preempting producer spins forever.
    pub fn push_unguarded(&self, value: T) -> Result<(), Full<T>> {
        let mut pos = self.reserved.load(Ordering::Relaxed);
        let next = loop {
            let next = CircularQueue::<T, N>::advance(pos);
            if next == self.ring.read.load(Ordering::Acquire) {
                trace!("mp queue full, capacity {}", N);
                return Err(Full(value));
            }
            match self.reserved.compare_exchange_weak(
                pos,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break next,
                Err(current) => pos = current,
            }
        };

        // SAFETY: the reservation above made this producer the only writer of `pos`, and
        // the full check proved the consumer is done with it.
        unsafe { (*self.ring.slot(pos).get()).write(value) };

        // Publish in reservation order. The successful exchange continues the release
        // sequence of earlier producers, so the consumer sees their slots too.
        while self
            .ring
            .write
            .compare_exchange_weak(pos, next, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }
        Ok(())
    }

    /// Split into a copyable producer handle and the unique consumer.
    pub fn split(&mut self) -> (MpProducer<'_, T, N, I>, MpConsumer<'_, T, N, I>) {
        (MpProducer { queue: &*self }, MpConsumer { queue: &*self })
    }

    /// Producer handle; pushes only need a shared borrow.
    #[inline]
    pub fn producer(&self) -> MpProducer<'_, T, N, I> {
        MpProducer { queue: self }
    }

    /// Dequeue the oldest committed element.
    pub fn pop(&mut self) -> Option<T> {
        self.ring.pop()
    }

    pub fn peek(&self) -> Option<&T>
    where
        T: Sync,
    {
        self.ring.peek()
    }

    /// Front-to-back view of the committed elements.
    pub fn iter(&self) -> Iter<'_, T, N>
    where
        T: Sync,
    {
        self.ring.iter()
    }

    /// See [`CircularQueue::for_each`].
    pub fn for_each(&self, visitor: impl FnMut(&T) -> bool) -> usize
    where
        T: Sync,
    {
        self.ring.for_each(visitor)
    }

    pub fn pop_n(&mut self, out: &mut [T]) -> usize {
        self.ring.pop_n(out)
    }

    /// Drop every committed element.
    pub fn flush(&mut self) {
        self.ring.flush();
    }
}

impl<T, const N: usize, I: InterruptControl + Default> Default for MpQueue<T, N, I> {
    fn default() -> Self {
        Self::with_control(I::default())
    }
}

/// Shared producer handle for an [`MpQueue`].
pub struct MpProducer<'q, T, const N: usize, I = CriticalSectionControl> {
    queue: &'q MpQueue<T, N, I>,
}

impl<T, const N: usize, I> Clone for MpProducer<'_, T, N, I> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, const N: usize, I> Copy for MpProducer<'_, T, N, I> {}

impl<T, const N: usize, I: InterruptControl> MpProducer<'_, T, N, I> {
    /// See [`MpQueue::push`].
    #[inline]
    pub fn push(&self, value: T) -> Result<(), Full<T>> {
        self.queue.push(value)
    }

    /// See [`MpQueue::push_unguarded`].
    #[inline]
    pub fn push_unguarded(&self, value: T) -> Result<(), Full<T>> {
        self.queue.push_unguarded(value)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }
}

/// The single consumer of an [`MpQueue`].
pub struct MpConsumer<'q, T, const N: usize, I = CriticalSectionControl> {
    queue: &'q MpQueue<T, N, I>,
}

impl<T, const N: usize, I: InterruptControl> MpConsumer<'_, T, N, I> {
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        // SAFETY: the consumer handle is unique and `pop` borrows it mutably.
        unsafe { self.queue.ring.pop_inner() }
    }

    #[inline]
    pub fn peek(&self) -> Option<&T>
    where
        T: Sync,
    {
        self.queue.ring.peek_inner()
    }

    #[inline]
    pub fn iter(&self) -> Iter<'_, T, N>
    where
        T: Sync,
    {
        self.queue.ring.iter_inner()
    }

    /// See [`CircularQueue::for_each`].
    pub fn for_each(&self, visitor: impl FnMut(&T) -> bool) -> usize
    where
        T: Sync,
    {
        visit(self.queue.ring.iter_inner(), visitor)
    }

    pub fn pop_n(&mut self, out: &mut [T]) -> usize {
        // SAFETY: unique consumer, borrowed mutably.
        unsafe { self.queue.ring.pop_n_inner(out) }
    }

    pub fn flush(&mut self) {
        // SAFETY: unique consumer, borrowed mutably.
        unsafe { self.queue.ring.flush_inner() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::MpQueue;
    use crate::critical::NullControl;
    use crate::critical::tests::FlagControl;
    use crate::error::Full;
    use std::vec::Vec;

    #[test]
    fn push_pop_fifo() {
        let mut queue = MpQueue::<u32, 4>::new();
        for v in 1..=4 {
            queue.push(v).unwrap();
        }
        assert!(queue.is_full());
        assert_eq!(queue.push(5), Err(Full(5)));
        assert_eq!(queue.iter().copied().collect::<Vec<_>>(), [1, 2, 3, 4]);
        for v in 1..=4 {
            assert_eq!(queue.pop(), Some(v));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn capacity_one_boundary() {
        let mut queue = MpQueue::<u8, 1, NullControl>::with_control(NullControl);
        assert!(queue.push(1).is_ok());
        assert!(queue.push(2).is_err());
        assert_eq!(queue.pop(), Some(1));
        assert!(queue.push(3).is_ok());
        assert!(queue.push(4).is_err());
    }

    #[test]
    fn zero_capacity_always_full() {
        let queue = MpQueue::<u8, 0>::new();
        assert!(queue.is_full());
        assert_eq!(queue.push(1).map_err(Full::into_inner), Err(1));
    }

    #[test]
    fn push_masks_interrupts_for_the_window() {
        let mut queue = MpQueue::<u8, 2, FlagControl>::with_control(FlagControl::new());
        queue.push(7).unwrap();
        assert_eq!(queue.control().entries.get(), 1);
        assert!(queue.control().enabled.get());

        queue.push_unguarded(8).unwrap();
        assert_eq!(queue.control().entries.get(), 1);

        // A rejected push still releases the guard.
        assert!(queue.push(9).is_err());
        assert_eq!(queue.control().entries.get(), 2);
        assert!(queue.control().enabled.get());

        assert_eq!(queue.pop(), Some(7));
        assert_eq!(queue.pop(), Some(8));
    }

    #[test]
    fn out_of_order_writer_publishes_after_earlier_reservation() {
        // Reproduce an interrupt landing between another producer's reservation and
        // publication: reserve slot 0 by hand, let a second producer reserve slot 1 and
        // spin, then finish slot 0.
        let mut queue = MpQueue::<u32, 4, NullControl>::with_control(NullControl);
        let queue_ref = &queue;

        std::thread::scope(|s| {
            queue_ref.reserved.store(1, crate::sync::Ordering::Relaxed);

            let late = s.spawn(|| queue_ref.push_unguarded(20));

            // The second producer cannot commit past the unfinished slot 0.
            std::thread::sleep(std::time::Duration::from_millis(20));
            assert_eq!(queue_ref.len(), 0);

            // SAFETY: slot 0 was reserved above and nobody else writes it.
            unsafe { (*queue_ref.ring.slot(0).get()).write(10) };
            queue_ref.ring.write.store(1, crate::sync::Ordering::Release);

            assert!(late.join().unwrap().is_ok());
        });

        assert_eq!(queue.pop(), Some(10));
        assert_eq!(queue.pop(), Some(20));
    }

    #[test]
    fn concurrent_producers_keep_per_producer_order() {
        const PER_PRODUCER: u32 = 500;
        let mut queue = MpQueue::<(u8, u32), 8>::new();
        let (producer, mut consumer) = queue.split();

        let mut seen = Vec::new();
        std::thread::scope(|s| {
            for tag in 0..2u8 {
                s.spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        while producer.push((tag, seq)).is_err() {
                            std::thread::yield_now();
                        }
                    }
                });
            }

            while seen.len() < 2 * PER_PRODUCER as usize {
                if let Some(item) = consumer.pop() {
                    seen.push(item);
                }
            }
        });

        for tag in 0..2u8 {
            let mine: Vec<u32> = seen
                .iter()
                .filter(|(t, _)| *t == tag)
                .map(|(_, seq)| *seq)
                .collect();
            assert_eq!(mine, (0..PER_PRODUCER).collect::<Vec<_>>());
        }
    }

    #[test]
    fn unguarded_producers_race_without_losing_order() {
        const PRODUCERS: u8 = 3;
        const PER_PRODUCER: u32 = 20_000;
        let mut queue = MpQueue::<(u8, u32), 4, NullControl>::with_control(NullControl);
        let (producer, mut consumer) = queue.split();

        let mut next = [0u32; PRODUCERS as usize];
        let mut out_of_order = 0;
        let mut received = 0;
        std::thread::scope(|s| {
            for tag in 0..PRODUCERS {
                s.spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        while producer.push_unguarded((tag, seq)).is_err() {
                            std::hint::spin_loop();
                        }
                    }
                });
            }

            while received < PRODUCERS as u32 * PER_PRODUCER {
                if let Some((tag, seq)) = consumer.pop() {
                    // Keep draining on a mismatch so the producers can finish.
                    if seq != next[tag as usize] {
                        out_of_order += 1;
                    }
                    next[tag as usize] = seq + 1;
                    received += 1;
                }
            }
        });

        assert_eq!(out_of_order, 0);
        assert!(consumer.is_empty());
        assert_eq!(next, [PER_PRODUCER; PRODUCERS as usize]);
    }
}
