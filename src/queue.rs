//! Fixed-capacity single-producer, single-consumer circular queue.
//!
//! # Overview
//! - Capacity `N` is a generic parameter; storage is `N + 1` inline slots.
//! - Indices run over `[0, N]` and advance modulo `N + 1`, so `read == write` means empty
//!   and `len == N` means full without a separate counter.
//! - A full queue rejects the push and hands the value back; nothing is overwritten.
//! - `split` yields one [`Producer`] and one [`Consumer`] that may live in different
//!   execution contexts (e.g. an interrupt handler and the main loop).
//!
//! # Memory ordering
//! The producer writes the slot, then publishes the write index with `Release`. The
//! consumer loads the write index with `Acquire` before reading the slot, then frees it
//! by publishing the read index with `Release`; the producer loads that with `Acquire`
//! before reusing the slot.
//!
//! ```
//! use ph_dispatch::CircularQueue;
//!
//! let mut queue = CircularQueue::<u32, 4>::new();
//! let (mut producer, mut consumer) = queue.split();
//!
//! producer.push(1).unwrap();
//! producer.push(2).unwrap();
//! assert_eq!(consumer.pop(), Some(1));
//! assert_eq!(consumer.peek(), Some(&2));
//! assert_eq!(consumer.iter().count(), 1);
//! ```
//!
//! # Sharing
//! Values only need to be `Send` to cross between the two halves. Views that hand out
//! `&T` through a shared borrow (`peek`, `iter`, `for_each`) also need `T: Sync`, since
//! several contexts may hold that borrow at once:
//!
//! ```compile_fail
//! use core::cell::Cell;
//! use ph_dispatch::CircularQueue;
//!
//! let mut queue = CircularQueue::<Cell<u32>, 4>::new();
//! queue.push(Cell::new(0)).unwrap();
//! let shared = &queue;
//! std::thread::scope(|s| {
//!     s.spawn(|| shared.peek().unwrap().set(1));
//!     s.spawn(|| shared.peek().unwrap().set(2));
//! });
//! ```

use core::cell::UnsafeCell;
use core::iter::FusedIterator;
use core::mem::{self, MaybeUninit};

use crate::error::Full;
use crate::fmt::trace;
use crate::sync::{AtomicUsize, Ordering};

/// Ring buffer of `T` with capacity `N`.
pub struct CircularQueue<T, const N: usize> {
    pub(crate) read: AtomicUsize,
    pub(crate) write: AtomicUsize,
    slots: [UnsafeCell<MaybeUninit<T>>; N],
    // Slot `N`: the extra position that keeps "full" distinct from "empty".
    spare: UnsafeCell<MaybeUninit<T>>,
}

// SAFETY: slots are only written by the single producer and only moved out by the single
// consumer, and ownership of each slot is handed over through the index pair. Every
// method that lends `&T` through `&self` additionally requires `T: Sync`.
unsafe impl<T: Send, const N: usize> Sync for CircularQueue<T, N> {}

impl<T, const N: usize> CircularQueue<T, N> {
    /// An empty queue.
    pub const fn new() -> Self {
        Self {
            read: AtomicUsize::new(0),
            write: AtomicUsize::new(0),
            slots: [const { UnsafeCell::new(MaybeUninit::uninit()) }; N],
            spare: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    #[inline(always)]
    pub(crate) const fn advance(idx: usize) -> usize {
        if idx == N { 0 } else { idx + 1 }
    }

    #[inline(always)]
    const fn distance(from: usize, to: usize) -> usize {
        if to >= from { to - from } else { to + N + 1 - from }
    }

    #[inline(always)]
    pub(crate) fn slot(&self, idx: usize) -> &UnsafeCell<MaybeUninit<T>> {
        if idx < N { &self.slots[idx] } else { &self.spare }
    }

    /// Maximum number of queued elements.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of queued elements.
    #[inline]
    pub fn len(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        Self::distance(read, write)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read.load(Ordering::Acquire) == self.write.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    /// How many more elements fit right now.
    #[inline]
    pub fn available_for_push(&self) -> usize {
        N - self.len()
    }

    /// Split into the producer and consumer halves.
    pub fn split(&mut self) -> (Producer<'_, T, N>, Consumer<'_, T, N>) {
        (Producer { queue: &*self }, Consumer { queue: &*self })
    }

    /// Enqueue `value`, or hand it back if the queue is full.
    pub fn push(&mut self, value: T) -> Result<(), Full<T>> {
        // SAFETY: `&mut self` excludes every other producer.
        unsafe { self.push_inner(value) }
    }

    /// Dequeue the oldest element.
    pub fn pop(&mut self) -> Option<T> {
        // SAFETY: `&mut self` excludes every other consumer.
        unsafe { self.pop_inner() }
    }

    /// The oldest element, left in place.
    pub fn peek(&self) -> Option<&T>
    where
        T: Sync,
    {
        self.peek_inner()
    }

    /// Front-to-back view of the queued elements. Calling it again restarts from the
    /// current read position.
    pub fn iter(&self) -> Iter<'_, T, N>
    where
        T: Sync,
    {
        self.iter_inner()
    }

    /// Visit queued elements in FIFO order until `visitor` returns `false`.
    ///
    /// Returns the number of elements handed to the visitor.
    pub fn for_each(&self, visitor: impl FnMut(&T) -> bool) -> usize
    where
        T: Sync,
    {
        visit(self.iter_inner(), visitor)
    }

    /// Push clones of `values` until the queue fills; returns how many were pushed.
    pub fn push_n(&mut self, values: &[T]) -> usize
    where
        T: Clone,
    {
        let mut pushed = 0;
        for value in values {
            if self.push(value.clone()).is_err() {
                break;
            }
            pushed += 1;
        }
        pushed
    }

    /// Pop into `out` until it is full or the queue is empty; returns how many were popped.
    pub fn pop_n(&mut self, out: &mut [T]) -> usize {
        // SAFETY: `&mut self` excludes every other consumer.
        unsafe { self.pop_n_inner(out) }
    }

    /// Drop every queued element.
    pub fn flush(&mut self) {
        // SAFETY: `&mut self` excludes every other consumer.
        unsafe { self.flush_inner() }
    }

    /// Visit every element once, keeping only those for which `keep` returns `true`.
    ///
    /// Kept elements are requeued in their original order.
    pub fn retain(&mut self, mut keep: impl FnMut(&mut T) -> bool) {
        let queued = self.len();
        for _ in 0..queued {
            let Some(mut value) = self.pop() else {
                break;
            };
            if keep(&mut value) {
                // A slot was just freed, so this cannot fail.
                let _ = self.push(value);
            }
        }
    }

    /// # Safety
    /// Only one producer may call this at a time.
    pub(crate) unsafe fn push_inner(&self, value: T) -> Result<(), Full<T>> {
        let write = self.write.load(Ordering::Relaxed);
        let next = Self::advance(write);
        if next == self.read.load(Ordering::Acquire) {
            trace!("circular queue full, capacity {}", N);
            return Err(Full(value));
        }

        // SAFETY: the slot at `write` is outside the readable range and only this
        // producer writes it.
        unsafe { (*self.slot(write).get()).write(value) };
        self.write.store(next, Ordering::Release);
        Ok(())
    }

    /// # Safety
    /// Only one consumer may call this at a time.
    pub(crate) unsafe fn pop_inner(&self) -> Option<T> {
        let read = self.read.load(Ordering::Relaxed);
        if read == self.write.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: `read` is inside the published range, so the slot is initialized, and
        // advancing `read` below hands ownership back to the producer.
        let value = unsafe { (*self.slot(read).get()).assume_init_read() };
        self.read.store(Self::advance(read), Ordering::Release);
        Some(value)
    }

    /// # Safety
    /// Only one consumer may call this at a time.
    pub(crate) unsafe fn pop_n_inner(&self, out: &mut [T]) -> usize {
        let mut popped = 0;
        for dst in out.iter_mut() {
            // SAFETY: forwarded from the caller's contract.
            match unsafe { self.pop_inner() } {
                Some(value) => *dst = value,
                None => break,
            }
            popped += 1;
        }
        popped
    }

    /// # Safety
    /// Only one consumer may call this at a time.
    pub(crate) unsafe fn flush_inner(&self) {
        // SAFETY: forwarded from the caller's contract.
        while unsafe { self.pop_inner() }.is_some() {}
    }

    pub(crate) fn peek_inner(&self) -> Option<&T> {
        let read = self.read.load(Ordering::Relaxed);
        if read == self.write.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: the slot is published and stays put until the consumer pops, which
        // needs a unique borrow that the returned reference prevents.
        Some(unsafe { (*self.slot(read).get()).assume_init_ref() })
    }

    pub(crate) fn iter_inner(&self) -> Iter<'_, T, N> {
        Iter {
            queue: self,
            pos: self.read.load(Ordering::Relaxed),
            end: self.write.load(Ordering::Acquire),
        }
    }
}

impl<T, const N: usize> Default for CircularQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for CircularQueue<T, N> {
    fn drop(&mut self) {
        if mem::needs_drop::<T>() {
            self.flush();
        }
    }
}

pub(crate) fn visit<'q, T: 'q>(
    items: impl Iterator<Item = &'q T>,
    mut visitor: impl FnMut(&T) -> bool,
) -> usize {
    let mut visited = 0;
    for item in items {
        visited += 1;
        if !visitor(item) {
            break;
        }
    }
    visited
}

/// Lazy front-to-back view over a queue snapshot.
pub struct Iter<'q, T, const N: usize> {
    queue: &'q CircularQueue<T, N>,
    pos: usize,
    end: usize,
}

impl<'q, T, const N: usize> Iterator for Iter<'q, T, N> {
    type Item = &'q T;

    fn next(&mut self) -> Option<&'q T> {
        if self.pos == self.end {
            return None;
        }
        // SAFETY: every position in `pos..end` was published before the snapshot, and the
        // consumer cannot pop while this borrow of the queue is alive.
        let item = unsafe { (*self.queue.slot(self.pos).get()).assume_init_ref() };
        self.pos = CircularQueue::<T, N>::advance(self.pos);
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = CircularQueue::<T, N>::distance(self.pos, self.end);
        (n, Some(n))
    }
}

impl<T, const N: usize> ExactSizeIterator for Iter<'_, T, N> {}

impl<T, const N: usize> FusedIterator for Iter<'_, T, N> {}

/// Producer half of a split [`CircularQueue`].
pub struct Producer<'q, T, const N: usize> {
    queue: &'q CircularQueue<T, N>,
}

impl<T, const N: usize> Producer<'_, T, N> {
    /// Enqueue `value`, or hand it back if the queue is full.
    #[inline]
    pub fn push(&mut self, value: T) -> Result<(), Full<T>> {
        // SAFETY: the producer handle is unique and `push` borrows it mutably.
        unsafe { self.queue.push_inner(value) }
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

    #[inline]
    pub fn available_for_push(&self) -> usize {
        self.queue.available_for_push()
    }
}

/// Consumer half of a split [`CircularQueue`].
pub struct Consumer<'q, T, const N: usize> {
    queue: &'q CircularQueue<T, N>,
}

impl<T, const N: usize> Consumer<'_, T, N> {
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        // SAFETY: the consumer handle is unique and `pop` borrows it mutably.
        unsafe { self.queue.pop_inner() }
    }

    #[inline]
    pub fn peek(&self) -> Option<&T>
    where
        T: Sync,
    {
        self.queue.peek_inner()
    }

    #[inline]
    pub fn iter(&self) -> Iter<'_, T, N>
    where
        T: Sync,
    {
        self.queue.iter_inner()
    }

    /// See [`CircularQueue::for_each`].
    pub fn for_each(&self, visitor: impl FnMut(&T) -> bool) -> usize
    where
        T: Sync,
    {
        visit(self.queue.iter_inner(), visitor)
    }

    pub fn pop_n(&mut self, out: &mut [T]) -> usize {
        // SAFETY: unique consumer, borrowed mutably.
        unsafe { self.queue.pop_n_inner(out) }
    }

    pub fn flush(&mut self) {
        // SAFETY: unique consumer, borrowed mutably.
        unsafe { self.queue.flush_inner() }
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
