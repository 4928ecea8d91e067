//! Ordered multicast over delegates, optionally decoupled from producers by a queue.
//!
//! # Overview
//! - A [`Registry`] holds up to `CAP` delegates of one signature, each with a stable
//!   [`Handle`] and an enabled flag. Dispatch visits enabled entries in registration order.
//! - A [`MultiDelegate`] owns a registry plus an [`MpQueue`] of pending arguments with
//!   capacity `Q`. `Q == 0` means no queue: every `postpone` reports [`Full`].
//! - `postpone` may run in any context (it only touches the queue); `run` drains the
//!   events pending when it starts and dispatches each one to every enabled delegate.
//! - `split` separates the two sides: a copyable [`Poster`] for interrupt handlers and a
//!   [`Dispatcher`] for the owning context.
//!
//! # Removal during dispatch
//! A dispatch pass borrows the registry mutably, so a callback cannot reach it to add or
//! remove entries. The one removal that does happen mid-pass, a `bool` delegate returning
//! `false` from [`Registry::call_retain`], only marks the entry; the pass skips marked
//! entries and compacts them when it ends.
//!
//! ```
//! use core::cell::RefCell;
//! use ph_dispatch::MultiDelegate;
//!
//! let log = RefCell::new(heapless::Vec::<(u8, u32), 8>::new());
//! let mut md: MultiDelegate<'_, u32, (), 4, 8> = MultiDelegate::new();
//! md.add_closure(|v| log.borrow_mut().push((1, v)).unwrap()).unwrap();
//! md.add_closure(|v| log.borrow_mut().push((2, v)).unwrap()).unwrap();
//!
//! let (poster, mut dispatcher) = md.split();
//! poster.postpone(10).unwrap(); // e.g. from an interrupt handler
//! poster.postpone(11).unwrap();
//! assert_eq!(dispatcher.run(), 2);
//!
//! assert_eq!(&log.borrow()[..], &[(1, 10), (2, 10), (1, 11), (2, 11)]);
//! ```

use core::num::NonZeroU32;
use core::ops::{Deref, DerefMut};

use crate::critical::{CriticalSectionControl, InterruptControl};
use crate::delegate::{DEFAULT_INLINE_WORDS, Delegate};
use crate::error::Full;
use crate::fmt::{debug, trace, warn};
use crate::mp_queue::{MpConsumer, MpProducer, MpQueue};

/// Registry capacity used when `CAP` is not given.
pub const DEFAULT_REGISTRY_CAPACITY: usize = 32;

/// Identity of one registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Handle(NonZeroU32);

impl Handle {
    /// Raw registration id.
    #[inline]
    pub fn id(self) -> u32 {
        self.0.get()
    }
}

struct Entry<'a, P, R, const W: usize> {
    handle: Handle,
    delegate: Delegate<'a, P, R, W>,
    enabled: bool,
    removed: bool,
}

impl<P, R, const W: usize> Entry<'_, P, R, W> {
    #[inline]
    fn live(&self) -> bool {
        self.enabled && !self.removed
    }
}

/// Ordered, fixed-capacity list of delegates with direct dispatch.
pub struct Registry<
    'a,
    P,
    R = (),
    const CAP: usize = DEFAULT_REGISTRY_CAPACITY,
    const W: usize = DEFAULT_INLINE_WORDS,
> {
    entries: heapless::Vec<Entry<'a, P, R, W>, CAP>,
    next_id: u32,
}

impl<'a, P, R, const CAP: usize, const W: usize> Registry<'a, P, R, CAP, W> {
    pub const fn new() -> Self {
        Self {
            entries: heapless::Vec::new(),
            next_id: 1,
        }
    }

    fn fresh_handle(&mut self) -> Handle {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            let Some(id) = NonZeroU32::new(id) else {
                continue;
            };
            let handle = Handle(id);
            if !self.entries.iter().any(|e| e.handle == handle) {
                return handle;
            }
        }
    }

    fn position(&self, handle: Handle) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.handle == handle && !e.removed)
    }

    /// Append `delegate`; hands it back when the registry is full.
    pub fn add(
        &mut self,
        delegate: Delegate<'a, P, R, W>,
    ) -> Result<Handle, Full<Delegate<'a, P, R, W>>> {
        if self.entries.is_full() {
            warn!("delegate registry full, capacity {}", CAP);
            return Err(Full(delegate));
        }

        let handle = self.fresh_handle();
        let entry = Entry {
            handle,
            delegate,
            enabled: true,
            removed: false,
        };
        if let Err(entry) = self.entries.push(entry) {
            return Err(Full(entry.delegate));
        }
        debug!("delegate registered, id {}", handle.id());
        Ok(handle)
    }

    /// Register a free function.
    pub fn add_fn(&mut self, f: fn(P) -> R) -> Result<Handle, Full<Delegate<'a, P, R, W>>> {
        self.add(Delegate::from_fn(f))
    }

    /// Register a closure; see [`Delegate::from_closure`] for the size limit.
    pub fn add_closure<F>(&mut self, f: F) -> Result<Handle, Full<Delegate<'a, P, R, W>>>
    where
        F: FnMut(P) -> R + Clone + 'a,
    {
        self.add(Delegate::from_closure(f))
    }

    /// Remove one registration and return its delegate.
    pub fn remove(&mut self, handle: Handle) -> Option<Delegate<'a, P, R, W>> {
        let pos = self.position(handle)?;
        debug!("delegate removed, id {}", handle.id());
        Some(self.entries.remove(pos).delegate)
    }

    /// Remove the first registration equal to `delegate` (see [`Delegate`]'s `PartialEq`).
    pub fn remove_delegate(&mut self, delegate: &Delegate<'a, P, R, W>) -> bool {
        let Some(pos) = self
            .entries
            .iter()
            .position(|e| !e.removed && e.delegate == *delegate)
        else {
            return false;
        };
        let entry = self.entries.remove(pos);
        debug!("delegate removed, id {}", entry.handle.id());
        true
    }

    /// Enable or disable one registration; `false` if the handle is unknown.
    pub fn set_enabled(&mut self, handle: Handle, enabled: bool) -> bool {
        match self.position(handle) {
            Some(pos) => {
                self.entries[pos].enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn is_enabled(&self, handle: Handle) -> Option<bool> {
        self.position(handle).map(|pos| self.entries[pos].enabled)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.position(handle).is_some()
    }

    /// Handles in registration order.
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.entries.iter().filter(|e| !e.removed).map(|e| e.handle)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        CAP
    }

    /// Drop every registration.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Invoke every enabled delegate in order, handing each result to `sink`.
    ///
    /// Returns how many delegates ran.
    pub fn call_with(&mut self, args: P, mut sink: impl FnMut(Handle, R)) -> usize
    where
        P: Clone,
    {
        let mut invoked = 0;
        for entry in self.entries.iter_mut().filter(|e| e.live()) {
            if let Some(result) = entry.delegate.try_call(args.clone()) {
                invoked += 1;
                sink(entry.handle, result);
            }
        }
        invoked
    }

    /// Invoke every enabled delegate in order; returns the last result, if any ran.
    pub fn call(&mut self, args: P) -> Option<R>
    where
        P: Clone,
    {
        let mut last = None;
        self.call_with(args, |_, result| last = Some(result));
        last
    }

    fn drain(
        &mut self,
        pending: usize,
        mut pop: impl FnMut() -> Option<P>,
        mut each: impl FnMut(&mut Self, P),
    ) -> usize {
        let mut events = 0;
        for _ in 0..pending {
            let Some(args) = pop() else {
                break;
            };
            each(self, args);
            events += 1;
        }
        if events > 0 {
            debug!("dispatched {} queued events", events);
        }
        events
    }

    fn compact(&mut self) {
        let before = self.entries.len();
        self.entries.retain(|e| !e.removed);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("{} delegates unregistered themselves", removed);
        }
    }
}

impl<'a, P: Clone, const CAP: usize, const W: usize> Registry<'a, P, bool, CAP, W> {
    /// Invoke every enabled delegate in order; those returning `false` are removed once
    /// the pass ends.
    ///
    /// Returns how many delegates ran.
    pub fn call_retain(&mut self, args: P) -> usize {
        let mut invoked = 0;
        for entry in self.entries.iter_mut().filter(|e| e.live()) {
            if let Some(keep) = entry.delegate.try_call(args.clone()) {
                invoked += 1;
                entry.removed = !keep;
            }
        }
        self.compact();
        invoked
    }
}

impl<P, R, const CAP: usize, const W: usize> Default for Registry<'_, P, R, CAP, W> {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of delegates with an optional backing queue of capacity `Q`.
pub struct MultiDelegate<
    'a,
    P,
    R = (),
    const CAP: usize = DEFAULT_REGISTRY_CAPACITY,
    const Q: usize = 0,
    const W: usize = DEFAULT_INLINE_WORDS,
    I = CriticalSectionControl,
> {
    registry: Registry<'a, P, R, CAP, W>,
    queue: MpQueue<P, Q, I>,
}

impl<'a, P, R, const CAP: usize, const Q: usize, const W: usize>
    MultiDelegate<'a, P, R, CAP, Q, W, CriticalSectionControl>
{
    pub const fn new() -> Self {
        Self::with_control(CriticalSectionControl)
    }
}

impl<'a, P, R, const CAP: usize, const Q: usize, const W: usize, I: InterruptControl>
    MultiDelegate<'a, P, R, CAP, Q, W, I>
{
    /// A registry whose queue pushes are guarded by `control`.
    pub const fn with_control(control: I) -> Self {
        Self {
            registry: Registry::new(),
            queue: MpQueue::with_control(control),
        }
    }

    /// Whether events can be postponed (`Q > 0`).
    #[inline]
    pub const fn is_queued(&self) -> bool {
        Q > 0
    }

    #[inline]
    pub fn registry(&self) -> &Registry<'a, P, R, CAP, W> {
        &self.registry
    }

    #[inline]
    pub fn registry_mut(&mut self) -> &mut Registry<'a, P, R, CAP, W> {
        &mut self.registry
    }

    /// See [`Registry::add`].
    pub fn add(
        &mut self,
        delegate: Delegate<'a, P, R, W>,
    ) -> Result<Handle, Full<Delegate<'a, P, R, W>>> {
        self.registry.add(delegate)
    }

    pub fn add_fn(&mut self, f: fn(P) -> R) -> Result<Handle, Full<Delegate<'a, P, R, W>>> {
        self.registry.add_fn(f)
    }

    pub fn add_closure<F>(&mut self, f: F) -> Result<Handle, Full<Delegate<'a, P, R, W>>>
    where
        F: FnMut(P) -> R + Clone + 'a,
    {
        self.registry.add_closure(f)
    }

    pub fn remove(&mut self, handle: Handle) -> Option<Delegate<'a, P, R, W>> {
        self.registry.remove(handle)
    }

    pub fn remove_delegate(&mut self, delegate: &Delegate<'a, P, R, W>) -> bool {
        self.registry.remove_delegate(delegate)
    }

    pub fn set_enabled(&mut self, handle: Handle, enabled: bool) -> bool {
        self.registry.set_enabled(handle, enabled)
    }

    pub fn is_enabled(&self, handle: Handle) -> Option<bool> {
        self.registry.is_enabled(handle)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.registry.contains(handle)
    }

    /// Number of registrations.
    #[inline]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        CAP
    }

    pub fn clear(&mut self) {
        self.registry.clear();
    }

    /// See [`Registry::call`].
    pub fn call(&mut self, args: P) -> Option<R>
    where
        P: Clone,
    {
        self.registry.call(args)
    }

    /// See [`Registry::call_with`].
    pub fn call_with(&mut self, args: P, sink: impl FnMut(Handle, R)) -> usize
    where
        P: Clone,
    {
        self.registry.call_with(args, sink)
    }

    /// Queue `args` for the next [`run`](Self::run). Safe from interrupt context.
    ///
    /// A full (or absent) queue drops the event and hands it back; nothing is retried.
    pub fn postpone(&self, args: P) -> Result<(), Full<P>> {
        self.queue.push(args).inspect_err(|_| {
            trace!("postponed event dropped, queue capacity {}", Q);
        })
    }

    /// Number of events waiting for [`run`](Self::run).
    #[inline]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Discard queued events without dispatching them.
    pub fn discard_pending(&mut self) {
        self.queue.flush();
    }

    /// Dispatch every event pending at entry, oldest first, to every enabled delegate.
    ///
    /// Returns the number of events dispatched.
    pub fn run(&mut self) -> usize
    where
        P: Clone,
    {
        let pending = self.queue.len();
        let queue = &mut self.queue;
        self.registry.drain(pending, || queue.pop(), |registry, args| {
            registry.call_with(args, |_, _| {});
        })
    }

    /// Split into the interrupt-side [`Poster`] and the owning-context [`Dispatcher`].
    pub fn split(&mut self) -> (Poster<'_, P, Q, I>, Dispatcher<'_, 'a, P, R, CAP, Q, W, I>) {
        let (producer, consumer) = self.queue.split();
        (
            Poster { producer },
            Dispatcher {
                registry: &mut self.registry,
                queue: consumer,
            },
        )
    }
}

impl<'a, P: Clone, const CAP: usize, const Q: usize, const W: usize, I: InterruptControl>
    MultiDelegate<'a, P, bool, CAP, Q, W, I>
{
    /// See [`Registry::call_retain`].
    pub fn call_retain(&mut self, args: P) -> usize {
        self.registry.call_retain(args)
    }

    /// Like [`run`](Self::run), but delegates returning `false` are removed after the
    /// event that made them return it.
    pub fn run_retain(&mut self) -> usize {
        let pending = self.queue.len();
        let queue = &mut self.queue;
        self.registry.drain(pending, || queue.pop(), |registry, args| {
            registry.call_retain(args);
        })
    }
}

impl<P, R, const CAP: usize, const Q: usize, const W: usize, I: InterruptControl + Default> Default
    for MultiDelegate<'_, P, R, CAP, Q, W, I>
{
    fn default() -> Self {
        Self::with_control(I::default())
    }
}

/// Producer side of a split [`MultiDelegate`]; copy it into every posting context.
pub struct Poster<'m, P, const Q: usize, I = CriticalSectionControl> {
    producer: MpProducer<'m, P, Q, I>,
}

impl<P, const Q: usize, I> Clone for Poster<'_, P, Q, I> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P, const Q: usize, I> Copy for Poster<'_, P, Q, I> {}

impl<P, const Q: usize, I: InterruptControl> Poster<'_, P, Q, I> {
    /// See [`MultiDelegate::postpone`].
    pub fn postpone(&self, args: P) -> Result<(), Full<P>> {
        self.producer.push(args).inspect_err(|_| {
            trace!("postponed event dropped, queue capacity {}", Q);
        })
    }

    #[inline]
    pub fn pending(&self) -> usize {
        self.producer.len()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.producer.is_full()
    }
}

/// Owning-context side of a split [`MultiDelegate`].
///
/// Dereferences to the [`Registry`] for registration and direct dispatch.
pub struct Dispatcher<
    'm,
    'a,
    P,
    R,
    const CAP: usize,
    const Q: usize,
    const W: usize,
    I = CriticalSectionControl,
> {
    registry: &'m mut Registry<'a, P, R, CAP, W>,
    queue: MpConsumer<'m, P, Q, I>,
}

impl<P: Clone, R, const CAP: usize, const Q: usize, const W: usize, I: InterruptControl>
    Dispatcher<'_, '_, P, R, CAP, Q, W, I>
{
    /// See [`MultiDelegate::run`].
    pub fn run(&mut self) -> usize {
        let pending = self.queue.len();
        let queue = &mut self.queue;
        self.registry.drain(pending, || queue.pop(), |registry, args| {
            registry.call_with(args, |_, _| {});
        })
    }

    #[inline]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Discard queued events without dispatching them.
    pub fn discard_pending(&mut self) {
        self.queue.flush();
    }
}

impl<P: Clone, const CAP: usize, const Q: usize, const W: usize, I: InterruptControl>
    Dispatcher<'_, '_, P, bool, CAP, Q, W, I>
{
    /// See [`MultiDelegate::run_retain`].
    pub fn run_retain(&mut self) -> usize {
        let pending = self.queue.len();
        let queue = &mut self.queue;
        self.registry.drain(pending, || queue.pop(), |registry, args| {
            registry.call_retain(args);
        })
    }
}

impl<'a, P, R, const CAP: usize, const Q: usize, const W: usize, I> Deref
    for Dispatcher<'_, 'a, P, R, CAP, Q, W, I>
{
    type Target = Registry<'a, P, R, CAP, W>;

    fn deref(&self) -> &Self::Target {
        &*self.registry
    }
}

impl<P, R, const CAP: usize, const Q: usize, const W: usize, I> DerefMut
    for Dispatcher<'_, '_, P, R, CAP, Q, W, I>
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::{MultiDelegate, Registry};
    use crate::critical::NullControl;
    use crate::critical::tests::FlagControl;
    use crate::delegate::Delegate;
    use crate::error::Full;
    use core::cell::{Cell, RefCell};
    use std::vec::Vec;

    fn double(v: u32) -> u32 {
        v * 2
    }

    fn triple(v: u32) -> u32 {
        v * 3
    }

    #[test]
    fn direct_dispatch_in_registration_order() {
        let calls = RefCell::new(Vec::new());
        let mut md: MultiDelegate<'_, u32> = MultiDelegate::new();
        let _d1 = md.add_closure(|x| calls.borrow_mut().push((1, x))).unwrap();
        let d2 = md.add_closure(|x| calls.borrow_mut().push((2, x))).unwrap();
        let _d3 = md.add_closure(|x| calls.borrow_mut().push((3, x))).unwrap();

        md.call(7);
        assert_eq!(&calls.borrow()[..], &[(1, 7), (2, 7), (3, 7)]);

        assert!(md.remove(d2).is_some());
        assert!(!md.contains(d2));
        calls.borrow_mut().clear();
        md.call(8);
        assert_eq!(&calls.borrow()[..], &[(1, 8), (3, 8)]);
    }

    #[test]
    fn call_returns_last_result() {
        let mut md: MultiDelegate<'_, u32, u32, 4> = MultiDelegate::new();
        assert_eq!(md.call(1), None);
        md.add_fn(double).unwrap();
        md.add_fn(triple).unwrap();
        assert_eq!(md.call(5), Some(15));

        let mut results = Vec::new();
        assert_eq!(md.call_with(5, |_, r| results.push(r)), 2);
        assert_eq!(results, [10, 15]);
    }

    #[test]
    fn remove_by_identity() {
        let mut md: MultiDelegate<'_, u32, u32, 4> = MultiDelegate::new();
        md.add_fn(double).unwrap();
        md.add_fn(triple).unwrap();
        assert!(md.remove_delegate(&Delegate::from_fn(double)));
        assert!(!md.remove_delegate(&Delegate::from_fn(double)));
        assert_eq!(md.len(), 1);
        assert_eq!(md.call(2), Some(6));
    }

    #[test]
    fn disabled_entries_are_skipped() {
        let hits = Cell::new(0);
        let mut md: MultiDelegate<'_, ()> = MultiDelegate::new();
        let h = md.add_closure(|()| hits.set(hits.get() + 1)).unwrap();

        assert!(md.set_enabled(h, false));
        assert_eq!(md.is_enabled(h), Some(false));
        md.call(());
        assert_eq!(hits.get(), 0);

        md.set_enabled(h, true);
        md.call(());
        assert_eq!(hits.get(), 1);

        md.remove(h);
        assert!(!md.set_enabled(h, true));
        assert_eq!(md.is_enabled(h), None);
    }

    #[test]
    fn full_registry_hands_delegate_back() {
        let mut reg: Registry<'_, u32, u32, 2> = Registry::new();
        reg.add_fn(double).unwrap();
        reg.add_fn(triple).unwrap();
        let err = reg.add_fn(double).unwrap_err();
        let mut rejected = err.into_inner();
        assert_eq!(rejected.call(4), 8);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn handles_stay_unique_after_removal() {
        let mut reg: Registry<'_, u32, u32, 4> = Registry::new();
        let a = reg.add_fn(double).unwrap();
        reg.remove(a);
        let b = reg.add_fn(double).unwrap();
        assert_ne!(a, b);
        assert_eq!(reg.handles().collect::<Vec<_>>(), [b]);
    }

    #[test]
    fn queued_events_dispatch_in_commit_order() {
        let calls = RefCell::new(Vec::new());
        let mut md: MultiDelegate<'_, u32, (), 4, 4, 4, NullControl> =
            MultiDelegate::with_control(NullControl);
        assert!(md.is_queued());
        md.add_closure(|e| calls.borrow_mut().push(('a', e))).unwrap();
        md.add_closure(|e| calls.borrow_mut().push(('b', e))).unwrap();

        md.postpone(1).unwrap();
        md.postpone(2).unwrap();
        assert_eq!(md.pending(), 2);
        assert!(calls.borrow().is_empty());

        assert_eq!(md.run(), 2);
        assert_eq!(&calls.borrow()[..], &[('a', 1), ('b', 1), ('a', 2), ('b', 2)]);
        assert_eq!(md.run(), 0);
    }

    #[test]
    fn postpone_on_full_queue_drops_event() {
        let mut md: MultiDelegate<'_, u8, (), 2, 1> = MultiDelegate::new();
        md.postpone(1).unwrap();
        assert_eq!(md.postpone(2), Err(Full(2)));
        md.discard_pending();
        assert_eq!(md.pending(), 0);
    }

    #[test]
    fn unqueued_registry_rejects_postpone() {
        let md: MultiDelegate<'_, u8> = MultiDelegate::new();
        assert!(!md.is_queued());
        assert_eq!(md.postpone(1), Err(Full(1)));
    }

    #[test]
    fn postpone_goes_through_interrupt_guard() {
        let mut md: MultiDelegate<'_, u8, (), 2, 4, 4, FlagControl> =
            MultiDelegate::with_control(FlagControl::new());
        let (poster, mut dispatcher) = md.split();
        poster.postpone(3).unwrap();
        poster.postpone(4).unwrap();
        assert_eq!(poster.pending(), 2);
        assert_eq!(dispatcher.pending(), 2);
        assert_eq!(dispatcher.run(), 2);
        assert_eq!(md.queue.control().entries.get(), 2);
        assert!(md.queue.control().enabled.get());
    }

    #[test]
    fn dispatcher_exposes_registry() {
        let seen = RefCell::new(Vec::new());
        let mut md: MultiDelegate<'_, u16, (), 4, 4> = MultiDelegate::new();
        let (poster, mut dispatcher) = md.split();

        let h = dispatcher.add_closure(|v| seen.borrow_mut().push(v)).unwrap();
        poster.postpone(5).unwrap();
        dispatcher.run();
        dispatcher.remove(h);
        poster.postpone(6).unwrap();
        dispatcher.run();

        assert_eq!(&seen.borrow()[..], &[5]);
    }

    #[test]
    fn retain_removes_delegates_returning_false() {
        let calls = RefCell::new(Vec::new());
        let budget = Cell::new(2);
        let mut md: MultiDelegate<'_, u8, bool, 4, 4> = MultiDelegate::new();
        md.add_closure(|v| {
            calls.borrow_mut().push(("once", v));
            false
        })
        .unwrap();
        md.add_closure(|v| {
            calls.borrow_mut().push(("keep", v));
            true
        })
        .unwrap();
        md.add_closure(|v| {
            calls.borrow_mut().push(("twice", v));
            budget.set(budget.get() - 1);
            budget.get() > 0
        })
        .unwrap();

        assert_eq!(md.call_retain(1), 3);
        assert_eq!(md.len(), 2);

        md.postpone(2).unwrap();
        md.postpone(3).unwrap();
        assert_eq!(md.run_retain(), 2);
        assert_eq!(md.len(), 1);

        assert_eq!(
            &calls.borrow()[..],
            &[
                ("once", 1),
                ("keep", 1),
                ("twice", 1),
                ("keep", 2),
                ("twice", 2),
                ("keep", 3),
            ]
        );
    }
}
