//! Scoped interrupt masking.
//!
//! The substrate never touches interrupt-enable registers itself. Containers that must
//! exclude an interrupt handler for a few instructions take an [`InterruptControl`] type
//! parameter and hold an [`InterruptGuard`] across the window.
//!
//! # Nesting
//! `enter_critical` returns the state it found and `exit_critical` restores exactly that
//! state. An inner guard therefore leaves interrupts masked when it drops inside an outer
//! guard; only the outermost guard re-enables them.
//!
//! ```
//! use ph_dispatch::critical::{CriticalSectionControl, InterruptGuard};
//!
//! let control = CriticalSectionControl;
//! let answer = InterruptGuard::with(&control, || {
//!     // interrupts masked here
//!     42
//! });
//! assert_eq!(answer, 42);
//! ```

use core::marker::PhantomData;

/// Capability to mask and restore interrupts on the current core.
pub trait InterruptControl {
    /// Interrupt state captured on entry, handed back on exit.
    type State: Copy;

    /// Mask interrupts and return the state that was active before.
    fn enter_critical(&self) -> Self::State;

    /// Restore a state previously returned by [`enter_critical`](Self::enter_critical).
    ///
    /// # Safety
    /// `state` must come from the matching `enter_critical` call on this control, and
    /// nested sections must be exited in reverse order of entry.
    unsafe fn exit_critical(&self, state: Self::State);
}

/// RAII guard: interrupts stay masked until it is dropped.
///
/// The guard is `!Send`; it must be released on the context that created it.
#[must_use = "interrupts are restored as soon as the guard is dropped"]
pub struct InterruptGuard<'c, C: InterruptControl + ?Sized> {
    control: &'c C,
    state: C::State,
    _not_send: PhantomData<*const ()>,
}

impl<'c, C: InterruptControl + ?Sized> InterruptGuard<'c, C> {
    /// Enter a critical section.
    #[inline]
    pub fn new(control: &'c C) -> Self {
        Self {
            state: control.enter_critical(),
            control,
            _not_send: PhantomData,
        }
    }

    /// Run `f` with interrupts masked.
    #[inline]
    pub fn with<T>(control: &'c C, f: impl FnOnce() -> T) -> T {
        let _guard = Self::new(control);
        f()
    }

    /// The state that will be restored on drop.
    #[inline]
    pub fn saved_state(&self) -> C::State {
        self.state
    }
}

impl<C: InterruptControl + ?Sized> Drop for InterruptGuard<'_, C> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: `state` came from `enter_critical` in `new`, and guards are scoped so
        // they drop in reverse order of creation.
        unsafe { self.control.exit_critical(self.state) }
    }
}

/// Default control, backed by the `critical-section` crate.
///
/// The platform (cortex-m, riscv, esp, or `std` on a host) provides the implementation;
/// its `RestoreState` already handles nesting.
#[derive(Clone, Copy, Debug, Default)]
pub struct CriticalSectionControl;

impl InterruptControl for CriticalSectionControl {
    type State = critical_section::RestoreState;

    #[inline]
    fn enter_critical(&self) -> Self::State {
        // SAFETY: every state returned here is released by `exit_critical`, which the
        // guard calls in LIFO order.
        unsafe { critical_section::acquire() }
    }

    #[inline]
    unsafe fn exit_critical(&self, state: Self::State) {
        // SAFETY: forwarded from the caller's contract.
        unsafe { critical_section::release(state) }
    }
}

/// Control that masks nothing.
///
/// For data that is only ever touched from one context, or when the caller already runs
/// with interrupts masked.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullControl;

impl InterruptControl for NullControl {
    type State = ();

    #[inline]
    fn enter_critical(&self) {}

    #[inline]
    unsafe fn exit_critical(&self, _state: ()) {}
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{CriticalSectionControl, InterruptControl, InterruptGuard, NullControl};
    use core::cell::{Cell, RefCell};
    use std::vec::Vec;

    /// Models a single interrupt-enable flag and records every transition.
    pub(crate) struct FlagControl {
        pub(crate) enabled: Cell<bool>,
        pub(crate) entries: Cell<usize>,
        pub(crate) restored: RefCell<Vec<bool>>,
    }

    impl FlagControl {
        pub(crate) fn new() -> Self {
            Self {
                enabled: Cell::new(true),
                entries: Cell::new(0),
                restored: RefCell::new(Vec::new()),
            }
        }
    }

    impl InterruptControl for FlagControl {
        type State = bool;

        fn enter_critical(&self) -> bool {
            self.entries.set(self.entries.get() + 1);
            self.enabled.replace(false)
        }

        unsafe fn exit_critical(&self, state: bool) {
            self.restored.borrow_mut().push(state);
            self.enabled.set(state);
        }
    }

    #[test]
    fn guard_masks_and_restores() {
        let control = FlagControl::new();
        {
            let guard = InterruptGuard::new(&control);
            assert!(!control.enabled.get());
            assert!(guard.saved_state());
        }
        assert!(control.enabled.get());
        assert_eq!(control.entries.get(), 1);
    }

    #[test]
    fn nested_guard_restores_to_still_disabled() {
        let control = FlagControl::new();
        {
            let _outer = InterruptGuard::new(&control);
            {
                let _inner = InterruptGuard::new(&control);
                assert!(!control.enabled.get());
            }
            assert!(!control.enabled.get(), "inner guard must not re-enable");
        }
        assert!(control.enabled.get());
        assert_eq!(&control.restored.borrow()[..], &[false, true]);
    }

    #[test]
    fn with_returns_closure_value() {
        let control = FlagControl::new();
        let v = InterruptGuard::with(&control, || {
            assert!(!control.enabled.get());
            7
        });
        assert_eq!(v, 7);
        assert!(control.enabled.get());
    }

    #[test]
    fn critical_section_control_nests() {
        let control = CriticalSectionControl;
        let v = InterruptGuard::with(&control, || InterruptGuard::with(&control, || 3));
        assert_eq!(v, 3);
    }

    #[test]
    fn null_control_is_inert() {
        let control = NullControl;
        let _guard = InterruptGuard::new(&control);
    }
}
