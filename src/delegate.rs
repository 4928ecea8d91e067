//! Allocation-free, type-erased callables.
//!
//! # Overview
//! A [`Delegate`] holds exactly one of:
//! - a free function `fn(P) -> R`;
//! - a free function plus a bound context `(&C, fn(&C, P) -> R)`;
//! - a method plus a bound object `(&T, fn(&T, P) -> R)`;
//! - a closure whose captured state fits an inline buffer of `W` machine words.
//!
//! Parameters travel as a single value: `()` for none, a tuple for several.
//!
//! # Storage
//! Nothing is boxed. Closures are moved into the inline buffer together with three
//! monomorphized function pointers (call, clone, drop). A closure that does not fit is
//! rejected when `from_closure` is instantiated:
//!
//! ```compile_fail
//! use ph_dispatch::Delegate;
//!
//! let big = [0u64; 64];
//! let _d: Delegate<'_, (), u64, 2> = Delegate::from_closure(move |()| big[0]);
//! ```
//!
//! # Lifetimes
//! Bound contexts and captured borrows are tied to `'a`; the delegate never takes
//! ownership of them. Mutating a bound object goes through interior mutability so that
//! clones of a delegate never alias a unique borrow.
//!
//! # Unset delegates
//! An unset delegate (`new`, `take`, `clear`) is a no-op when called with `R = ()`.
//! For other return types [`Delegate::call`] yields `R::default()` and
//! [`Delegate::try_call`] yields `None`; check [`Delegate::is_set`] when the difference
//! matters.

use core::fmt;
use core::marker::PhantomData;
use core::mem::{self, MaybeUninit};
use core::ptr::{self, NonNull};

/// Inline closure budget, in machine words, used when `W` is not given.
pub const DEFAULT_INLINE_WORDS: usize = 4;

/// Which representation a set delegate holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DelegateKind {
    Function,
    FunctionWithContext,
    Method,
    Closure,
}

/// Closure storage: `W` machine words, aligned for 64-bit captures even on 32-bit targets.
#[repr(C, align(8))]
struct Inline<const W: usize>([MaybeUninit<usize>; W]);

impl<const W: usize> Inline<W> {
    const fn uninit() -> Self {
        Self([MaybeUninit::uninit(); W])
    }

    #[inline]
    fn as_ptr(&self) -> *const () {
        self.0.as_ptr().cast()
    }

    #[inline]
    fn as_mut_ptr(&mut self) -> *mut () {
        self.0.as_mut_ptr().cast()
    }
}

/// Function pointer with its first argument erased to an opaque, non-owning pointer.
struct Bound<P, R> {
    ctx: NonNull<()>,
    f: fn(NonNull<()>, P) -> R,
}

impl<P, R> Clone for Bound<P, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P, R> Copy for Bound<P, R> {}

impl<P, R> Bound<P, R> {
    #[inline]
    fn erase<T>(target: &T, f: fn(&T, P) -> R) -> Self {
        // SAFETY: `&T` and `NonNull<()>` are ABI-compatible thin pointers for sized `T`,
        // and `ctx` is only ever passed back to `f`, so the callee receives the `&T` it
        // was written for.
        let f = unsafe { mem::transmute::<fn(&T, P) -> R, fn(NonNull<()>, P) -> R>(f) };
        Self {
            ctx: NonNull::from(target).cast(),
            f,
        }
    }

    #[inline]
    fn same_target(&self, other: &Self) -> bool {
        self.ctx == other.ctx && ptr::fn_addr_eq(self.f, other.f)
    }
}

struct Closure<P, R, const W: usize> {
    storage: Inline<W>,
    call: unsafe fn(*mut (), P) -> R,
    clone: unsafe fn(*const (), *mut ()),
    drop: unsafe fn(*mut ()),
}

unsafe fn call_closure<F: FnMut(P) -> R, P, R>(state: *mut (), args: P) -> R {
    // SAFETY: `state` points at an initialized `F` inside the owning delegate.
    let f = unsafe { &mut *state.cast::<F>() };
    f(args)
}

unsafe fn clone_closure<F: Clone>(src: *const (), dst: *mut ()) {
    // SAFETY: `src` holds an initialized `F`; `dst` is an inline buffer of the same
    // budget, checked when the original was constructed.
    unsafe { dst.cast::<F>().write((*src.cast::<F>()).clone()) }
}

unsafe fn drop_closure<F>(state: *mut ()) {
    // SAFETY: called once, from `Delegate::drop`, on an initialized `F`.
    unsafe { ptr::drop_in_place(state.cast::<F>()) }
}

enum Repr<P, R, const W: usize> {
    Empty,
    Function(fn(P) -> R),
    WithContext(Bound<P, R>),
    Method(Bound<P, R>),
    Closure(Closure<P, R, W>),
}

/// Type-erased, non-owning, non-allocating callable with signature `R(P)`.
pub struct Delegate<'a, P, R = (), const W: usize = DEFAULT_INLINE_WORDS> {
    repr: Repr<P, R, W>,
    _borrow: PhantomData<&'a ()>,
}

impl<'a, P, R, const W: usize> Delegate<'a, P, R, W> {
    /// An unset delegate.
    pub const fn new() -> Self {
        Self {
            repr: Repr::Empty,
            _borrow: PhantomData,
        }
    }

    /// Wrap a free function.
    pub const fn from_fn(f: fn(P) -> R) -> Self {
        Self {
            repr: Repr::Function(f),
            _borrow: PhantomData,
        }
    }

    /// Wrap a free function that receives `ctx` on every call.
    pub fn from_fn_with<C>(ctx: &'a C, f: fn(&C, P) -> R) -> Self {
        Self {
            repr: Repr::WithContext(Bound::erase(ctx, f)),
            _borrow: PhantomData,
        }
    }

    /// Bind a method to `object`.
    ///
    /// ```
    /// use core::cell::Cell;
    /// use ph_dispatch::Delegate;
    ///
    /// struct Counter(Cell<u32>);
    /// impl Counter {
    ///     fn bump(&self, by: u32) -> u32 {
    ///         self.0.set(self.0.get() + by);
    ///         self.0.get()
    ///     }
    /// }
    ///
    /// let counter = Counter(Cell::new(0));
    /// let mut d: Delegate<u32, u32> = Delegate::from_method(&counter, Counter::bump);
    /// assert_eq!(d.call(2), 2);
    /// assert_eq!(d.call(3), 5);
    /// ```
    pub fn from_method<T>(object: &'a T, method: fn(&T, P) -> R) -> Self {
        Self {
            repr: Repr::Method(Bound::erase(object, method)),
            _borrow: PhantomData,
        }
    }

    /// Move a closure into the inline buffer.
    ///
    /// Fails to compile when `F` is larger than `W` words or more aligned than 8 bytes.
    pub fn from_closure<F>(f: F) -> Self
    where
        F: FnMut(P) -> R + Clone + 'a,
    {
        const {
            assert!(
                Self::fits::<F>(),
                "closure state exceeds the delegate's inline budget"
            )
        };

        let mut storage = Inline::<W>::uninit();
        // SAFETY: the assertion above guarantees size and alignment.
        unsafe { storage.as_mut_ptr().cast::<F>().write(f) };

        Self {
            repr: Repr::Closure(Closure {
                storage,
                call: call_closure::<F, P, R>,
                clone: clone_closure::<F>,
                drop: drop_closure::<F>,
            }),
            _borrow: PhantomData,
        }
    }

    /// Whether a closure of type `F` fits the inline buffer.
    pub const fn fits<F>() -> bool {
        mem::size_of::<F>() <= W * mem::size_of::<usize>()
            && mem::align_of::<F>() <= mem::align_of::<Inline<W>>()
    }

    /// Whether a callable is held.
    #[inline]
    pub fn is_set(&self) -> bool {
        !matches!(self.repr, Repr::Empty)
    }

    /// The held representation, or `None` when unset.
    pub fn kind(&self) -> Option<DelegateKind> {
        match self.repr {
            Repr::Empty => None,
            Repr::Function(_) => Some(DelegateKind::Function),
            Repr::WithContext(_) => Some(DelegateKind::FunctionWithContext),
            Repr::Method(_) => Some(DelegateKind::Method),
            Repr::Closure(_) => Some(DelegateKind::Closure),
        }
    }

    /// Invoke the held callable; `None` when unset.
    #[inline]
    pub fn try_call(&mut self, args: P) -> Option<R> {
        match &mut self.repr {
            Repr::Empty => None,
            Repr::Function(f) => Some(f(args)),
            Repr::WithContext(b) | Repr::Method(b) => Some((b.f)(b.ctx, args)),
            // SAFETY: `storage` holds the `F` that `call` was monomorphized for.
            Repr::Closure(c) => Some(unsafe { (c.call)(c.storage.as_mut_ptr(), args) }),
        }
    }

    /// Invoke the held callable; an unset delegate yields `R::default()`.
    #[inline]
    pub fn call(&mut self, args: P) -> R
    where
        R: Default,
    {
        self.try_call(args).unwrap_or_default()
    }

    /// Drop the held callable, leaving the delegate unset.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Move the held callable out, leaving this delegate unset.
    pub fn take(&mut self) -> Self {
        mem::replace(self, Self::new())
    }

    /// Replace the held callable; the previous one is dropped.
    pub fn set(&mut self, other: Self) {
        *self = other;
    }
}

impl<P, R, const W: usize> Default for Delegate<'_, P, R, W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, R, const W: usize> From<fn(P) -> R> for Delegate<'_, P, R, W> {
    fn from(f: fn(P) -> R) -> Self {
        Self::from_fn(f)
    }
}

impl<P, R, const W: usize> Clone for Delegate<'_, P, R, W> {
    fn clone(&self) -> Self {
        let repr = match &self.repr {
            Repr::Empty => Repr::Empty,
            Repr::Function(f) => Repr::Function(*f),
            Repr::WithContext(b) => Repr::WithContext(*b),
            Repr::Method(b) => Repr::Method(*b),
            Repr::Closure(c) => {
                let mut storage = Inline::<W>::uninit();
                // SAFETY: `c.storage` is initialized for the `F` behind `c.clone`, and the
                // fresh buffer has the same budget.
                unsafe { (c.clone)(c.storage.as_ptr(), storage.as_mut_ptr()) };
                Repr::Closure(Closure {
                    storage,
                    call: c.call,
                    clone: c.clone,
                    drop: c.drop,
                })
            }
        };
        Self {
            repr,
            _borrow: PhantomData,
        }
    }
}

impl<P, R, const W: usize> Drop for Delegate<'_, P, R, W> {
    fn drop(&mut self) {
        if let Repr::Closure(c) = &mut self.repr {
            // SAFETY: the closure is initialized and this is its only drop.
            unsafe { (c.drop)(c.storage.as_mut_ptr()) }
        }
    }
}

/// Identity comparison.
///
/// Function-pointer forms compare by address (and bound pointer); closures never compare
/// equal. Function addresses are only as stable as the compiler makes them: identical
/// functions may be merged and one function may get several addresses across codegen
/// units.
impl<P, R, const W: usize> PartialEq for Delegate<'_, P, R, W> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.repr, &other.repr) {
            (Repr::Empty, Repr::Empty) => true,
            (Repr::Function(a), Repr::Function(b)) => ptr::fn_addr_eq(*a, *b),
            (Repr::WithContext(a), Repr::WithContext(b)) | (Repr::Method(a), Repr::Method(b)) => {
                a.same_target(b)
            }
            _ => false,
        }
    }
}

impl<P, R, const W: usize> fmt::Debug for Delegate<'_, P, R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delegate").field("kind", &self.kind()).finish()
    }
}
