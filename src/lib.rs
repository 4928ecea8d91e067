//! Callback dispatch primitives for no-std embedded targets.
//!
//! # Highlights
//! - [`Delegate`]: one type for free functions, bound functions, bound methods and
//!   capturing closures. No allocation; closures live in an inline buffer.
//! - [`CircularQueue`]: fixed-capacity SPSC ring with producer/consumer halves.
//! - [`MpQueue`]: the same ring with an atomic reservation protocol so interrupt handlers
//!   and normal code can push concurrently.
//! - [`MultiDelegate`]: ordered multicast over delegates, optionally fed by an `MpQueue`
//!   so events posted from interrupt context are dispatched later from the main loop.
//!
//! # Quick start
//! ```
//! use core::cell::Cell;
//! use ph_dispatch::MultiDelegate;
//!
//! let total = Cell::new(0u32);
//! let mut on_card: MultiDelegate<'_, u32, (), 4, 8> = MultiDelegate::new();
//! on_card.add_closure(|id| total.set(total.get() + id)).unwrap();
//!
//! let (poster, mut dispatcher) = on_card.split();
//! poster.postpone(7).unwrap();  // interrupt handler
//! poster.postpone(35).unwrap();
//! dispatcher.run();            // main loop
//! assert_eq!(total.get(), 42);
//! ```
//!
//! # No-std
//! The crate is `#![no_std]` and never allocates. Tests require `std`.
//!
//! # Interrupt masking
//! Queue pushes that must exclude same-core interrupts go through an
//! [`InterruptControl`](critical::InterruptControl). The default,
//! [`CriticalSectionControl`](critical::CriticalSectionControl), uses the
//! `critical-section` crate, so the final binary must link an implementation (e.g.
//! `cortex-m`'s `critical-section-single-core`, or `critical-section/std` on a host).
//!
//! # Semantics
//! - Full containers reject the new value and hand it back in [`Full`]; nothing is
//!   overwritten and nothing is retried.
//! - Queues are FIFO; `MpQueue` commits in reservation order across producers.
//! - `MultiDelegate` dispatches in registration order; queued events are dispatched in
//!   commit order, each to every enabled delegate.
//!
//! # Features
//! - `portable-atomic*`: atomics from `portable-atomic` for targets without CAS.
//! - `defmt` / `log`: internal tracing through the chosen backend.
#![no_std]

mod fmt;
mod sync;

pub mod critical;
pub mod delegate;
pub mod error;
pub mod mp_queue;
pub mod multi_delegate;
pub mod queue;

pub use critical::{CriticalSectionControl, InterruptControl, InterruptGuard, NullControl};
pub use delegate::{DEFAULT_INLINE_WORDS, Delegate, DelegateKind};
pub use error::Full;
pub use mp_queue::{MpConsumer, MpProducer, MpQueue};
pub use multi_delegate::{
    DEFAULT_REGISTRY_CAPACITY, Dispatcher, Handle, MultiDelegate, Poster, Registry,
};
pub use queue::{CircularQueue, Consumer, Iter, Producer};

#[cfg(test)]
extern crate std;
