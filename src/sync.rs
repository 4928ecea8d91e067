//! Atomic backend selection.
//!
//! Targets without native compare-and-swap (thumbv6m, riscv32imc, avr) enable one of the
//! `portable-atomic*` features; everything else uses `core`.

#[cfg(feature = "portable-atomic")]
pub(crate) use portable_atomic::{AtomicUsize, Ordering};

#[cfg(not(feature = "portable-atomic"))]
pub(crate) use core::sync::atomic::{AtomicUsize, Ordering};
