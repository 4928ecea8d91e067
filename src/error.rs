//! Overflow error shared by every fixed-capacity container in the crate.

use core::fmt;

/// Returned when a queue or registry has no room left.
///
/// Carries the rejected value back to the caller untouched; nothing is overwritten and
/// nothing is retried.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Full<T>(pub T);

impl<T> Full<T> {
    /// Recover the value that could not be stored.
    #[inline]
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Full(..)")
    }
}

impl<T> fmt::Display for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("capacity exhausted")
    }
}

impl<T> core::error::Error for Full<T> {}

#[cfg(feature = "defmt")]
impl<T> defmt::Format for Full<T> {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Full(..)")
    }
}
