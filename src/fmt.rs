//! Logging shim.
//!
//! Forwards to `defmt` or `log` depending on the enabled feature. With neither enabled the
//! macros still evaluate their arguments so call sites stay warning-free.
#![allow(unused_macros, unused_imports)]

#[cfg(feature = "defmt")]
pub(crate) use defmt::{debug, error, info, trace, warn};

#[cfg(all(not(feature = "defmt"), feature = "log"))]
pub(crate) use log::{debug, error, info, trace, warn};

#[cfg(all(not(feature = "defmt"), not(feature = "log")))]
macro_rules! trace { ($($arg:tt)*) => { let _ = ($($arg)*,); }; }
#[cfg(all(not(feature = "defmt"), not(feature = "log")))]
macro_rules! debug { ($($arg:tt)*) => { let _ = ($($arg)*,); }; }
#[cfg(all(not(feature = "defmt"), not(feature = "log")))]
macro_rules! info { ($($arg:tt)*) => { let _ = ($($arg)*,); }; }
#[cfg(all(not(feature = "defmt"), not(feature = "log")))]
macro_rules! warn_ { ($($arg:tt)*) => { let _ = ($($arg)*,); }; }
#[cfg(all(not(feature = "defmt"), not(feature = "log")))]
macro_rules! error { ($($arg:tt)*) => { let _ = ($($arg)*,); }; }

// `warn` alone would clash with the built-in `#[warn]` attribute.
#[cfg(all(not(feature = "defmt"), not(feature = "log")))]
pub(crate) use {debug, error, info, trace, warn_ as warn};
