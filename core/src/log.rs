//! Logging shims.
//! Events are emitted through `tracing` when the `tracing` feature is on, and compiled out otherwise.

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, info};

#[cfg(not(feature = "tracing"))]
macro_rules! debug {
    ($($t: tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! info {
    ($($t: tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use {debug, info};
