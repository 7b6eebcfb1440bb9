//! Composable blocking futures with chain-wide cancellation.
//!
//! [`Future::new`] runs a computation on its own worker thread. The handle
//! lets callers block for the outcome ([`Future::get`]), bound the wait
//! ([`Future::get_timeout`]), cancel ([`Future::cancel`]) and chain
//! dependent steps ([`Future::then`]). Cancellation never interrupts a
//! running computation; it suppresses its result and keeps not-yet-started
//! chain steps from running.
//!
//! ```
//! use xfuture::{Future, Outcome};
//!
//! let f = Future::new(|| Ok::<_, String>(10))
//!     .then(|v| Ok(2 * v))
//!     .then(|v| Ok(2 + v));
//! assert_eq!(f.get(), Outcome::Ready(Ok(22)));
//! ```

mod cancel;
mod future;
mod outcome;

pub use future::Future;
pub use outcome::Outcome;
