//! Writable reactive value containers.
//!
//! A [`Writable`] holds a value, delivers it to subscribers synchronously on
//! every change, and can run a start/stop notifier while it is observed.

mod writable;

pub(crate) use writable::lock;
pub use writable::{Setter, StartStopNotifier, Subscription, Teardown, Writable};
