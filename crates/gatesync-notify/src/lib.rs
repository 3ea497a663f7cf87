//! gatesync-notify: debounced fan-out to blocked long-poll requests.
//!
//! Writers call [`NotificationHub::notify`] after every committed change.
//! Readers [`register`](NotificationHub::register) a single-use
//! [`Subscription`] and await it. A dispatcher task coalesces bursts of
//! notifications into one broadcast per quiet period.

pub mod hub;

pub use hub::{NotificationHub, Signal, Subscription};
