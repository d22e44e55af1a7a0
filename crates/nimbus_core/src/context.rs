//! Kernel capability surface handed to LP handlers.
//!
//! Handlers are non-blocking synchronous functions; the only "wait" they can
//! express is scheduling an event with a timestamp delta through
//! [`SimContext::send`]. The kernel (or the test harness) implements this
//! trait per rank.

use crate::{Lpid, Message, ReversibleRng, SimTime};

/// Per-event kernel services available inside a handler.
pub trait SimContext {
    /// Current simulation time at this LP.
    fn now(&self) -> SimTime;

    /// Identifier of the LP whose handler is running.
    fn me(&self) -> Lpid;

    /// Configured minimum outgoing delay for generator services.
    fn lookahead(&self) -> SimTime;

    /// Schedule `message` for delivery to `dest` after `delay` seconds.
    fn send(&mut self, dest: Lpid, delay: SimTime, message: Message);

    /// This LP's reversible random stream.
    fn rng(&mut self) -> &mut ReversibleRng;
}
