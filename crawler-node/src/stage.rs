//! The lifecycle every pipeline stage implements.
//!
//! `illume/actor.py`'s `Actor` expresses this as a base class with
//! `on_init`/`on_start`/`on_message`/`on_pause`/`on_resume`/`on_stop` hooks
//! that subclasses override. Rust has no implementation inheritance, and a
//! trait with default no-op methods is the idiomatic replacement: a `Pool`
//! drives any `Stage` the same way regardless of which hooks it overrides,
//! so the "capability" a stage has is just whichever methods it chose to
//! implement, discovered by the compiler rather than by `dir()`.

use crawler::error::Result;

/// One pipeline stage's message-processing contract.
///
/// A `Pool<S>` owns `capacity` threads, each running its own `S`, pulling
/// `Input` off a shared channel and pushing `Output` onto another. Returning
/// `Ok(None)` from `on_message` means "nothing to forward" (the filter stage
/// dropping a url, for instance) rather than an error.
pub trait Stage: Send {
    type Input: Send;
    type Output: Send;

    /// Called once, synchronously, when the worker thread starts — before
    /// any message is read. Use this for per-thread state that must not be
    /// shared across workers (a database connection, a bloom filter).
    fn on_start(&mut self) {}

    /// Process one message, producing at most one output message.
    fn on_message(&mut self, input: Self::Input) -> Result<Option<Self::Output>>;

    /// Called when an admin `TOGGLE_PAUSE` suspends this worker.
    fn on_pause(&mut self) {}

    /// Called when an admin `TOGGLE_PAUSE` resumes this worker.
    fn on_resume(&mut self) {}

    /// Called once as the worker thread is about to exit.
    fn on_stop(&mut self) {}
}
