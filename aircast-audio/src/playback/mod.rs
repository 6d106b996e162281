//! Playback-side sessions
//!
//! Sessions are driven cooperatively: an external scheduler calls
//! [`Session::tick`] once per pass, and a tick must complete in bounded
//! time without blocking I/O. Suspension is expressed through the returned
//! status plus internal flags re-checked on the next tick, never by
//! waiting inside the call.

pub mod chapters;
pub mod decoder_session;
pub mod sink;

use crate::error::Result;

/// Outcome of one cooperative tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    /// More work remains; tick again on the next pass
    Continue,
    /// The session reached its end and released (or is releasing) its
    /// resources; stop ticking it
    Ejecting,
}

/// A resumable, tick-driven unit of the pipeline.
///
/// Replaces the init/play/eject function-pointer triple of older player
/// cores with a capability interface dispatched statically per concrete
/// session kind.
pub trait Session {
    /// Perform one bounded unit of work.
    fn tick(&mut self) -> Result<TickStatus>;

    /// Release all owned resources in reverse-acquisition order.
    /// Idempotent; safe after a failed open or a fatal tick error.
    fn close(&mut self);
}
