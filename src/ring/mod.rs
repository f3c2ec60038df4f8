//! Lock-free bulk rings for shared memory channels
//!
//! The ring in this module is the transport primitive of a channel: a
//! fixed-capacity FIFO of fixed-size records laid out in-place in a shared
//! memory region, with configurable single/multi concurrency modes per side.
//! Producers reserve a range with a CAS on the producer head, copy records,
//! then publish by advancing the producer tail; consumers mirror the same
//! protocol. No operation blocks and nothing in the ring requires a syscall.

mod bulk;
#[cfg(test)]
mod tests;

pub use bulk::{AccessMode, BulkRing, RING_ALIGN};

/// Index of a message buffer inside a channel's pool. Slot indices are the
/// only handle that crosses the process boundary; pointers never do.
pub type RingSlot = u32;
