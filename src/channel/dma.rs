//! External memory registration for NIC DMA
//!
//! When a NIC driver owns buffer lifetimes through descriptors referencing
//! channel memory, the buffer pool's pages must be registered with the
//! device and a release hook supplied. The channel core only provides the
//! seam; a driver integration implements [`DmaRegistrar`] and decides what
//! its release path needs. Pure in-memory deployments never touch this.

use std::ptr::NonNull;

use crate::{error::Result, ring::RingSlot};

/// The pages a registrar must make visible to a device.
#[derive(Debug, Clone, Copy)]
pub struct DmaRegion {
    /// Start of the buffer pool (page aligned)
    pub base: NonNull<u8>,
    /// Length of the pool in bytes
    pub len: usize,
    /// Page size the pool was laid out with
    pub page_size: usize,
}

/// Device-side registration of a channel's buffer pool.
pub trait DmaRegistrar {
    /// Register the pool's pages for DMA.
    fn register(&mut self, region: &DmaRegion) -> Result<()>;

    /// Undo a registration.
    fn unregister(&mut self, region: &DmaRegion);

    /// Called when the device releases a buffer it held a reference to.
    ///
    /// The default is a no-op: drivers whose fast-free path reinitializes
    /// descriptors themselves need no extra bookkeeping here.
    fn on_buffer_release(&mut self, _slot: RingSlot) {}
}
