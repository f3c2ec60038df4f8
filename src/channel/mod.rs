//! Dataplane channels: region layout, backing memory, the mapped handle
//! and the process-local registry
//!
//! A channel is one contiguous shared memory region binding an engine
//! endpoint to an application endpoint: a control queue pair, a message
//! queue pair, a pool of fixed-size message buffers and the free ring
//! indexing them. Everything on the hot path is an index operation on a
//! lock-free ring; no syscalls, no mutexes, no blocking.

#[allow(clippy::module_inception)]
mod channel;
mod config;
mod ctrl;
pub mod dma;
mod layout;
mod manager;
mod provider;
mod stats;

pub use channel::Channel;
pub use config::{
    ChannelConfig, DEFAULT_BUF_MSS, DEFAULT_BUF_SLOTS, DEFAULT_FREE_RETRY_LIMIT,
    DEFAULT_RING_SLOTS,
};
pub use ctrl::{
    CtrlQueueEntry, CTRL_OP_CLOSE, CTRL_OP_CONNECT, CTRL_OP_LISTEN, CTRL_PAYLOAD_LEN,
    CTRL_STATUS_FAILURE, CTRL_STATUS_OK,
};
pub use dma::{DmaRegion, DmaRegistrar};
pub use layout::{
    ChannelHeader, ChannelLayout, CHANNEL_MAGIC, CHANNEL_NAME_MAX, CHANNEL_VERSION,
    CTRL_RING_SLOT_NR, HUGE_PAGE_SIZE,
};
pub use manager::{ChannelManager, MAX_CHANNEL_NR};
pub use provider::{backing_page_size, system_page_size, Backing, ChannelRegion};
pub use stats::{ChannelStats, ChannelStatsSnapshot};
