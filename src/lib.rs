//! # Monet - Shared Memory Dataplane Channels
//!
//! Monet is the shared memory channel core used between a user-space
//! network stack (the "engine") and client applications on the same host.
//! A channel is one contiguous shared memory region carrying a control
//! queue pair, a bidirectional message queue pair, a pool of fixed-size
//! message buffers and the free ring indexing them. Applications enqueue
//! send requests and consume received messages purely by producing and
//! consuming indices on lock-free rings; no syscalls occur on the hot path.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                     Channel Region                         │
//! ├───────────┬────────┬─────────────────┬─────────────────────┤
//! │  Header   │ Stats  │  Control SQ/CQ  │   eng→app  app→eng  │
//! │ (magic    │        │  (2-slot rings) │   ring     ring     │
//! │  last)    │        │                 │                     │
//! ├───────────┴────────┴─────────────────┴─────────────────────┤
//! │  Free ring (MPMC)  │  Buffer pool (page aligned)           │
//! └────────────────────┴───────────────────────────────────────┘
//!        ▲ engine polls                  ▲ application maps
//! ```
//!
//! Buffers transit between four states — free, engine-owned, in flight,
//! application-owned — purely by where their slot index currently sits.
//! Pointers never cross the process boundary: each side resolves indices
//! against its own mapping.
//!
//! ## Quick start
//!
//! ```no_run
//! use monet::{ChannelConfig, ChannelManager, FlowKey, MsgBufBatch};
//!
//! # fn main() -> monet::Result<()> {
//! let manager = ChannelManager::new();
//! let channel = manager.add_channel(ChannelConfig::new("c0"))?;
//!
//! // Engine side: publish a message to the application.
//! let head = channel.build_chain(b"Hello World!", FlowKey::default())?;
//! channel.enqueue_messages(&[head]);
//!
//! // Application side: receive and reassemble.
//! let mut batch = MsgBufBatch::new();
//! channel.app_recv_messages(&mut batch);
//! for slot in batch.iter() {
//!     let mut payload = Vec::new();
//!     channel.read_chain(slot, &mut payload)?;
//!     channel.free_chain(slot)?;
//! }
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod channel;
pub mod error;
pub mod msgbuf;
pub mod ring;

// Main API re-exports
pub use channel::{
    Backing, Channel, ChannelConfig, ChannelManager, ChannelRegion, ChannelStats,
    ChannelStatsSnapshot, CtrlQueueEntry, DmaRegion, DmaRegistrar, CHANNEL_MAGIC,
    CHANNEL_VERSION, MAX_CHANNEL_NR,
};
pub use error::{MonetError, Result};
pub use msgbuf::{FlowKey, MsgBuf, MsgBufBatch, MAX_BURST, MSG_MAX_LEN};
pub use ring::{AccessMode, BulkRing, RingSlot};
