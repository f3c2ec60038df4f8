//! Channel configuration

use serde::{Deserialize, Serialize};

use crate::{
    channel::layout::CHANNEL_NAME_MAX,
    error::{MonetError, Result},
};

/// Default number of slots on each data ring.
pub const DEFAULT_RING_SLOTS: u32 = 256;
/// Default number of buffers in the pool.
pub const DEFAULT_BUF_SLOTS: u32 = 4096;
/// Default usable payload bytes per buffer.
pub const DEFAULT_BUF_MSS: u32 = 1024;
/// Default bound on free-ring retry attempts.
pub const DEFAULT_FREE_RETRY_LIMIT: u32 = 5;

/// Configuration for creating a dataplane channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Name of the channel (and of the POSIX shared memory object on the
    /// fallback path)
    pub name: String,
    /// Slots on the engine→application message ring (power of 2)
    pub engine_ring_slots: u32,
    /// Slots on the application→engine message ring (power of 2)
    pub app_ring_slots: u32,
    /// Buffers in the pool; also the slot count of the free ring (power of 2)
    pub buf_ring_slots: u32,
    /// Usable payload bytes per buffer
    pub buf_mss: u32,
    /// Try anonymous huge pages before the POSIX shared memory fallback
    pub prefer_huge_pages: bool,
    /// Widen the engine side of the rings for a multi-threaded engine
    pub multi_threaded_engine: bool,
    /// Bounded retries when a free-ring enqueue transiently refuses
    pub free_retry_limit: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            engine_ring_slots: DEFAULT_RING_SLOTS,
            app_ring_slots: DEFAULT_RING_SLOTS,
            buf_ring_slots: DEFAULT_BUF_SLOTS,
            buf_mss: DEFAULT_BUF_MSS,
            prefer_huge_pages: true,
            multi_threaded_engine: false,
            free_retry_limit: DEFAULT_FREE_RETRY_LIMIT,
        }
    }
}

impl ChannelConfig {
    /// Create a configuration with defaults for everything but the name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the data ring slot counts
    pub fn with_ring_slots(mut self, engine: u32, app: u32) -> Self {
        self.engine_ring_slots = engine;
        self.app_ring_slots = app;
        self
    }

    /// Set the buffer pool slot count
    pub fn with_buf_slots(mut self, slots: u32) -> Self {
        self.buf_ring_slots = slots;
        self
    }

    /// Set the usable payload bytes per buffer
    pub fn with_buf_mss(mut self, mss: u32) -> Self {
        self.buf_mss = mss;
        self
    }

    /// Control the huge page preference
    pub fn with_huge_pages(mut self, prefer: bool) -> Self {
        self.prefer_huge_pages = prefer;
        self
    }

    /// Mark the engine side of the rings as multi-threaded
    pub fn with_multi_threaded_engine(mut self, multi: bool) -> Self {
        self.multi_threaded_engine = multi;
        self
    }

    /// Tune the bounded free-ring retry count
    pub fn with_free_retry_limit(mut self, limit: u32) -> Self {
        self.free_retry_limit = limit;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(MonetError::invalid_parameter(
                "name",
                "Channel name cannot be empty",
            ));
        }
        if self.name.len() >= CHANNEL_NAME_MAX {
            return Err(MonetError::invalid_parameter(
                "name",
                format!("Channel name must be shorter than {} bytes", CHANNEL_NAME_MAX),
            ));
        }
        if self.name.contains('\0') || self.name.contains('/') {
            return Err(MonetError::invalid_parameter(
                "name",
                "Channel name must not contain null bytes or '/'",
            ));
        }

        for (param, slots) in [
            ("engine_ring_slots", self.engine_ring_slots),
            ("app_ring_slots", self.app_ring_slots),
            ("buf_ring_slots", self.buf_ring_slots),
        ] {
            if slots < 2 || !slots.is_power_of_two() {
                return Err(MonetError::invalid_parameter(
                    param,
                    "Ring slot counts must be powers of 2 and at least 2",
                ));
            }
        }

        if self.buf_mss == 0 {
            return Err(MonetError::invalid_parameter(
                "buf_mss",
                "Buffer MSS must be greater than 0",
            ));
        }

        Ok(())
    }
}
