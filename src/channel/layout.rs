//! Channel region layout and in-place initialization
//!
//! A channel region is one contiguous shared memory mapping:
//!
//! ```text
//! ┌──────────────┬─────────┬─────────┬─────────┬──────────┬──────────┬──────────┬───────────────┐
//! │ ChannelHeader│  stats  │ ctrl SQ │ ctrl CQ │ eng→app  │ app→eng  │ free ring│  buffer pool  │
//! │  (magic last)│         │  ring   │  ring   │   ring   │   ring   │  (MPMC)  │ (page aligned)│
//! └──────────────┴─────────┴─────────┴─────────┴──────────┴──────────┴──────────┴───────────────┘
//! ```
//!
//! Every section is placed back to back at cache-line granularity; the
//! buffer pool starts on a page boundary and the total size is padded to a
//! whole number of pages. The header's `magic` field is stored last, under
//! full fences, so a mapper observing `CHANNEL_MAGIC` is guaranteed to see
//! a fully initialized region.

use std::{
    mem::size_of,
    ptr::NonNull,
    sync::atomic::{fence, AtomicU64, Ordering},
};

use crate::{
    channel::{config::ChannelConfig, ctrl::CtrlQueueEntry, stats::ChannelStats},
    error::{MonetError, Result},
    msgbuf::{MsgBuf, MSGBUF_HEADROOM_MAX},
    ring::{AccessMode, BulkRing, RingSlot},
};

/// Value published into `ChannelHeader::magic` once a region is ready.
pub const CHANNEL_MAGIC: u64 = 0x4D4F_4E45_545F_4348; // "MONET_CH"

/// Current channel layout version; checked on attach.
pub const CHANNEL_VERSION: u32 = 1;

/// Fixed width of the name field, terminator included.
pub const CHANNEL_NAME_MAX: usize = 64;

/// Slot count of each control ring (submission and completion).
pub const CTRL_RING_SLOT_NR: u32 = 2;

/// Size of an anonymous huge page backing a channel.
pub const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

/// Header at offset 0 of every channel region.
///
/// `magic` is the publish marker: zero (or garbage) means the region is
/// mid-initialization or corrupted and must not be used. All other fields
/// are constant once `magic` carries [`CHANNEL_MAGIC`].
#[repr(C, align(64))]
pub struct ChannelHeader {
    magic: AtomicU64,
    version: u32,
    _pad0: u32,
    size: u64,
    name: [u8; CHANNEL_NAME_MAX],
    stats_ofs: u64,
    ctrl_sq_ofs: u64,
    ctrl_cq_ofs: u64,
    engine_ring_ofs: u64,
    app_ring_ofs: u64,
    buf_ring_ofs: u64,
    buf_pool_ofs: u64,
    _reserved_ofs: u64,
    buf_size: u32,
    buf_mss: u32,
    buf_pool_mask: u32,
    _pad1: u32,
}

impl ChannelHeader {
    /// Total region size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Channel name as stored in the header.
    pub fn name(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(CHANNEL_NAME_MAX);
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Stride of one pool slot in bytes (header + headroom + payload,
    /// rounded to a power of 2).
    pub fn buf_size(&self) -> u32 {
        self.buf_size
    }

    /// Usable payload bytes per buffer.
    pub fn buf_mss(&self) -> u32 {
        self.buf_mss
    }

    /// Pool index mask; the pool holds `buf_pool_mask + 1` slots.
    pub fn buf_pool_mask(&self) -> u32 {
        self.buf_pool_mask
    }

    pub(crate) fn stats_ofs(&self) -> usize {
        self.stats_ofs as usize
    }
    pub(crate) fn ctrl_sq_ofs(&self) -> usize {
        self.ctrl_sq_ofs as usize
    }
    pub(crate) fn ctrl_cq_ofs(&self) -> usize {
        self.ctrl_cq_ofs as usize
    }
    pub(crate) fn engine_ring_ofs(&self) -> usize {
        self.engine_ring_ofs as usize
    }
    pub(crate) fn app_ring_ofs(&self) -> usize {
        self.app_ring_ofs as usize
    }
    pub(crate) fn buf_ring_ofs(&self) -> usize {
        self.buf_ring_ofs as usize
    }
    pub(crate) fn buf_pool_ofs(&self) -> usize {
        self.buf_pool_ofs as usize
    }
}

/// Computed placement of every section of a channel region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    pub stats_ofs: usize,
    pub ctrl_sq_ofs: usize,
    pub ctrl_cq_ofs: usize,
    pub engine_ring_ofs: usize,
    pub app_ring_ofs: usize,
    pub buf_ring_ofs: usize,
    pub buf_pool_ofs: usize,
    /// Stride of one pool slot
    pub buf_size: u32,
    /// Page size the layout was computed for
    pub page_size: usize,
    /// Total region bytes, page aligned
    pub total_size: usize,
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

impl ChannelLayout {
    /// Compute the layout of a channel region for `cfg`, assuming pages of
    /// `page_size` bytes (huge or regular, depending on the backing).
    pub fn compute(cfg: &ChannelConfig, page_size: usize) -> Result<Self> {
        cfg.validate()?;

        if cfg.buf_mss as usize > page_size {
            return Err(MonetError::invalid_parameter(
                "buf_mss",
                format!("Buffer MSS exceeds the backing page size {}", page_size),
            ));
        }

        let buf_size = (cfg.buf_mss + size_of::<MsgBuf>() as u32 + MSGBUF_HEADROOM_MAX)
            .next_power_of_two();

        let mut ofs = size_of::<ChannelHeader>();
        let stats_ofs = ofs;
        ofs += size_of::<ChannelStats>();

        let ctrl_sq_ofs = ofs;
        ofs += BulkRing::<CtrlQueueEntry>::mem_size(CTRL_RING_SLOT_NR)?;
        let ctrl_cq_ofs = ofs;
        ofs += BulkRing::<CtrlQueueEntry>::mem_size(CTRL_RING_SLOT_NR)?;

        let engine_ring_ofs = ofs;
        ofs += BulkRing::<RingSlot>::mem_size(cfg.engine_ring_slots)?;
        let app_ring_ofs = ofs;
        ofs += BulkRing::<RingSlot>::mem_size(cfg.app_ring_slots)?;
        let buf_ring_ofs = ofs;
        ofs += BulkRing::<RingSlot>::mem_size(cfg.buf_ring_slots)?;

        let buf_pool_ofs = align_up(ofs, page_size);
        let pool_bytes = cfg.buf_ring_slots as usize * buf_size as usize;
        let total_size = align_up(buf_pool_ofs + pool_bytes, page_size);

        Ok(Self {
            stats_ofs,
            ctrl_sq_ofs,
            ctrl_cq_ofs,
            engine_ring_ofs,
            app_ring_ofs,
            buf_ring_ofs,
            buf_pool_ofs,
            buf_size,
            page_size,
            total_size,
        })
    }
}

/// View the header of a mapped region.
///
/// # Safety
/// `base` must point to a mapping of at least `size_of::<ChannelHeader>()`
/// bytes that outlives the returned reference.
pub(crate) unsafe fn header_at<'a>(base: NonNull<u8>) -> &'a ChannelHeader {
    &*(base.as_ptr() as *const ChannelHeader)
}

/// Check the publish marker and version of a mapped region.
pub(crate) fn validate_header(hdr: &ChannelHeader, name: &str) -> Result<()> {
    if hdr.magic.load(Ordering::Acquire) != CHANNEL_MAGIC {
        return Err(MonetError::unmapped(name));
    }
    if hdr.version != CHANNEL_VERSION {
        return Err(MonetError::version_mismatch(CHANNEL_VERSION, hdr.version));
    }
    Ok(())
}

/// Initialize a channel region in place: header, statistics, all five
/// rings, every buffer header, and the free ring population. The magic is
/// stored last, under full fences.
///
/// # Safety
/// `base` must point to `layout.total_size` writable zeroed bytes, page
/// aligned, that no other thread is accessing.
pub(crate) unsafe fn init_region(
    base: NonNull<u8>,
    cfg: &ChannelConfig,
    layout: &ChannelLayout,
) -> Result<()> {
    let at = |ofs: usize| NonNull::new_unchecked(base.as_ptr().add(ofs));

    let hdr = base.as_ptr() as *mut ChannelHeader;
    let mut name = [0u8; CHANNEL_NAME_MAX];
    name[..cfg.name.len()].copy_from_slice(cfg.name.as_bytes());
    hdr.write(ChannelHeader {
        magic: AtomicU64::new(0),
        version: CHANNEL_VERSION,
        _pad0: 0,
        size: layout.total_size as u64,
        name,
        stats_ofs: layout.stats_ofs as u64,
        ctrl_sq_ofs: layout.ctrl_sq_ofs as u64,
        ctrl_cq_ofs: layout.ctrl_cq_ofs as u64,
        engine_ring_ofs: layout.engine_ring_ofs as u64,
        app_ring_ofs: layout.app_ring_ofs as u64,
        buf_ring_ofs: layout.buf_ring_ofs as u64,
        buf_pool_ofs: layout.buf_pool_ofs as u64,
        _reserved_ofs: 0,
        buf_size: layout.buf_size,
        buf_mss: cfg.buf_mss,
        buf_pool_mask: cfg.buf_ring_slots - 1,
        _pad1: 0,
    });

    std::ptr::write_bytes(
        base.as_ptr().add(layout.stats_ofs),
        0,
        size_of::<ChannelStats>(),
    );

    // The application side of every queue pair is assumed multi-threaded;
    // the engine side widens only when the engine itself is.
    let engine = if cfg.multi_threaded_engine {
        AccessMode::Multi
    } else {
        AccessMode::Single
    };
    let app = AccessMode::Multi;

    BulkRing::<CtrlQueueEntry>::init_at(at(layout.ctrl_sq_ofs), CTRL_RING_SLOT_NR, app, engine)?;
    BulkRing::<CtrlQueueEntry>::init_at(at(layout.ctrl_cq_ofs), CTRL_RING_SLOT_NR, engine, app)?;
    BulkRing::<RingSlot>::init_at(at(layout.engine_ring_ofs), cfg.engine_ring_slots, engine, app)?;
    BulkRing::<RingSlot>::init_at(at(layout.app_ring_ofs), cfg.app_ring_slots, app, engine)?;
    let buf_ring = BulkRing::<RingSlot>::init_at(
        at(layout.buf_ring_ofs),
        cfg.buf_ring_slots,
        AccessMode::Multi,
        AccessMode::Multi,
    )?;

    // Stamp the immutable identity of every pool slot.
    let pool_base = base.as_ptr().add(layout.buf_pool_ofs);
    for i in 0..cfg.buf_ring_slots {
        let slot = pool_base.add(i as usize * layout.buf_size as usize) as *mut MsgBuf;
        MsgBuf::init_slot(slot, i, cfg.buf_mss);
    }

    // Hand every circulating index to the free ring. The highest index
    // stays out of circulation: an n-slot ring holds n - 1 entries.
    let circulating = cfg.buf_ring_slots - 1;
    let indices: Vec<RingSlot> = (0..circulating).collect();
    let enqueued = buf_ring.enqueue_bulk(&indices);
    if enqueued != circulating as usize || buf_ring.free_count() != 0 {
        return Err(MonetError::corrupted(
            "free ring population did not fill the ring",
        ));
    }

    fence(Ordering::SeqCst);
    header_at(base).magic.store(CHANNEL_MAGIC, Ordering::SeqCst);
    fence(Ordering::SeqCst);

    Ok(())
}
