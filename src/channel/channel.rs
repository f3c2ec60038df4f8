//! Mapped channel handle and dataplane operations

use std::{os::fd::RawFd, ptr::NonNull};

use log::{debug, warn};

use crate::{
    channel::{
        config::ChannelConfig,
        ctrl::CtrlQueueEntry,
        layout::{self, ChannelHeader, ChannelLayout, HUGE_PAGE_SIZE},
        provider::{backing_page_size, Backing, ChannelRegion},
        stats::ChannelStats,
    },
    error::{MonetError, Result},
    msgbuf::{
        FlowKey, MsgBuf, MsgBufBatch, MAX_BURST, MSGBUF_FLAG_FIRST, MSGBUF_FLAG_LAST,
        MSG_MAX_LEN,
    },
    ring::{BulkRing, RingSlot},
};

/// One endpoint's view of a mapped dataplane channel.
///
/// A `Channel` owns the mapping of its region and exposes the ring and
/// buffer operations both endpoints use. All hot-path operations are
/// nonblocking and return counts; ownership of a buffer follows its slot
/// index across the rings, so a slot handed to an enqueue must not be
/// touched again by the caller.
#[derive(Debug)]
pub struct Channel {
    region: ChannelRegion,
    ctrl_sq: BulkRing<CtrlQueueEntry>,
    ctrl_cq: BulkRing<CtrlQueueEntry>,
    engine_ring: BulkRing<RingSlot>,
    app_ring: BulkRing<RingSlot>,
    buf_ring: BulkRing<RingSlot>,
    free_retry_limit: u32,
}

impl Channel {
    /// Create the backing region for `config`, initialize it and return the
    /// creating endpoint's handle. Huge pages are tried first (unless the
    /// config opts out); POSIX shared memory is the fallback. Any
    /// initialization failure unmaps and unlinks the region.
    pub fn create(config: ChannelConfig) -> Result<Self> {
        config.validate()?;

        let (region, chan_layout) = Self::create_region(&config)?;
        debug_assert!(region.len() >= chan_layout.total_size);

        // Failure here drops `region`, which unlinks the POSIX object, so
        // no reader can observe a half-initialized channel.
        unsafe { layout::init_region(region.base(), &config, &chan_layout)? };

        debug!(
            "created channel {} ({} bytes, {:?})",
            config.name,
            chan_layout.total_size,
            region.backing()
        );
        Ok(Self::wire(region, config.free_retry_limit))
    }

    fn create_region(config: &ChannelConfig) -> Result<(ChannelRegion, ChannelLayout)> {
        if config.prefer_huge_pages {
            let chan_layout = ChannelLayout::compute(config, HUGE_PAGE_SIZE)?;
            match ChannelRegion::create_hugetlb(&config.name, chan_layout.total_size) {
                Ok(region) => return Ok((region, chan_layout)),
                Err(e) => {
                    warn!(
                        "huge page backing for channel {} unavailable ({}); falling back to POSIX shm",
                        config.name, e
                    );
                }
            }
        }

        let page = backing_page_size(Backing::PosixShm);
        let chan_layout = ChannelLayout::compute(config, page)?;
        let region = ChannelRegion::create_posix(&config.name, chan_layout.total_size)?;
        Ok((region, chan_layout))
    }

    /// Attach to an already mapped region. Refuses regions whose magic is
    /// not published ([`MonetError::Unmapped`]) or whose version differs.
    pub fn attach(region: ChannelRegion) -> Result<Self> {
        let hdr = unsafe { layout::header_at(region.base()) };
        layout::validate_header(hdr, region.name())?;
        if (hdr.size() as usize) > region.len() {
            return Err(MonetError::corrupted(
                "region mapping is smaller than the channel claims",
            ));
        }
        Ok(Self::wire(region, crate::channel::config::DEFAULT_FREE_RETRY_LIMIT))
    }

    /// Resolve the ring views out of a validated (or freshly initialized)
    /// region.
    fn wire(region: ChannelRegion, free_retry_limit: u32) -> Self {
        let base = region.base();
        let hdr = unsafe { layout::header_at(base) };
        let at = |ofs: usize| unsafe { NonNull::new_unchecked(base.as_ptr().add(ofs)) };

        let ctrl_sq = unsafe { BulkRing::from_raw(at(hdr.ctrl_sq_ofs())) };
        let ctrl_cq = unsafe { BulkRing::from_raw(at(hdr.ctrl_cq_ofs())) };
        let engine_ring = unsafe { BulkRing::from_raw(at(hdr.engine_ring_ofs())) };
        let app_ring = unsafe { BulkRing::from_raw(at(hdr.app_ring_ofs())) };
        let buf_ring = unsafe { BulkRing::from_raw(at(hdr.buf_ring_ofs())) };

        Self {
            region,
            ctrl_sq,
            ctrl_cq,
            engine_ring,
            app_ring,
            buf_ring,
            free_retry_limit,
        }
    }

    fn header(&self) -> &ChannelHeader {
        unsafe { layout::header_at(self.region.base()) }
    }

    /// Channel name from the region header.
    pub fn name(&self) -> &str {
        self.header().name()
    }

    /// Total region size in bytes.
    pub fn size(&self) -> u64 {
        self.header().size()
    }

    /// Descriptor of the backing memory, for the handshake collaborator.
    pub fn fd(&self) -> RawFd {
        self.region.fd()
    }

    /// Whether the region sits in POSIX shared memory (fallback backing).
    pub fn is_posix_shm(&self) -> bool {
        self.region.is_posix_shm()
    }

    /// The in-region statistics block.
    pub fn stats(&self) -> &ChannelStats {
        unsafe {
            &*(self.region.base().as_ptr().add(self.header().stats_ofs()) as *const ChannelStats)
        }
    }

    // --- control queue pair ---------------------------------------------

    /// Engine side: pull pending control requests. Returns the number
    /// dequeued.
    pub fn dequeue_ctrl_requests(&self, out: &mut [CtrlQueueEntry]) -> usize {
        self.ctrl_sq.dequeue_burst(out)
    }

    /// Engine side: post control completions. All-or-nothing; returns the
    /// number enqueued.
    pub fn enqueue_ctrl_completions(&self, entries: &[CtrlQueueEntry]) -> usize {
        self.ctrl_cq.enqueue_bulk(entries)
    }

    /// Application side: submit control requests. All-or-nothing.
    pub fn enqueue_ctrl_requests(&self, entries: &[CtrlQueueEntry]) -> usize {
        self.ctrl_sq.enqueue_bulk(entries)
    }

    /// Application side: reap control completions.
    pub fn dequeue_ctrl_completions(&self, out: &mut [CtrlQueueEntry]) -> usize {
        self.ctrl_cq.dequeue_burst(out)
    }

    // --- data rings ------------------------------------------------------

    /// Engine side: publish message heads to the application
    /// (engine→app ring). All-or-nothing; returns the number enqueued.
    /// Ownership of the slots transfers on success.
    pub fn enqueue_messages(&self, slots: &[RingSlot]) -> usize {
        let n = self.engine_ring.enqueue_bulk(slots);
        self.note_enqueue(slots.len(), n);
        n
    }

    /// Engine side: publish a whole batch to the application.
    pub fn enqueue_message_batch(&self, batch: &MsgBufBatch) -> usize {
        self.enqueue_messages(batch.slots())
    }

    /// Engine side: publish messages given as buffer references, up to
    /// [`MAX_BURST`] at a time.
    pub fn enqueue_message_bufs(&self, bufs: &[&MsgBuf]) -> usize {
        let mut slots = [0 as RingSlot; MAX_BURST];
        let n = bufs.len().min(MAX_BURST);
        for (i, buf) in bufs[..n].iter().enumerate() {
            slots[i] = self.buf_index(buf);
        }
        self.enqueue_messages(&slots[..n])
    }

    /// Resolve every index in a batch to its buffer header.
    pub fn msgbufs<'a>(
        &'a self,
        batch: &'a MsgBufBatch,
    ) -> impl Iterator<Item = &'a MsgBuf> + 'a {
        batch.iter().map(move |slot| self.msgbuf(slot))
    }

    /// Engine side: drain messages the application posted (app→engine
    /// ring), appending their slot indices to `batch`.
    pub fn dequeue_messages(&self, batch: &mut MsgBufBatch) -> usize {
        let n = self.app_ring.dequeue_burst(batch.spare_mut());
        batch.commit(n);
        self.stats().add_dequeued(n as u64);
        n
    }

    /// Application side: post message heads to the engine (app→engine
    /// ring). All-or-nothing.
    pub fn app_send_messages(&self, slots: &[RingSlot]) -> usize {
        let n = self.app_ring.enqueue_bulk(slots);
        self.note_enqueue(slots.len(), n);
        n
    }

    /// Application side: receive messages from the engine (engine→app
    /// ring), appending their slot indices to `batch`.
    pub fn app_recv_messages(&self, batch: &mut MsgBufBatch) -> usize {
        let n = self.engine_ring.dequeue_burst(batch.spare_mut());
        batch.commit(n);
        self.stats().add_dequeued(n as u64);
        n
    }

    fn note_enqueue(&self, requested: usize, enqueued: usize) {
        let stats = self.stats();
        stats.add_enqueued(enqueued as u64);
        if enqueued < requested {
            stats.add_ring_full_drops((requested - enqueued) as u64);
        }
    }

    // --- buffer pool -----------------------------------------------------

    /// Pop one buffer from the free ring and reset it.
    pub fn alloc_buffer(&self) -> Result<RingSlot> {
        let mut slot = [0 as RingSlot];
        if self.buf_ring.dequeue_bulk(&mut slot) != 1 {
            self.stats().add_alloc_failures(1);
            return Err(MonetError::pool_exhausted(1, 0));
        }
        unsafe { self.msgbuf_mut(slot[0]) }.reset();
        self.stats().add_allocated(1);
        Ok(slot[0])
    }

    /// Pop up to `n` buffers from the free ring into `batch`, resetting
    /// each. Returns the number allocated, which may be less than `n` when
    /// the pool runs low.
    pub fn alloc_buffers(&self, batch: &mut MsgBufBatch, n: usize) -> usize {
        let want = n.min(batch.room());
        let got = self.buf_ring.dequeue_burst(&mut batch.spare_mut()[..want]);
        batch.commit(got);
        let slots = batch.slots();
        for &slot in &slots[slots.len() - got..] {
            unsafe { self.msgbuf_mut(slot) }.reset();
        }
        let stats = self.stats();
        stats.add_allocated(got as u64);
        if got < want {
            stats.add_alloc_failures(1);
        }
        got
    }

    /// Return one buffer to the free ring, retrying a bounded number of
    /// times while concurrent producers publish their tails. Persistent
    /// refusal indicates a pool invariant violation and is reported, not
    /// retried forever.
    pub fn free_buffer(&self, slot: RingSlot) -> Result<()> {
        self.free_slots(&[slot])
    }

    /// Return a whole batch to the free ring; the batch is cleared on
    /// success.
    pub fn free_buffers(&self, batch: &mut MsgBufBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.free_slots(batch.slots())?;
        batch.clear();
        Ok(())
    }

    fn free_slots(&self, slots: &[RingSlot]) -> Result<()> {
        let mut retries = self.free_retry_limit;
        loop {
            if self.buf_ring.enqueue_bulk(slots) == slots.len() {
                self.stats().add_freed(slots.len() as u64);
                return Ok(());
            }
            if retries == 0 {
                self.stats().add_free_failures(1);
                warn!(
                    "channel {}: free ring refused {} buffers after {} retries",
                    self.name(),
                    slots.len(),
                    self.free_retry_limit
                );
                return Err(MonetError::corrupted(
                    "free ring persistently refused a buffer release",
                ));
            }
            retries -= 1;
            std::hint::spin_loop();
        }
    }

    // --- buffer resolution and geometry ----------------------------------

    /// Resolve a slot index to its buffer header.
    ///
    /// The reference is valid for the channel's lifetime; which endpoint
    /// may touch the contents is governed by ring ownership.
    pub fn msgbuf(&self, slot: RingSlot) -> &MsgBuf {
        assert!(slot <= self.header().buf_pool_mask(), "slot out of range");
        let buf = unsafe { &*(self.buf_ptr(slot) as *const MsgBuf) };
        debug_assert!(buf.is_valid());
        buf
    }

    /// Resolve a slot index to a mutable buffer header.
    ///
    /// # Safety
    /// The caller must currently own `slot` (obtained from an alloc or a
    /// dequeue and not yet passed on), so no other thread is accessing it.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn msgbuf_mut(&self, slot: RingSlot) -> &mut MsgBuf {
        assert!(slot <= self.header().buf_pool_mask(), "slot out of range");
        &mut *(self.buf_ptr(slot) as *mut MsgBuf)
    }

    /// Slot index of a buffer resolved from this channel.
    pub fn buf_index(&self, buf: &MsgBuf) -> RingSlot {
        let hdr = self.header();
        debug_assert_eq!(
            (buf as *const MsgBuf as usize - self.buf_pool_base().as_ptr() as usize)
                / hdr.buf_size() as usize,
            buf.index() as usize
        );
        buf.index()
    }

    fn buf_ptr(&self, slot: RingSlot) -> *mut u8 {
        let hdr = self.header();
        unsafe {
            self.region
                .base()
                .as_ptr()
                .add(hdr.buf_pool_ofs() + slot as usize * hdr.buf_size() as usize)
        }
    }

    /// Base address of the buffer pool.
    pub fn buf_pool_base(&self) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(self.buf_ptr(0)) }
    }

    /// Total bytes of the buffer pool.
    pub fn buf_pool_size(&self) -> usize {
        self.total_buf_count() as usize * self.header().buf_size() as usize
    }

    /// Number of buffer records in the pool.
    pub fn total_buf_count(&self) -> u32 {
        self.header().buf_pool_mask() + 1
    }

    /// Number of buffers currently sitting on the free ring.
    pub fn free_buf_count(&self) -> u32 {
        self.buf_ring.count()
    }

    /// Usable payload bytes per buffer (the MSS).
    pub fn usable_buf_size(&self) -> u32 {
        self.header().buf_mss()
    }

    /// Stride of one pool slot in bytes.
    pub fn total_buf_size(&self) -> u32 {
        self.header().buf_size()
    }

    /// Describe the buffer pool pages for device registration.
    pub fn dma_region(&self) -> crate::channel::dma::DmaRegion {
        crate::channel::dma::DmaRegion {
            base: self.buf_pool_base(),
            len: self.buf_pool_size(),
            page_size: crate::channel::provider::backing_page_size(self.region.backing()),
        }
    }

    /// Register the buffer pool with a device for DMA.
    pub fn register_dma(&self, registrar: &mut dyn crate::channel::dma::DmaRegistrar) -> Result<()> {
        registrar.register(&self.dma_region())
    }

    /// Unregister the buffer pool from a device.
    pub fn unregister_dma(&self, registrar: &mut dyn crate::channel::dma::DmaRegistrar) {
        registrar.unregister(&self.dma_region())
    }

    // --- message chains ---------------------------------------------------

    /// Build a (possibly multi-buffer) message from `payload`: allocate the
    /// chain, copy the payload in MSS-sized segments, link the buffers and
    /// flag the head and tail. Returns the head slot, ready to enqueue.
    /// Partial allocations are returned to the pool on failure.
    pub fn build_chain(&self, payload: &[u8], flow: FlowKey) -> Result<RingSlot> {
        if payload.len() > MSG_MAX_LEN as usize {
            return Err(MonetError::invalid_parameter(
                "payload",
                format!("Message exceeds the {} byte cap", MSG_MAX_LEN),
            ));
        }

        let mss = self.usable_buf_size() as usize;
        let nsegs = payload.len().div_ceil(mss).max(1);

        let mut slots = Vec::with_capacity(nsegs);
        for _ in 0..nsegs {
            match self.alloc_buffer() {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    for slot in slots {
                        let _ = self.free_buffer(slot);
                    }
                    return Err(e);
                }
            }
        }

        let mut chunks = payload.chunks(mss);
        for (i, &slot) in slots.iter().enumerate() {
            let buf = unsafe { self.msgbuf_mut(slot) };
            if let Some(chunk) = chunks.next() {
                buf.append(chunk)?;
            }
            if i + 1 < slots.len() {
                buf.set_next(slots[i + 1]);
            }
        }

        let head = unsafe { self.msgbuf_mut(slots[0]) };
        head.set_flags(MSGBUF_FLAG_FIRST);
        head.set_msg_len(payload.len() as u32);
        head.set_peer_flow(flow);
        unsafe { self.msgbuf_mut(slots[nsegs - 1]) }.set_flags(MSGBUF_FLAG_LAST);

        Ok(slots[0])
    }

    /// Walk a received chain from its head slot, validating the chain
    /// invariants and appending the reassembled payload to `out`. Returns
    /// the flow the message belongs to.
    pub fn read_chain(&self, first: RingSlot, out: &mut Vec<u8>) -> Result<FlowKey> {
        let head = self.msgbuf(first);
        if !head.is_valid() {
            return Err(MonetError::corrupted("chain head has a bad magic"));
        }
        if !head.is_first() {
            return Err(MonetError::corrupted("chain head is not flagged FIRST"));
        }

        let msg_len = head.msg_len();
        let flow = head.peer_flow();
        let max_hops = (MSG_MAX_LEN / self.usable_buf_size()) as usize + 1;

        let mut slot = first;
        let mut total = 0usize;
        for hop in 0.. {
            if hop >= max_hops {
                return Err(MonetError::corrupted("chain exceeds the hop bound"));
            }
            let buf = self.msgbuf(slot);
            if !buf.is_valid() {
                return Err(MonetError::corrupted("chain buffer has a bad magic"));
            }
            if hop > 0 && buf.is_first() {
                return Err(MonetError::corrupted("chain has more than one FIRST"));
            }
            out.extend_from_slice(buf.payload());
            total += buf.seg_len() as usize;

            if buf.is_last() {
                if buf.next().is_some() {
                    return Err(MonetError::corrupted("LAST buffer links a successor"));
                }
                break;
            }
            slot = buf
                .next()
                .ok_or_else(|| MonetError::corrupted("chain ends without a LAST buffer"))?;
        }

        if total != msg_len as usize {
            return Err(MonetError::corrupted(format!(
                "chain length mismatch: header says {}, segments sum to {}",
                msg_len, total
            )));
        }
        Ok(flow)
    }

    /// Release every buffer of a chain back to the pool.
    pub fn free_chain(&self, first: RingSlot) -> Result<()> {
        let max_hops = (MSG_MAX_LEN / self.usable_buf_size()) as usize + 1;
        let mut slot = Some(first);
        let mut hops = 0;
        while let Some(s) = slot {
            if hops >= max_hops {
                return Err(MonetError::corrupted("chain exceeds the hop bound"));
            }
            slot = self.msgbuf(s).next();
            self.free_buffer(s)?;
            hops += 1;
        }
        Ok(())
    }
}

unsafe impl Send for Channel {}
unsafe impl Sync for Channel {}
