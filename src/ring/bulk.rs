//! Bulk enqueue/dequeue ring living in-place in shared memory

use std::{
    marker::PhantomData,
    mem::{align_of, size_of},
    ptr::NonNull,
    sync::atomic::{AtomicU32, Ordering},
};

use crate::error::{MonetError, Result};

/// Alignment of the ring header and slot array (one cache line).
pub const RING_ALIGN: usize = 64;

/// Concurrency mode for one side of a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Exactly one thread drives this side
    Single,
    /// Multiple threads may drive this side concurrently
    Multi,
}

/// Producer or consumer position pair, padded to its own cache line
#[repr(C, align(64))]
struct HeadTail {
    /// Next position to reserve
    head: AtomicU32,
    /// Last published position; entries below it are visible to the peer
    tail: AtomicU32,
    /// Nonzero when multiple threads drive this side
    multi: u32,
}

/// Ring header as laid out in shared memory. The slot array follows
/// immediately after, cache-line aligned.
#[repr(C, align(64))]
struct RingHeader {
    /// Number of inline slots (power of two)
    slot_count: u32,
    /// `slot_count - 1`, used to mask positions into slot indices
    mask: u32,
    /// Usable capacity: `slot_count - 1`
    capacity: u32,
    /// Size of one record in bytes
    record_size: u32,
    prod: HeadTail,
    cons: HeadTail,
}

enum Behavior {
    /// Enqueue/dequeue exactly `n` records or none at all
    Fixed,
    /// Move as many records as possible, up to `n`
    Variable,
}

/// A fixed-capacity lock-free FIFO of `T` records placed in raw (usually
/// shared) memory. `BulkRing` itself is only a typed view: copies of it may
/// coexist in any number of processes mapping the same region.
///
/// Record visibility follows the classic head/tail protocol: slot writes
/// happen before the release store of the producer tail, and consumers load
/// the producer tail with acquire before touching slot memory.
pub struct BulkRing<T> {
    hdr: NonNull<RingHeader>,
    _marker: PhantomData<*mut T>,
}

impl<T: Copy> BulkRing<T> {
    /// Bytes of memory needed for a ring with `slot_count` slots of `T`,
    /// including the header. The result is a multiple of [`RING_ALIGN`], so
    /// rings can be packed back to back in a region.
    pub fn mem_size(slot_count: u32) -> Result<usize> {
        Self::check_geometry(slot_count)?;
        let bytes = size_of::<RingHeader>() + slot_count as usize * size_of::<T>();
        Ok((bytes + RING_ALIGN - 1) & !(RING_ALIGN - 1))
    }

    fn check_geometry(slot_count: u32) -> Result<()> {
        if size_of::<T>() == 0 {
            return Err(MonetError::invalid_parameter(
                "record_size",
                "Ring records must have a nonzero size",
            ));
        }
        if align_of::<T>() > RING_ALIGN {
            return Err(MonetError::invalid_parameter(
                "record_align",
                "Ring records must not require more than cache-line alignment",
            ));
        }
        if slot_count == 0 || !slot_count.is_power_of_two() {
            return Err(MonetError::invalid_parameter(
                "slot_count",
                "Ring slot count must be a power of 2 and greater than 0",
            ));
        }
        Ok(())
    }

    /// Initialize a ring in place at `mem` and return a view of it.
    ///
    /// # Safety
    /// `mem` must point to at least [`Self::mem_size`] writable bytes,
    /// aligned to [`RING_ALIGN`], that no other thread is accessing.
    pub unsafe fn init_at(
        mem: NonNull<u8>,
        slot_count: u32,
        prod_mode: AccessMode,
        cons_mode: AccessMode,
    ) -> Result<Self> {
        Self::check_geometry(slot_count)?;
        debug_assert_eq!(mem.as_ptr() as usize % RING_ALIGN, 0);

        let hdr = mem.as_ptr() as *mut RingHeader;
        hdr.write(RingHeader {
            slot_count,
            mask: slot_count - 1,
            capacity: slot_count - 1,
            record_size: size_of::<T>() as u32,
            prod: HeadTail {
                head: AtomicU32::new(0),
                tail: AtomicU32::new(0),
                multi: (prod_mode == AccessMode::Multi) as u32,
            },
            cons: HeadTail {
                head: AtomicU32::new(0),
                tail: AtomicU32::new(0),
                multi: (cons_mode == AccessMode::Multi) as u32,
            },
        });

        Ok(Self {
            hdr: NonNull::new_unchecked(hdr),
            _marker: PhantomData,
        })
    }

    /// Create a view of a ring previously initialized at `mem`.
    ///
    /// # Safety
    /// `mem` must point to a ring initialized with [`Self::init_at`] for the
    /// same record type `T`, and the mapping must outlive the view.
    pub unsafe fn from_raw(mem: NonNull<u8>) -> Self {
        let ring = Self {
            hdr: mem.cast::<RingHeader>(),
            _marker: PhantomData,
        };
        debug_assert_eq!(ring.header().record_size as usize, size_of::<T>());
        ring
    }

    fn header(&self) -> &RingHeader {
        unsafe { self.hdr.as_ref() }
    }

    fn slots(&self) -> *mut T {
        unsafe { self.hdr.as_ptr().cast::<u8>().add(size_of::<RingHeader>()) as *mut T }
    }

    /// Usable capacity of the ring (`slot_count - 1`).
    pub fn capacity(&self) -> u32 {
        self.header().capacity
    }

    /// Approximate number of records currently in the ring.
    pub fn count(&self) -> u32 {
        let hdr = self.header();
        let prod_tail = hdr.prod.tail.load(Ordering::Acquire);
        let cons_tail = hdr.cons.tail.load(Ordering::Acquire);
        prod_tail.wrapping_sub(cons_tail)
    }

    /// Approximate number of free entries (`capacity - count`).
    pub fn free_count(&self) -> u32 {
        self.capacity() - self.count()
    }

    /// Whether the ring currently holds no records.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Enqueue all of `items`, or nothing. Returns the number enqueued
    /// (`items.len()` or 0). Never blocks.
    pub fn enqueue_bulk(&self, items: &[T]) -> usize {
        self.do_enqueue(items, Behavior::Fixed)
    }

    /// Enqueue as many of `items` as fit. Returns the number enqueued.
    pub fn enqueue_burst(&self, items: &[T]) -> usize {
        self.do_enqueue(items, Behavior::Variable)
    }

    /// Dequeue exactly `out.len()` records, or nothing. Returns the number
    /// dequeued (`out.len()` or 0). Never blocks.
    pub fn dequeue_bulk(&self, out: &mut [T]) -> usize {
        self.do_dequeue(out, Behavior::Fixed)
    }

    /// Dequeue up to `out.len()` records. Returns the number dequeued.
    pub fn dequeue_burst(&self, out: &mut [T]) -> usize {
        self.do_dequeue(out, Behavior::Variable)
    }

    fn do_enqueue(&self, items: &[T], behavior: Behavior) -> usize {
        let n = items.len().min(u32::MAX as usize) as u32;
        if n == 0 {
            return 0;
        }

        let (taken, old_head) = self.move_prod_head(n, behavior);
        if taken == 0 {
            return 0;
        }

        unsafe { self.copy_in(old_head, &items[..taken as usize]) };
        self.publish(&self.header().prod, old_head, old_head.wrapping_add(taken));
        taken as usize
    }

    fn do_dequeue(&self, out: &mut [T], behavior: Behavior) -> usize {
        let n = out.len().min(u32::MAX as usize) as u32;
        if n == 0 {
            return 0;
        }

        let (taken, old_head) = self.move_cons_head(n, behavior);
        if taken == 0 {
            return 0;
        }

        unsafe { self.copy_out(old_head, &mut out[..taken as usize]) };
        self.publish(&self.header().cons, old_head, old_head.wrapping_add(taken));
        taken as usize
    }

    /// Reserve up to `n` entries on the producer side. Returns the reserved
    /// count and the old head position.
    fn move_prod_head(&self, n: u32, behavior: Behavior) -> (u32, u32) {
        let hdr = self.header();
        let multi = hdr.prod.multi != 0;
        loop {
            let old_head = hdr.prod.head.load(Ordering::Relaxed);
            // Pair with the consumer's tail release so freed slots are
            // observed before they are overwritten.
            let cons_tail = hdr.cons.tail.load(Ordering::Acquire);
            let free = hdr.capacity - old_head.wrapping_sub(cons_tail);

            let taken = match behavior {
                Behavior::Fixed => {
                    if free < n {
                        0
                    } else {
                        n
                    }
                }
                Behavior::Variable => n.min(free),
            };
            if taken == 0 {
                return (0, 0);
            }

            let new_head = old_head.wrapping_add(taken);
            if !multi {
                hdr.prod.head.store(new_head, Ordering::Relaxed);
                return (taken, old_head);
            }
            if hdr
                .prod
                .head
                .compare_exchange_weak(old_head, new_head, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return (taken, old_head);
            }
        }
    }

    fn move_cons_head(&self, n: u32, behavior: Behavior) -> (u32, u32) {
        let hdr = self.header();
        let multi = hdr.cons.multi != 0;
        loop {
            let old_head = hdr.cons.head.load(Ordering::Relaxed);
            // Pair with the producer's tail release so slot contents are
            // visible before they are read.
            let prod_tail = hdr.prod.tail.load(Ordering::Acquire);
            let avail = prod_tail.wrapping_sub(old_head);

            let taken = match behavior {
                Behavior::Fixed => {
                    if avail < n {
                        0
                    } else {
                        n
                    }
                }
                Behavior::Variable => n.min(avail),
            };
            if taken == 0 {
                return (0, 0);
            }

            let new_head = old_head.wrapping_add(taken);
            if !multi {
                hdr.cons.head.store(new_head, Ordering::Relaxed);
                return (taken, old_head);
            }
            if hdr
                .cons
                .head
                .compare_exchange_weak(old_head, new_head, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return (taken, old_head);
            }
        }
    }

    /// Advance the published tail past a completed copy. With multiple
    /// threads on this side, earlier reservations must publish first; wait
    /// for them with a spin hint.
    fn publish(&self, ht: &HeadTail, old: u32, new: u32) {
        if ht.multi != 0 {
            while ht.tail.load(Ordering::Relaxed) != old {
                std::hint::spin_loop();
            }
        }
        ht.tail.store(new, Ordering::Release);
    }

    unsafe fn copy_in(&self, head: u32, items: &[T]) {
        let hdr = self.header();
        let idx = (head & hdr.mask) as usize;
        let slots = self.slots();
        let first = items.len().min(hdr.slot_count as usize - idx);
        std::ptr::copy_nonoverlapping(items.as_ptr(), slots.add(idx), first);
        if first < items.len() {
            std::ptr::copy_nonoverlapping(
                items.as_ptr().add(first),
                slots,
                items.len() - first,
            );
        }
    }

    unsafe fn copy_out(&self, head: u32, out: &mut [T]) {
        let hdr = self.header();
        let idx = (head & hdr.mask) as usize;
        let slots = self.slots();
        let first = out.len().min(hdr.slot_count as usize - idx);
        std::ptr::copy_nonoverlapping(slots.add(idx), out.as_mut_ptr(), first);
        if first < out.len() {
            std::ptr::copy_nonoverlapping(
                slots,
                out.as_mut_ptr().add(first),
                out.len() - first,
            );
        }
    }
}

impl<T> Clone for BulkRing<T> {
    fn clone(&self) -> Self {
        Self {
            hdr: self.hdr,
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for BulkRing<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hdr = unsafe { self.hdr.as_ref() };
        f.debug_struct("BulkRing")
            .field("slot_count", &hdr.slot_count)
            .field("capacity", &hdr.capacity)
            .field("record_size", &hdr.record_size)
            .finish()
    }
}

unsafe impl<T: Copy + Send> Send for BulkRing<T> {}
unsafe impl<T: Copy + Send> Sync for BulkRing<T> {}
