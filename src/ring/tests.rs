//! Tests for the bulk ring

use std::{
    alloc::{alloc_zeroed, dealloc, Layout},
    collections::HashSet,
    ptr::NonNull,
    sync::{Arc, Barrier},
    thread,
};

use super::{AccessMode, BulkRing, RingSlot, RING_ALIGN};

/// Heap stand-in for a shared memory region
struct RingMem {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl RingMem {
    fn alloc(bytes: usize) -> Self {
        let layout = Layout::from_size_align(bytes, RING_ALIGN).unwrap();
        let ptr = unsafe { alloc_zeroed(layout) };
        Self {
            ptr: NonNull::new(ptr).expect("allocation failed"),
            layout,
        }
    }
}

impl Drop for RingMem {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

fn new_ring(slots: u32, prod: AccessMode, cons: AccessMode) -> (RingMem, BulkRing<RingSlot>) {
    let mem = RingMem::alloc(BulkRing::<RingSlot>::mem_size(slots).unwrap());
    let ring = unsafe { BulkRing::<RingSlot>::init_at(mem.ptr, slots, prod, cons).unwrap() };
    (mem, ring)
}

/// Ring plus its backing allocation, shareable across threads
struct SharedRing {
    _mem: RingMem,
    ring: BulkRing<RingSlot>,
}

unsafe impl Send for SharedRing {}
unsafe impl Sync for SharedRing {}

#[test]
fn test_geometry_validation() {
    assert!(BulkRing::<RingSlot>::mem_size(0).is_err());
    assert!(BulkRing::<RingSlot>::mem_size(3).is_err());
    assert!(BulkRing::<RingSlot>::mem_size(100).is_err());
    assert!(BulkRing::<()>::mem_size(8).is_err());
    assert!(BulkRing::<RingSlot>::mem_size(8).is_ok());
}

#[test]
fn test_spsc_fifo_order() {
    let (_mem, ring) = new_ring(8, AccessMode::Single, AccessMode::Single);
    assert_eq!(ring.capacity(), 7);

    for i in 0..7u32 {
        assert_eq!(ring.enqueue_bulk(&[i]), 1);
    }

    let mut out = [0u32; 1];
    for i in 0..7u32 {
        assert_eq!(ring.dequeue_bulk(&mut out), 1);
        assert_eq!(out[0], i);
    }
    assert!(ring.is_empty());
}

#[test]
fn test_bulk_is_all_or_nothing() {
    let (_mem, ring) = new_ring(8, AccessMode::Single, AccessMode::Single);

    // 7 usable entries: a bulk of 8 must be refused outright.
    assert_eq!(ring.enqueue_bulk(&[0; 8]), 0);
    assert_eq!(ring.enqueue_bulk(&[1; 7]), 7);
    assert_eq!(ring.enqueue_bulk(&[2; 1]), 0);

    let mut out = [0u32; 8];
    assert_eq!(ring.dequeue_bulk(&mut out), 0);
    assert_eq!(ring.dequeue_bulk(&mut out[..7]), 7);
}

#[test]
fn test_burst_is_partial() {
    let (_mem, ring) = new_ring(8, AccessMode::Single, AccessMode::Single);

    assert_eq!(ring.enqueue_burst(&[7; 10]), 7);
    assert_eq!(ring.enqueue_burst(&[7; 10]), 0);

    let mut out = [0u32; 10];
    assert_eq!(ring.dequeue_burst(&mut out), 7);
    assert_eq!(ring.dequeue_burst(&mut out), 0);
}

#[test]
fn test_count_plus_free_is_capacity() {
    let (_mem, ring) = new_ring(16, AccessMode::Single, AccessMode::Single);
    let mut out = [0u32; 4];

    for round in 0..50u32 {
        let n = (round % 4 + 1) as usize;
        ring.enqueue_burst(&vec![round; n]);
        assert_eq!(ring.count() + ring.free_count(), ring.capacity());
        ring.dequeue_burst(&mut out[..n.min(4)]);
        assert_eq!(ring.count() + ring.free_count(), ring.capacity());
    }
}

#[test]
fn test_wrap_around() {
    let (_mem, ring) = new_ring(4, AccessMode::Single, AccessMode::Single);
    let mut out = [0u32; 2];

    // Push the positions far past the slot count to exercise wrapping.
    for i in 0..1000u32 {
        assert_eq!(ring.enqueue_bulk(&[2 * i, 2 * i + 1]), 2);
        assert_eq!(ring.dequeue_bulk(&mut out), 2);
        assert_eq!(out, [2 * i, 2 * i + 1]);
    }
}

#[test]
fn test_large_records() {
    #[derive(Clone, Copy, PartialEq, Debug)]
    #[repr(C)]
    struct Wide {
        id: u64,
        body: [u8; 48],
        tag: u64,
    }

    let mem = RingMem::alloc(BulkRing::<Wide>::mem_size(4).unwrap());
    let ring =
        unsafe { BulkRing::<Wide>::init_at(mem.ptr, 4, AccessMode::Single, AccessMode::Single) }
            .unwrap();

    let rec = Wide {
        id: 42,
        body: [0xAB; 48],
        tag: 7,
    };
    assert_eq!(ring.enqueue_bulk(&[rec]), 1);

    let mut out = [Wide {
        id: 0,
        body: [0; 48],
        tag: 0,
    }];
    assert_eq!(ring.dequeue_bulk(&mut out), 1);
    assert_eq!(out[0], rec);
}

#[test]
fn test_mpmc_conservation_and_uniqueness() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: u32 = 2000;

    let mem = RingMem::alloc(BulkRing::<RingSlot>::mem_size(64).unwrap());
    let ring =
        unsafe { BulkRing::<RingSlot>::init_at(mem.ptr, 64, AccessMode::Multi, AccessMode::Multi) }
            .unwrap();
    let shared = Arc::new(SharedRing { _mem: mem, ring });
    let barrier = Arc::new(Barrier::new(PRODUCERS + CONSUMERS));

    let mut handles = Vec::new();
    for p in 0..PRODUCERS {
        let shared = shared.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            for i in 0..PER_PRODUCER {
                let value = (p as u32) * PER_PRODUCER + i;
                while shared.ring.enqueue_bulk(&[value]) == 0 {
                    std::hint::spin_loop();
                }
            }
        }));
    }

    let mut consumers = Vec::new();
    for _ in 0..CONSUMERS {
        let shared = shared.clone();
        let barrier = barrier.clone();
        consumers.push(thread::spawn(move || {
            barrier.wait();
            let mut got = Vec::new();
            let target = (PRODUCERS as u32 * PER_PRODUCER) as usize / CONSUMERS;
            let mut out = [0u32; 8];
            while got.len() < target {
                let want = (target - got.len()).min(out.len());
                let n = shared.ring.dequeue_burst(&mut out[..want]);
                got.extend_from_slice(&out[..n]);
            }
            got
        }));
    }

    for h in handles {
        h.join().unwrap();
    }
    let mut all = Vec::new();
    for c in consumers {
        all.extend(c.join().unwrap());
    }

    assert_eq!(all.len(), PRODUCERS * PER_PRODUCER as usize);
    let unique: HashSet<u32> = all.iter().copied().collect();
    assert_eq!(unique.len(), all.len(), "a record was observed twice");
    assert!(shared.ring.is_empty());
}

#[test]
fn test_view_from_raw_sees_same_ring() {
    let (mem, ring) = new_ring(8, AccessMode::Single, AccessMode::Single);
    assert_eq!(ring.enqueue_bulk(&[11, 22, 33]), 3);

    let view = unsafe { BulkRing::<RingSlot>::from_raw(mem.ptr) };
    assert_eq!(view.count(), 3);

    let mut out = [0u32; 3];
    assert_eq!(view.dequeue_bulk(&mut out), 3);
    assert_eq!(out, [11, 22, 33]);
    assert!(ring.is_empty());
}
