use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use monet::{AccessMode, BulkRing, RingSlot};
use std::{
    alloc::{alloc_zeroed, dealloc, Layout},
    ptr::NonNull,
    sync::Arc,
    thread,
};

struct RingMem {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl RingMem {
    fn alloc(bytes: usize) -> Self {
        let layout = Layout::from_size_align(bytes, 64).unwrap();
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

struct SharedRing {
    _mem: RingMem,
    ring: BulkRing<RingSlot>,
}

unsafe impl Send for SharedRing {}
unsafe impl Sync for SharedRing {}

fn make_ring(slots: u32, prod: AccessMode, cons: AccessMode) -> SharedRing {
    let mem = RingMem::alloc(BulkRing::<RingSlot>::mem_size(slots).unwrap());
    let ring = unsafe { BulkRing::<RingSlot>::init_at(mem.ptr, slots, prod, cons).unwrap() };
    SharedRing { _mem: mem, ring }
}

fn benchmark_spsc_bulk(c: &mut Criterion) {
    let mut group = c.benchmark_group("BulkRing_SPSC");

    for burst in [1usize, 8, 32].iter() {
        group.throughput(Throughput::Elements(*burst as u64));
        group.bench_with_input(
            BenchmarkId::new("enqueue_dequeue", burst),
            burst,
            |b, &burst| {
                let shared = make_ring(1024, AccessMode::Single, AccessMode::Single);
                let items: Vec<RingSlot> = (0..burst as u32).collect();
                let mut out = vec![0 as RingSlot; burst];

                b.iter(|| {
                    shared.ring.enqueue_bulk(&items);
                    shared.ring.dequeue_bulk(&mut out);
                });
            },
        );
    }

    group.finish();
}

fn benchmark_mpmc_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("BulkRing_MPMC");
    group.sample_size(10);

    const ITEMS_PER_PRODUCER: u32 = 100_000;

    for threads in [2usize, 4].iter() {
        group.throughput(Throughput::Elements(
            *threads as u64 * ITEMS_PER_PRODUCER as u64,
        ));
        group.bench_with_input(
            BenchmarkId::new("producers_consumers", threads),
            threads,
            |b, &threads| {
                b.iter(|| {
                    let shared = Arc::new(make_ring(1024, AccessMode::Multi, AccessMode::Multi));

                    let mut producers = Vec::new();
                    for _ in 0..threads {
                        let shared = Arc::clone(&shared);
                        producers.push(thread::spawn(move || {
                            for i in 0..ITEMS_PER_PRODUCER {
                                while shared.ring.enqueue_bulk(&[i]) == 0 {
                                    std::hint::spin_loop();
                                }
                            }
                        }));
                    }

                    let mut consumers = Vec::new();
                    for _ in 0..threads {
                        let shared = Arc::clone(&shared);
                        consumers.push(thread::spawn(move || {
                            let mut out = [0 as RingSlot; 32];
                            let mut taken = 0u32;
                            while taken < ITEMS_PER_PRODUCER {
                                let want =
                                    ((ITEMS_PER_PRODUCER - taken) as usize).min(out.len());
                                let n = shared.ring.dequeue_burst(&mut out[..want]);
                                taken += n as u32;
                                if n == 0 {
                                    std::hint::spin_loop();
                                }
                            }
                        }));
                    }

                    for p in producers {
                        p.join().unwrap();
                    }
                    for c in consumers {
                        c.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, benchmark_spsc_bulk, benchmark_mpmc_contended);
criterion_main!(benches);
