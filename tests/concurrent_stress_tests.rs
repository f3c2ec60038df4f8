//! Concurrent stress tests for the buffer pool and data rings

use std::{
    collections::HashSet,
    sync::{Arc, Barrier},
    thread,
};

use monet::{Channel, ChannelConfig, FlowKey, MsgBufBatch, RingSlot};

fn config(tag: &str) -> ChannelConfig {
    ChannelConfig::new(format!("monet_stress_{}_{}", tag, std::process::id()))
        .with_huge_pages(false)
}

/// Two application threads race to drain the pool; together they must get
/// every circulating buffer exactly once.
#[test]
fn stress_concurrent_pool_drain() {
    let channel = Arc::new(
        Channel::create(config("drain").with_buf_slots(4096).with_buf_mss(256)).unwrap(),
    );
    let barrier = Arc::new(Barrier::new(2));

    let mut handles = Vec::new();
    for _ in 0..2 {
        let channel = Arc::clone(&channel);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            let mut got = Vec::new();
            for _ in 0..2048 {
                match channel.alloc_buffer() {
                    Ok(slot) => got.push(slot),
                    Err(_) => break,
                }
            }
            got
        }));
    }

    let mut all: Vec<RingSlot> = Vec::new();
    for h in handles {
        all.extend(h.join().unwrap());
    }

    // Pool minus the ring sentinel, no slot handed out twice.
    assert_eq!(all.len(), 4095);
    let unique: HashSet<RingSlot> = all.iter().copied().collect();
    assert_eq!(unique.len(), all.len());
    assert_eq!(channel.free_buf_count(), 0);

    for slot in all {
        channel.free_buffer(slot).unwrap();
    }
    assert_eq!(channel.free_buf_count(), 4095);
}

/// Alloc/free churn from several threads conserves the pool.
#[test]
fn stress_alloc_free_churn() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 500;

    let channel = Arc::new(
        Channel::create(config("churn").with_buf_slots(1024).with_buf_mss(256)).unwrap(),
    );
    let barrier = Arc::new(Barrier::new(THREADS));
    let free_before = channel.free_buf_count();

    let mut handles = Vec::new();
    for _ in 0..THREADS {
        let channel = Arc::clone(&channel);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            let mut batch = MsgBufBatch::new();
            for round in 0..ROUNDS {
                let want = round % 8 + 1;
                channel.alloc_buffers(&mut batch, want);
                channel.free_buffers(&mut batch).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(channel.free_buf_count(), free_before);
    let snapshot = channel.stats().snapshot();
    assert_eq!(snapshot.bufs_allocated, snapshot.bufs_freed);
}

/// A producer thread streams chained messages through the app→engine ring
/// while a consumer thread validates every payload.
#[test]
fn stress_message_stream() {
    const MESSAGES: u32 = 400;

    let channel = Arc::new(
        Channel::create(
            config("stream")
                .with_ring_slots(64, 64)
                .with_buf_slots(1024)
                .with_buf_mss(512),
        )
        .unwrap(),
    );

    let producer = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || {
            for i in 0..MESSAGES {
                // Lengths straddle the MSS so single and chained messages mix.
                let len = (i as usize * 37) % 1500;
                let payload: Vec<u8> = (0..len).map(|b| ((b as u32 + i) % 256) as u8).collect();
                let flow = FlowKey::new(i, i + 1, 1000, 2000, 6);
                let head = loop {
                    match channel.build_chain(&payload, flow) {
                        Ok(head) => break head,
                        Err(_) => std::hint::spin_loop(),
                    }
                };
                while channel.app_send_messages(&[head]) == 0 {
                    std::hint::spin_loop();
                }
            }
        })
    };

    let consumer = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || {
            let mut received = 0u32;
            let mut batch = MsgBufBatch::new();
            while received < MESSAGES {
                batch.clear();
                if channel.dequeue_messages(&mut batch) == 0 {
                    std::hint::spin_loop();
                    continue;
                }
                for slot in batch.iter() {
                    let mut payload = Vec::new();
                    let flow = channel.read_chain(slot, &mut payload).unwrap();

                    let i = flow.src_ip;
                    let len = (i as usize * 37) % 1500;
                    assert_eq!(payload.len(), len);
                    assert!(payload
                        .iter()
                        .enumerate()
                        .all(|(b, &v)| v == ((b as u32 + i) % 256) as u8));

                    channel.free_chain(slot).unwrap();
                    received += 1;
                }
            }
        })
    };

    producer.join().unwrap();
    consumer.join().unwrap();

    // Quiesced: everything allocated went back to the pool.
    assert_eq!(channel.free_buf_count(), channel.total_buf_count() - 1);
    let snapshot = channel.stats().snapshot();
    assert_eq!(snapshot.bufs_allocated, snapshot.bufs_freed);
}
