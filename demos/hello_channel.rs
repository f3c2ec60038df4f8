//! Loopback hello-world over one channel.
//!
//! An "engine" thread polls the app→engine ring and echoes every message
//! back on the engine→app ring, the way the real stack would after a trip
//! through the NIC. The main thread plays the application: it sends
//! "Hello World!" a few times and waits for each echo.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Instant,
};

use monet::{ChannelConfig, ChannelManager, FlowKey, MsgBufBatch, Result};

const ROUNDS: usize = 100;

fn main() -> Result<()> {
    env_logger::init();

    let name = format!("hello_channel_{}", std::process::id());
    let manager = ChannelManager::new();
    let channel = manager.add_channel(ChannelConfig::new(&name))?;
    println!(
        "channel {} ready: {} buffers of {} usable bytes",
        channel.name(),
        channel.total_buf_count(),
        channel.usable_buf_size()
    );

    let stop = Arc::new(AtomicBool::new(false));
    let engine = {
        let channel = Arc::clone(&channel);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut batch = MsgBufBatch::new();
            while !stop.load(Ordering::Relaxed) {
                batch.clear();
                if channel.dequeue_messages(&mut batch) == 0 {
                    std::hint::spin_loop();
                    continue;
                }
                // Echo each message head back to the application.
                for slot in batch.iter() {
                    while channel.enqueue_messages(&[slot]) == 0 {
                        std::hint::spin_loop();
                    }
                }
            }
        })
    };

    let payload = b"Hello World!";
    let start = Instant::now();
    for _ in 0..ROUNDS {
        let head = channel.build_chain(payload, FlowKey::default())?;
        while channel.app_send_messages(&[head]) == 0 {
            std::hint::spin_loop();
        }

        let mut batch = MsgBufBatch::new();
        while channel.app_recv_messages(&mut batch) == 0 {
            std::hint::spin_loop();
        }

        let mut echoed = Vec::new();
        channel.read_chain(batch.slots()[0], &mut echoed)?;
        channel.free_chain(batch.slots()[0])?;
        assert_eq!(echoed, payload);
    }
    let elapsed = start.elapsed();

    stop.store(true, Ordering::Relaxed);
    engine.join().unwrap();

    println!(
        "{} round trips in {:?} ({:?} each)",
        ROUNDS,
        elapsed,
        elapsed / ROUNDS as u32
    );
    println!("stats: {:?}", channel.stats().snapshot());

    manager.destroy_channel(&name)?;
    Ok(())
}
