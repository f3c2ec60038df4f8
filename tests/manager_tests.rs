//! Channel manager registry tests

use std::{sync::Arc, thread};

use monet::{ChannelConfig, ChannelManager, MonetError, MAX_CHANNEL_NR};

fn small_config(name: String) -> ChannelConfig {
    ChannelConfig::new(name)
        .with_huge_pages(false)
        .with_ring_slots(8, 8)
        .with_buf_slots(16)
        .with_buf_mss(128)
}

fn unique(tag: &str) -> String {
    format!("monet_mgr_{}_{}", tag, std::process::id())
}

#[test]
fn test_add_get_destroy() {
    let manager = ChannelManager::new();
    let name = unique("basic");

    assert!(manager.get_channel(&name).is_none());
    let channel = manager.add_channel(small_config(name.clone())).unwrap();
    assert_eq!(manager.channel_count(), 1);
    assert!(manager.has_channel(&name));

    let handle = manager.get_channel(&name).unwrap();
    assert!(Arc::ptr_eq(&channel, &handle));
    assert_eq!(handle.name(), name);

    manager.destroy_channel(&name).unwrap();
    assert_eq!(manager.channel_count(), 0);
    assert!(manager.get_channel(&name).is_none());
    assert!(matches!(
        manager.destroy_channel(&name),
        Err(MonetError::ChannelNotFound { .. })
    ));
}

#[test]
fn test_duplicate_name_is_rejected() {
    let manager = ChannelManager::new();
    let name = unique("dup");

    let first = manager.add_channel(small_config(name.clone())).unwrap();
    let free_before = first.free_buf_count();

    let err = manager.add_channel(small_config(name.clone()));
    assert!(matches!(err, Err(MonetError::ChannelExists { .. })));

    // The existing channel survives the rejected re-creation.
    assert_eq!(manager.channel_count(), 1);
    assert_eq!(first.free_buf_count(), free_before);
    let slot = first.alloc_buffer().unwrap();
    first.free_buffer(slot).unwrap();
}

#[test]
fn test_capacity_bound() {
    let manager = ChannelManager::new();
    let base = unique("cap");

    for i in 0..MAX_CHANNEL_NR {
        manager
            .add_channel(small_config(format!("{}_{}", base, i)))
            .unwrap();
    }
    assert_eq!(manager.channel_count(), MAX_CHANNEL_NR);

    let err = manager.add_channel(small_config(format!("{}_over", base)));
    assert!(matches!(
        err,
        Err(MonetError::TooManyChannels {
            current: MAX_CHANNEL_NR,
            max: MAX_CHANNEL_NR
        })
    ));
    assert_eq!(manager.channel_count(), MAX_CHANNEL_NR);
}

#[test]
fn test_concurrent_registration() {
    const THREADS: usize = 8;

    let manager = Arc::new(ChannelManager::new());
    let base = unique("race");

    let mut handles = Vec::new();
    for i in 0..THREADS {
        let manager = Arc::clone(&manager);
        let name = format!("{}_{}", base, i);
        handles.push(thread::spawn(move || {
            let channel = manager.add_channel(small_config(name.clone())).unwrap();
            assert_eq!(channel.name(), name);
            manager.get_channel(&name).unwrap()
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(manager.channel_count(), THREADS);
    assert_eq!(manager.all_channels().len(), THREADS);
}
