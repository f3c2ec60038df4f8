//! Process-local channel registry

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use log::{debug, warn};

use crate::{
    channel::{channel::Channel, config::ChannelConfig},
    error::{MonetError, Result},
};

/// Most channels one manager will hold.
pub const MAX_CHANNEL_NR: usize = 32;

/// Bounded registry mapping channel names to live handles.
///
/// The manager guards only its own name map with a mutex; the channels it
/// hands out are lock-free on their hot paths. Dropping the last handle to
/// a destroyed channel unmaps (and for POSIX backing, unlinks) its region.
#[derive(Debug, Default)]
pub struct ChannelManager {
    channels: Mutex<HashMap<String, Arc<Channel>>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Create a new channel and register it. Fails when the name is taken
    /// or the manager is at capacity; an existing channel is never torn
    /// down by a failed re-creation.
    pub fn add_channel(&self, config: ChannelConfig) -> Result<Arc<Channel>> {
        let mut channels = self.channels.lock().unwrap();
        if channels.len() >= MAX_CHANNEL_NR {
            warn!("too many channels ({})", channels.len());
            return Err(MonetError::too_many_channels(channels.len(), MAX_CHANNEL_NR));
        }
        if channels.contains_key(&config.name) {
            warn!("channel {} already exists", config.name);
            return Err(MonetError::channel_exists(&config.name));
        }

        let name = config.name.clone();
        let channel = Arc::new(Channel::create(config)?);
        channels.insert(name, Arc::clone(&channel));
        Ok(channel)
    }

    /// Remove a channel from the registry. The region is reclaimed once the
    /// last outstanding handle drops.
    pub fn destroy_channel(&self, name: &str) -> Result<()> {
        let mut channels = self.channels.lock().unwrap();
        match channels.remove(name) {
            Some(_) => {
                debug!("destroyed channel {}", name);
                Ok(())
            }
            None => Err(MonetError::channel_not_found(name)),
        }
    }

    /// Shared handle to a registered channel.
    pub fn get_channel(&self, name: &str) -> Option<Arc<Channel>> {
        let channels = self.channels.lock().unwrap();
        channels.get(name).cloned()
    }

    /// Handles to every registered channel.
    pub fn all_channels(&self) -> Vec<Arc<Channel>> {
        let channels = self.channels.lock().unwrap();
        channels.values().cloned().collect()
    }

    /// Number of registered channels.
    pub fn channel_count(&self) -> usize {
        let channels = self.channels.lock().unwrap();
        channels.len()
    }

    /// Whether `name` is registered.
    pub fn has_channel(&self, name: &str) -> bool {
        let channels = self.channels.lock().unwrap();
        channels.contains_key(name)
    }
}
