use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::{Channel, ChannelError, ChannelResult, ChannelsFile};
use crate::config::{load_channels_file, save_channels_file};

#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: RwLock<BTreeMap<String, Channel>>,
    store: Option<PathBuf>,
    /// Held across mutate, persist and rollback.
    writes: Mutex<()>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_channels<I>(channels: I) -> ChannelResult<Self>
    where
        I: IntoIterator<Item = Channel>,
    {
        let registry = Self::new();
        for channel in channels {
            registry.insert_in_memory(channel)?;
        }
        Ok(registry)
    }

    /// Loads the channels file and writes every later change back to it.
    pub fn open(path: impl AsRef<Path>) -> ChannelResult<Self> {
        let path = path.as_ref();
        let file = load_channels_file(path)?;
        let mut registry = Self::from_channels(file.channels)?;
        registry.store = Some(path.to_path_buf());
        info!(
            path = %path.display(),
            channels = registry.len(),
            "channel registry loaded"
        );
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<Channel> {
        self.channels.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.channels.read().contains_key(id)
    }

    pub fn list(&self) -> Vec<Channel> {
        self.channels.read().values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.channels.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }

    pub fn add(&self, channel: Channel) -> ChannelResult<()> {
        let id = channel.id.clone();
        let _write = self.writes.lock();
        self.insert_in_memory(channel)?;
        if let Err(err) = self.persist() {
            self.channels.write().remove(&id);
            return Err(err);
        }
        info!(channel = %id, "channel registered");
        Ok(())
    }

    /// Leaves any live session alone; callers stop it separately.
    pub fn remove(&self, id: &str) -> ChannelResult<Channel> {
        let _write = self.writes.lock();
        let removed = self
            .channels
            .write()
            .remove(id)
            .ok_or_else(|| ChannelError::NotFound(id.to_string()))?;
        if let Err(err) = self.persist() {
            self.channels.write().insert(id.to_string(), removed);
            return Err(err);
        }
        info!(channel = %id, "channel unregistered");
        Ok(removed)
    }

    pub fn store_path(&self) -> Option<&Path> {
        self.store.as_deref()
    }

    fn insert_in_memory(&self, channel: Channel) -> ChannelResult<()> {
        channel.validate()?;
        let mut guard = self.channels.write();
        if guard.contains_key(&channel.id) {
            return Err(ChannelError::Duplicate(channel.id));
        }
        guard.insert(channel.id.clone(), channel);
        Ok(())
    }

    fn persist(&self) -> ChannelResult<()> {
        let Some(path) = &self.store else {
            return Ok(());
        };
        let file = ChannelsFile {
            channels: self.list(),
        };
        save_channels_file(path, &file)?;
        debug!(path = %path.display(), channels = file.channels.len(), "channels persisted");
        Ok(())
    }
}
