//! Animation clips, reduced to what skeleton retargeting needs.

use std::sync::Arc;

use parking_lot::RwLock;
use redlilium_core::Guid;

use crate::asset::{Asset, AssetEvent, AssetEvents};
use crate::error::{AssetError, AssetResult};
use crate::serialization::{NODE_NAME_MAX, ReadStream, WriteStream};
use crate::storage::{AssetKind, AssetStorage, HEADER_CHUNK, PackedAsset};

const ANIMATION_MAGIC: u32 = u32::from_le_bytes(*b"RLAN");
const ANIMATION_VERSION: u8 = 1;
const MAX_CHANNELS: usize = u16::MAX as usize;

#[derive(Debug, Clone, Default, PartialEq)]
struct AnimationData {
    duration: f32,
    frames_per_second: f32,
    channels: Vec<String>,
}

/// Animation asset exposing the node names its channels drive.
pub struct Animation {
    id: Guid,
    name: String,
    storage: Option<Arc<AssetStorage>>,
    data: RwLock<AnimationData>,
    events: AssetEvents,
}

impl Animation {
    /// Virtual animation with the given channel names.
    pub fn new(id: Guid, name: impl Into<String>, channels: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: name.into(),
            storage: None,
            data: RwLock::new(AnimationData {
                duration: 0.0,
                frames_per_second: 30.0,
                channels,
            }),
            events: AssetEvents::new(),
        })
    }

    /// Load the channel table from chunk 0 of `storage`.
    pub fn load(storage: Arc<AssetStorage>, name: impl Into<String>) -> AssetResult<Arc<Self>> {
        if storage.kind() != AssetKind::Animation {
            return Err(AssetError::InvalidData(format!(
                "storage {} holds a {:?}, not an animation",
                storage.id(),
                storage.kind()
            )));
        }
        let data = Self::parse(&storage.load_chunk(HEADER_CHUNK)?)?;
        Ok(Arc::new(Self {
            id: storage.id(),
            name: name.into(),
            storage: Some(storage),
            data: RwLock::new(data),
            events: AssetEvents::new(),
        }))
    }

    fn parse(bytes: &[u8]) -> AssetResult<AnimationData> {
        let mut stream = ReadStream::new(bytes);
        let magic = stream.read_u32()?;
        let version = stream.read_u8()?;
        if magic != ANIMATION_MAGIC || version != ANIMATION_VERSION {
            return Err(AssetError::InvalidData(format!(
                "unsupported animation header {magic:#010x} version {version}"
            )));
        }
        let duration = stream.read_f32()?;
        let frames_per_second = stream.read_f32()?;
        let count = stream.read_count(MAX_CHANNELS)?;
        let channels = (0..count)
            .map(|_| stream.read_string(NODE_NAME_MAX))
            .collect::<AssetResult<_>>()?;
        Ok(AnimationData {
            duration,
            frames_per_second,
            channels,
        })
    }

    /// Re-read the header from storage and notify observers.
    pub fn reload(&self) -> AssetResult<()> {
        if let Some(storage) = &self.storage {
            let data = Self::parse(&storage.load_chunk(HEADER_CHUNK)?)?;
            *self.data.write() = data;
        }
        self.events.emit(self.id, AssetEvent::Reloaded);
        Ok(())
    }

    /// Replace the channel list of a virtual animation.
    pub fn set_channels(&self, channels: Vec<String>) -> AssetResult<()> {
        if self.storage.is_some() {
            log::warn!("Animation '{}': channels of stored animations are read-only", self.name);
            return Err(AssetError::InvalidOperation(
                "set_channels requires a virtual asset".to_string(),
            ));
        }
        self.data.write().channels = channels;
        self.events.emit(self.id, AssetEvent::Reloaded);
        Ok(())
    }

    pub fn channels(&self) -> Vec<String> {
        self.data.read().channels.clone()
    }

    pub fn channel_count(&self) -> usize {
        self.data.read().channels.len()
    }

    /// Index of the channel driving `node`, case-sensitive.
    pub fn find_channel(&self, node: &str) -> i32 {
        self.data
            .read()
            .channels
            .iter()
            .position(|c| c == node)
            .map_or(-1, |i| i as i32)
    }

    pub fn duration(&self) -> f32 {
        self.data.read().duration
    }

    pub fn set_duration(&self, duration: f32, frames_per_second: f32) {
        let mut data = self.data.write();
        data.duration = duration.max(0.0);
        data.frames_per_second = frames_per_second.max(0.0);
    }

    pub fn frames_per_second(&self) -> f32 {
        self.data.read().frames_per_second
    }

    pub fn save(&self) -> PackedAsset {
        let data = self.data.read();
        let mut stream = WriteStream::new();
        stream.write_u32(ANIMATION_MAGIC);
        stream.write_u8(ANIMATION_VERSION);
        stream.write_f32(data.duration);
        stream.write_f32(data.frames_per_second);
        stream.write_i32(data.channels.len() as i32);
        for channel in &data.channels {
            stream.write_string(channel, NODE_NAME_MAX);
        }
        let mut packed = PackedAsset::new(self.id, AssetKind::Animation);
        packed.set_chunk(HEADER_CHUNK, stream.into_bytes());
        packed
    }

    /// Drop the channel table and notify observers.
    pub fn unload(&self) {
        *self.data.write() = AnimationData::default();
        self.events.emit(self.id, AssetEvent::Unloaded);
    }
}

impl Asset for Animation {
    fn id(&self) -> Guid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AssetKind {
        AssetKind::Animation
    }

    fn is_virtual(&self) -> bool {
        self.storage.is_none()
    }

    fn events(&self) -> &AssetEvents {
        &self.events
    }
}

impl std::fmt::Debug for Animation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Animation")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("channels", &self.channel_count())
            .finish()
    }
}
