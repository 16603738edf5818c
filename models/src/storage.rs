//! Chunked asset storage.
//!
//! Every asset is a set of up to [`MAX_CHUNKS`] numbered binary chunks. The
//! [`AssetStorage`] pulls chunks from a [`ChunkSource`] on demand and keeps
//! them resident until they are unloaded. Streaming tasks hold a
//! [`StorageLock`] so the storage cannot close underneath them.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;
use redlilium_core::Guid;

use crate::error::{AssetError, AssetResult};
use crate::serialization::{ReadStream, WriteStream};

/// Number of chunk slots per asset.
pub const MAX_CHUNKS: usize = 16;

/// Chunk holding the asset header.
pub const HEADER_CHUNK: usize = 0;

/// Chunk holding the SDF payload of a static model.
pub const SDF_CHUNK: usize = 15;

const PACKED_MAGIC: u32 = u32::from_le_bytes(*b"RLMA");
const PACKED_VERSION: u32 = 1;

/// Type tag of a packed asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AssetKind {
    Model = 1,
    SkinnedModel = 2,
    Animation = 3,
}

impl AssetKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Model),
            2 => Some(Self::SkinnedModel),
            3 => Some(Self::Animation),
            _ => None,
        }
    }
}

/// Backing store the asset storage fetches chunks from.
pub trait ChunkSource: Send + Sync {
    /// Whether the source has data for chunk `index`.
    fn has_chunk(&self, index: usize) -> bool;

    /// Fetch chunk `index`, `Ok(None)` when the chunk does not exist.
    fn read_chunk(&self, index: usize) -> AssetResult<Option<Vec<u8>>>;
}

/// In-memory asset container with a simple binary file form.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedAsset {
    pub id: Guid,
    pub kind: AssetKind,
    pub chunks: Vec<Option<Vec<u8>>>,
}

impl PackedAsset {
    pub fn new(id: Guid, kind: AssetKind) -> Self {
        Self {
            id,
            kind,
            chunks: vec![None; MAX_CHUNKS],
        }
    }

    pub fn set_chunk(&mut self, index: usize, data: Vec<u8>) {
        if let Some(slot) = self.chunks.get_mut(index) {
            *slot = Some(data);
        }
    }

    pub fn chunk(&self, index: usize) -> Option<&[u8]> {
        self.chunks.get(index).and_then(|c| c.as_deref())
    }

    /// Bit `i` is set when chunk `i` is present.
    pub fn chunk_mask(&self) -> u16 {
        self.chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_some())
            .fold(0u16, |mask, (i, _)| mask | (1 << i))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut stream = WriteStream::new();
        stream.write_u32(PACKED_MAGIC);
        stream.write_u32(PACKED_VERSION);
        stream.write_guid(&self.id);
        stream.write_u8(self.kind as u8);
        stream.write_u16(self.chunk_mask());
        for data in self.chunks.iter().flatten() {
            stream.write_u32(data.len() as u32);
            stream.write_bytes(data);
        }
        stream.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> AssetResult<Self> {
        let mut stream = ReadStream::new(bytes);
        if stream.read_u32()? != PACKED_MAGIC {
            return Err(AssetError::invalid("not a packed asset"));
        }
        let version = stream.read_u32()?;
        if version != PACKED_VERSION {
            return Err(AssetError::InvalidData(format!(
                "unsupported packed asset version {version}"
            )));
        }
        let id = stream.read_guid()?;
        let kind = AssetKind::from_u8(stream.read_u8()?)
            .ok_or_else(|| AssetError::invalid("unknown asset kind"))?;
        let mask = stream.read_u16()?;
        let mut asset = Self::new(id, kind);
        for i in 0..MAX_CHUNKS {
            if mask & (1 << i) != 0 {
                let len = stream.read_u32()? as usize;
                asset.chunks[i] = Some(stream.read_bytes(len)?.to_vec());
            }
        }
        Ok(asset)
    }

    pub fn load_file(path: &Path) -> AssetResult<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn save_file(&self, path: &Path) -> AssetResult<()> {
        std::fs::write(path, self.to_bytes())?;
        log::debug!("Saved asset {} to {}", self.id, path.display());
        Ok(())
    }
}

impl ChunkSource for PackedAsset {
    fn has_chunk(&self, index: usize) -> bool {
        self.chunk(index).is_some()
    }

    fn read_chunk(&self, index: usize) -> AssetResult<Option<Vec<u8>>> {
        Ok(self.chunk(index).map(<[u8]>::to_vec))
    }
}

/// Resident chunks of one asset plus the source they come from.
pub struct AssetStorage {
    id: Guid,
    kind: AssetKind,
    source: Arc<dyn ChunkSource>,
    chunks: RwLock<[Option<Arc<[u8]>>; MAX_CHUNKS]>,
    locks: AtomicUsize,
    closed: AtomicBool,
}

impl AssetStorage {
    pub fn new(id: Guid, kind: AssetKind, source: Arc<dyn ChunkSource>) -> Arc<Self> {
        Arc::new(Self {
            id,
            kind,
            source,
            chunks: RwLock::new(Default::default()),
            locks: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Storage backed by a packed asset.
    pub fn from_packed(asset: PackedAsset) -> Arc<Self> {
        let (id, kind) = (asset.id, asset.kind);
        Self::new(id, kind, Arc::new(asset))
    }

    pub fn id(&self) -> Guid {
        self.id
    }

    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    /// Whether the chunk exists, resident or not.
    pub fn has_chunk(&self, index: usize) -> bool {
        index < MAX_CHUNKS && (self.is_chunk_loaded(index) || self.source.has_chunk(index))
    }

    pub fn is_chunk_loaded(&self, index: usize) -> bool {
        self.chunks.read().get(index).is_some_and(Option::is_some)
    }

    /// Bit `i` is set when chunk `i` is resident.
    pub fn loaded_chunks_mask(&self) -> u16 {
        self.chunks
            .read()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_some())
            .fold(0u16, |mask, (i, _)| mask | (1 << i))
    }

    /// Resident data of chunk `index`.
    pub fn chunk(&self, index: usize) -> Option<Arc<[u8]>> {
        self.chunks.read().get(index).cloned().flatten()
    }

    /// Make chunk `index` resident, fetching it from the source when needed.
    pub fn load_chunk(&self, index: usize) -> AssetResult<Arc<[u8]>> {
        if index >= MAX_CHUNKS {
            return Err(AssetError::MissingDataChunk(index));
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(AssetError::InvalidOperation(format!(
                "storage of asset {} is closed",
                self.id
            )));
        }
        if let Some(data) = self.chunk(index) {
            return Ok(data);
        }
        let data: Arc<[u8]> = self
            .source
            .read_chunk(index)?
            .ok_or(AssetError::MissingDataChunk(index))?
            .into();
        log::trace!("Asset {}: loaded chunk {index} ({} bytes)", self.id, data.len());
        self.chunks.write()[index] = Some(Arc::clone(&data));
        Ok(data)
    }

    /// Load every chunk in `mask`.
    pub fn load_chunks(&self, mask: u16) -> AssetResult<()> {
        for i in 0..MAX_CHUNKS {
            if mask & (1 << i) != 0 {
                self.load_chunk(i)?;
            }
        }
        Ok(())
    }

    /// Replace the resident data of a chunk (used when generated data is cached).
    pub fn set_chunk(&self, index: usize, data: Vec<u8>) {
        if index < MAX_CHUNKS {
            self.chunks.write()[index] = Some(data.into());
        }
    }

    /// Drop a resident chunk. Returns `false` when it was not resident.
    pub fn unload_chunk(&self, index: usize) -> bool {
        let unloaded = self
            .chunks
            .write()
            .get_mut(index)
            .and_then(Option::take)
            .is_some();
        if unloaded {
            log::trace!("Asset {}: unloaded chunk {index}", self.id);
        }
        unloaded
    }

    /// Take a scoped lock that keeps the storage open.
    pub fn lock_data(self: &Arc<Self>) -> StorageLock {
        self.locks.fetch_add(1, Ordering::AcqRel);
        StorageLock {
            storage: Arc::clone(self),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locks.load(Ordering::Acquire) > 0
    }

    /// Close the storage and drop all resident chunks. Fails while locked.
    pub fn try_close(&self) -> bool {
        if self.is_locked() {
            log::debug!("Asset {}: storage is locked, cannot close", self.id);
            return false;
        }
        self.closed.store(true, Ordering::Release);
        *self.chunks.write() = Default::default();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Copy every available chunk into a packed container.
    pub fn to_packed(&self) -> AssetResult<PackedAsset> {
        let mut packed = PackedAsset::new(self.id, self.kind);
        for i in 0..MAX_CHUNKS {
            if self.has_chunk(i) {
                packed.chunks[i] = Some(self.load_chunk(i)?.to_vec());
            }
        }
        Ok(packed)
    }
}

impl std::fmt::Debug for AssetStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetStorage")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("loaded", &format_args!("{:#06x}", self.loaded_chunks_mask()))
            .field("locks", &self.locks.load(Ordering::Relaxed))
            .finish()
    }
}

/// Keeps an [`AssetStorage`] open while alive.
#[derive(Debug)]
pub struct StorageLock {
    storage: Arc<AssetStorage>,
}

impl StorageLock {
    pub fn storage(&self) -> &Arc<AssetStorage> {
        &self.storage
    }
}

impl Drop for StorageLock {
    fn drop(&mut self) {
        self.storage.locks.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed() -> PackedAsset {
        let mut asset = PackedAsset::new(Guid::new(1, 2, 3, 4), AssetKind::Model);
        asset.set_chunk(0, vec![1, 2, 3]);
        asset.set_chunk(2, vec![9; 10]);
        asset
    }

    #[test]
    fn packed_roundtrip() {
        let asset = packed();
        assert_eq!(asset.chunk_mask(), 0b101);
        let back = PackedAsset::from_bytes(&asset.to_bytes()).unwrap();
        assert_eq!(back, asset);
    }

    #[test]
    fn packed_rejects_bad_magic() {
        let mut bytes = packed().to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            PackedAsset::from_bytes(&bytes),
            Err(AssetError::InvalidData(_))
        ));
    }

    #[test]
    fn chunks_load_on_demand() {
        let storage = AssetStorage::from_packed(packed());
        assert!(!storage.is_chunk_loaded(2));
        assert!(storage.has_chunk(2));
        assert_eq!(&*storage.load_chunk(2).unwrap(), &[9; 10]);
        assert!(storage.is_chunk_loaded(2));
        assert!(matches!(
            storage.load_chunk(1),
            Err(AssetError::MissingDataChunk(1))
        ));
        assert!(storage.unload_chunk(2));
        assert!(!storage.unload_chunk(2));
    }

    #[test]
    fn lock_blocks_close() {
        let storage = AssetStorage::from_packed(packed());
        let lock = storage.lock_data();
        assert!(!storage.try_close());
        drop(lock);
        assert!(storage.try_close());
        assert!(storage.load_chunk(0).is_err());
    }
}
