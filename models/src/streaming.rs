//! Residency streaming for model assets.
//!
//! The coordinator moves every registered resource towards the residency
//! implied by the streaming quality, one LOD per tick. Work is packaged into
//! [`StreamingTask`]s holding a weak reference to the resource and a
//! [`StorageLock`], so an asset dropped mid-flight ends its task with
//! [`AssetError::MissingResources`] and its storage cannot close while a task
//! still reads from it.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use redlilium_core::Guid;

use crate::asset::Asset;
use crate::error::{AssetError, AssetResult};
use crate::model::Model;
use crate::model_base::ModelBase;
use crate::settings::StreamingSettings;
use crate::skinned_model::SkinnedModel;
use crate::storage::{AssetStorage, StorageLock};

/// An asset whose resident data can grow and shrink one step at a time.
pub trait StreamableResource: Asset {
    /// Highest residency the resource supports (its LOD count).
    fn max_residency(&self) -> usize;

    /// Current residency (resident LOD count).
    fn allocated_residency(&self) -> usize;

    fn storage(&self) -> Option<Arc<AssetStorage>>;

    /// Make one more LOD resident. Returns the loaded LOD index.
    fn stream_in(&self) -> AssetResult<usize>;

    /// Evict the finest resident LOD. Returns its index.
    fn stream_out(&self) -> Option<usize>;

    /// GPU mips waiting for upload.
    fn pending_uploads(&self) -> Vec<u32> {
        Vec::new()
    }

    fn upload(&self, mip: u32) -> AssetResult<()> {
        Err(AssetError::InvalidOperation(format!(
            "'{}' has no GPU upload for mip {mip}",
            self.name()
        )))
    }
}

impl StreamableResource for Model {
    fn max_residency(&self) -> usize {
        self.lod_count()
    }

    fn allocated_residency(&self) -> usize {
        self.loaded_lods()
    }

    fn storage(&self) -> Option<Arc<AssetStorage>> {
        self.core().storage().cloned()
    }

    fn stream_in(&self) -> AssetResult<usize> {
        self.core().load_next_lod()
    }

    fn stream_out(&self) -> Option<usize> {
        self.core().unload_lod()
    }

    fn pending_uploads(&self) -> Vec<u32> {
        self.pending_sdf_mips()
    }

    fn upload(&self, mip: u32) -> AssetResult<()> {
        self.upload_sdf_mip(mip)
    }
}

impl StreamableResource for SkinnedModel {
    fn max_residency(&self) -> usize {
        self.lod_count()
    }

    fn allocated_residency(&self) -> usize {
        self.loaded_lods()
    }

    fn storage(&self) -> Option<Arc<AssetStorage>> {
        self.core().storage().cloned()
    }

    fn stream_in(&self) -> AssetResult<usize> {
        self.core().load_next_lod()
    }

    fn stream_out(&self) -> Option<usize> {
        self.core().unload_lod()
    }
}

/// Residency for `quality` in `[0, 1]`: `ceil(quality * lods)` clamped to `[0, lods]`.
pub fn target_residency(max_residency: usize, quality: f32) -> usize {
    let quality = if quality.is_nan() { 0.0 } else { quality.clamp(0.0, 1.0) };
    ((quality * max_residency as f32).ceil() as usize).min(max_residency)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingTaskKind {
    LoadLod,
    EvictLod,
    UploadMip(u32),
}

/// One unit of streaming work.
pub struct StreamingTask {
    resource: Weak<dyn StreamableResource>,
    kind: StreamingTaskKind,
    _lock: Option<StorageLock>,
}

impl StreamingTask {
    pub fn new(resource: Weak<dyn StreamableResource>, kind: StreamingTaskKind, lock: Option<StorageLock>) -> Self {
        Self {
            resource,
            kind,
            _lock: lock,
        }
    }

    pub fn kind(&self) -> StreamingTaskKind {
        self.kind
    }

    /// Run the task. The storage lock is released when the task is consumed.
    pub fn run(self) -> AssetResult<()> {
        let Some(resource) = self.resource.upgrade() else {
            log::debug!("Streaming task {:?} lost its resource", self.kind);
            return Err(AssetError::MissingResources);
        };
        match self.kind {
            StreamingTaskKind::LoadLod => resource.stream_in().map(|_| ()),
            StreamingTaskKind::EvictLod => {
                resource.stream_out();
                Ok(())
            }
            StreamingTaskKind::UploadMip(mip) => resource.upload(mip),
        }
    }
}

impl std::fmt::Debug for StreamingTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingTask")
            .field("kind", &self.kind)
            .field("locked", &self._lock.is_some())
            .finish()
    }
}

/// Outcome counters of one [`StreamingCoordinator::tick`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamingStats {
    pub started: usize,
    pub completed: usize,
    pub failed: usize,
    pub missing: usize,
}

struct StreamingEntry {
    id: Guid,
    resource: Weak<dyn StreamableResource>,
}

/// Drives registered resources towards the residency of the current quality.
pub struct StreamingCoordinator {
    settings: RwLock<StreamingSettings>,
    entries: Mutex<Vec<StreamingEntry>>,
}

impl StreamingCoordinator {
    pub fn new(settings: StreamingSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn quality(&self) -> f32 {
        self.settings.read().quality
    }

    pub fn set_quality(&self, quality: f32) {
        self.settings.write().quality = quality.clamp(0.0, 1.0);
    }

    pub fn settings(&self) -> StreamingSettings {
        self.settings.read().clone()
    }

    /// Register `resource`. With `immediate` the target residency is reached before returning.
    pub fn start_streaming<R: StreamableResource + 'static>(&self, resource: &Arc<R>, immediate: bool) -> AssetResult<()> {
        let id = resource.id();
        {
            let mut entries = self.entries.lock();
            if !entries.iter().any(|e| e.id == id) {
                let dyn_resource: Arc<dyn StreamableResource> = resource.clone();
                entries.push(StreamingEntry {
                    id,
                    resource: Arc::downgrade(&dyn_resource),
                });
                log::debug!("Streaming: started '{}'", resource.name());
            }
        }
        if immediate && !resource.is_virtual() {
            let target = target_residency(resource.max_residency(), self.quality());
            while resource.allocated_residency() < target {
                resource.stream_in()?;
            }
            for mip in resource.pending_uploads() {
                resource.upload(mip)?;
            }
        }
        Ok(())
    }

    pub fn stop_streaming(&self, id: Guid) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    pub fn is_streaming(&self, id: Guid) -> bool {
        self.entries.lock().iter().any(|e| e.id == id)
    }

    pub fn resource_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Tasks needed to move every live resource one step towards its target.
    pub fn collect_tasks(&self) -> Vec<StreamingTask> {
        let (quality, max_tasks) = {
            let settings = self.settings.read();
            (settings.quality, settings.max_tasks_per_tick.max(1))
        };
        let mut tasks = Vec::new();
        let mut entries = self.entries.lock();
        entries.retain(|entry| {
            let Some(resource) = entry.resource.upgrade() else {
                log::debug!("Streaming: dropping destroyed resource {}", entry.id);
                return false;
            };
            if resource.is_virtual() || tasks.len() >= max_tasks {
                return true;
            }
            let lock = || resource.storage().map(|s| s.lock_data());
            let target = target_residency(resource.max_residency(), quality);
            let allocated = resource.allocated_residency();
            if allocated < target {
                tasks.push(StreamingTask::new(entry.resource.clone(), StreamingTaskKind::LoadLod, lock()));
            } else if allocated > target {
                tasks.push(StreamingTask::new(entry.resource.clone(), StreamingTaskKind::EvictLod, lock()));
            }
            for mip in resource.pending_uploads() {
                if tasks.len() >= max_tasks {
                    break;
                }
                tasks.push(StreamingTask::new(
                    entry.resource.clone(),
                    StreamingTaskKind::UploadMip(mip),
                    lock(),
                ));
            }
            true
        });
        tasks
    }

    /// Run `tasks` inline or on scoped worker threads.
    pub fn run_tasks(&self, tasks: Vec<StreamingTask>) -> StreamingStats {
        let mut stats = StreamingStats {
            started: tasks.len(),
            ..Default::default()
        };
        let workers = self.settings.read().worker_threads;
        let results: Vec<AssetResult<()>> = if workers == 0 || tasks.len() < 2 {
            tasks.into_iter().map(StreamingTask::run).collect()
        } else {
            let batches = split_batches(tasks, workers);
            std::thread::scope(|scope| {
                let handles: Vec<_> = batches
                    .into_iter()
                    .map(|batch| scope.spawn(move || batch.into_iter().map(StreamingTask::run).collect::<Vec<_>>()))
                    .collect();
                handles
                    .into_iter()
                    .flat_map(|handle| {
                        handle
                            .join()
                            .unwrap_or_else(|_| vec![Err(AssetError::Failed("streaming worker panicked".to_string()))])
                    })
                    .collect()
            })
        };
        for result in results {
            match result {
                Ok(()) => stats.completed += 1,
                Err(AssetError::MissingResources) => stats.missing += 1,
                Err(e) => {
                    log::warn!("Streaming task failed: {e}");
                    stats.failed += 1;
                }
            }
        }
        stats
    }

    /// One streaming step over all registered resources.
    pub fn tick(&self) -> StreamingStats {
        let tasks = self.collect_tasks();
        if tasks.is_empty() {
            return StreamingStats::default();
        }
        let stats = self.run_tasks(tasks);
        log::trace!("Streaming tick: {stats:?}");
        stats
    }
}

impl Default for StreamingCoordinator {
    fn default() -> Self {
        Self::new(StreamingSettings::default())
    }
}

fn split_batches<T>(items: Vec<T>, workers: usize) -> Vec<Vec<T>> {
    let size = items.len().div_ceil(workers.max(1)).max(1);
    let mut batches = Vec::new();
    let mut items = items.into_iter().peekable();
    while items.peek().is_some() {
        batches.push(items.by_ref().take(size).collect());
    }
    batches
}
