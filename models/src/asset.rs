//! Asset identity, lifecycle events and the registry used to resolve references.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use redlilium_core::Guid;
use redlilium_graphics::Material;

use crate::animation::Animation;
use crate::model::Model;
use crate::skinned_model::SkinnedModel;
use crate::storage::AssetKind;

/// Lifecycle notifications emitted by assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetEvent {
    /// The asset released its data.
    Unloaded,
    /// The asset re-read its data; derived caches are stale.
    Reloaded,
}

type Observer = Arc<dyn Fn(Guid, AssetEvent) + Send + Sync>;

/// Observer list of one asset. Observers are keyed by their owner's id.
#[derive(Default)]
pub struct AssetEvents {
    observers: Mutex<Vec<(Guid, Observer)>>,
}

impl AssetEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `owner`, replacing an earlier registration of the same owner.
    pub fn subscribe(&self, owner: Guid, callback: impl Fn(Guid, AssetEvent) + Send + Sync + 'static) {
        let mut observers = self.observers.lock();
        observers.retain(|(key, _)| *key != owner);
        observers.push((owner, Arc::new(callback)));
    }

    /// Remove the observer registered by `owner`.
    pub fn unsubscribe(&self, owner: Guid) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(key, _)| *key != owner);
        observers.len() != before
    }

    pub fn is_subscribed(&self, owner: Guid) -> bool {
        self.observers.lock().iter().any(|(key, _)| *key == owner)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Notify every observer. Callbacks run outside the list lock and may unsubscribe.
    pub fn emit(&self, asset: Guid, event: AssetEvent) {
        let observers: Vec<Observer> = self
            .observers
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        log::trace!("Asset {asset}: {event:?} -> {} observers", observers.len());
        for callback in observers {
            callback(asset, event);
        }
    }
}

impl std::fmt::Debug for AssetEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetEvents")
            .field("observers", &self.observer_count())
            .finish()
    }
}

/// Common surface of loadable assets.
pub trait Asset: Send + Sync {
    fn id(&self) -> Guid;
    fn name(&self) -> &str;
    fn kind(&self) -> AssetKind;
    /// Built in memory at runtime rather than loaded from storage.
    fn is_virtual(&self) -> bool;
    fn events(&self) -> &AssetEvents;
}

/// A registered asset of any kind.
#[derive(Clone)]
pub enum AssetHandle {
    Model(Arc<Model>),
    SkinnedModel(Arc<SkinnedModel>),
    Animation(Arc<Animation>),
}

impl AssetHandle {
    pub fn as_asset(&self) -> &dyn Asset {
        match self {
            Self::Model(m) => m.as_ref(),
            Self::SkinnedModel(m) => m.as_ref(),
            Self::Animation(a) => a.as_ref(),
        }
    }

    pub fn id(&self) -> Guid {
        self.as_asset().id()
    }
}

/// Lookup of live assets and materials by id.
#[derive(Default)]
pub struct AssetRegistry {
    assets: RwLock<HashMap<Guid, AssetHandle>>,
    materials: RwLock<HashMap<Guid, Arc<Material>>>,
}

impl AssetRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, handle: AssetHandle) {
        let id = handle.id();
        if self.assets.write().insert(id, handle).is_some() {
            log::warn!("Asset {id} registered twice, replacing the previous entry");
        }
    }

    /// Remove an asset and notify its observers that it is gone.
    pub fn unregister(&self, id: Guid) -> Option<AssetHandle> {
        let handle = self.assets.write().remove(&id)?;
        handle.as_asset().events().emit(id, AssetEvent::Unloaded);
        Some(handle)
    }

    pub fn get(&self, id: Guid) -> Option<AssetHandle> {
        self.assets.read().get(&id).cloned()
    }

    pub fn model(&self, id: Guid) -> Option<Arc<Model>> {
        match self.get(id)? {
            AssetHandle::Model(m) => Some(m),
            _ => None,
        }
    }

    pub fn skinned_model(&self, id: Guid) -> Option<Arc<SkinnedModel>> {
        match self.get(id)? {
            AssetHandle::SkinnedModel(m) => Some(m),
            _ => None,
        }
    }

    pub fn animation(&self, id: Guid) -> Option<Arc<Animation>> {
        match self.get(id)? {
            AssetHandle::Animation(a) => Some(a),
            _ => None,
        }
    }

    pub fn register_material(&self, id: Guid, material: Arc<Material>) {
        self.materials.write().insert(id, material);
    }

    pub fn material(&self, id: Guid) -> Option<Arc<Material>> {
        if !id.is_valid() {
            return None;
        }
        self.materials.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.assets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.read().is_empty()
    }
}
