//! # RedLilium Models
//!
//! Renderable model assets: static and skinned meshes stored in chunked
//! packages, streamed LOD by LOD, selected per instance with a dithered
//! crossfade and deformed at draw time by blend shapes and cloth.
//!
//! ## Overview
//!
//! - [`Model`] / [`SkinnedModel`] - Assets with up to [`MAX_LODS`] LODs
//! - [`AssetStorage`] - Chunked package backing a stored asset
//! - [`StreamingCoordinator`] - Moves residency towards the quality target
//! - [`ModelInstance`] - Per-placement state and the draw path
//! - [`MeshDeformation`] - Per-instance vertex buffer overrides
//! - [`BlendShapesInstance`] / [`ClothActor`] - The built-in deformers
//! - [`ModelsSettings`] - TOML-backed runtime settings

pub mod animation;
pub mod asset;
pub mod blend_shapes;
pub mod cloth;
pub mod deformation;
pub mod error;
pub mod instance;
pub mod lod;
pub mod lod_selection;
pub mod mesh;
pub mod model;
pub mod model_base;
pub mod sdf;
pub mod serialization;
pub mod settings;
pub mod skeleton;
pub mod skinned_model;
pub mod storage;
pub mod streaming;

pub use animation::Animation;
pub use asset::{Asset, AssetEvent, AssetEvents, AssetHandle, AssetRegistry};
pub use blend_shapes::{BlendShapeDeformer, BlendShapesInstance};
pub use cloth::{
    ClothActor, ClothBackend, ClothDescriptor, ClothHandle, ClothSceneId, ClothSettingsBlocks,
    SimpleClothBackend,
};
pub use deformation::{MeshDeformation, MeshDeformationData, MeshDeformer};
pub use error::{AssetError, AssetResult, ClothError};
pub use instance::{InstanceModel, ModelInstance, ModelInstanceEntry};
pub use lod::ModelLod;
pub use lod_selection::{LodSubmission, LodTransitionState, apply_lod_bias, compute_lod};
pub use mesh::{
    BlendShape, BlendShapeVertex, Mesh, MeshAccessor, MeshBufferType, MeshHit, MeshUpdate,
    MeshVariant, SkinnedMesh,
};
pub use model::Model;
pub use model_base::{MAX_LODS, MaterialSlot, ModelBase, ModelContext};
pub use settings::{ClothSettings, ModelsSettings, StreamingSettings};
pub use skeleton::{Skeleton, SkeletonBone, SkeletonMapping, SkeletonNode, SkeletonRetarget};
pub use skinned_model::SkinnedModel;
pub use storage::{AssetKind, AssetStorage, PackedAsset, StorageLock};
pub use streaming::{StreamableResource, StreamingCoordinator, StreamingStats};

// Assets and the coordinator are shared between the main thread and streaming workers.
static_assertions::assert_impl_all!(Model: Send, Sync);
static_assertions::assert_impl_all!(SkinnedModel: Send, Sync);
static_assertions::assert_impl_all!(AssetStorage: Send, Sync);
static_assertions::assert_impl_all!(StreamingCoordinator: Send, Sync);
static_assertions::assert_impl_all!(SimpleClothBackend: Send, Sync);
static_assertions::assert_impl_all!(ModelInstance: Send);

/// Models library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
