//! Draw submission contract between models and the renderer.
//!
//! Models translate their meshes into [`DrawCall`] values collected in a
//! [`RenderList`]. The renderer owns everything after that point.

use std::sync::Arc;

use bitflags::bitflags;
use redlilium_core::math::{Mat4, Vec3, Vec4};

use crate::materials::Material;
use crate::resources::Buffer;

bitflags! {
    /// Rendering passes an object participates in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DrawPass: u32 {
        /// Depth-only rendering (shadow maps, depth prepass).
        const DEPTH = 1 << 0;
        const GBUFFER = 1 << 1;
        const FORWARD = 1 << 2;
        const DISTORTION = 1 << 3;
        const MOTION_VECTORS = 1 << 4;
        const GLOBAL_SDF = 1 << 5;
        const GLOBAL_SURFACE_ATLAS = 1 << 6;

        /// Passes a regular opaque surface takes part in.
        const DEFAULT = Self::DEPTH.bits()
            | Self::GBUFFER.bits()
            | Self::FORWARD.bits()
            | Self::DISTORTION.bits()
            | Self::MOTION_VECTORS.bits()
            | Self::GLOBAL_SDF.bits()
            | Self::GLOBAL_SURFACE_ATLAS.bits();
    }
}

impl Default for DrawPass {
    fn default() -> Self {
        Self::DEFAULT
    }
}

bitflags! {
    /// Which shadow maps an object casts into.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShadowsCastingMode: u8 {
        const STATIC_ONLY = 1 << 0;
        const DYNAMIC_ONLY = 1 << 1;
        const ALL = Self::STATIC_ONLY.bits() | Self::DYNAMIC_ONLY.bits();
    }
}

impl Default for ShadowsCastingMode {
    fn default() -> Self {
        Self::ALL
    }
}

impl ShadowsCastingMode {
    /// Pass mask for this shadow mode: objects that cast no shadows skip depth rendering.
    pub fn draw_pass_mask(self) -> DrawPass {
        if self.is_empty() {
            DrawPass::all() - DrawPass::DEPTH
        } else {
            DrawPass::all()
        }
    }
}

bitflags! {
    /// Object mobility flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StaticFlags: u8 {
        const TRANSFORM = 1 << 0;
        const SHADOW = 1 << 1;
        const LIGHTMAP = 1 << 2;
        const NAVIGATION = 1 << 3;
    }
}

/// Camera and pass settings used while building draw calls.
#[derive(Debug, Clone)]
pub struct RenderView {
    /// Camera position in world space.
    pub position: Vec3,
    pub view: Mat4,
    pub projection: Mat4,
    /// Added to every model's selected LOD index.
    pub model_lod_bias: i32,
    /// Multiplier on the projected screen size used for LOD selection.
    pub model_lod_distance_factor: f32,
    /// Passes rendered by this view.
    pub pass: DrawPass,
    /// One-off views (probes, thumbnails) that must not advance per-instance state.
    pub is_single_frame: bool,
}

impl Default for RenderView {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            view: Mat4::identity(),
            projection: Mat4::identity(),
            model_lod_bias: 0,
            model_lod_distance_factor: 1.0,
            pass: DrawPass::DEFAULT,
            is_single_frame: false,
        }
    }
}

impl RenderView {
    pub fn new(position: Vec3, view: Mat4, projection: Mat4) -> Self {
        Self {
            position,
            view,
            projection,
            ..Default::default()
        }
    }
}

/// Lightmap binding of a drawn surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightmapInfo {
    pub texture_index: i32,
    /// UV scale (xy) and offset (zw) inside the lightmap atlas.
    pub uvs_area: Vec4,
}

/// Per-surface data consumed by surface shaders.
#[derive(Debug, Clone)]
pub struct SurfaceDrawData {
    /// Local-space size of the mesh bounds.
    pub geometry_size: Vec3,
    /// World matrix from the previous frame (motion vectors).
    pub prev_world: Mat4,
    pub lightmap: Option<LightmapInfo>,
    /// Signed LOD transition dither, `0` when no transition is running.
    pub lod_dither_factor: f32,
    /// Bone matrices for GPU skinning.
    pub skinning_palette: Option<Arc<[Mat4]>>,
}

/// One mesh draw handed to the renderer.
#[derive(Debug, Clone)]
pub struct DrawCall {
    pub index_buffer: Arc<Buffer>,
    pub index_format_16bit: bool,
    pub vertex_buffers: [Option<Arc<Buffer>>; 3],
    pub vertex_buffer_offsets: [u32; 3],
    pub indices_count: u32,
    pub start_index: u32,
    pub instance_count: u32,
    pub material: Arc<Material>,
    pub world: Mat4,
    pub object_position: Vec3,
    pub object_radius: f32,
    pub surface: SurfaceDrawData,
    /// `sign(det(world 3x3))`, used to flip winding for mirrored transforms.
    pub world_determinant_sign: f32,
    pub per_instance_random: f32,
    /// Passes this draw call goes into.
    pub draw_modes: DrawPass,
    pub static_flags: StaticFlags,
    pub receive_decals: bool,
    pub sort_order: i16,
    pub lod_index: u8,
    pub mesh_index: u16,
}

/// Draw calls gathered for one view.
#[derive(Debug, Default)]
pub struct RenderList {
    pub draw_calls: Vec<DrawCall>,
}

impl RenderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, draw_call: DrawCall) {
        self.draw_calls.push(draw_call);
    }

    pub fn clear(&mut self) {
        self.draw_calls.clear();
    }

    pub fn len(&self) -> usize {
        self.draw_calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.draw_calls.is_empty()
    }
}

/// View, frame number and output list for one draw traversal.
#[derive(Debug)]
pub struct RenderContext {
    pub view: RenderView,
    /// Engine frame counter.
    pub frame: u32,
    pub list: RenderList,
}

impl RenderContext {
    pub fn new(view: RenderView, frame: u32) -> Self {
        Self {
            view,
            frame,
            list: RenderList::new(),
        }
    }
}
