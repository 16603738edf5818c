//! Draw-call assembly and direct rendering of meshes.

use std::sync::Arc;

use redlilium_core::math::{Mat4, determinant_sign};
use redlilium_graphics::{
    CommandRecorder, DrawCall, DrawPass, GraphicsDevice, LightmapInfo, Material, RenderContext,
    ShadowsCastingMode, StaticFlags, SurfaceDrawData,
};

use super::{BlendShape, Mesh, MeshBufferType};
use crate::deformation::{DeformedMesh, MeshDeformation};
use crate::instance::ModelInstanceEntry;
use crate::model_base::MaterialSlot;

/// Per-instance inputs of [`MeshVariant::draw_with_info`](super::MeshVariant::draw_with_info).
pub struct MeshDrawInfo<'a> {
    pub device: &'a Arc<GraphicsDevice>,
    pub world: Mat4,
    pub prev_world: Mat4,
    pub material_slots: &'a [MaterialSlot],
    /// Per-instance overrides indexed like `material_slots`.
    pub entries: &'a [ModelInstanceEntry],
    pub deformation: Option<&'a mut MeshDeformation>,
    pub lightmap: Option<LightmapInfo>,
    pub skinning_palette: Option<Arc<[Mat4]>>,
    pub draw_modes: DrawPass,
    pub static_flags: StaticFlags,
    pub receive_decals: bool,
    pub per_instance_random: f32,
    pub sort_order: i16,
}

impl<'a> MeshDrawInfo<'a> {
    pub fn new(device: &'a Arc<GraphicsDevice>, world: Mat4) -> Self {
        Self {
            device,
            world,
            prev_world: world,
            material_slots: &[],
            entries: &[],
            deformation: None,
            lightmap: None,
            skinning_palette: None,
            draw_modes: DrawPass::DEFAULT,
            static_flags: StaticFlags::empty(),
            receive_decals: true,
            per_instance_random: 0.0,
            sort_order: 0,
        }
    }
}

fn surface_or_default(material: Arc<Material>, device: &Arc<GraphicsDevice>) -> Arc<Material> {
    if material.is_surface() {
        material
    } else {
        log::warn!(
            "Material '{}' is not a surface material, drawing with the default",
            material.label().unwrap_or("<unnamed>")
        );
        device.default_material()
    }
}

impl Mesh {
    /// Bind this mesh's buffers and issue one indexed draw.
    pub fn render(&self, recorder: &mut dyn CommandRecorder) {
        let Some(index_buffer) = &self.index_buffer else {
            return;
        };
        let buffers: Vec<_> = self.vertex_buffers.iter().flatten().cloned().collect();
        let offsets = vec![0; buffers.len()];
        recorder.bind_index_buffer(index_buffer, self.use_16bit_index_buffer);
        recorder.bind_vertex_buffers(&buffers, &offsets);
        recorder.draw_indexed(self.triangles * 3, 0, 0);
    }

    /// Submit a draw call with an explicit material. Returns `false` when the mesh
    /// is not ready or no pass is left.
    #[allow(clippy::too_many_arguments)]
    pub fn draw(
        &self,
        ctx: &mut RenderContext,
        material: Arc<Material>,
        world: &Mat4,
        static_flags: StaticFlags,
        receive_decals: bool,
        draw_modes: DrawPass,
        per_instance_random: f32,
        sort_order: i16,
    ) -> bool {
        let Some(index_buffer) = self.index_buffer.clone() else {
            return false;
        };
        let Some(device) = material.device() else {
            return false;
        };
        let material = surface_or_default(material, &device);
        let draw_modes = draw_modes & ctx.view.pass & material.draw_modes();
        if draw_modes.is_empty() {
            return false;
        }
        let sphere = self.sphere.transformed(world);
        ctx.list.add(DrawCall {
            index_buffer,
            index_format_16bit: self.use_16bit_index_buffer,
            vertex_buffers: self.vertex_buffers.clone(),
            vertex_buffer_offsets: [0; 3],
            indices_count: self.triangles * 3,
            start_index: 0,
            instance_count: 1,
            material,
            world: *world,
            object_position: sphere.center,
            object_radius: sphere.radius,
            surface: SurfaceDrawData {
                geometry_size: self.bounds.size(),
                prev_world: *world,
                lightmap: None,
                lod_dither_factor: 0.0,
                skinning_palette: None,
            },
            world_determinant_sign: determinant_sign(world),
            per_instance_random,
            draw_modes,
            static_flags,
            receive_decals,
            sort_order,
            lod_index: self.lod_index,
            mesh_index: self.index,
        });
        true
    }

    /// Shared body of [`MeshVariant::draw_with_info`](super::MeshVariant::draw_with_info).
    pub(crate) fn submit(
        &self,
        blend_shapes: &[BlendShape],
        ctx: &mut RenderContext,
        info: &mut MeshDrawInfo<'_>,
        lod_dither_factor: f32,
    ) -> bool {
        let Some(index_buffer) = self.index_buffer.clone() else {
            return false;
        };
        let slot_index = usize::try_from(self.material_slot_index).ok();
        let slot = slot_index.and_then(|i| info.material_slots.get(i));
        let entry = slot_index.and_then(|i| info.entries.get(i));
        if entry.is_some_and(|e| !e.visible) {
            return false;
        }

        let material = entry
            .and_then(|e| e.material.clone())
            .or_else(|| slot.and_then(|s| s.material.clone()))
            .unwrap_or_else(|| info.device.default_material());
        let material = surface_or_default(material, info.device);

        let shadows = entry.map_or(ShadowsCastingMode::ALL, |e| e.shadows_mode)
            & slot.map_or(ShadowsCastingMode::ALL, |s| s.shadows_mode);
        let draw_modes =
            info.draw_modes & ctx.view.pass & shadows.draw_pass_mask() & material.draw_modes();
        if draw_modes.is_empty() {
            return false;
        }

        let mut vertex_buffers = self.vertex_buffers.clone();
        if let Some(deformation) = info.deformation.as_deref_mut() {
            let target = DeformedMesh {
                mesh: self,
                blend_shapes,
            };
            for ty in MeshBufferType::VERTEX {
                let Some(slot) = ty.vertex_slot() else {
                    continue;
                };
                if let Err(e) =
                    deformation.run_deformers(info.device, &target, ty, &mut vertex_buffers[slot])
                {
                    log::warn!(
                        "Deforming {ty:?} of mesh {} in LOD {} failed: {e}",
                        self.index,
                        self.lod_index
                    );
                }
            }
        }

        let sphere = self.sphere.transformed(&info.world);
        ctx.list.add(DrawCall {
            index_buffer,
            index_format_16bit: self.use_16bit_index_buffer,
            vertex_buffers,
            vertex_buffer_offsets: [0; 3],
            indices_count: self.triangles * 3,
            start_index: 0,
            instance_count: 1,
            material,
            world: info.world,
            object_position: sphere.center,
            object_radius: sphere.radius,
            surface: SurfaceDrawData {
                geometry_size: self.bounds.size(),
                prev_world: info.prev_world,
                lightmap: info.lightmap.filter(|_| self.lightmap_uvs_index >= 0),
                lod_dither_factor,
                skinning_palette: info.skinning_palette.clone(),
            },
            world_determinant_sign: determinant_sign(&info.world),
            per_instance_random: info.per_instance_random,
            draw_modes,
            static_flags: info.static_flags,
            receive_decals: info.receive_decals,
            sort_order: info.sort_order,
            lod_index: self.lod_index,
            mesh_index: self.index,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{MeshUpdate, MeshVariant};
    use redlilium_core::math::Vec3;
    use redlilium_graphics::{
        MaterialDescriptor, MaterialDomain, RecordedCommand, RecordedCommands, RenderView,
    };

    fn mesh(device: &Arc<GraphicsDevice>) -> Mesh {
        let positions = [Vec3::zeros(), Vec3::x(), Vec3::y()];
        let mut mesh = Mesh::new(0, 0);
        MeshUpdate::new(&positions, &[0, 1, 2])
            .to_accessor(false)
            .unwrap()
            .update_mesh(&mut mesh, device, true, false)
            .unwrap();
        mesh
    }

    #[test]
    fn render_records_bind_and_draw() {
        let device = GraphicsDevice::new("test");
        let mut commands = RecordedCommands::new();
        mesh(&device).render(&mut commands);
        assert_eq!(commands.commands.len(), 3);
        assert!(matches!(
            commands.commands[2],
            RecordedCommand::DrawIndexed { indices_count: 3, .. }
        ));
        let mut empty = RecordedCommands::new();
        Mesh::new(0, 0).render(&mut empty);
        assert!(empty.commands.is_empty());
    }

    #[test]
    fn uninitialized_mesh_is_not_drawn() {
        let device = GraphicsDevice::new("test");
        let mut ctx = RenderContext::new(RenderView::default(), 0);
        let mut info = MeshDrawInfo::new(&device, Mat4::identity());
        assert!(!Mesh::new(0, 0).draw_with_info(&mut ctx, &mut info, 0.0));
        assert!(ctx.list.is_empty());
    }

    #[test]
    fn material_falls_back_through_slot_to_default() {
        let device = GraphicsDevice::new("test");
        let mesh = mesh(&device);
        let slot_material =
            device.create_material(&MaterialDescriptor::default().with_label("slot"));
        let slots = [MaterialSlot {
            material: Some(slot_material.clone()),
            ..MaterialSlot::new("Body")
        }];
        let mut ctx = RenderContext::new(RenderView::default(), 0);

        let mut info = MeshDrawInfo::new(&device, Mat4::identity());
        info.material_slots = &slots;
        assert!(mesh.draw_with_info(&mut ctx, &mut info, 0.0));
        assert!(Arc::ptr_eq(&ctx.list.draw_calls[0].material, &slot_material));

        let mut info = MeshDrawInfo::new(&device, Mat4::identity());
        assert!(mesh.draw_with_info(&mut ctx, &mut info, 0.25));
        assert!(Arc::ptr_eq(
            &ctx.list.draw_calls[1].material,
            &device.default_material()
        ));
        assert_eq!(ctx.list.draw_calls[1].surface.lod_dither_factor, 0.25);
    }

    #[test]
    fn non_surface_material_uses_default() {
        let device = GraphicsDevice::new("test");
        let decal = device.create_material(&MaterialDescriptor::new(MaterialDomain::Decal));
        let mut ctx = RenderContext::new(RenderView::default(), 0);
        assert!(mesh(&device).draw(
            &mut ctx,
            decal,
            &Mat4::identity(),
            StaticFlags::empty(),
            true,
            DrawPass::DEFAULT,
            0.0,
            0
        ));
        assert!(ctx.list.draw_calls[0].material.is_surface());
    }

    #[test]
    fn shadow_modes_intersect_to_remove_depth() {
        let device = GraphicsDevice::new("test");
        let mesh = mesh(&device);
        let slots = [MaterialSlot {
            shadows_mode: ShadowsCastingMode::STATIC_ONLY,
            ..MaterialSlot::new("Body")
        }];
        let entries = [ModelInstanceEntry {
            shadows_mode: ShadowsCastingMode::DYNAMIC_ONLY,
            ..Default::default()
        }];
        let mut ctx = RenderContext::new(RenderView::default(), 0);
        let mut info = MeshDrawInfo::new(&device, Mat4::identity());
        info.material_slots = &slots;
        info.entries = &entries;
        assert!(mesh.draw_with_info(&mut ctx, &mut info, 0.0));
        assert!(!ctx.list.draw_calls[0].draw_modes.contains(DrawPass::DEPTH));

        let hidden = [ModelInstanceEntry {
            visible: false,
            ..Default::default()
        }];
        info.entries = &hidden;
        assert!(!mesh.draw_with_info(&mut ctx, &mut info, 0.0));
    }

    #[test]
    fn mirrored_world_flips_determinant_sign() {
        let device = GraphicsDevice::new("test");
        let mut ctx = RenderContext::new(RenderView::default(), 0);
        let world = Mat4::new_nonuniform_scaling(&Vec3::new(-1.0, 1.0, 1.0));
        let mut info = MeshDrawInfo::new(&device, world);
        assert!(mesh(&device).draw_with_info(&mut ctx, &mut info, 0.0));
        assert_eq!(ctx.list.draw_calls[0].world_determinant_sign, -1.0);
    }
}
