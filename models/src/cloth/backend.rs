//! Physics back-end contract consumed by [`ClothActor`](super::ClothActor).

use redlilium_core::Transform;
use redlilium_core::math::{Vec3, Vec4};

use crate::error::ClothError;

/// Opaque cloth created by a [`ClothBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClothHandle(pub u64);

/// Physics scene a cloth simulates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClothSceneId(pub u32);

/// External forces.
#[derive(Debug, Clone, PartialEq)]
pub struct ClothForceSettings {
    pub gravity: Vec3,
    /// Velocity damping per second in `[0, 1]`.
    pub damping: f32,
    pub linear_drag: f32,
    pub wind_velocity: Vec3,
    pub wind_drag: f32,
}

impl Default for ClothForceSettings {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.81, 0.0),
            damping: 0.4,
            linear_drag: 0.2,
            wind_velocity: Vec3::zeros(),
            wind_drag: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClothCollisionSettings {
    pub thickness: f32,
    pub friction: f32,
}

impl Default for ClothCollisionSettings {
    fn default() -> Self {
        Self {
            thickness: 1.0,
            friction: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClothSimulationSettings {
    /// Constraint solver passes per substep.
    pub iterations: u32,
    /// Substeps per second.
    pub solver_frequency: f32,
    /// Beyond this view distance the cloth stops simulating; `0` disables culling.
    pub cull_distance: f32,
    pub update_when_offscreen: bool,
    /// Rebuild normals and tangents from the simulated positions.
    pub compute_normals: bool,
    /// Distance a particle with paint `1` may move from its rest position.
    pub max_particle_distance: f32,
}

impl Default for ClothSimulationSettings {
    fn default() -> Self {
        Self {
            iterations: 4,
            solver_frequency: 300.0,
            cull_distance: 5000.0,
            update_when_offscreen: false,
            compute_normals: true,
            max_particle_distance: 1000.0,
        }
    }
}

/// Constraint stiffnesses in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClothFabricSettings {
    pub stretch_stiffness: f32,
    pub bend_stiffness: f32,
    pub shear_stiffness: f32,
}

impl Default for ClothFabricSettings {
    fn default() -> Self {
        Self {
            stretch_stiffness: 1.0,
            bend_stiffness: 0.5,
            shear_stiffness: 0.8,
        }
    }
}

/// All settings blocks of one cloth.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClothSettingsBlocks {
    pub force: ClothForceSettings,
    pub collision: ClothCollisionSettings,
    pub simulation: ClothSimulationSettings,
    pub fabric: ClothFabricSettings,
}

/// Everything a back-end needs to create a cloth. Positions are cloth-local.
#[derive(Debug, Clone)]
pub struct ClothDescriptor<'a> {
    pub positions: &'a [Vec3],
    pub indices: &'a [u32],
    pub inv_masses: &'a [f32],
    /// Per-vertex paint in `[0, 1]`; empty when the cloth is unpainted.
    pub paint: &'a [f32],
    pub transform: Transform,
    pub settings: &'a ClothSettingsBlocks,
}

/// Cloth simulation back-end.
///
/// Particles are `Vec4`s in cloth-local space: `xyz` position, `w` inverse mass.
pub trait ClothBackend: Send + Sync {
    fn create_cloth(&self, desc: &ClothDescriptor<'_>) -> Result<ClothHandle, ClothError>;
    fn destroy_cloth(&self, handle: ClothHandle);

    fn add_cloth(&self, scene: ClothSceneId, handle: ClothHandle);
    fn remove_cloth(&self, scene: ClothSceneId, handle: ClothHandle);

    fn set_force_settings(&self, handle: ClothHandle, settings: &ClothForceSettings);
    fn set_collision_settings(&self, handle: ClothHandle, settings: &ClothCollisionSettings);
    fn set_simulation_settings(&self, handle: ClothHandle, settings: &ClothSimulationSettings);
    fn set_fabric_settings(&self, handle: ClothHandle, settings: &ClothFabricSettings);

    /// Move the cloth frame. Without `teleport` the particles keep their world positions.
    fn set_transform(&self, handle: ClothHandle, transform: &Transform, teleport: bool);
    fn clear_inertia(&self, handle: ClothHandle);

    /// Run `f` with the particle array locked.
    fn with_particles(&self, handle: ClothHandle, f: &mut dyn FnMut(&mut [Vec4])) -> Result<(), ClothError>;

    fn particles(&self, handle: ClothHandle) -> Result<Vec<Vec4>, ClothError> {
        let mut out = Vec::new();
        self.with_particles(handle, &mut |particles| out.extend_from_slice(particles))?;
        Ok(out)
    }

    fn set_paint(&self, handle: ClothHandle, paint: &[f32]) -> Result<(), ClothError>;

    /// Advance every cloth of `scene` by `dt` seconds.
    fn simulate(&self, scene: ClothSceneId, dt: f32);
}
