//! Position-based Verlet cloth solver implementing [`ClothBackend`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use redlilium_core::Transform;
use redlilium_core::math::{Vec3, Vec4, normalized_rotation};

use super::backend::{
    ClothBackend, ClothCollisionSettings, ClothDescriptor, ClothFabricSettings, ClothForceSettings,
    ClothHandle, ClothSceneId, ClothSettingsBlocks, ClothSimulationSettings,
};
use crate::error::ClothError;

const MAX_SUBSTEPS: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ConstraintKind {
    Stretch,
    Shear,
    Bend,
}

#[derive(Debug, Clone, Copy)]
struct DistanceConstraint {
    a: u32,
    b: u32,
    rest_length: f32,
    kind: ConstraintKind,
}

struct SimulatedCloth {
    /// `xyz` cloth-local position, `w` inverse mass.
    particles: Vec<Vec4>,
    previous: Vec<Vec3>,
    rest: Vec<Vec3>,
    max_distances: Vec<f32>,
    constraints: Vec<DistanceConstraint>,
    transform: Transform,
    settings: ClothSettingsBlocks,
    scene: Option<ClothSceneId>,
}

fn inverse_transform_vector(t: &Transform, v: &Vec3) -> Vec3 {
    (normalized_rotation(t.orientation).inverse() * v).component_div(&t.scale)
}

/// Edge constraints of a triangle list. The longest edge of each triangle
/// is a shear diagonal; edges shared by two triangles add a bend constraint
/// across their opposite vertices.
fn build_constraints(positions: &[Vec3], indices: &[u32]) -> Vec<DistanceConstraint> {
    let mut edges: HashMap<(u32, u32), ConstraintKind> = HashMap::new();
    let mut opposite: HashMap<(u32, u32), Vec<u32>> = HashMap::new();
    let key = |a: u32, b: u32| if a < b { (a, b) } else { (b, a) };
    let length = |a: u32, b: u32| (positions[b as usize] - positions[a as usize]).norm();

    for tri in indices.chunks_exact(3) {
        let sides = [(tri[0], tri[1], tri[2]), (tri[1], tri[2], tri[0]), (tri[2], tri[0], tri[1])];
        let longest = sides
            .iter()
            .enumerate()
            .max_by(|(_, x), (_, y)| length(x.0, x.1).total_cmp(&length(y.0, y.1)))
            .map_or(0, |(i, _)| i);
        for (i, &(a, b, c)) in sides.iter().enumerate() {
            let kind = if i == longest {
                ConstraintKind::Shear
            } else {
                ConstraintKind::Stretch
            };
            let entry = edges.entry(key(a, b)).or_insert(kind);
            *entry = (*entry).min(kind);
            opposite.entry(key(a, b)).or_default().push(c);
        }
    }

    let mut constraints: Vec<DistanceConstraint> = edges
        .into_iter()
        .map(|((a, b), kind)| DistanceConstraint {
            a,
            b,
            rest_length: length(a, b),
            kind,
        })
        .collect();
    for others in opposite.values() {
        if let [c, d] = others.as_slice() {
            if c != d {
                constraints.push(DistanceConstraint {
                    a: *c,
                    b: *d,
                    rest_length: length(*c, *d),
                    kind: ConstraintKind::Bend,
                });
            }
        }
    }
    constraints.sort_by_key(|c| (c.kind, c.a, c.b));
    constraints
}

impl SimulatedCloth {
    fn max_distances(paint: &[f32], count: usize, max_particle_distance: f32) -> Vec<f32> {
        if paint.is_empty() {
            vec![f32::INFINITY; count]
        } else {
            paint
                .iter()
                .map(|p| p.clamp(0.0, 1.0) * max_particle_distance)
                .collect()
        }
    }

    fn step(&mut self, dt: f32) {
        let sim = &self.settings.simulation;
        let force = &self.settings.force;
        let fabric = &self.settings.fabric;
        let substeps = ((sim.solver_frequency * dt).ceil() as u32).clamp(1, MAX_SUBSTEPS);
        let h = dt / substeps as f32;
        let gravity = inverse_transform_vector(&self.transform, &force.gravity);
        let wind = inverse_transform_vector(&self.transform, &force.wind_velocity);
        let keep = (1.0 - force.damping * h).clamp(0.0, 1.0);

        for _ in 0..substeps {
            for (particle, previous) in self.particles.iter_mut().zip(&mut self.previous) {
                if particle.w <= 0.0 {
                    *previous = particle.xyz();
                    continue;
                }
                let p = particle.xyz();
                let velocity = (p - *previous) / h;
                let accel = gravity + (wind - velocity) * force.wind_drag - velocity * force.linear_drag;
                let next = p + velocity * keep * h + accel * h * h;
                *previous = p;
                particle.x = next.x;
                particle.y = next.y;
                particle.z = next.z;
            }

            for _ in 0..sim.iterations.max(1) {
                for c in &self.constraints {
                    let stiffness = match c.kind {
                        ConstraintKind::Stretch => fabric.stretch_stiffness,
                        ConstraintKind::Shear => fabric.shear_stiffness,
                        ConstraintKind::Bend => fabric.bend_stiffness,
                    }
                    .clamp(0.0, 1.0);
                    let (a, b) = (c.a as usize, c.b as usize);
                    let (wa, wb) = (self.particles[a].w, self.particles[b].w);
                    if stiffness == 0.0 || wa + wb <= 0.0 {
                        continue;
                    }
                    let delta = self.particles[b].xyz() - self.particles[a].xyz();
                    let len = delta.norm();
                    if len <= f32::EPSILON {
                        continue;
                    }
                    let correction = delta * ((len - c.rest_length) / len * stiffness / (wa + wb));
                    let pa = self.particles[a].xyz() + correction * wa;
                    let pb = self.particles[b].xyz() - correction * wb;
                    self.particles[a] = Vec4::new(pa.x, pa.y, pa.z, wa);
                    self.particles[b] = Vec4::new(pb.x, pb.y, pb.z, wb);
                }
            }

            for ((particle, rest), max) in self.particles.iter_mut().zip(&self.rest).zip(&self.max_distances) {
                if particle.w <= 0.0 || !max.is_finite() {
                    continue;
                }
                let offset = particle.xyz() - rest;
                let len = offset.norm();
                if len > *max {
                    let p = rest + offset * (*max / len);
                    *particle = Vec4::new(p.x, p.y, p.z, particle.w);
                }
            }
        }
    }
}

/// In-process cloth solver: Verlet integration with distance constraints
/// for stretch, shear and bend, and a max-distance constraint from paint.
#[derive(Default)]
pub struct SimpleClothBackend {
    next_handle: AtomicU64,
    cloths: Mutex<HashMap<ClothHandle, SimulatedCloth>>,
}

impl SimpleClothBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cloth_count(&self) -> usize {
        self.cloths.lock().len()
    }

    pub fn scene_of(&self, handle: ClothHandle) -> Option<ClothSceneId> {
        self.cloths.lock().get(&handle).and_then(|c| c.scene)
    }

    fn with_cloth(&self, handle: ClothHandle, f: impl FnOnce(&mut SimulatedCloth)) {
        match self.cloths.lock().get_mut(&handle) {
            Some(cloth) => f(cloth),
            None => log::warn!("Cloth {handle:?} does not exist"),
        }
    }
}

impl ClothBackend for SimpleClothBackend {
    fn create_cloth(&self, desc: &ClothDescriptor<'_>) -> Result<ClothHandle, ClothError> {
        let count = desc.positions.len();
        if desc.inv_masses.len() != count || (!desc.paint.is_empty() && desc.paint.len() != count) {
            return Err(ClothError::Backend(format!(
                "per-vertex arrays do not match {count} positions"
            )));
        }
        if desc.indices.len() % 3 != 0 || desc.indices.iter().any(|&i| i as usize >= count) {
            return Err(ClothError::Backend("invalid triangle indices".to_string()));
        }
        let cloth = SimulatedCloth {
            particles: desc
                .positions
                .iter()
                .zip(desc.inv_masses)
                .map(|(p, w)| Vec4::new(p.x, p.y, p.z, *w))
                .collect(),
            previous: desc.positions.to_vec(),
            rest: desc.positions.to_vec(),
            max_distances: SimulatedCloth::max_distances(
                desc.paint,
                count,
                desc.settings.simulation.max_particle_distance,
            ),
            constraints: build_constraints(desc.positions, desc.indices),
            transform: desc.transform,
            settings: desc.settings.clone(),
            scene: None,
        };
        let handle = ClothHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        log::trace!(
            "Created cloth {handle:?}: {count} particles, {} constraints",
            cloth.constraints.len()
        );
        self.cloths.lock().insert(handle, cloth);
        Ok(handle)
    }

    fn destroy_cloth(&self, handle: ClothHandle) {
        if self.cloths.lock().remove(&handle).is_some() {
            log::trace!("Destroyed cloth {handle:?}");
        }
    }

    fn add_cloth(&self, scene: ClothSceneId, handle: ClothHandle) {
        self.with_cloth(handle, |cloth| cloth.scene = Some(scene));
    }

    fn remove_cloth(&self, scene: ClothSceneId, handle: ClothHandle) {
        self.with_cloth(handle, |cloth| {
            if cloth.scene == Some(scene) {
                cloth.scene = None;
            }
        });
    }

    fn set_force_settings(&self, handle: ClothHandle, settings: &ClothForceSettings) {
        self.with_cloth(handle, |cloth| cloth.settings.force = settings.clone());
    }

    fn set_collision_settings(&self, handle: ClothHandle, settings: &ClothCollisionSettings) {
        self.with_cloth(handle, |cloth| cloth.settings.collision = settings.clone());
    }

    fn set_simulation_settings(&self, handle: ClothHandle, settings: &ClothSimulationSettings) {
        self.with_cloth(handle, |cloth| cloth.settings.simulation = settings.clone());
    }

    fn set_fabric_settings(&self, handle: ClothHandle, settings: &ClothFabricSettings) {
        self.with_cloth(handle, |cloth| cloth.settings.fabric = settings.clone());
    }

    fn set_transform(&self, handle: ClothHandle, transform: &Transform, teleport: bool) {
        self.with_cloth(handle, |cloth| {
            if !teleport {
                let old = cloth.transform;
                let relocate = |p: &Vec3| transform.inverse_transform_point(&old.transform_point(p));
                for (particle, previous) in cloth.particles.iter_mut().zip(&mut cloth.previous) {
                    if particle.w > 0.0 {
                        let p = relocate(&particle.xyz());
                        *particle = Vec4::new(p.x, p.y, p.z, particle.w);
                        *previous = relocate(previous);
                    }
                }
            } else {
                for (particle, previous) in cloth.particles.iter().zip(&mut cloth.previous) {
                    *previous = particle.xyz();
                }
            }
            cloth.transform = *transform;
        });
    }

    fn clear_inertia(&self, handle: ClothHandle) {
        self.with_cloth(handle, |cloth| {
            for (particle, previous) in cloth.particles.iter().zip(&mut cloth.previous) {
                *previous = particle.xyz();
            }
        });
    }

    fn with_particles(&self, handle: ClothHandle, f: &mut dyn FnMut(&mut [Vec4])) -> Result<(), ClothError> {
        let mut cloths = self.cloths.lock();
        let cloth = cloths
            .get_mut(&handle)
            .ok_or_else(|| ClothError::Backend(format!("cloth {handle:?} does not exist")))?;
        f(&mut cloth.particles);
        Ok(())
    }

    fn set_paint(&self, handle: ClothHandle, paint: &[f32]) -> Result<(), ClothError> {
        let mut cloths = self.cloths.lock();
        let cloth = cloths
            .get_mut(&handle)
            .ok_or_else(|| ClothError::Backend(format!("cloth {handle:?} does not exist")))?;
        if !paint.is_empty() && paint.len() != cloth.particles.len() {
            return Err(ClothError::Backend(format!(
                "paint has {} values for {} particles",
                paint.len(),
                cloth.particles.len()
            )));
        }
        cloth.max_distances = SimulatedCloth::max_distances(
            paint,
            cloth.particles.len(),
            cloth.settings.simulation.max_particle_distance,
        );
        Ok(())
    }

    fn simulate(&self, scene: ClothSceneId, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        for cloth in self.cloths.lock().values_mut() {
            if cloth.scene == Some(scene) {
                cloth.step(dt);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip() -> (Vec<Vec3>, Vec<u32>) {
        let positions = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 1.0),
        ];
        (positions, vec![0, 2, 1, 1, 2, 3])
    }

    #[test]
    fn quad_constraints() {
        let (positions, indices) = strip();
        let constraints = build_constraints(&positions, &indices);
        let count = |kind| constraints.iter().filter(|c| c.kind == kind).count();
        assert_eq!(count(ConstraintKind::Stretch), 4);
        assert_eq!(count(ConstraintKind::Shear), 1);
        assert_eq!(count(ConstraintKind::Bend), 1);
    }

    #[test]
    fn fixed_particles_stay_and_free_ones_fall() {
        let (positions, indices) = strip();
        let settings = ClothSettingsBlocks::default();
        let backend = SimpleClothBackend::new();
        let handle = backend
            .create_cloth(&ClothDescriptor {
                positions: &positions,
                indices: &indices,
                inv_masses: &[0.0, 0.0, 1.0, 1.0],
                paint: &[],
                transform: Transform::identity(),
                settings: &settings,
            })
            .unwrap();
        backend.add_cloth(ClothSceneId(0), handle);
        for _ in 0..30 {
            backend.simulate(ClothSceneId(0), 1.0 / 60.0);
        }
        let particles = backend.particles(handle).unwrap();
        assert_eq!(particles[0].xyz(), positions[0]);
        assert_eq!(particles[1].xyz(), positions[1]);
        assert!(particles[2].y < -0.1);
        let edge = (particles[2].xyz() - particles[0].xyz()).norm();
        assert!((edge - 1.0).abs() < 0.1);
    }

    #[test]
    fn cloth_outside_scene_does_not_move() {
        let (positions, indices) = strip();
        let settings = ClothSettingsBlocks::default();
        let backend = SimpleClothBackend::new();
        let handle = backend
            .create_cloth(&ClothDescriptor {
                positions: &positions,
                indices: &indices,
                inv_masses: &[1.0; 4],
                paint: &[],
                transform: Transform::identity(),
                settings: &settings,
            })
            .unwrap();
        backend.simulate(ClothSceneId(0), 0.1);
        assert_eq!(backend.particles(handle).unwrap()[3].xyz(), positions[3]);
        backend.destroy_cloth(handle);
        assert!(backend.particles(handle).is_err());
    }

    #[test]
    fn paint_limits_travel() {
        let (positions, indices) = strip();
        let mut settings = ClothSettingsBlocks::default();
        settings.simulation.max_particle_distance = 0.05;
        let backend = SimpleClothBackend::new();
        let handle = backend
            .create_cloth(&ClothDescriptor {
                positions: &positions,
                indices: &indices,
                inv_masses: &[1.0; 4],
                paint: &[1.0; 4],
                transform: Transform::identity(),
                settings: &settings,
            })
            .unwrap();
        backend.add_cloth(ClothSceneId(3), handle);
        for _ in 0..20 {
            backend.simulate(ClothSceneId(3), 1.0 / 60.0);
        }
        for (p, rest) in backend.particles(handle).unwrap().iter().zip(&positions) {
            assert!((p.xyz() - rest).norm() <= 0.05 + 1e-4);
        }
    }

    #[test]
    fn mismatched_arrays_are_rejected() {
        let (positions, indices) = strip();
        let settings = ClothSettingsBlocks::default();
        let err = SimpleClothBackend::new()
            .create_cloth(&ClothDescriptor {
                positions: &positions,
                indices: &indices,
                inv_masses: &[1.0; 3],
                paint: &[],
                transform: Transform::identity(),
                settings: &settings,
            })
            .unwrap_err();
        assert!(matches!(err, ClothError::Backend(_)));
    }
}
