//! Math type aliases, helper functions and the decomposed [`Transform`].
//!
//! All rendering math is `f32` and column-vector (`p' = M * p`).

pub use nalgebra;

/// 2D vector (f32).
pub type Vec2 = nalgebra::Vector2<f32>;

/// 3D vector (f32).
pub type Vec3 = nalgebra::Vector3<f32>;

/// 4D vector (f32).
pub type Vec4 = nalgebra::Vector4<f32>;

/// 3x3 matrix (f32).
pub type Mat3 = nalgebra::Matrix3<f32>;

/// 4x4 matrix (f32).
pub type Mat4 = nalgebra::Matrix4<f32>;

/// Quaternion (f32). Stored as `[x, y, z, w]` in memory.
/// Use [`quat_from_xyzw`] or `Quaternion::new(w, x, y, z)` to construct.
pub type Quat = nalgebra::Quaternion<f32>;

/// Build a 4x4 TRS matrix from scale, rotation (quaternion), and translation.
///
/// The rotation is normalized first so slightly denormalized data read from
/// disk still produces a rigid rotation.
pub fn mat4_from_scale_rotation_translation(
    scale: Vec3,
    rotation: Quat,
    translation: Vec3,
) -> Mat4 {
    let r = normalized_rotation(rotation);
    let m = r.to_rotation_matrix();
    let rm = m.matrix();
    #[rustfmt::skip]
    let result = Mat4::new(
        rm[(0, 0)] * scale.x, rm[(0, 1)] * scale.y, rm[(0, 2)] * scale.z, translation.x,
        rm[(1, 0)] * scale.x, rm[(1, 1)] * scale.y, rm[(1, 2)] * scale.z, translation.y,
        rm[(2, 0)] * scale.x, rm[(2, 1)] * scale.y, rm[(2, 2)] * scale.z, translation.z,
        0.0,                  0.0,                  0.0,                  1.0,
    );
    result
}

/// Create a quaternion from x, y, z, w components.
pub fn quat_from_xyzw(x: f32, y: f32, z: f32, w: f32) -> Quat {
    nalgebra::Quaternion::new(w, x, y, z)
}

/// Convert a quaternion to a `[x, y, z, w]` array.
pub fn quat_to_array(q: Quat) -> [f32; 4] {
    [q.coords.x, q.coords.y, q.coords.z, q.coords.w]
}

/// Create a quaternion from rotation around the Y axis.
pub fn quat_from_rotation_y(angle: f32) -> Quat {
    nalgebra::UnitQuaternion::from_axis_angle(&nalgebra::Vector3::y_axis(), angle).into_inner()
}

/// Create a quaternion from rotation around the Z axis.
pub fn quat_from_rotation_z(angle: f32) -> Quat {
    nalgebra::UnitQuaternion::from_axis_angle(&nalgebra::Vector3::z_axis(), angle).into_inner()
}

/// Rotate a vector by a quaternion.
pub fn quat_rotate_vec3(q: Quat, v: Vec3) -> Vec3 {
    normalized_rotation(q) * v
}

/// Unit rotation for `q`, falling back to identity for a zero quaternion.
///
/// Quaternions within `1e-3` of unit length are used as-is.
pub fn normalized_rotation(q: Quat) -> nalgebra::UnitQuaternion<f32> {
    let len_sq = q.norm_squared();
    if (len_sq - 1.0).abs() <= 1e-3 {
        nalgebra::UnitQuaternion::new_unchecked(q)
    } else if len_sq > f32::EPSILON {
        nalgebra::UnitQuaternion::new_normalize(q)
    } else {
        nalgebra::UnitQuaternion::identity()
    }
}

/// Decompose a 4x4 matrix into (scale, rotation, translation).
pub fn to_scale_rotation_translation(m: &Mat4) -> (Vec3, Quat, Vec3) {
    let translation = Vec3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]);
    let col0 = Vec3::new(m[(0, 0)], m[(1, 0)], m[(2, 0)]);
    let col1 = Vec3::new(m[(0, 1)], m[(1, 1)], m[(2, 1)]);
    let col2 = Vec3::new(m[(0, 2)], m[(1, 2)], m[(2, 2)]);
    let mut sx = col0.norm();
    let sy = col1.norm();
    let sz = col2.norm();
    if m.fixed_view::<3, 3>(0, 0).determinant() < 0.0 {
        sx = -sx;
    }
    let scale = Vec3::new(sx, sy, sz);
    let safe = |v: Vec3, s: f32| if s.abs() > f32::EPSILON { v / s } else { v };
    let rot_mat = Mat3::from_columns(&[safe(col0, sx), safe(col1, sy), safe(col2, sz)]);
    let rotation = nalgebra::UnitQuaternion::from_rotation_matrix(
        &nalgebra::Rotation3::from_matrix_unchecked(rot_mat),
    )
    .into_inner();
    (scale, rotation, translation)
}

/// Transform a point by a 4x4 affine matrix.
pub fn transform_point(m: &Mat4, p: &Vec3) -> Vec3 {
    m.transform_point(&nalgebra::Point3::from(*p)).coords
}

/// Transform a direction by the upper 3x3 of a 4x4 matrix.
pub fn transform_vector(m: &Mat4, v: &Vec3) -> Vec3 {
    m.transform_vector(v)
}

/// Sign of the determinant of the upper-left 3x3 block (`1.0` or `-1.0`).
pub fn determinant_sign(m: &Mat4) -> f32 {
    if m.fixed_view::<3, 3>(0, 0).determinant() < 0.0 {
        -1.0
    } else {
        1.0
    }
}

/// Any unit vector perpendicular to `n`.
pub fn any_perpendicular(n: &Vec3) -> Vec3 {
    let axis = if n.x.abs() < 0.9 { Vec3::x() } else { Vec3::y() };
    let p = n.cross(&axis);
    let len = p.norm();
    if len > f32::EPSILON {
        p / len
    } else {
        Vec3::z()
    }
}

/// Decomposed affine transform: translation, orientation and scale.
///
/// The orientation is kept as a raw quaternion so values read from disk
/// round-trip bit-exact; it is normalized when converted to a matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub orientation: Quat,
    pub scale: Vec3,
}

impl Transform {
    /// Identity transform.
    pub fn identity() -> Self {
        Self {
            translation: Vec3::zeros(),
            orientation: Quat::identity(),
            scale: Vec3::repeat(1.0),
        }
    }

    /// Create a transform from its parts.
    pub fn new(translation: Vec3, orientation: Quat, scale: Vec3) -> Self {
        Self {
            translation,
            orientation,
            scale,
        }
    }

    /// Translation-only transform.
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::identity()
        }
    }

    /// Build the equivalent 4x4 matrix.
    pub fn to_matrix(&self) -> Mat4 {
        mat4_from_scale_rotation_translation(self.scale, self.orientation, self.translation)
    }

    /// Decompose a 4x4 affine matrix.
    pub fn from_matrix(m: &Mat4) -> Self {
        let (scale, orientation, translation) = to_scale_rotation_translation(m);
        Self {
            translation,
            orientation,
            scale,
        }
    }

    /// Transform a point from local to parent space.
    pub fn transform_point(&self, p: &Vec3) -> Vec3 {
        quat_rotate_vec3(self.orientation, p.component_mul(&self.scale)) + self.translation
    }

    /// Transform a point from parent to local space.
    pub fn inverse_transform_point(&self, p: &Vec3) -> Vec3 {
        let local = normalized_rotation(self.orientation).inverse() * (p - self.translation);
        local.component_div(&self.scale)
    }

    /// Combine with a child transform (`self * child`).
    pub fn combine(&self, child: &Transform) -> Transform {
        Transform::from_matrix(&(self.to_matrix() * child.to_matrix()))
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}
