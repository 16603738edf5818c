//! Bounding volumes and ray intersection tests.

use crate::math::{Mat4, Vec3, transform_point};

/// Ray with an origin and a (normalized) direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    /// Create a ray, normalizing the direction.
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        let len = direction.norm();
        let direction = if len > f32::EPSILON {
            direction / len
        } else {
            direction
        };
        Self { origin, direction }
    }

    /// Point at `distance` along the ray.
    pub fn at(&self, distance: f32) -> Vec3 {
        self.origin + self.direction * distance
    }

    /// Transform the ray into another space (direction is renormalized).
    pub fn transformed(&self, m: &Mat4) -> Ray {
        let origin = transform_point(m, &self.origin);
        let direction = m.transform_vector(&self.direction);
        Ray::new(origin, direction)
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    /// Box that contains nothing; merging anything into it yields that thing.
    pub fn empty() -> Self {
        Self {
            min: Vec3::repeat(f32::MAX),
            max: Vec3::repeat(f32::MIN),
        }
    }

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Whether this box has no volume at all (min > max on any axis).
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Smallest box containing all points. Empty input gives a zero box at origin.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Self {
        let mut result = Self::empty();
        for p in points {
            result.add_point(p);
        }
        if result.is_empty() {
            Self::new(Vec3::zeros(), Vec3::zeros())
        } else {
            result
        }
    }

    pub fn add_point(&mut self, p: &Vec3) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    pub fn merge(&self, other: &BoundingBox) -> BoundingBox {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        BoundingBox::new(self.min.inf(&other.min), self.max.sup(&other.max))
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Box enclosing this box after an affine transform.
    pub fn transformed(&self, m: &Mat4) -> BoundingBox {
        let corners = self.corners().map(|c| transform_point(m, &c));
        BoundingBox::from_points(corners.iter())
    }

    pub fn contains_point(&self, p: &Vec3) -> bool {
        p.x >= self.min.x
            && p.y >= self.min.y
            && p.z >= self.min.z
            && p.x <= self.max.x
            && p.y <= self.max.y
            && p.z <= self.max.z
    }

    /// Slab test. Returns the entry distance and the face normal that was hit.
    /// A ray starting inside reports distance `0` and the reversed direction as normal.
    pub fn intersects_ray(&self, ray: &Ray) -> Option<(f32, Vec3)> {
        if self.contains_point(&ray.origin) {
            return Some((0.0, -ray.direction));
        }
        let mut t_min = f32::MIN;
        let mut t_max = f32::MAX;
        let mut normal = Vec3::zeros();
        for axis in 0..3 {
            let o = ray.origin[axis];
            let d = ray.direction[axis];
            if d.abs() < 1e-8 {
                if o < self.min[axis] || o > self.max[axis] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let mut t1 = (self.min[axis] - o) * inv;
            let mut t2 = (self.max[axis] - o) * inv;
            let mut sign = -1.0;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
                sign = 1.0;
            }
            if t1 > t_min {
                t_min = t1;
                normal = Vec3::zeros();
                normal[axis] = sign;
            }
            t_max = t_max.min(t2);
            if t_min > t_max {
                return None;
            }
        }
        if t_max < 0.0 || t_min < 0.0 {
            return None;
        }
        Some((t_min, normal))
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::new(Vec3::zeros(), Vec3::zeros())
    }
}

/// Bounding sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Sphere circumscribing a box.
    pub fn from_box(b: &BoundingBox) -> Self {
        Self::new(b.center(), b.size().norm() * 0.5)
    }

    /// Sphere centered on the points' bounding box that contains all points.
    pub fn from_points(points: &[Vec3]) -> Self {
        let bounds = BoundingBox::from_points(points.iter());
        let center = bounds.center();
        let radius = points
            .iter()
            .map(|p| (p - center).norm())
            .fold(0.0f32, f32::max);
        Self::new(center, radius)
    }

    /// Sphere after an affine transform; the radius scales by the largest axis scale.
    pub fn transformed(&self, m: &Mat4) -> BoundingSphere {
        let center = transform_point(m, &self.center);
        let sx = m.fixed_view::<3, 1>(0, 0).norm();
        let sy = m.fixed_view::<3, 1>(0, 1).norm();
        let sz = m.fixed_view::<3, 1>(0, 2).norm();
        BoundingSphere::new(center, self.radius * sx.max(sy).max(sz))
    }

    pub fn merge(&self, other: &BoundingSphere) -> BoundingSphere {
        let offset = other.center - self.center;
        let dist = offset.norm();
        if dist + other.radius <= self.radius {
            return *self;
        }
        if dist + self.radius <= other.radius {
            return *other;
        }
        let radius = (dist + self.radius + other.radius) * 0.5;
        let center = self.center + offset * ((radius - self.radius) / dist);
        BoundingSphere::new(center, radius)
    }

    /// Returns the hit distance and the outward surface normal.
    pub fn intersects_ray(&self, ray: &Ray) -> Option<(f32, Vec3)> {
        let m = ray.origin - self.center;
        let b = m.dot(&ray.direction);
        let c = m.norm_squared() - self.radius * self.radius;
        if c > 0.0 && b > 0.0 {
            return None;
        }
        let disc = b * b - c;
        if disc < 0.0 {
            return None;
        }
        let distance = (-b - disc.sqrt()).max(0.0);
        let point = ray.at(distance);
        let n = point - self.center;
        let len = n.norm();
        let normal = if len > f32::EPSILON {
            n / len
        } else {
            -ray.direction
        };
        Some((distance, normal))
    }
}

impl Default for BoundingSphere {
    fn default() -> Self {
        Self::new(Vec3::zeros(), 0.0)
    }
}

/// Two-sided Möller–Trumbore ray/triangle test. Returns the hit distance.
pub fn ray_triangle(ray: &Ray, a: &Vec3, b: &Vec3, c: &Vec3) -> Option<f32> {
    let e1 = b - a;
    let e2 = c - a;
    let p = ray.direction.cross(&e2);
    let det = e1.dot(&p);
    if det.abs() < 1e-10 {
        return None;
    }
    let inv_det = 1.0 / det;
    let t = ray.origin - a;
    let u = t.dot(&p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = t.cross(&e1);
    let v = ray.direction.dot(&q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let distance = e2.dot(&q) * inv_det;
    (distance >= 0.0).then_some(distance)
}

/// Unit normal of triangle `abc` (counter-clockwise front face), zero if degenerate.
pub fn triangle_normal(a: &Vec3, b: &Vec3, c: &Vec3) -> Vec3 {
    let n = (b - a).cross(&(c - a));
    let len = n.norm();
    if len > f32::EPSILON { n / len } else { n }
}

/// Area of triangle `abc`.
pub fn triangle_area(a: &Vec3, b: &Vec3, c: &Vec3) -> f32 {
    (b - a).cross(&(c - a)).norm() * 0.5
}

/// Closest point to `p` on triangle `abc`.
pub fn closest_point_on_triangle(p: &Vec3, a: &Vec3, b: &Vec3, c: &Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return *a;
    }
    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return *b;
    }
    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }
    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return *c;
    }
    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }
    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }
    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}
