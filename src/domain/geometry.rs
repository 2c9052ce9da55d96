//! 3D vector, ray and sphere primitives used for shot reconstruction
//!
//! All coordinates are in the game's native units (centimeters).

use crate::domain::error::{EtlError, EtlResult};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Neg, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    #[inline]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn dot(self, other: Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    #[inline]
    pub fn length_squared(self) -> f64 {
        self.dot(self)
    }

    #[inline]
    pub fn length(self) -> f64 {
        self.length_squared().sqrt()
    }

    #[inline]
    pub fn distance(self, other: Vec3) -> f64 {
        (self - other).length()
    }

    /// Unit vector in the same direction.
    ///
    /// Fails with `DegenerateGeometry` for a zero-length vector.
    pub fn normalize(self) -> EtlResult<Vec3> {
        let len = self.length();
        if len == 0.0 || !len.is_finite() {
            return Err(EtlError::DegenerateGeometry(format!(
                "cannot normalize vector {self}"
            )));
        }
        Ok(self * (1.0 / len))
    }
}

impl std::fmt::Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    #[inline]
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    #[inline]
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Vec3;
    #[inline]
    fn mul(self, s: f64) -> Vec3 {
        Vec3::new(self.x * s, self.y * s, self.z * s)
    }
}

impl Neg for Vec3 {
    type Output = Vec3;
    #[inline]
    fn neg(self) -> Vec3 {
        Vec3::new(-self.x, -self.y, -self.z)
    }
}

/// Half-line `origin + t * dir`, `dir` always unit length
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    origin: Vec3,
    dir: Vec3,
}

impl Ray {
    /// Ray from `origin` through `through`.
    pub fn between(origin: Vec3, through: Vec3) -> EtlResult<Self> {
        let dir = (through - origin).normalize()?;
        Ok(Self { origin, dir })
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn dir(&self) -> Vec3 {
        self.dir
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f64,
}

impl Sphere {
    pub fn new(center: Vec3, radius: f64) -> Self {
        Self { center, radius }
    }

    /// Near intersection parameter of `ray` with this sphere, if it lies in `(0, max_t)`.
    ///
    /// Only the near root counts: a ray starting inside the sphere is not a hit.
    pub fn near_hit(&self, ray: &Ray, max_t: f64) -> Option<f64> {
        // dir is unit length, so a == 1
        let oc = ray.origin() - self.center;
        let half_b = oc.dot(ray.dir());
        let c = oc.length_squared() - self.radius * self.radius;
        let disc = half_b * half_b - c;
        if disc < 0.0 {
            return None;
        }
        let t_near = -half_b - disc.sqrt();
        (t_near > 0.0 && t_near < max_t).then_some(t_near)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unit_length() {
        let v = Vec3::new(3.0, 4.0, 0.0).normalize().unwrap();
        assert!((v.length() - 1.0).abs() < 1e-12);
        assert!((v.x - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_zero_is_degenerate() {
        let err = Vec3::ZERO.normalize().unwrap_err();
        assert!(matches!(err, EtlError::DegenerateGeometry(_)));
    }

    #[test]
    fn test_ray_between_same_point_fails() {
        let p = Vec3::new(1.0, 2.0, 3.0);
        assert!(Ray::between(p, p).is_err());
    }

    #[test]
    fn test_sphere_hit_in_front() {
        let ray = Ray::between(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0)).unwrap();
        let sphere = Sphere::new(Vec3::new(50.0, 0.0, 0.0), 10.0);
        let t = sphere.near_hit(&ray, 1000.0).unwrap();
        assert!((t - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_sphere_behind_origin_missed() {
        let ray = Ray::between(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0)).unwrap();
        let sphere = Sphere::new(Vec3::new(-50.0, 0.0, 0.0), 10.0);
        assert!(sphere.near_hit(&ray, 1000.0).is_none());
    }

    #[test]
    fn test_sphere_beyond_max_range_missed() {
        let ray = Ray::between(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0)).unwrap();
        let sphere = Sphere::new(Vec3::new(500.0, 0.0, 0.0), 10.0);
        assert!(sphere.near_hit(&ray, 400.0).is_none());
    }

    #[test]
    fn test_ray_origin_inside_sphere_missed() {
        let ray = Ray::between(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0)).unwrap();
        let sphere = Sphere::new(Vec3::new(5.0, 0.0, 0.0), 10.0);
        assert!(sphere.near_hit(&ray, 1000.0).is_none());
    }

    #[test]
    fn test_tangent_ray_hits() {
        let ray = Ray::between(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0)).unwrap();
        let sphere = Sphere::new(Vec3::new(50.0, 5.0, 0.0), 5.0);
        let t = sphere.near_hit(&ray, 1000.0).unwrap();
        assert!((t - 50.0).abs() < 1e-9);
    }
}
