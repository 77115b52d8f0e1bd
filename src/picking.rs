//! Rays, planes and colliders used to hit-test batched instances.
//!
//! The rendering engine can only hit-test the batch as a whole, so picking
//! happens per slot: the ray is moved into each visible slot's local space and
//! tested against a [`Collider`]. The result is an [`InstanceHit`] naming the
//! struck slot, which [`Instances::route_event`](crate::Instances::route_event)
//! resolves back to the handle occupying it.
//!
//! [`Plane`] and [`Ray::intersect_plane`] back the drag interaction.

use glam::{Mat4, Vec3};

/// A ray in 3D space with a normalized direction.
///
/// ```
/// use herd::{Ray, Vec3};
///
/// let ray = Ray::new(Vec3::new(0.0, 0.0, 30.0), Vec3::new(0.0, 0.0, -1.0));
/// assert_eq!(ray.point_at(10.0), Vec3::new(0.0, 0.0, 20.0));
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    /// World-space start point, usually on the camera's near plane.
    pub origin: Vec3,
    /// Always normalized (or zero for a degenerate ray).
    pub direction: Vec3,
}

impl Ray {
    /// Create a ray, normalizing `direction`.
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    /// Build a picking ray from a pixel position.
    ///
    /// Unprojects the pixel at the near (depth 0) and far (depth 1) clip planes
    /// through the inverse view-projection matrix. `screen_x`/`screen_y` are
    /// in pixels from the top-left corner of a `screen_width` by
    /// `screen_height` surface.
    ///
    /// # Example
    ///
    /// ```
    /// use herd::{Mat4, Ray, Vec3};
    ///
    /// let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 30.0), Vec3::ZERO, Vec3::Y);
    /// let proj = Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0);
    /// let ray = Ray::from_screen(400.0, 400.0, 800.0, 800.0, view, proj);
    /// assert!(ray.direction.abs_diff_eq(Vec3::NEG_Z, 1e-4));
    /// ```
    pub fn from_screen(
        screen_x: f32,
        screen_y: f32,
        screen_width: f32,
        screen_height: f32,
        view_matrix: Mat4,
        projection_matrix: Mat4,
    ) -> Self {
        let ndc_x = (2.0 * screen_x / screen_width) - 1.0;
        let ndc_y = 1.0 - (2.0 * screen_y / screen_height); // Y is flipped

        let inv_view_proj = (projection_matrix * view_matrix).inverse();
        let near = inv_view_proj.project_point3(Vec3::new(ndc_x, ndc_y, 0.0));
        let far = inv_view_proj.project_point3(Vec3::new(ndc_x, ndc_y, 1.0));

        Self::new(near, far - near)
    }

    /// Point `t` units along the ray.
    #[inline]
    pub fn point_at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Apply `matrix` to the origin and direction.
    ///
    /// The returned ray is renormalized, so distances along it are in the
    /// target space's units.
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        Self::new(
            matrix.transform_point3(self.origin),
            matrix.transform_vector3(self.direction),
        )
    }

    /// Distance to the nearest positive intersection with an AABB.
    pub fn intersect_aabb(&self, min: Vec3, max: Vec3) -> Option<f32> {
        let mut t_min = f32::NEG_INFINITY;
        let mut t_max = f32::INFINITY;

        for i in 0..3 {
            let origin = self.origin[i];
            let dir = self.direction[i];

            if dir.abs() < f32::EPSILON {
                // Parallel to this slab
                if origin < min[i] || origin > max[i] {
                    return None;
                }
            } else {
                let inv_dir = 1.0 / dir;
                let mut t1 = (min[i] - origin) * inv_dir;
                let mut t2 = (max[i] - origin) * inv_dir;

                if t1 > t2 {
                    std::mem::swap(&mut t1, &mut t2);
                }

                t_min = t_min.max(t1);
                t_max = t_max.min(t2);

                if t_min > t_max {
                    return None;
                }
            }
        }

        if t_min > 0.0 {
            Some(t_min)
        } else if t_max > 0.0 {
            Some(t_max)
        } else {
            None
        }
    }

    /// Distance to the nearest positive intersection with a sphere.
    pub fn intersect_sphere(&self, center: Vec3, radius: f32) -> Option<f32> {
        let oc = self.origin - center;
        let b = oc.dot(self.direction);
        let c = oc.length_squared() - radius * radius;
        let discriminant = b * b - c;

        if discriminant < 0.0 {
            return None;
        }

        let sqrt_disc = discriminant.sqrt();
        let t1 = -b - sqrt_disc;
        let t2 = -b + sqrt_disc;

        if t1 > 0.0 {
            Some(t1)
        } else if t2 > 0.0 {
            Some(t2)
        } else {
            None
        }
    }

    /// Point where the ray crosses `plane`, or `None` if it is parallel to
    /// the plane or the plane lies behind the origin.
    pub fn intersect_plane(&self, plane: &Plane) -> Option<Vec3> {
        let denom = plane.normal.dot(self.direction);
        if denom.abs() < f32::EPSILON {
            // Parallel; only hits if the origin already lies on the plane
            return (plane.distance_to_point(self.origin).abs() < f32::EPSILON)
                .then_some(self.origin);
        }

        let t = -plane.distance_to_point(self.origin) / denom;
        (t >= 0.0).then(|| self.point_at(t))
    }

    /// Distance along the ray to the point closest to `point`, together with
    /// the squared distance between the two. `None` if `point` is behind.
    pub fn closest_approach(&self, point: Vec3) -> Option<(f32, f32)> {
        let t = (point - self.origin).dot(self.direction);
        if t < 0.0 {
            return None;
        }
        Some((t, self.point_at(t).distance_squared(point)))
    }
}

/// An infinite plane `normal · p + constant = 0`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    /// Unit normal.
    pub normal: Vec3,
    /// Negated distance of the plane from the origin along `normal`.
    pub constant: f32,
}

impl Plane {
    /// The plane with the given normal passing through `point`.
    pub fn from_normal_and_point(normal: Vec3, point: Vec3) -> Self {
        let normal = normal.normalize_or_zero();
        Self {
            normal,
            constant: -point.dot(normal),
        }
    }

    /// Signed distance from `point` to the plane.
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.constant
    }
}

/// Hit volume of one instance, expressed in the instance's local space.
///
/// The slot's world matrix carries position, rotation and scale, so a unit
/// box collider matches a unit cube mesh at any transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Collider {
    /// Box spanning `-half_extents..half_extents`.
    ///
    /// ```
    /// use herd::{Collider, Mat4, Ray, Vec3};
    ///
    /// let block = Collider::unit_box();
    /// let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z);
    /// assert_eq!(block.intersect(&ray, &Mat4::IDENTITY), Some(4.5));
    /// ```
    Box { half_extents: Vec3 },
    /// Sphere centered at the local origin.
    Sphere { radius: f32 },
}

impl Collider {
    /// Box collider from full dimensions.
    pub fn box_collider(size: Vec3) -> Self {
        Self::Box {
            half_extents: size * 0.5,
        }
    }

    /// Sphere collider of the given radius.
    pub fn sphere(radius: f32) -> Self {
        Self::Sphere { radius }
    }

    /// Matches [`Mesh::cube`](crate::Mesh::cube).
    pub fn unit_box() -> Self {
        Self::box_collider(Vec3::ONE)
    }

    /// Matches [`Mesh::sphere`](crate::Mesh::sphere).
    pub fn unit_sphere() -> Self {
        Self::Sphere { radius: 0.5 }
    }

    /// Intersect a world-space ray with this collider placed by `world`.
    ///
    /// Returns the world-space distance along `ray`. Singular matrices never
    /// hit, which covers slots that were never written. Small but invertible
    /// scales hit like any other.
    pub fn intersect(&self, ray: &Ray, world: &Mat4) -> Option<f32> {
        let inverse = world.inverse();
        if !inverse.is_finite() {
            return None;
        }

        let local = ray.transformed(&inverse);
        let t = match self {
            Collider::Box { half_extents } => local.intersect_aabb(-*half_extents, *half_extents),
            Collider::Sphere { radius } => local.intersect_sphere(Vec3::ZERO, *radius),
        }?;

        let hit = world.transform_point3(local.point_at(t));
        Some(hit.distance(ray.origin))
    }
}

impl Default for Collider {
    fn default() -> Self {
        Self::unit_box()
    }
}

/// A ray hit on one visible slot of a batch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InstanceHit {
    /// Slot index within the batch's shared buffers.
    pub slot: usize,
    /// World-space distance from the ray origin.
    pub distance: f32,
    /// World-space hit point.
    pub point: Vec3,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aabb_hit_from_outside() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z);
        let t = ray.intersect_aabb(Vec3::splat(-0.5), Vec3::splat(0.5)).unwrap();
        assert!((t - 4.5).abs() < 1e-6);
    }

    #[test]
    fn aabb_miss_when_parallel_and_outside() {
        let ray = Ray::new(Vec3::new(2.0, 0.0, 5.0), Vec3::NEG_Z);
        assert!(ray.intersect_aabb(Vec3::splat(-0.5), Vec3::splat(0.5)).is_none());
    }

    #[test]
    fn plane_intersection() {
        let plane = Plane::from_normal_and_point(Vec3::Z, Vec3::new(2.0, 3.0, 0.0));
        let ray = Ray::new(Vec3::new(1.0, 1.0, 10.0), Vec3::NEG_Z);
        assert_eq!(ray.intersect_plane(&plane), Some(Vec3::new(1.0, 1.0, 0.0)));

        let away = Ray::new(Vec3::new(1.0, 1.0, 10.0), Vec3::Z);
        assert!(away.intersect_plane(&plane).is_none());

        let parallel = Ray::new(Vec3::new(0.0, 0.0, 1.0), Vec3::X);
        assert!(parallel.intersect_plane(&plane).is_none());
    }

    #[test]
    fn collider_respects_world_scale_and_translation() {
        let world = Mat4::from_scale_rotation_translation(
            Vec3::splat(0.8),
            glam::Quat::IDENTITY,
            Vec3::new(4.0, 0.0, 0.0),
        );
        let collider = Collider::unit_box();

        let hit = Ray::new(Vec3::new(4.3, 0.0, 10.0), Vec3::NEG_Z);
        let d = collider.intersect(&hit, &world).unwrap();
        assert!((d - 9.6).abs() < 1e-4);

        // 0.45 from the center is outside a 0.8-scaled unit box
        let miss = Ray::new(Vec3::new(4.45, 0.0, 10.0), Vec3::NEG_Z);
        assert!(collider.intersect(&miss, &world).is_none());
    }

    #[test]
    fn collider_hits_at_small_scales() {
        let collider = Collider::unit_box();
        let ray = Ray::new(Vec3::new(0.0, 0.0, 10.0), Vec3::NEG_Z);

        let millimetres = Mat4::from_scale(Vec3::splat(0.001));
        let d = collider.intersect(&ray, &millimetres).unwrap();
        assert!((d - 9.9995).abs() < 1e-3);

        let tiny = Mat4::from_scale(Vec3::splat(0.004));
        assert!(collider.intersect(&ray, &tiny).is_some());
    }

    #[test]
    fn unwritten_slot_never_hits() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, 10.0), Vec3::NEG_Z);
        assert!(Collider::unit_box().intersect(&ray, &Mat4::ZERO).is_none());
        let flat = Mat4::from_scale(Vec3::new(1.0, 1.0, 0.0));
        assert!(Collider::unit_box().intersect(&ray, &flat).is_none());
    }

    #[test]
    fn zero_matrix_never_hits() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, 10.0), Vec3::NEG_Z);
        assert!(Collider::unit_box().intersect(&ray, &Mat4::ZERO).is_none());
    }

    #[test]
    fn screen_center_ray_looks_forward() {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 30.0), Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 1000.0);
        let ray = Ray::from_screen(400.0, 400.0, 800.0, 800.0, view, proj);
        assert!(ray.direction.abs_diff_eq(Vec3::NEG_Z, 1e-4));
        assert!((ray.origin.z - 29.9).abs() < 1e-2);
    }

    #[test]
    fn closest_approach_behind_origin() {
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        assert!(ray.closest_approach(Vec3::new(-1.0, 0.0, 0.0)).is_none());
        let (t, d2) = ray.closest_approach(Vec3::new(3.0, 0.5, 0.0)).unwrap();
        assert!((t - 3.0).abs() < 1e-6);
        assert!((d2 - 0.25).abs() < 1e-6);
    }
}
