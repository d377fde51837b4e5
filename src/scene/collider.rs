use super::surface::SurfaceHandle;
use crate::math::{Point3, Vec3};
use cgmath::InnerSpace;
use std::sync::{Arc, RwLock};

/// Implicit surface bundled with a rigid velocity field (linear + angular
/// about a pivot) and a friction coefficient in `[0, 1]`
/// (0 = free slip, 1 = no slip).
#[derive(Clone)]
pub struct RigidBodyCollider {
    pub surface: SurfaceHandle,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub pivot: Point3,
    pub friction_coefficient: f64,
}

/// Shared handle: one collider may be referenced by several solvers; the
/// driver writes between stages, stages read snapshots.
pub type ColliderHandle = Arc<RwLock<RigidBodyCollider>>;

impl RigidBodyCollider {
    pub fn new(surface: SurfaceHandle) -> Self {
        RigidBodyCollider {
            pivot: surface.bounding_box().mid_point(),
            surface,
            linear_velocity: Vec3::new(0.0, 0.0, 0.0),
            angular_velocity: Vec3::new(0.0, 0.0, 0.0),
            friction_coefficient: 0.0,
        }
    }

    pub fn into_handle(self) -> ColliderHandle {
        Arc::new(RwLock::new(self))
    }

    pub fn signed_distance(&self, p: Point3) -> f64 {
        self.surface.signed_distance(p)
    }

    /// Rigid velocity at a world point.
    pub fn velocity_at(&self, p: Point3) -> Vec3 {
        self.linear_velocity + self.angular_velocity.cross(p - self.pivot)
    }

    pub fn is_penetrating(&self, p: Point3, radius: f64) -> bool {
        self.surface.signed_distance(p) < radius
    }

    /// Pushes a particle out of the collider and reflects its velocity:
    /// the normal component bounces with `restitution`, the tangential
    /// component is damped by friction proportionally to the normal impulse.
    pub fn resolve_collision(
        &self,
        radius: f64,
        restitution: f64,
        position: &mut Point3,
        velocity: &mut Vec3,
    ) {
        if !self.is_penetrating(*position, radius) {
            return;
        }

        let target_normal = self.surface.closest_normal(*position);
        let target_point = self.surface.closest_point(*position) + target_normal * radius;
        let collider_vel = self.velocity_at(target_point);

        let relative_vel = *velocity - collider_vel;
        let normal_dot = relative_vel.dot(target_normal);

        if normal_dot < 0.0 {
            let mut relative_vel_n = target_normal * normal_dot;
            let mut relative_vel_t = relative_vel - relative_vel_n;
            let delta_n = (-restitution - 1.0) * relative_vel_n;
            relative_vel_n *= -restitution;

            if relative_vel_t.magnitude2() > 0.0 {
                let friction_scale = (1.0
                    - self.friction_coefficient * delta_n.magnitude() / relative_vel_t.magnitude())
                .max(0.0);
                relative_vel_t *= friction_scale;
            }

            *velocity = relative_vel_n + relative_vel_t + collider_vel;
        }

        *position = target_point;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::surface::Plane;
    use approx::assert_relative_eq;

    fn floor_collider(friction: f64) -> RigidBodyCollider {
        let mut c = RigidBodyCollider::new(Arc::new(Plane::new(
            cgmath::point3(0.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        )));
        c.friction_coefficient = friction;
        c
    }

    #[test]
    fn particle_is_pushed_out_and_reflected() {
        let collider = floor_collider(0.0);
        let mut pos = cgmath::point3(0.3, -0.1, 0.0);
        let mut vel = Vec3::new(1.0, -2.0, 0.0);
        collider.resolve_collision(0.05, 0.0, &mut pos, &mut vel);
        assert_relative_eq!(pos.y, 0.05);
        // zero restitution kills the normal component, frictionless keeps
        // the tangential one
        assert_relative_eq!(vel.y, 0.0);
        assert_relative_eq!(vel.x, 1.0);
    }

    #[test]
    fn full_friction_stops_sliding() {
        let collider = floor_collider(1.0);
        let mut pos = cgmath::point3(0.0, -0.01, 0.0);
        let mut vel = Vec3::new(0.5, -2.0, 0.0);
        collider.resolve_collision(0.0, 0.0, &mut pos, &mut vel);
        // normal impulse (2.0) exceeds the tangential speed, so friction
        // scale clamps to zero
        assert_relative_eq!(vel.x, 0.0);
        assert_relative_eq!(vel.y, 0.0);
    }

    #[test]
    fn moving_collider_drags_particles() {
        let mut collider = floor_collider(0.0);
        collider.linear_velocity = Vec3::new(0.0, 1.0, 0.0);
        let mut pos = cgmath::point3(0.0, -0.1, 0.0);
        let mut vel = Vec3::new(0.0, 0.0, 0.0);
        collider.resolve_collision(0.0, 0.0, &mut pos, &mut vel);
        // relative normal velocity is negative, particle inherits collider
        // motion along the normal
        assert_relative_eq!(vel.y, 1.0);
    }
}
