//! Fixed-timestep physics integration

use super::world::{Vec2, WorldBounds, VELOCITY_EPSILON};

/// Result of one integration step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepResult {
    pub position: Vec2,
    pub velocity: Vec2,
    /// Entity produced a non-finite value and was reset to origin
    pub recovered: bool,
}

/// Physics system for integrating entity motion
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Integrate one entity for a fixed `dt_ms` step:
    /// position += velocity * dt, clamp to bounds (zeroing the velocity
    /// component that drove the clamp), apply friction, clamp speed,
    /// zero sub-epsilon components.
    ///
    /// Non-finite intermediate values reset the entity to origin with zero
    /// velocity instead of poisoning the tick.
    pub fn step(
        position: Vec2,
        velocity: Vec2,
        dt_ms: f64,
        bounds: &WorldBounds,
        radius: f64,
        friction: f64,
        max_vel: f64,
    ) -> StepResult {
        let dt = dt_ms / 1000.0;

        let moved = position.add(velocity.scale(dt));
        if !moved.is_finite() || !velocity.is_finite() {
            let (origin, _, _) = bounds.clamp(Vec2::ZERO, radius);
            return StepResult {
                position: origin,
                velocity: Vec2::ZERO,
                recovered: true,
            };
        }

        let (clamped, hit_x, hit_y) = bounds.clamp(moved, radius);

        let mut vel = velocity;
        // Walls absorb the component that pushed into them
        if hit_x {
            vel.x = 0.0;
        }
        if hit_y {
            vel.y = 0.0;
        }

        vel = vel.scale(friction);

        let speed = vel.length();
        if speed > max_vel {
            vel = vel.scale(max_vel / speed);
        }

        if vel.x.abs() < VELOCITY_EPSILON {
            vel.x = 0.0;
        }
        if vel.y.abs() < VELOCITY_EPSILON {
            vel.y = 0.0;
        }

        StepResult {
            position: clamped,
            velocity: vel,
            recovered: false,
        }
    }

    /// Integrate a projectile (no friction, no bounds clamp).
    /// Returns the new position and the distance covered this step.
    pub fn step_projectile(position: Vec2, velocity: Vec2, dt_ms: f64) -> (Vec2, f64) {
        let dt = dt_ms / 1000.0;
        let delta = velocity.scale(dt);
        (position.add(delta), delta.length())
    }
}
