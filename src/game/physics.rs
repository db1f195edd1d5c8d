//! Input-driven movement and world bounds

use crate::config::WorldBounds;

use super::InputCommand;

/// Physics system for turning inputs into velocities and positions
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Raw direction from the four flags, -1/0/+1 per axis. Screen space: up is -y.
    pub fn direction(input: &InputCommand) -> (f64, f64) {
        let mut ax = 0.0;
        let mut ay = 0.0;
        if input.up {
            ay -= 1.0;
        }
        if input.down {
            ay += 1.0;
        }
        if input.left {
            ax -= 1.0;
        }
        if input.right {
            ax += 1.0;
        }
        (ax, ay)
    }

    /// Velocity for an input: the unit direction scaled by `speed`, or zero
    /// when the flags cancel out.
    pub fn velocity(input: &InputCommand, speed: f64) -> (f64, f64) {
        let (ax, ay) = Self::direction(input);
        let len = ax.hypot(ay);
        if len == 0.0 {
            return (0.0, 0.0);
        }
        (ax / len * speed, ay / len * speed)
    }

    /// Integration step for an input: its own dt when positive, else the tick delta
    pub fn step_length(input: &InputCommand, tick_dt: f64) -> f64 {
        if input.dt > 0.0 {
            input.dt
        } else {
            tick_dt
        }
    }

    /// Advance a position by `vel * step` and clamp it into the world
    pub fn integrate(
        x: f64,
        y: f64,
        vel_x: f64,
        vel_y: f64,
        step: f64,
        bounds: WorldBounds,
    ) -> (f64, f64) {
        Self::clamp_to_world(x + vel_x * step, y + vel_y * step, bounds)
    }

    pub fn clamp_to_world(x: f64, y: f64, bounds: WorldBounds) -> (f64, f64) {
        (
            clamp_axis(x, bounds.width as f64),
            clamp_axis(y, bounds.height as f64),
        )
    }
}

// NaN collapses to 0 so a bad step can never leave the world.
fn clamp_axis(v: f64, max: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, max)
    }
}
