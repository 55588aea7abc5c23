//! Sequential impulse solving of contacts and joints
mod contact;

pub(crate) use contact::*;

use glam::Vec2;
use sprig_core::{BodyId, Position, Transform, Velocity};

use crate::{Body, StepConf};

/// Timing of the interval being solved
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TimeStep {
    pub dt: f32,
    pub inv_dt: f32,
    /// Ratio of this step's duration to the previous one, scaling warm started impulses
    pub dt_ratio: f32,
    pub warm_start: bool,
}

impl TimeStep {
    pub fn new(dt: f32, dt_ratio: f32, warm_start: bool) -> Self {
        Self {
            dt,
            inv_dt: if dt != 0.0 { 1.0 / dt } else { 0.0 },
            dt_ratio,
            warm_start,
        }
    }
}

/// Tolerances of the position solver
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ConstraintSolverConf {
    pub resolution_rate: f32,
    pub linear_slop: f32,
    pub angular_slop: f32,
    pub max_linear_correction: f32,
    pub max_angular_correction: f32,
}

impl ConstraintSolverConf {
    pub fn regular(conf: &StepConf) -> Self {
        Self {
            resolution_rate: conf.reg_resolution_rate,
            linear_slop: conf.linear_slop,
            angular_slop: conf.angular_slop,
            max_linear_correction: conf.max_linear_correction,
            max_angular_correction: conf.max_angular_correction,
        }
    }

    pub fn toi(conf: &StepConf) -> Self {
        Self {
            resolution_rate: conf.toi_resolution_rate,
            ..Self::regular(conf)
        }
    }
}

/// Solver view of a body
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub(crate) struct BodyConstraint {
    /// Center of mass and angle
    pub position: Position,
    pub velocity: Velocity,
    pub local_center: Vec2,
    pub inv_mass: f32,
    pub inv_rot_i: f32,
}

impl BodyConstraint {
    /// Projects `body` for solving over `h` seconds, integrating its acceleration and damping
    pub fn new(body: &Body, h: f32) -> Self {
        let mut velocity = body.velocity;

        if h != 0.0 && body.is_accelerable() {
            velocity.linear += h * body.linear_acceleration;
            velocity.angular += h * body.angular_acceleration;

            // Pade approximation of exp(-h * damping)
            velocity.linear /= 1.0 + h * body.linear_damping;
            velocity.angular /= 1.0 + h * body.angular_damping;
        }

        Self {
            position: body.sweep.pos1,
            velocity,
            local_center: body.sweep.local_center,
            inv_mass: body.inv_mass,
            inv_rot_i: body.inv_rot_i,
        }
    }

    /// A copy of `body` which the solver can not move
    pub fn fixed(body: &Body) -> Self {
        Self {
            position: body.sweep.pos1,
            velocity: body.velocity,
            local_center: body.sweep.local_center,
            inv_mass: 0.0,
            inv_rot_i: 0.0,
        }
    }

    #[inline]
    pub fn transform(&self) -> Transform {
        Transform::from_position(self.position, self.local_center)
    }

    /// Advances the position by `h`, limiting the motion to the configured maximums
    pub fn integrate(&mut self, h: f32, max_translation: f32, max_rotation: f32) {
        let translation = h * self.velocity.linear;
        let length_sq = translation.length_squared();
        if length_sq > max_translation * max_translation {
            self.velocity.linear *= max_translation / length_sq.sqrt();
        }

        let rotation = h * self.velocity.angular;
        if rotation.abs() > max_rotation {
            self.velocity.angular *= max_rotation / rotation.abs();
        }

        self.position.linear += h * self.velocity.linear;
        self.position.angular += h * self.velocity.angular;
    }
}

/// Body constraints of an island, addressed by body id
#[derive(Debug, Default, Clone)]
pub(crate) struct BodyConstraints {
    items: Vec<Option<BodyConstraint>>,
}

impl BodyConstraints {
    pub fn reset(&mut self, len: usize) {
        self.items.clear();
        self.items.resize(len, None);
    }

    pub fn insert(&mut self, id: BodyId, constraint: BodyConstraint) {
        let index = id.index();
        if index >= self.items.len() {
            self.items.resize(index + 1, None);
        }

        self.items[index] = Some(constraint);
    }

    pub fn contains(&self, id: BodyId) -> bool {
        matches!(self.items.get(id.index()), Some(Some(_)))
    }

    /// Returns the constraint of `id`, or an immovable one at the origin for an absent body
    #[inline]
    pub fn get(&self, id: Option<BodyId>) -> BodyConstraint {
        id.and_then(|id| *self.items.get(id.index())?)
            .unwrap_or_default()
    }

    /// Stores a solved constraint. Absent bodies are ignored.
    #[inline]
    pub fn set(&mut self, id: Option<BodyId>, constraint: BodyConstraint) {
        if let Some(slot) = id.and_then(|id| self.items.get_mut(id.index())) {
            if slot.is_some() {
                *slot = Some(constraint);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::vec2;

    use crate::BodyConf;

    use super::*;

    #[test]
    fn pre_integration() {
        let body = Body::new(
            &BodyConf::dynamic()
                .with_linear_velocity(vec2(1.0, 0.0))
                .with_linear_acceleration(vec2(0.0, -10.0))
                .with_linear_damping(1.0),
        );

        let bc = BodyConstraint::new(&body, 0.1);
        assert!(bc.velocity.linear.abs_diff_eq(vec2(1.0, -1.0) / 1.1, 1e-6));

        // No time means no acceleration
        let bc = BodyConstraint::new(&body, 0.0);
        assert_eq!(bc.velocity.linear, vec2(1.0, 0.0));
    }

    #[test]
    fn integration_is_capped() {
        let mut bc = BodyConstraint {
            velocity: Velocity::new(vec2(0.0, -300.0), 100.0),
            inv_mass: 1.0,
            ..Default::default()
        };

        bc.integrate(0.1, 4.0, 1.0);
        assert!(bc.position.linear.abs_diff_eq(vec2(0.0, -4.0), 1e-5));
        assert!((bc.position.angular - 1.0).abs() < 1e-5);
        assert!(bc.velocity.linear.abs_diff_eq(vec2(0.0, -40.0), 1e-4));
    }

    #[test]
    fn absent_bodies_are_fixed() {
        let mut constraints = BodyConstraints::default();
        constraints.reset(2);

        let id = BodyId::from_index(1);
        assert!(!constraints.contains(id));
        constraints.set(Some(id), BodyConstraint::default());
        assert!(!constraints.contains(id));

        let bc = BodyConstraint {
            inv_mass: 2.0,
            ..Default::default()
        };
        constraints.insert(id, bc);
        assert_eq!(constraints.get(Some(id)), bc);
        assert_eq!(constraints.get(None), BodyConstraint::default());
    }
}
