use std::f32::consts::PI;

use sprig_collision::{ToiConf, DEFAULT_LINEAR_SLOP};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Parameters of a single [`World::step`](crate::World::step)
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StepConf {
    /// Seconds to advance
    pub delta_time: f32,

    pub do_warm_start: bool,
    /// Resolve fast motion by continuous collision
    pub do_toi: bool,
    /// Solve the two points of a manifold simultaneously
    pub do_blocksolve: bool,
    /// Resolve at most one time of impact event per step
    pub do_sub_stepping: bool,

    pub reg_velocity_iterations: u32,
    pub reg_position_iterations: u32,
    pub toi_velocity_iterations: u32,
    pub toi_position_iterations: u32,
    /// Times of impact resolved per contact and step
    pub max_sub_steps: u32,
    pub max_distance_iters: u32,
    pub max_toi_iters: u32,
    pub max_toi_root_iters: u32,

    /// Fraction of the overlap resolved per position iteration
    pub reg_resolution_rate: f32,
    pub toi_resolution_rate: f32,
    /// Position iterations stop once every contact separation is at least this
    pub reg_min_separation: f32,
    pub toi_min_separation: f32,
    /// Velocity iterations stop once the largest impulse increment is at most this
    pub reg_min_momentum: f32,
    pub toi_min_momentum: f32,

    pub linear_slop: f32,
    pub angular_slop: f32,
    pub max_linear_correction: f32,
    pub max_angular_correction: f32,
    /// Relative normal velocity below which collisions are inelastic
    pub velocity_threshold: f32,

    /// Translation per step a body may not exceed
    pub max_translation: f32,
    /// Rotation per step a body may not exceed
    pub max_rotation: f32,

    /// Margin added around the bounds of broad phase proxies
    pub aabb_extension: f32,
    /// Scales the displacement of moving proxies along the body's motion
    pub displace_multiplier: f32,

    pub target_depth: f32,
    pub tolerance: f32,

    pub linear_sleep_tolerance: f32,
    pub angular_sleep_tolerance: f32,
    /// Seconds a whole island must be still before it sleeps
    pub min_still_time_to_sleep: f32,
}

impl Default for StepConf {
    fn default() -> Self {
        let linear_slop = DEFAULT_LINEAR_SLOP;

        Self {
            delta_time: 1.0 / 60.0,
            do_warm_start: true,
            do_toi: true,
            do_blocksolve: true,
            do_sub_stepping: false,
            reg_velocity_iterations: 8,
            reg_position_iterations: 3,
            toi_velocity_iterations: 8,
            toi_position_iterations: 20,
            max_sub_steps: 8,
            max_distance_iters: 20,
            max_toi_iters: 20,
            max_toi_root_iters: 30,
            reg_resolution_rate: 0.2,
            toi_resolution_rate: 0.75,
            reg_min_separation: -3.0 * linear_slop,
            toi_min_separation: -1.5 * linear_slop,
            reg_min_momentum: 0.0,
            toi_min_momentum: 0.0,
            linear_slop,
            angular_slop: 2.0 / 180.0 * PI,
            max_linear_correction: 0.2,
            max_angular_correction: 8.0 / 180.0 * PI,
            velocity_threshold: 1.0,
            max_translation: 4.0,
            max_rotation: PI / 2.0,
            aabb_extension: 0.1,
            displace_multiplier: 2.0,
            target_depth: 3.0 * linear_slop,
            tolerance: linear_slop / 4.0,
            linear_sleep_tolerance: 0.01,
            angular_sleep_tolerance: 2.0 / 180.0 * PI,
            min_still_time_to_sleep: 0.5,
        }
    }
}

impl StepConf {
    pub fn new(delta_time: f32) -> Self {
        Self {
            delta_time,
            ..Default::default()
        }
    }

    pub fn with_delta_time(mut self, delta_time: f32) -> Self {
        self.delta_time = delta_time;
        self
    }

    pub fn with_warm_start(mut self, do_warm_start: bool) -> Self {
        self.do_warm_start = do_warm_start;
        self
    }

    pub fn with_toi(mut self, do_toi: bool) -> Self {
        self.do_toi = do_toi;
        self
    }

    pub fn with_blocksolve(mut self, do_blocksolve: bool) -> Self {
        self.do_blocksolve = do_blocksolve;
        self
    }

    pub fn with_sub_stepping(mut self, do_sub_stepping: bool) -> Self {
        self.do_sub_stepping = do_sub_stepping;
        self
    }

    pub fn with_iterations(mut self, velocity: u32, position: u32) -> Self {
        self.reg_velocity_iterations = velocity;
        self.reg_position_iterations = position;
        self
    }

    pub fn with_toi_iterations(mut self, velocity: u32, position: u32) -> Self {
        self.toi_velocity_iterations = velocity;
        self.toi_position_iterations = position;
        self
    }

    pub fn with_max_translation(mut self, max_translation: f32) -> Self {
        self.max_translation = max_translation;
        self
    }

    pub fn with_max_rotation(mut self, max_rotation: f32) -> Self {
        self.max_rotation = max_rotation;
        self
    }

    pub fn with_aabb_extension(mut self, aabb_extension: f32) -> Self {
        self.aabb_extension = aabb_extension;
        self
    }

    pub fn with_min_still_time_to_sleep(mut self, seconds: f32) -> Self {
        self.min_still_time_to_sleep = seconds;
        self
    }

    pub(crate) fn toi_conf(&self) -> ToiConf {
        ToiConf {
            t_max: 1.0,
            target_depth: self.target_depth,
            tolerance: self.tolerance,
            linear_slop: self.linear_slop,
            max_toi_iters: self.max_toi_iters,
            max_root_iters: self.max_toi_root_iters,
            max_distance_iters: self.max_distance_iters,
        }
    }
}

/// Work done before the regular solve
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PreStepStats {
    pub proxies_moved: u32,
    pub contacts_destroyed: u32,
    pub contacts_added: u32,
    /// Contacts left alone because neither body is awake
    pub contacts_ignored: u32,
    pub contacts_updated: u32,
    /// Contacts whose manifold was still current
    pub contacts_skipped: u32,
}

/// Work done by the regular island solve
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegStepStats {
    pub islands_found: u32,
    /// Islands whose position constraints converged
    pub islands_solved: u32,
    pub bodies_slept: u32,
    pub proxies_moved: u32,
    pub contacts_added: u32,
    pub max_velocity_iterations: u32,
    pub max_position_iterations: u32,
    pub sum_velocity_iterations: u32,
    pub sum_position_iterations: u32,
}

/// Work done by continuous collision
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ToiStepStats {
    pub islands_found: u32,
    pub islands_solved: u32,
    /// Contacts sharing the soonest time of impact, summed over sub steps
    pub contacts_found: u32,
    pub contacts_at_max_sub_steps: u32,
    pub contacts_updated_toi: u32,
    pub contacts_updated_touching: u32,
    /// Impacts rolled back because the shapes turned out not to touch
    pub contacts_skipped_touching: u32,
    pub proxies_moved: u32,
    pub contacts_added: u32,
    pub sub_steps: u32,
    pub max_dist_iters: u32,
    pub max_toi_iters: u32,
    pub max_root_iters: u32,
    pub sum_velocity_iterations: u32,
    pub sum_position_iterations: u32,
}

/// Diagnostics of a world step
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StepStats {
    pub pre: PreStepStats,
    pub reg: RegStepStats,
    pub toi: ToiStepStats,
}

/// Outcome of solving a single island
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IslandStats {
    pub solved: bool,
    pub velocity_iterations: u32,
    pub position_iterations: u32,
    pub bodies_slept: u32,
}

impl RegStepStats {
    pub(crate) fn add_island(&mut self, rhs: IslandStats) {
        self.islands_solved += rhs.solved as u32;
        self.bodies_slept += rhs.bodies_slept;
        self.max_velocity_iterations = self.max_velocity_iterations.max(rhs.velocity_iterations);
        self.max_position_iterations = self.max_position_iterations.max(rhs.position_iterations);
        self.sum_velocity_iterations += rhs.velocity_iterations;
        self.sum_position_iterations += rhs.position_iterations;
    }
}

impl ToiStepStats {
    pub(crate) fn add_island(&mut self, rhs: IslandStats) {
        self.islands_solved += rhs.solved as u32;
        self.sum_velocity_iterations += rhs.velocity_iterations;
        self.sum_position_iterations += rhs.position_iterations;
    }
}
