//! Time of impact via conservative advancement over the separating axis
use glam::{vec2, Vec2};
use sprig_core::{Sweep, Transform};

use crate::{distance, DistanceProxy, SimplexCache, DEFAULT_LINEAR_SLOP, MAX_POLYGON_VERTICES};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToiConf {
    /// End of the interval to search, at most 1
    pub t_max: f32,
    /// Desired penetration of the cores at the time of impact
    pub target_depth: f32,
    /// Accepted deviation from the target separation
    pub tolerance: f32,
    pub linear_slop: f32,
    pub max_toi_iters: u32,
    pub max_root_iters: u32,
    pub max_distance_iters: u32,
}

impl Default for ToiConf {
    fn default() -> Self {
        Self {
            t_max: 1.0,
            target_depth: DEFAULT_LINEAR_SLOP * 3.0,
            tolerance: DEFAULT_LINEAR_SLOP / 4.0,
            linear_slop: DEFAULT_LINEAR_SLOP,
            max_toi_iters: 20,
            max_root_iters: 30,
            max_distance_iters: 20,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ToiState {
    #[default]
    Unknown,
    /// The iteration budget ran out or the root finder diverged
    Failed,
    /// The cores already overlap at the start of the interval
    Overlapped,
    /// The shapes touch at the returned time
    Touching,
    /// The shapes never come within the target separation
    Separated,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ToiStats {
    pub toi_iters: u32,
    pub max_dist_iters: u32,
    pub sum_dist_iters: u32,
    pub max_root_iters: u32,
    pub sum_root_iters: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ToiOutput {
    pub state: ToiState,
    /// Fraction of the sweep interval
    pub t: f32,
    pub stats: ToiStats,
}

#[derive(Debug, Clone, Copy)]
enum SeparationKind {
    Points,
    FaceA,
    FaceB,
}

/// Separation of two proxies along a fixed axis as a function of time
struct SeparationFunction<'a> {
    proxy_a: &'a DistanceProxy,
    proxy_b: &'a DistanceProxy,
    sweep_a: &'a Sweep,
    sweep_b: &'a Sweep,
    kind: SeparationKind,
    local_point: Vec2,
    axis: Vec2,
}

impl<'a> SeparationFunction<'a> {
    fn new(
        cache: &SimplexCache,
        proxy_a: &'a DistanceProxy,
        sweep_a: &'a Sweep,
        proxy_b: &'a DistanceProxy,
        sweep_b: &'a Sweep,
        t1: f32,
    ) -> Self {
        let xf_a = sweep_a.transform(t1);
        let xf_b = sweep_b.transform(t1);

        let mut func = Self {
            proxy_a,
            proxy_b,
            sweep_a,
            sweep_b,
            kind: SeparationKind::Points,
            local_point: Vec2::ZERO,
            axis: Vec2::ZERO,
        };

        if cache.count == 1 {
            let point_a = xf_a.apply(proxy_a.vertex(cache.index_a[0] as usize));
            let point_b = xf_b.apply(proxy_b.vertex(cache.index_b[0] as usize));
            func.axis = (point_b - point_a).normalize_or_zero();
        } else if cache.index_a[0] == cache.index_a[1] {
            // Two points on B and one on A
            let b1 = proxy_b.vertex(cache.index_b[0] as usize);
            let b2 = proxy_b.vertex(cache.index_b[1] as usize);

            func.kind = SeparationKind::FaceB;
            func.axis = face_normal(b1, b2);
            func.local_point = 0.5 * (b1 + b2);

            let normal = xf_b.q.rotate(func.axis);
            let point_b = xf_b.apply(func.local_point);
            let point_a = xf_a.apply(proxy_a.vertex(cache.index_a[0] as usize));

            if (point_a - point_b).dot(normal) < 0.0 {
                func.axis = -func.axis;
            }
        } else {
            // Two points on A and one or two points on B
            let a1 = proxy_a.vertex(cache.index_a[0] as usize);
            let a2 = proxy_a.vertex(cache.index_a[1] as usize);

            func.kind = SeparationKind::FaceA;
            func.axis = face_normal(a1, a2);
            func.local_point = 0.5 * (a1 + a2);

            let normal = xf_a.q.rotate(func.axis);
            let point_a = xf_a.apply(func.local_point);
            let point_b = xf_b.apply(proxy_b.vertex(cache.index_b[0] as usize));

            if (point_b - point_a).dot(normal) < 0.0 {
                func.axis = -func.axis;
            }
        }

        func
    }

    fn transforms(&self, t: f32) -> (Transform, Transform) {
        (self.sweep_a.transform(t), self.sweep_b.transform(t))
    }

    /// Deepest points along the axis at time `t` and their separation
    fn find_min_separation(&self, t: f32) -> (usize, usize, f32) {
        let (xf_a, xf_b) = self.transforms(t);

        match self.kind {
            SeparationKind::Points => {
                let index_a = self.proxy_a.support(xf_a.q.inv_rotate(self.axis));
                let index_b = self.proxy_b.support(xf_b.q.inv_rotate(-self.axis));

                let point_a = xf_a.apply(self.proxy_a.vertex(index_a));
                let point_b = xf_b.apply(self.proxy_b.vertex(index_b));
                (index_a, index_b, (point_b - point_a).dot(self.axis))
            }
            SeparationKind::FaceA => {
                let normal = xf_a.q.rotate(self.axis);
                let point_a = xf_a.apply(self.local_point);

                let index_b = self.proxy_b.support(xf_b.q.inv_rotate(-normal));
                let point_b = xf_b.apply(self.proxy_b.vertex(index_b));
                (usize::MAX, index_b, (point_b - point_a).dot(normal))
            }
            SeparationKind::FaceB => {
                let normal = xf_b.q.rotate(self.axis);
                let point_b = xf_b.apply(self.local_point);

                let index_a = self.proxy_a.support(xf_a.q.inv_rotate(-normal));
                let point_a = xf_a.apply(self.proxy_a.vertex(index_a));
                (index_a, usize::MAX, (point_a - point_b).dot(normal))
            }
        }
    }

    fn evaluate(&self, index_a: usize, index_b: usize, t: f32) -> f32 {
        let (xf_a, xf_b) = self.transforms(t);

        match self.kind {
            SeparationKind::Points => {
                let point_a = xf_a.apply(self.proxy_a.vertex(index_a));
                let point_b = xf_b.apply(self.proxy_b.vertex(index_b));
                (point_b - point_a).dot(self.axis)
            }
            SeparationKind::FaceA => {
                let normal = xf_a.q.rotate(self.axis);
                let point_a = xf_a.apply(self.local_point);
                let point_b = xf_b.apply(self.proxy_b.vertex(index_b));
                (point_b - point_a).dot(normal)
            }
            SeparationKind::FaceB => {
                let normal = xf_b.q.rotate(self.axis);
                let point_b = xf_b.apply(self.local_point);
                let point_a = xf_a.apply(self.proxy_a.vertex(index_a));
                (point_a - point_b).dot(normal)
            }
        }
    }
}

fn face_normal(v1: Vec2, v2: Vec2) -> Vec2 {
    let e = v2 - v1;
    vec2(e.y, -e.x).normalize_or_zero()
}

/// Computes the upper bound on the time before two swept shapes penetrate by the target depth.
///
/// Time is expressed as a fraction of each sweep's remaining interval. The sweeps are expected to
/// be normalized.
pub fn time_of_impact(
    proxy_a: &DistanceProxy,
    sweep_a: &Sweep,
    proxy_b: &DistanceProxy,
    sweep_b: &Sweep,
    conf: &ToiConf,
) -> ToiOutput {
    sprig_core::profile_function!();

    let mut output = ToiOutput {
        state: ToiState::Unknown,
        t: conf.t_max,
        stats: ToiStats::default(),
    };

    let total_radius = proxy_a.radius() + proxy_b.radius();
    let target = (total_radius - conf.target_depth).max(conf.linear_slop);
    let tolerance = conf.tolerance;
    debug_assert!(target > tolerance);

    let t_max = conf.t_max;
    let mut t1 = 0.0;
    let mut cache = SimplexCache::default();

    // The outer loop progressively attempts to compute new separating axes
    loop {
        let xf_a = sweep_a.transform(t1);
        let xf_b = sweep_b.transform(t1);

        let dist = distance(
            proxy_a,
            &xf_a,
            proxy_b,
            &xf_b,
            &mut cache,
            conf.max_distance_iters,
        );

        output.stats.toi_iters += 1;
        output.stats.sum_dist_iters += dist.iterations;
        output.stats.max_dist_iters = output.stats.max_dist_iters.max(dist.iterations);

        if dist.distance <= 0.0 {
            output.state = ToiState::Overlapped;
            output.t = 0.0;
            break;
        }

        if dist.distance < target + tolerance {
            output.state = ToiState::Touching;
            output.t = t1;
            break;
        }

        let func = SeparationFunction::new(&cache, proxy_a, sweep_a, proxy_b, sweep_b, t1);

        // Resolve the deepest point along the axis, advancing t1 until it no longer moves
        let mut done = false;
        let mut t2 = t_max;
        let mut push_back_iters = 0;
        loop {
            let (index_a, index_b, mut s2) = func.find_min_separation(t2);

            // Final configuration is still separated
            if s2 > target + tolerance {
                output.state = ToiState::Separated;
                output.t = t_max;
                done = true;
                break;
            }

            // Separation reached the target at t2
            if s2 > target - tolerance {
                t1 = t2;
                break;
            }

            let mut s1 = func.evaluate(index_a, index_b, t1);

            if s1 < target - tolerance {
                output.state = ToiState::Failed;
                output.t = t1;
                done = true;
                break;
            }

            if s1 <= target + tolerance {
                output.state = ToiState::Touching;
                output.t = t1;
                done = true;
                break;
            }

            // 1D root of `f(t) - target = 0` with alternating secant and bisection steps
            let mut root_iters = 0;
            let (mut a1, mut a2) = (t1, t2);
            loop {
                let t = if root_iters & 1 == 1 {
                    a1 + (target - s1) * (a2 - a1) / (s2 - s1)
                } else {
                    0.5 * (a1 + a2)
                };

                root_iters += 1;

                let s = func.evaluate(index_a, index_b, t);
                if (s - target).abs() < tolerance {
                    t2 = t;
                    break;
                }

                if s > target {
                    a1 = t;
                    s1 = s;
                } else {
                    a2 = t;
                    s2 = s;
                }

                if root_iters == conf.max_root_iters {
                    break;
                }
            }

            output.stats.sum_root_iters += root_iters;
            output.stats.max_root_iters = output.stats.max_root_iters.max(root_iters);

            push_back_iters += 1;
            if push_back_iters == MAX_POLYGON_VERTICES {
                break;
            }
        }

        if done {
            break;
        }

        if output.stats.toi_iters == conf.max_toi_iters {
            output.state = ToiState::Failed;
            output.t = t1;
            break;
        }
    }

    if output.state == ToiState::Failed {
        tracing::debug!(t = output.t, stats = ?output.stats, "time of impact did not converge");
    }

    output
}

#[cfg(test)]
mod tests {
    use glam::vec2;
    use sprig_core::{Position, Sweep};

    use super::*;
    use crate::{Disk, Edge, Polygon, Shape};

    #[test]
    fn fast_disk_hits_wall() {
        let disk = Shape::Disk(Disk::new(0.25)).child(0);
        let wall = Shape::Edge(Edge::new(vec2(-5.0, 4.0), vec2(5.0, 4.0))).child(0);

        let mut sweep_a = Sweep::new(Position::new(vec2(0.0, 10.0), 0.0), Vec2::ZERO);
        sweep_a.pos1 = Position::new(vec2(0.0, 0.0), 0.0);
        let sweep_b = Sweep::new(Position::ZERO, Vec2::ZERO);

        let conf = ToiConf::default();
        let output = time_of_impact(&disk, &sweep_a, &wall, &sweep_b, &conf);

        assert_eq!(output.state, ToiState::Touching);

        // Centre reaches the wall plus the combined radius minus the target depth
        let target = 0.25 + wall.radius() - conf.target_depth;
        let expected = (10.0 - 4.0 - target) / 10.0;
        assert!((output.t - expected).abs() < 1e-3, "{output:?}");

        let y = sweep_a.position(output.t).linear.y;
        assert!(y > 4.0);
    }

    #[test]
    fn separated_motion() {
        let a = Shape::Polygon(Polygon::new_box(0.5, 0.5)).child(0);
        let b = Shape::Polygon(Polygon::new_box(0.5, 0.5)).child(0);

        let mut sweep_a = Sweep::new(Position::new(vec2(0.0, 0.0), 0.0), Vec2::ZERO);
        sweep_a.pos1 = Position::new(vec2(0.0, 5.0), 1.0);
        let sweep_b = Sweep::new(Position::new(vec2(3.0, 0.0), 0.0), Vec2::ZERO);

        let output = time_of_impact(&a, &sweep_a, &b, &sweep_b, &ToiConf::default());
        assert_eq!(output.state, ToiState::Separated);
        assert_eq!(output.t, 1.0);
    }

    #[test]
    fn rotating_bar_hits_box() {
        let bar = Shape::Polygon(Polygon::new_box(2.0, 0.1)).child(0);
        let block = Shape::Polygon(Polygon::new_box(0.5, 0.5)).child(0);

        let mut sweep_a = Sweep::new(Position::new(vec2(0.0, 0.0), 0.0), Vec2::ZERO);
        sweep_a.pos1 = Position::new(vec2(0.0, 0.0), std::f32::consts::PI);
        let sweep_b = Sweep::new(Position::new(vec2(0.0, 1.6), 0.0), Vec2::ZERO);

        let output = time_of_impact(&bar, &sweep_a, &block, &sweep_b, &ToiConf::default());
        assert_eq!(output.state, ToiState::Touching);
        assert!(output.t > 0.0 && output.t < 0.5, "{output:?}");
    }
}
