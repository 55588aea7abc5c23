//! GJK closest points between two convex proxies
use arrayvec::ArrayVec;
use glam::Vec2;
use sprig_core::Transform;

use crate::DistanceProxy;

/// Default iteration cap of the GJK loop
pub const DEFAULT_MAX_DISTANCE_ITERS: u32 = 20;

/// Simplex indices from a previous query used to warm start the next one
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SimplexCache {
    pub metric: f32,
    pub count: usize,
    pub index_a: [u8; 3],
    pub index_b: [u8; 3],
}

#[derive(Debug, Default, Clone, Copy)]
struct SimplexVertex {
    /// support point in proxy A, world space
    wa: Vec2,
    /// support point in proxy B, world space
    wb: Vec2,
    /// `wb - wa`
    w: Vec2,
    /// barycentric coordinate of the closest point
    a: f32,
    index_a: usize,
    index_b: usize,
}

impl SimplexVertex {
    fn new(
        proxy_a: &DistanceProxy,
        xf_a: &Transform,
        index_a: usize,
        proxy_b: &DistanceProxy,
        xf_b: &Transform,
        index_b: usize,
    ) -> Self {
        let wa = xf_a.apply(proxy_a.vertex(index_a));
        let wb = xf_b.apply(proxy_b.vertex(index_b));
        Self {
            wa,
            wb,
            w: wb - wa,
            a: 1.0,
            index_a,
            index_b,
        }
    }
}

#[derive(Debug, Default)]
struct Simplex {
    v: ArrayVec<SimplexVertex, 3>,
}

impl Simplex {
    fn from_cache(
        cache: &SimplexCache,
        proxy_a: &DistanceProxy,
        xf_a: &Transform,
        proxy_b: &DistanceProxy,
        xf_b: &Transform,
    ) -> Self {
        let mut simplex = Simplex::default();
        for i in 0..cache.count {
            let mut v = SimplexVertex::new(
                proxy_a,
                xf_a,
                cache.index_a[i] as usize,
                proxy_b,
                xf_b,
                cache.index_b[i] as usize,
            );
            v.a = 0.0;
            simplex.v.push(v);
        }

        // Flush the cache if the simplex shape changed too much
        if simplex.v.len() > 1 {
            let metric1 = cache.metric;
            let metric2 = simplex.metric();
            if metric2 < 0.5 * metric1 || 2.0 * metric1 < metric2 || metric2 < f32::EPSILON {
                simplex.v.clear();
            }
        }

        if simplex.v.is_empty() {
            simplex
                .v
                .push(SimplexVertex::new(proxy_a, xf_a, 0, proxy_b, xf_b, 0));
        }

        simplex
    }

    fn write_cache(&self, cache: &mut SimplexCache) {
        cache.metric = self.metric();
        cache.count = self.v.len();
        for (i, v) in self.v.iter().enumerate() {
            cache.index_a[i] = v.index_a as u8;
            cache.index_b[i] = v.index_b as u8;
        }
    }

    fn search_direction(&self) -> Vec2 {
        match self.v.as_slice() {
            [v1] => -v1.w,
            [v1, v2] => {
                let e12 = v2.w - v1.w;
                let sgn = e12.perp_dot(-v1.w);
                if sgn > 0.0 {
                    // origin is left of e12
                    e12.perp()
                } else {
                    -e12.perp()
                }
            }
            _ => Vec2::ZERO,
        }
    }

    fn witness_points(&self) -> (Vec2, Vec2) {
        match self.v.as_slice() {
            [v1] => (v1.wa, v1.wb),
            [v1, v2] => (
                v1.a * v1.wa + v2.a * v2.wa,
                v1.a * v1.wb + v2.a * v2.wb,
            ),
            [v1, v2, v3] => {
                let p = v1.a * v1.wa + v2.a * v2.wa + v3.a * v3.wa;
                (p, p)
            }
            _ => (Vec2::ZERO, Vec2::ZERO),
        }
    }

    fn metric(&self) -> f32 {
        match self.v.as_slice() {
            [_] => 0.0,
            [v1, v2] => v1.w.distance(v2.w),
            [v1, v2, v3] => (v2.w - v1.w).perp_dot(v3.w - v1.w),
            _ => 0.0,
        }
    }

    /// Closest point on a line segment to the origin using barycentric coordinates
    fn solve2(&mut self) {
        let w1 = self.v[0].w;
        let w2 = self.v[1].w;
        let e12 = w2 - w1;

        // w1 region
        let d12_2 = -w1.dot(e12);
        if d12_2 <= 0.0 {
            self.v[0].a = 1.0;
            self.v.truncate(1);
            return;
        }

        // w2 region
        let d12_1 = w2.dot(e12);
        if d12_1 <= 0.0 {
            self.v[1].a = 1.0;
            self.v[0] = self.v[1];
            self.v.truncate(1);
            return;
        }

        let inv_d12 = 1.0 / (d12_1 + d12_2);
        self.v[0].a = d12_1 * inv_d12;
        self.v[1].a = d12_2 * inv_d12;
    }

    /// Closest point on a triangle to the origin, reducing to the nearest sub simplex
    fn solve3(&mut self) {
        let w1 = self.v[0].w;
        let w2 = self.v[1].w;
        let w3 = self.v[2].w;

        let e12 = w2 - w1;
        let d12_1 = w2.dot(e12);
        let d12_2 = -w1.dot(e12);

        let e13 = w3 - w1;
        let d13_1 = w3.dot(e13);
        let d13_2 = -w1.dot(e13);

        let e23 = w3 - w2;
        let d23_1 = w3.dot(e23);
        let d23_2 = -w2.dot(e23);

        let n123 = e12.perp_dot(e13);
        let d123_1 = n123 * w2.perp_dot(w3);
        let d123_2 = n123 * w3.perp_dot(w1);
        let d123_3 = n123 * w1.perp_dot(w2);

        if d12_2 <= 0.0 && d13_2 <= 0.0 {
            self.v[0].a = 1.0;
            self.v.truncate(1);
            return;
        }

        if d12_1 > 0.0 && d12_2 > 0.0 && d123_3 <= 0.0 {
            let inv_d12 = 1.0 / (d12_1 + d12_2);
            self.v[0].a = d12_1 * inv_d12;
            self.v[1].a = d12_2 * inv_d12;
            self.v.truncate(2);
            return;
        }

        if d13_1 > 0.0 && d13_2 > 0.0 && d123_2 <= 0.0 {
            let inv_d13 = 1.0 / (d13_1 + d13_2);
            self.v[0].a = d13_1 * inv_d13;
            self.v[2].a = d13_2 * inv_d13;
            self.v[1] = self.v[2];
            self.v.truncate(2);
            return;
        }

        if d12_1 <= 0.0 && d23_2 <= 0.0 {
            self.v[1].a = 1.0;
            self.v[0] = self.v[1];
            self.v.truncate(1);
            return;
        }

        if d13_1 <= 0.0 && d23_1 <= 0.0 {
            self.v[2].a = 1.0;
            self.v[0] = self.v[2];
            self.v.truncate(1);
            return;
        }

        if d23_1 > 0.0 && d23_2 > 0.0 && d123_1 <= 0.0 {
            let inv_d23 = 1.0 / (d23_1 + d23_2);
            self.v[1].a = d23_1 * inv_d23;
            self.v[2].a = d23_2 * inv_d23;
            self.v[0] = self.v[2];
            self.v.truncate(2);
            return;
        }

        let inv_d123 = 1.0 / (d123_1 + d123_2 + d123_3);
        self.v[0].a = d123_1 * inv_d123;
        self.v[1].a = d123_2 * inv_d123;
        self.v[2].a = d123_3 * inv_d123;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceOutput {
    /// Closest point on the core of proxy A
    pub point_a: Vec2,
    /// Closest point on the core of proxy B
    pub point_b: Vec2,
    /// Distance between the cores, ignoring vertex radii
    pub distance: f32,
    pub iterations: u32,
}

impl DistanceOutput {
    /// Moves the witness points onto the rounded surfaces, returning the surface distance
    pub fn with_radii(&self, radius_a: f32, radius_b: f32) -> DistanceOutput {
        let total = radius_a + radius_b;
        let mut output = *self;

        if output.distance > total && output.distance > f32::EPSILON {
            let normal = (output.point_b - output.point_a).normalize_or_zero();
            output.distance -= total;
            output.point_a += radius_a * normal;
            output.point_b -= radius_b * normal;
        } else {
            let p = 0.5 * (output.point_a + output.point_b);
            output.point_a = p;
            output.point_b = p;
            output.distance = 0.0;
        }

        output
    }
}

/// Computes the closest points between the cores of two proxies.
///
/// `cache` warm starts the search and receives the final simplex.
pub fn distance(
    proxy_a: &DistanceProxy,
    xf_a: &Transform,
    proxy_b: &DistanceProxy,
    xf_b: &Transform,
    cache: &mut SimplexCache,
    max_iterations: u32,
) -> DistanceOutput {
    let mut simplex = Simplex::from_cache(cache, proxy_a, xf_a, proxy_b, xf_b);

    let mut saved: ArrayVec<(usize, usize), 3> = ArrayVec::new();
    let mut iterations = 0;

    while iterations < max_iterations {
        saved.clear();
        saved.extend(simplex.v.iter().map(|v| (v.index_a, v.index_b)));

        match simplex.v.len() {
            2 => simplex.solve2(),
            3 => simplex.solve3(),
            _ => {}
        }

        // The origin is inside the triangle, so the proxies overlap
        if simplex.v.len() == 3 {
            break;
        }

        let d = simplex.search_direction();
        if d.length_squared() < f32::EPSILON * f32::EPSILON {
            // The origin is probably contained by a line segment or triangle
            break;
        }

        let index_a = proxy_a.support(xf_a.q.inv_rotate(-d));
        let index_b = proxy_b.support(xf_b.q.inv_rotate(d));
        iterations += 1;

        // A repeated support point means no further progress is possible
        if saved.contains(&(index_a, index_b)) {
            break;
        }

        simplex.v.push(SimplexVertex::new(
            proxy_a, xf_a, index_a, proxy_b, xf_b, index_b,
        ));
    }

    let (point_a, point_b) = simplex.witness_points();
    simplex.write_cache(cache);

    DistanceOutput {
        point_a,
        point_b,
        distance: point_a.distance(point_b),
        iterations,
    }
}

/// Signed overlap of two rounded proxies: positive when they intersect, negative when apart
pub fn test_overlap(
    proxy_a: &DistanceProxy,
    xf_a: &Transform,
    proxy_b: &DistanceProxy,
    xf_b: &Transform,
) -> f32 {
    let mut cache = SimplexCache::default();
    let output = distance(
        proxy_a,
        xf_a,
        proxy_b,
        xf_b,
        &mut cache,
        DEFAULT_MAX_DISTANCE_ITERS,
    );

    proxy_a.radius() + proxy_b.radius() - output.distance
}

#[cfg(test)]
mod tests {
    use glam::vec2;
    use sprig_core::Transform;

    use super::*;
    use crate::{Polygon, Shape};

    #[test]
    fn separated_boxes() {
        let a = Shape::Polygon(Polygon::new_box(1.0, 1.0)).child(0);
        let b = Shape::Polygon(Polygon::new_box(1.0, 1.0)).child(0);

        let xf_a = Transform::IDENTITY;
        let xf_b = Transform::new(vec2(5.0, 0.5), 0.0);

        let mut cache = SimplexCache::default();
        let output = distance(&a, &xf_a, &b, &xf_b, &mut cache, DEFAULT_MAX_DISTANCE_ITERS);

        assert!((output.distance - 3.0).abs() < 1e-5, "{output:?}");
        assert!((output.point_a.x - 1.0).abs() < 1e-5);
        assert!((output.point_b.x - 4.0).abs() < 1e-5);
        assert!(cache.count > 0);

        // Warm started query converges immediately
        let again = distance(&a, &xf_a, &b, &xf_b, &mut cache, DEFAULT_MAX_DISTANCE_ITERS);
        assert!((again.distance - 3.0).abs() < 1e-5);
        assert!(again.iterations <= output.iterations);
    }

    #[test]
    fn overlap() {
        let disk = DistanceProxy::point(0.5, vec2(0.0, 0.0));
        let ground = DistanceProxy::segment(0.0, vec2(-5.0, 0.0), vec2(5.0, 0.0));

        let above = Transform::new(vec2(1.0, 1.0), 0.0);
        assert!((test_overlap(&disk, &above, &ground, &Transform::IDENTITY) + 0.5).abs() < 1e-5);

        let sunk = Transform::new(vec2(1.0, 0.25), 0.0);
        assert!((test_overlap(&disk, &sunk, &ground, &Transform::IDENTITY) - 0.25).abs() < 1e-5);
    }

    #[test]
    fn radii() {
        let a = DistanceProxy::point(0.5, Vec2::ZERO);
        let b = DistanceProxy::point(0.25, Vec2::ZERO);
        let xf_b = Transform::new(vec2(2.0, 0.0), 0.0);

        let mut cache = SimplexCache::default();
        let output = distance(&a, &Transform::IDENTITY, &b, &xf_b, &mut cache, 20)
            .with_radii(a.radius(), b.radius());

        assert!((output.distance - 1.25).abs() < 1e-6);
        assert_eq!(output.point_a, vec2(0.5, 0.0));
        assert_eq!(output.point_b, vec2(1.75, 0.0));
    }
}
