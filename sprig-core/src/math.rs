use std::{
    f32::consts::TAU,
    ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign},
};

use glam::{vec2, vec3, Mat2, Mat3, Vec2, Vec3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Cross product of a scalar angular quantity and a vector
#[inline]
pub fn cross_sv(s: f32, v: Vec2) -> Vec2 {
    vec2(-s * v.y, s * v.x)
}

/// Cross product of a vector and a scalar angular quantity
#[inline]
pub fn cross_vs(v: Vec2, s: f32) -> Vec2 {
    vec2(s * v.y, -s * v.x)
}

/// A rotation stored as a unit direction
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Rot {
    /// cosine
    pub c: f32,
    /// sine
    pub s: f32,
}

impl Default for Rot {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Rot {
    pub const IDENTITY: Self = Self { c: 1.0, s: 0.0 };

    #[inline]
    pub fn from_angle(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        Self { c, s }
    }

    #[inline]
    pub fn angle(self) -> f32 {
        self.s.atan2(self.c)
    }

    #[inline]
    pub fn x_axis(self) -> Vec2 {
        vec2(self.c, self.s)
    }

    #[inline]
    pub fn y_axis(self) -> Vec2 {
        vec2(-self.s, self.c)
    }

    #[inline]
    pub fn rotate(self, v: Vec2) -> Vec2 {
        vec2(self.c * v.x - self.s * v.y, self.s * v.x + self.c * v.y)
    }

    #[inline]
    pub fn inv_rotate(self, v: Vec2) -> Vec2 {
        vec2(self.c * v.x + self.s * v.y, -self.s * v.x + self.c * v.y)
    }

    /// `self * other`
    #[inline]
    pub fn mul(self, other: Self) -> Self {
        Self {
            s: self.s * other.c + self.c * other.s,
            c: self.c * other.c - self.s * other.s,
        }
    }

    /// `self^T * other`
    #[inline]
    pub fn inv_mul(self, other: Self) -> Self {
        Self {
            s: self.c * other.s - self.s * other.c,
            c: self.c * other.c + self.s * other.s,
        }
    }
}

/// Rigid placement of a body's origin
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Transform {
    pub p: Vec2,
    pub q: Rot,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        p: Vec2::ZERO,
        q: Rot::IDENTITY,
    };

    pub fn new(p: Vec2, angle: f32) -> Self {
        Self {
            p,
            q: Rot::from_angle(angle),
        }
    }

    /// Transforms a local point into world space
    #[inline]
    pub fn apply(&self, v: Vec2) -> Vec2 {
        self.q.rotate(v) + self.p
    }

    /// Transforms a world point into local space
    #[inline]
    pub fn inv_apply(&self, v: Vec2) -> Vec2 {
        self.q.inv_rotate(v - self.p)
    }

    /// `self * other`
    pub fn mul(&self, other: &Self) -> Self {
        Self {
            q: self.q.mul(other.q),
            p: self.q.rotate(other.p) + self.p,
        }
    }

    /// `self^-1 * other`
    pub fn inv_mul(&self, other: &Self) -> Self {
        Self {
            q: self.q.inv_mul(other.q),
            p: self.q.inv_rotate(other.p - self.p),
        }
    }

    /// Returns the transform of the body origin for a center of mass placed at `pos`
    pub fn from_position(pos: Position, local_center: Vec2) -> Self {
        let q = Rot::from_angle(pos.angular);
        Self {
            p: pos.linear - q.rotate(local_center),
            q,
        }
    }
}

macro_rules! impl_linear_angular {
    ($ty: ident) => {
        impl $ty {
            pub const ZERO: Self = Self {
                linear: Vec2::ZERO,
                angular: 0.0,
            };

            #[inline]
            pub const fn new(linear: Vec2, angular: f32) -> Self {
                Self { linear, angular }
            }
        }

        impl Add for $ty {
            type Output = Self;

            #[inline]
            fn add(self, rhs: Self) -> Self {
                Self::new(self.linear + rhs.linear, self.angular + rhs.angular)
            }
        }

        impl Sub for $ty {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: Self) -> Self {
                Self::new(self.linear - rhs.linear, self.angular - rhs.angular)
            }
        }

        impl Mul<f32> for $ty {
            type Output = Self;

            #[inline]
            fn mul(self, rhs: f32) -> Self {
                Self::new(self.linear * rhs, self.angular * rhs)
            }
        }

        impl Neg for $ty {
            type Output = Self;

            #[inline]
            fn neg(self) -> Self {
                Self::new(-self.linear, -self.angular)
            }
        }

        impl AddAssign for $ty {
            #[inline]
            fn add_assign(&mut self, rhs: Self) {
                *self = *self + rhs;
            }
        }

        impl SubAssign for $ty {
            #[inline]
            fn sub_assign(&mut self, rhs: Self) {
                *self = *self - rhs;
            }
        }
    };
}

/// Position of a body's center of mass and its orientation
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Position {
    pub linear: Vec2,
    pub angular: f32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Velocity {
    pub linear: Vec2,
    pub angular: f32,
}

impl_linear_angular!(Position);
impl_linear_angular!(Velocity);

/// Motion of a body's center of mass over a step.
///
/// `pos0` is the position at `alpha0`, `pos1` the position at the end of the step.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sweep {
    pub pos0: Position,
    pub pos1: Position,
    pub local_center: Vec2,
    /// Fraction of the current step already consumed, in `[0, 1)`
    pub alpha0: f32,
}

impl Sweep {
    pub fn new(pos: Position, local_center: Vec2) -> Self {
        Self {
            pos0: pos,
            pos1: pos,
            local_center,
            alpha0: 0.0,
        }
    }

    /// Interpolated position at `beta` in `[0, 1]` of the remaining interval
    #[inline]
    pub fn position(&self, beta: f32) -> Position {
        self.pos0 * (1.0 - beta) + self.pos1 * beta
    }

    #[inline]
    pub fn transform(&self, beta: f32) -> Transform {
        Transform::from_position(self.position(beta), self.local_center)
    }

    #[inline]
    pub fn transform0(&self) -> Transform {
        Transform::from_position(self.pos0, self.local_center)
    }

    #[inline]
    pub fn transform1(&self) -> Transform {
        Transform::from_position(self.pos1, self.local_center)
    }

    /// Moves `pos0` forward to the absolute step fraction `alpha`
    pub fn advance0(&mut self, alpha: f32) {
        debug_assert!(self.alpha0 < 1.0);
        let beta = (alpha - self.alpha0) / (1.0 - self.alpha0);
        self.pos0 += (self.pos1 - self.pos0) * beta;
        self.alpha0 = alpha;
    }

    /// Wraps the angles so that `pos0.angular` lies in `[0, 2pi)`
    pub fn normalized(mut self) -> Self {
        let d = TAU * (self.pos0.angular / TAU).floor();
        self.pos0.angular -= d;
        self.pos1.angular -= d;
        self
    }
}

/// Solves `a * x = b`, returning zero for a singular matrix
pub fn solve22(a: Mat2, b: Vec2) -> Vec2 {
    let (a11, a12, a21, a22) = (a.x_axis.x, a.y_axis.x, a.x_axis.y, a.y_axis.y);
    let mut det = a11 * a22 - a12 * a21;
    if det != 0.0 {
        det = 1.0 / det;
    }

    vec2(det * (a22 * b.x - a12 * b.y), det * (a11 * b.y - a21 * b.x))
}

/// Solves `a * x = b`, returning zero for a singular matrix
pub fn solve33(a: Mat3, b: Vec3) -> Vec3 {
    let mut det = a.x_axis.dot(a.y_axis.cross(a.z_axis));
    if det != 0.0 {
        det = 1.0 / det;
    }

    vec3(
        det * b.dot(a.y_axis.cross(a.z_axis)),
        det * a.x_axis.dot(b.cross(a.z_axis)),
        det * a.x_axis.dot(a.y_axis.cross(b)),
    )
}

/// Solves the upper left 2x2 block of `a` against `b`
pub fn solve33_22(a: Mat3, b: Vec2) -> Vec2 {
    solve22(upper22(a), b)
}

/// Multiplies `v` by the upper left 2x2 block of `a`
#[inline]
pub fn mul33_22(a: Mat3, v: Vec2) -> Vec2 {
    upper22(a) * v
}

#[inline]
fn upper22(a: Mat3) -> Mat2 {
    Mat2::from_cols(a.x_axis.truncate(), a.y_axis.truncate())
}

/// Inverse of a 2x2 matrix, or zero if it is singular
pub fn inverse22(a: Mat2) -> Mat2 {
    let (a11, a12, a21, a22) = (a.x_axis.x, a.y_axis.x, a.x_axis.y, a.y_axis.y);
    let mut det = a11 * a22 - a12 * a21;
    if det != 0.0 {
        det = 1.0 / det;
    }

    Mat2::from_cols(vec2(det * a22, -det * a21), vec2(-det * a12, det * a11))
}

/// Inverts the upper left 2x2 block of `a`, zeroing the third row and column
pub fn inverse33_22(a: Mat3) -> Mat3 {
    let inv = inverse22(upper22(a));
    Mat3::from_cols(inv.x_axis.extend(0.0), inv.y_axis.extend(0.0), Vec3::ZERO)
}

/// Inverse of a symmetric 3x3 matrix, or zero if it is singular
pub fn sym_inverse33(a: Mat3) -> Mat3 {
    let mut det = a.x_axis.dot(a.y_axis.cross(a.z_axis));
    if det != 0.0 {
        det = 1.0 / det;
    }

    let (a11, a12, a13) = (a.x_axis.x, a.y_axis.x, a.z_axis.x);
    let (a22, a23) = (a.y_axis.y, a.z_axis.y);
    let a33 = a.z_axis.z;

    let ex = vec3(
        det * (a22 * a33 - a23 * a23),
        det * (a13 * a23 - a12 * a33),
        det * (a12 * a23 - a13 * a22),
    );
    let ey = vec3(
        ex.y,
        det * (a11 * a33 - a13 * a13),
        det * (a13 * a12 - a11 * a23),
    );
    let ez = vec3(ex.z, ey.z, det * (a11 * a22 - a12 * a12));

    Mat3::from_cols(ex, ey, ez)
}

#[cfg(test)]
mod tests {
    use std::f32::consts::{FRAC_PI_2, PI};

    use glam::vec2;

    use super::*;

    #[test]
    fn rotation() {
        let q = Rot::from_angle(FRAC_PI_2);
        let v = q.rotate(vec2(1.0, 0.0));
        assert!(v.abs_diff_eq(vec2(0.0, 1.0), 1e-6));
        assert!(q.inv_rotate(v).abs_diff_eq(vec2(1.0, 0.0), 1e-6));

        let r = q.mul(q);
        assert!((r.angle().abs() - PI).abs() < 1e-5);
        assert!((q.inv_mul(r).angle() - FRAC_PI_2).abs() < 1e-5);
    }

    #[test]
    fn transform_round_trip() {
        let xf = Transform::new(vec2(2.0, -1.0), 0.7);
        let p = vec2(0.25, 3.0);
        assert!(xf.inv_apply(xf.apply(p)).abs_diff_eq(p, 1e-5));

        let other = Transform::new(vec2(-4.0, 1.0), -1.2);
        let rel = xf.inv_mul(&other);
        assert!(xf.mul(&rel).p.abs_diff_eq(other.p, 1e-5));
    }

    #[test]
    fn sweep_advance() {
        let mut sweep = Sweep::new(Position::new(vec2(0.0, 10.0), 0.0), Vec2::ZERO);
        sweep.pos1 = Position::new(vec2(0.0, 0.0), 1.0);

        sweep.advance0(0.5);
        assert_eq!(sweep.alpha0, 0.5);
        assert!(sweep.pos0.linear.abs_diff_eq(vec2(0.0, 5.0), 1e-6));
        assert!((sweep.pos0.angular - 0.5).abs() < 1e-6);

        // Relative to the remaining half
        sweep.advance0(0.75);
        assert!(sweep.pos0.linear.abs_diff_eq(vec2(0.0, 2.5), 1e-5));

        let pos = sweep.position(1.0);
        assert_eq!(pos, sweep.pos1);
    }

    #[test]
    fn sweep_normalize() {
        let mut sweep = Sweep::new(Position::new(Vec2::ZERO, 7.0 * PI), Vec2::ZERO);
        sweep.pos1.angular = 7.5 * PI;

        let sweep = sweep.normalized();
        assert!((sweep.pos0.angular - PI).abs() < 1e-4);
        assert!((sweep.pos1.angular - 1.5 * PI).abs() < 1e-4);
    }

    #[test]
    fn linear_solves() {
        let a = Mat2::from_cols(vec2(4.0, 1.0), vec2(2.0, 3.0));
        let b = vec2(2.0, -1.0);
        assert!((a * solve22(a, b)).abs_diff_eq(b, 1e-5));
        assert!((inverse22(a) * b).abs_diff_eq(solve22(a, b), 1e-5));
        assert_eq!(solve22(Mat2::ZERO, b), Vec2::ZERO);

        let k = Mat3::from_cols(
            vec3(4.0, 1.0, 0.5),
            vec3(1.0, 3.0, 0.25),
            vec3(0.5, 0.25, 2.0),
        );
        let c = vec3(1.0, -2.0, 0.5);
        assert!((k * solve33(k, c)).abs_diff_eq(c, 1e-5));
        assert!((sym_inverse33(k) * c).abs_diff_eq(solve33(k, c), 1e-5));

        let x = solve33_22(k, c.truncate());
        assert!(mul33_22(k, x).abs_diff_eq(c.truncate(), 1e-5));
        assert_eq!(inverse33_22(k).z_axis, Vec3::ZERO);
    }
}
