//! Similarity transforms between two planar coordinate systems.
//!
//! A [`MapFunction`] maps `p' = k * R(theta) * p + t`. It is used both for
//! the refinement found by the triangle matcher (detected pixels onto
//! catalog pixels) and to convert pixel offsets during retries.

use std::f64::consts::{PI, TAU};
use std::fmt;

/// Rotation + uniform scale + translation in the plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapFunction {
    rotation: f64,
    scale: f64,
    translation: (f64, f64),
}

impl Default for MapFunction {
    fn default() -> Self {
        Self::identity()
    }
}

impl MapFunction {
    /// The transform that leaves every point in place.
    pub fn identity() -> Self {
        Self {
            rotation: 0.0,
            scale: 1.0,
            translation: (0.0, 0.0),
        }
    }

    /// Build a transform from a rotation (radians), scale and translation.
    pub fn new(rotation: f64, scale: f64, translation: (f64, f64)) -> Self {
        Self {
            rotation: normalize_angle(rotation),
            scale,
            translation,
        }
    }

    /// Build a transform from the linear coefficients `k cos(theta)` and
    /// `k sin(theta)` plus a translation.
    pub(crate) fn from_linear(kc: f64, ks: f64, translation: (f64, f64)) -> Self {
        Self::new(ks.atan2(kc), kc.hypot(ks), translation)
    }

    /// Apply the transform to a point.
    pub fn map(&self, p: (f64, f64)) -> (f64, f64) {
        let (kc, ks) = self.linear();
        (
            kc * p.0 - ks * p.1 + self.translation.0,
            ks * p.0 + kc * p.1 + self.translation.1,
        )
    }

    /// The exact algebraic inverse.
    ///
    /// `p = R(-theta) * (p' - t) / k`, so the inverse has rotation `-theta`,
    /// scale `1/k` and translation `-R(-theta) * t / k`.
    pub fn inverse(&self) -> Self {
        let inv_scale = 1.0 / self.scale;
        let (c, s) = (self.rotation.cos(), self.rotation.sin());
        let (tx, ty) = self.translation;
        let rx = c * tx + s * ty;
        let ry = -s * tx + c * ty;
        Self::new(-self.rotation, inv_scale, (-rx * inv_scale, -ry * inv_scale))
    }

    /// `self.compose(&other).map(p) == self.map(other.map(p))`.
    pub fn compose(&self, other: &MapFunction) -> Self {
        let t = self.map(other.translation);
        Self::new(
            self.rotation + other.rotation,
            self.scale * other.scale,
            t,
        )
    }

    /// Rotation angle in radians, in `(-pi, pi]`.
    pub fn rotation(&self) -> f64 {
        self.rotation
    }

    /// Rotation angle in degrees, in `(-180, 180]`.
    pub fn rotation_degrees(&self) -> f64 {
        self.rotation.to_degrees()
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn translation(&self) -> (f64, f64) {
        self.translation
    }

    /// Distance between the origin and its image.
    pub fn translation_distance(&self) -> f64 {
        self.translation.0.hypot(self.translation.1)
    }

    /// `(k cos(theta), k sin(theta))`.
    fn linear(&self) -> (f64, f64) {
        (
            self.scale * self.rotation.cos(),
            self.scale * self.rotation.sin(),
        )
    }
}

impl fmt::Display for MapFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rotation={:+.4} deg scale={:.5} shift=({:+.2}, {:+.2})",
            self.rotation_degrees(),
            self.scale,
            self.translation.0,
            self.translation.1
        )
    }
}

/// Wrap an angle into `(-pi, pi]`.
fn normalize_angle(theta: f64) -> f64 {
    let mut a = theta.rem_euclid(TAU);
    if a > PI {
        a -= TAU;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn assert_point_close(a: (f64, f64), b: (f64, f64), tol: f64) {
        assert_abs_diff_eq!(a.0, b.0, epsilon = tol);
        assert_abs_diff_eq!(a.1, b.1, epsilon = tol);
    }

    fn random_map(rng: &mut ChaCha8Rng) -> MapFunction {
        MapFunction::new(
            rng.random_range(-PI..PI),
            rng.random_range(0.2..5.0),
            (rng.random_range(-500.0..500.0), rng.random_range(-500.0..500.0)),
        )
    }

    #[test]
    fn identity_leaves_points_alone() {
        let id = MapFunction::identity();
        assert_eq!(id.rotation(), 0.0);
        assert_eq!(id.scale(), 1.0);
        assert_eq!(id.translation(), (0.0, 0.0));
        assert_point_close(id.map((12.5, -7.0)), (12.5, -7.0), 1e-15);
    }

    #[test]
    fn quarter_turn() {
        let m = MapFunction::new(PI / 2.0, 2.0, (1.0, 0.0));
        assert_point_close(m.map((1.0, 0.0)), (1.0, 2.0), 1e-12);
        assert_point_close(m.map((0.0, 1.0)), (-1.0, 0.0), 1e-12);
    }

    #[test]
    fn inverse_round_trip_random() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..200 {
            let m = random_map(&mut rng);
            let inv = m.inverse();
            let p = (rng.random_range(-1e3..1e3), rng.random_range(-1e3..1e3));
            assert_point_close(inv.map(m.map(p)), p, 1e-9);
            assert_point_close(m.map(inv.map(p)), p, 1e-9);
        }
    }

    #[test]
    fn compose_matches_sequential_application() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..100 {
            let a = random_map(&mut rng);
            let b = random_map(&mut rng);
            let p = (rng.random_range(-100.0..100.0), rng.random_range(-100.0..100.0));
            let ab = a.compose(&b);
            assert_point_close(ab.map(p), a.map(b.map(p)), 1e-8);
        }
    }

    #[test]
    fn compose_with_inverse_is_identity() {
        let m = MapFunction::new(0.3, 1.7, (4.0, -9.0));
        let id = m.compose(&m.inverse());
        assert_abs_diff_eq!(id.rotation(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(id.scale(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(id.translation_distance(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn rotation_is_normalized() {
        let m = MapFunction::new(3.0 * PI / 2.0, 1.0, (0.0, 0.0));
        assert_abs_diff_eq!(m.rotation(), -PI / 2.0, epsilon = 1e-12);
        let m = MapFunction::new(-TAU - 0.1, 1.0, (0.0, 0.0));
        assert_abs_diff_eq!(m.rotation(), -0.1, epsilon = 1e-12);
    }

    #[test]
    fn accessors() {
        let m = MapFunction::new(10f64.to_radians(), 1.02, (3.0, -4.0));
        assert_abs_diff_eq!(m.rotation_degrees(), 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(m.translation_distance(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn from_linear_recovers_parameters() {
        let m = MapFunction::new(-0.7, 0.9, (2.0, 3.0));
        let (kc, ks) = m.linear();
        let back = MapFunction::from_linear(kc, ks, m.translation());
        assert_abs_diff_eq!(back.rotation(), m.rotation(), epsilon = 1e-12);
        assert_abs_diff_eq!(back.scale(), m.scale(), epsilon = 1e-12);
    }
}
