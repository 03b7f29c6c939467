use std::f64::consts::TAU;
use std::fmt;

/// A position on the celestial sphere. Angles are stored in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyCoord {
    pub ra: f64,
    pub dec: f64,
}

impl SkyCoord {
    pub fn new(ra: f64, dec: f64) -> Self {
        Self { ra, dec }
    }

    pub fn from_degrees(ra_deg: f64, dec_deg: f64) -> Self {
        Self {
            ra: ra_deg.to_radians(),
            dec: dec_deg.to_radians(),
        }
    }

    pub fn ra_degrees(&self) -> f64 {
        self.ra.to_degrees()
    }

    pub fn dec_degrees(&self) -> f64 {
        self.dec.to_degrees()
    }

    pub fn to_xyz(&self) -> [f64; 3] {
        radec_to_xyz(self.ra, self.dec)
    }

    pub fn from_xyz(xyz: [f64; 3]) -> Self {
        let (ra, dec) = xyz_to_radec(xyz);
        Self { ra, dec }
    }

    /// Great-circle separation in radians.
    pub fn separation(&self, other: &SkyCoord) -> f64 {
        angular_distance(self.to_xyz(), other.to_xyz())
    }
}

impl fmt::Display for SkyCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RA = {:.4} deg, Dec = {:+.4} deg",
            self.ra_degrees(),
            self.dec_degrees()
        )
    }
}

/// Convert (RA, Dec) in radians to a unit vector `[x, y, z]`.
pub fn radec_to_xyz(ra: f64, dec: f64) -> [f64; 3] {
    let cos_dec = dec.cos();
    [cos_dec * ra.cos(), cos_dec * ra.sin(), dec.sin()]
}

/// Convert a unit vector to (RA, Dec) in radians.
/// RA is in `[0, 2*pi)`, Dec is in `[-pi/2, pi/2]`.
pub fn xyz_to_radec(xyz: [f64; 3]) -> (f64, f64) {
    let mut ra = f64::atan2(xyz[1], xyz[0]);
    if ra < 0.0 {
        ra += TAU;
    }
    let dec = xyz[2].clamp(-1.0, 1.0).asin();
    (ra, dec)
}

/// Great-circle angular distance between two unit vectors, in radians.
pub fn angular_distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dot = a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
    dot.clamp(-1.0, 1.0).acos()
}

/// Squared chord length between two unit vectors separated by `theta` radians.
///
/// This is the squared L2 distance used when range-searching a KD-tree of
/// unit vectors.
pub fn angular_to_chord_sq(theta: f64) -> f64 {
    2.0 * (1.0 - theta.cos())
}

/// Gnomonic (TAN) projection of `point` onto the tangent plane at `reference`.
///
/// Returns `Some((x, y))` where x increases in the direction of increasing RA
/// and y increases toward the north pole (increasing Dec).
///
/// Returns `None` if the point is on the opposite hemisphere from the reference.
pub fn star_coords(point: [f64; 3], reference: [f64; 3]) -> Option<(f64, f64)> {
    let s = point;
    let r = reference;

    let sdotr = s[0] * r[0] + s[1] * r[1] + s[2] * r[2];
    if sdotr <= 0.0 {
        return None;
    }

    let inv_sdotr = 1.0 / sdotr;

    if r[2] == 1.0 {
        let inv_s2 = 1.0 / s[2];
        return Some((s[0] * inv_s2, s[1] * inv_s2));
    } else if r[2] == -1.0 {
        let inv_s2 = 1.0 / s[2];
        return Some((-s[0] * inv_s2, s[1] * inv_s2));
    }

    // eta: perpendicular to r, in direction of increasing RA (eta_z = 0)
    let mut etax = -r[1];
    let mut etay = r[0];
    let eta_norm = etax.hypot(etay);
    let inv_en = 1.0 / eta_norm;
    etax *= inv_en;
    etay *= inv_en;

    // xi = r cross eta: points north
    let xix = -r[2] * etay;
    let xiy = r[2] * etax;
    let xiz = r[0] * etay - r[1] * etax;

    let x = (s[0] * etax + s[1] * etay) * inv_sdotr;
    let y = (s[0] * xix + s[1] * xiy + s[2] * xiz) * inv_sdotr;

    Some((x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    const EPS: f64 = 1e-12;

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!(
            (a - b).abs() < tol,
            "expected {a} ~= {b} (diff = {})",
            (a - b).abs()
        );
    }

    #[test]
    fn roundtrip_radec_xyz() {
        let cases = [
            (0.0, 0.0),
            (PI, 0.0),
            (PI / 4.0, PI / 6.0),
            (3.0 * PI / 2.0, -PI / 4.0),
            (1.234, 0.567),
        ];
        for (ra, dec) in cases {
            let c = SkyCoord::from_xyz(SkyCoord::new(ra, dec).to_xyz());
            assert_close(dec, c.dec, EPS);
            let dra = ((ra - c.ra + PI) % TAU + TAU) % TAU - PI;
            assert_close(dra, 0.0, EPS);
        }
    }

    #[test]
    fn degree_constructors() {
        let c = SkyCoord::from_degrees(180.0, -30.0);
        assert_close(c.ra, PI, EPS);
        assert_close(c.dec_degrees(), -30.0, 1e-12);
    }

    #[test]
    fn separation_known() {
        let a = SkyCoord::new(0.0, 0.0);
        let b = SkyCoord::new(FRAC_PI_2, 0.0);
        assert_close(a.separation(&b), FRAC_PI_2, EPS);
        assert_close(a.separation(&a), 0.0, 1e-7);
    }

    #[test]
    fn chord_matches_vector_distance() {
        let a = radec_to_xyz(0.3, 0.1);
        let b = radec_to_xyz(0.35, 0.12);
        let d2: f64 = (0..3).map(|i| (a[i] - b[i]).powi(2)).sum();
        assert_close(angular_to_chord_sq(angular_distance(a, b)), d2, 1e-12);
    }

    #[test]
    fn star_coords_at_reference() {
        let r = radec_to_xyz(1.0, 0.5);
        let (x, y) = star_coords(r, r).unwrap();
        assert_close(x, 0.0, EPS);
        assert_close(y, 0.0, EPS);
    }

    #[test]
    fn star_coords_opposite_hemisphere() {
        let r = radec_to_xyz(0.0, 0.0);
        let s = radec_to_xyz(PI, 0.0);
        assert!(star_coords(s, r).is_none());
    }

    #[test]
    fn star_coords_small_offsets() {
        let r = radec_to_xyz(0.0, 0.0);
        let delta = 1e-4;
        let (x, y) = star_coords(radec_to_xyz(delta, 0.0), r).unwrap();
        assert_close(x, delta, 1e-8);
        assert_close(y, 0.0, 1e-8);
        let (x, y) = star_coords(radec_to_xyz(0.0, delta), r).unwrap();
        assert_close(x, 0.0, 1e-8);
        assert_close(y, delta, 1e-8);
    }
}
