use super::map::MapFunction;
use super::sphere::{self, SkyCoord};

/// Half-width of the central differences used to measure a refined CD matrix.
const REFINE_STEP_PIX: f64 = 16.0;

/// TAN (gnomonic) projection between pixel coordinates and the sky.
///
/// Parameterised the way observers describe a frame: a tangent point, a
/// pixel scale and a position angle. The CD matrix carries scale and
/// rotation together.
#[derive(Debug, Clone, PartialEq)]
pub struct TanProjection {
    /// Tangent point on sky (RA, Dec) in radians.
    pub crval: [f64; 2],
    /// Pixel coordinates of the tangent point.
    pub crpix: [f64; 2],
    /// CD matrix mapping pixel offsets to intermediate world coordinates (radians).
    /// `cd[0] = [cd1_1, cd1_2]`, `cd[1] = [cd2_1, cd2_2]`.
    pub cd: [[f64; 2]; 2],
    /// Image dimensions `(width, height)` in pixels.
    pub image_size: [f64; 2],
}

impl TanProjection {
    /// Projection centred on `center` at pixel `crpix`, with `pixel_scale`
    /// in arcsec/pixel and `position_angle` in degrees.
    pub fn from_pointing(
        center: SkyCoord,
        pixel_scale: f64,
        position_angle: f64,
        crpix: [f64; 2],
        image_size: [f64; 2],
    ) -> Self {
        let scale = (pixel_scale / 3600.0).to_radians();
        let pa = position_angle.to_radians();
        let c = pa.cos() * scale;
        let s = pa.sin() * scale;
        Self {
            crval: [center.ra, center.dec],
            crpix,
            cd: [[c, -s], [s, c]],
            image_size,
        }
    }

    /// Convert pixel coordinates to a unit vector on the celestial sphere.
    pub fn pixel_to_xyz(&self, px: f64, py: f64) -> [f64; 3] {
        let u = px - self.crpix[0];
        let v = py - self.crpix[1];
        let x = self.cd[0][0] * u + self.cd[0][1] * v;
        let y = self.cd[1][0] * u + self.cd[1][1] * v;
        self.iwc_to_xyz(x, y)
    }

    /// Convert a unit vector on the celestial sphere to pixel coordinates.
    ///
    /// Returns `None` if the point is behind the tangent plane.
    pub fn xyz_to_pixel(&self, xyz: [f64; 3]) -> Option<(f64, f64)> {
        let reference = sphere::radec_to_xyz(self.crval[0], self.crval[1]);
        let (x, y) = sphere::star_coords(xyz, reference)?;

        let det = self.determinant();
        let inv_det = 1.0 / det;

        let u = inv_det * (self.cd[1][1] * x - self.cd[0][1] * y);
        let v = inv_det * (-self.cd[1][0] * x + self.cd[0][0] * y);

        Some((u + self.crpix[0], v + self.crpix[1]))
    }

    pub fn pixel_to_sky(&self, px: f64, py: f64) -> SkyCoord {
        SkyCoord::from_xyz(self.pixel_to_xyz(px, py))
    }

    /// Returns `None` if the position is behind the tangent plane.
    pub fn sky_to_pixel(&self, coord: &SkyCoord) -> Option<(f64, f64)> {
        self.xyz_to_pixel(coord.to_xyz())
    }

    /// The tangent point.
    pub fn center(&self) -> SkyCoord {
        SkyCoord::new(self.crval[0], self.crval[1])
    }

    /// Pixel scale in arcsec/pixel from the CD matrix determinant.
    pub fn pixel_scale(&self) -> f64 {
        self.determinant().abs().sqrt().to_degrees() * 3600.0
    }

    /// Position angle in degrees, in `(-180, 180]`.
    pub fn position_angle(&self) -> f64 {
        f64::atan2(self.cd[1][0], self.cd[0][0]).to_degrees()
    }

    /// The same projection expressed in a pixel frame whose origin is moved
    /// by `(dx, dy)`: a pixel at `p` in this frame sits at `p + (dx, dy)` in
    /// the returned one.
    pub fn shifted(&self, dx: f64, dy: f64) -> Self {
        Self {
            crpix: [self.crpix[0] + dx, self.crpix[1] + dy],
            ..self.clone()
        }
    }

    /// Projection whose pixel-to-sky mapping is `self` applied after `map`.
    ///
    /// The tangent point moves to the sky position of `map(crpix)`. The CD
    /// matrix is measured on the new tangent plane by central differences,
    /// which also absorbs the small turn of the local north direction when
    /// the tangent point moves in RA.
    pub fn refined(&self, map: &MapFunction) -> Self {
        let (tx, ty) = map.map((self.crpix[0], self.crpix[1]));
        let center = self.pixel_to_sky(tx, ty);
        let reference = center.to_xyz();

        let plane = |du: f64, dv: f64| -> Option<(f64, f64)> {
            let (qx, qy) = map.map((self.crpix[0] + du, self.crpix[1] + dv));
            sphere::star_coords(self.pixel_to_xyz(qx, qy), reference)
        };

        let h = REFINE_STEP_PIX;
        let cd = match (plane(h, 0.0), plane(-h, 0.0), plane(0.0, h), plane(0.0, -h)) {
            (Some(xp), Some(xm), Some(yp), Some(ym)) => [
                [(xp.0 - xm.0) / (2.0 * h), (yp.0 - ym.0) / (2.0 * h)],
                [(xp.1 - xm.1) / (2.0 * h), (yp.1 - ym.1) / (2.0 * h)],
            ],
            _ => self.cd_times(map),
        };

        Self {
            crval: [center.ra, center.dec],
            crpix: self.crpix,
            cd,
            image_size: self.image_size,
        }
    }

    /// `cd * k R(theta)`: the linear part of `map` folded into the CD matrix.
    fn cd_times(&self, map: &MapFunction) -> [[f64; 2]; 2] {
        let k = map.scale();
        let (c, s) = (map.rotation().cos(), map.rotation().sin());
        let m = [[k * c, -k * s], [k * s, k * c]];
        let cd = self.cd;
        [
            [
                cd[0][0] * m[0][0] + cd[0][1] * m[1][0],
                cd[0][0] * m[0][1] + cd[0][1] * m[1][1],
            ],
            [
                cd[1][0] * m[0][0] + cd[1][1] * m[1][0],
                cd[1][0] * m[0][1] + cd[1][1] * m[1][1],
            ],
        ]
    }

    fn determinant(&self) -> f64 {
        self.cd[0][0] * self.cd[1][1] - self.cd[0][1] * self.cd[1][0]
    }

    /// Deproject intermediate world coordinates (radians) from the tangent plane
    /// to a unit vector on the sphere.
    fn iwc_to_xyz(&self, x: f64, y: f64) -> [f64; 3] {
        let x = -x;

        let r = sphere::radec_to_xyz(self.crval[0], self.crval[1]);
        let (rx, ry, rz) = (r[0], r[1], r[2]);

        let (ix, iy) = if rz == 1.0 || rz == -1.0 {
            (-1.0, 0.0)
        } else {
            let ix = ry;
            let iy = -rx;
            let norm = ix.hypot(iy);
            (ix / norm, iy / norm)
        };

        let mut jx = iy * rz;
        let mut jy = -ix * rz;
        let mut jz = ix * ry - iy * rx;
        let jnorm = (jx * jx + jy * jy + jz * jz).sqrt();
        jx /= jnorm;
        jy /= jnorm;
        jz /= jnorm;

        let px = ix * x + jx * y + rx;
        let py = iy * x + jy * y + ry;
        let pz = jz * y + rz;
        let norm = (px * px + py * py + pz * pz).sqrt();

        [px / norm, py / norm, pz / norm]
    }
}
