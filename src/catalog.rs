//! Catalog collaborators.
//!
//! The solver asks a [`CatalogSource`] for stars around a pointing and a
//! [`MagnitudeModel`] for how deep to ask. [`MemoryCatalog`] answers cone
//! searches from an in-memory star list through a KD-tree over unit vectors.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::debug;
use thiserror::Error;

use crate::geom::sphere::{SkyCoord, angular_to_chord_sq, radec_to_xyz};
use crate::kdtree::KdTree;

/// A reference star. RA/Dec are in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CatalogStar {
    pub id: u64,
    pub ra: f64,
    pub dec: f64,
    pub mag: f64,
}

impl CatalogStar {
    pub fn new(id: u64, ra: f64, dec: f64, mag: f64) -> Self {
        Self { id, ra, dec, mag }
    }

    pub fn coord(&self) -> SkyCoord {
        SkyCoord::new(self.ra, self.dec)
    }

    pub fn xyz(&self) -> [f64; 3] {
        radec_to_xyz(self.ra, self.dec)
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to load catalog {path}: {reason}")]
    Load { path: String, reason: String },
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("invalid cone search radius {0} deg")]
    InvalidRadius(f64),
}

/// Source of reference stars.
pub trait CatalogSource {
    /// Faintest magnitude returned by subsequent reads.
    fn set_limiting_magnitude(&mut self, mag: f64);

    /// Stars within `radius_deg` degrees of `center`.
    fn read(&mut self, center: SkyCoord, radius_deg: f64) -> Result<Vec<CatalogStar>, CatalogError>;
}

/// Maps a pixel scale (arcsec/px) to the faintest useful catalog magnitude.
pub trait MagnitudeModel {
    fn limiting_magnitude(&self, pixel_scale_arcsec: f64) -> f64;
}

/// `m = base - 5 log10(scale)`, clamped to `[min, max]`.
///
/// Finer sampling reaches fainter stars; each factor of ten in pixel scale
/// is worth five magnitudes.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleMagnitudeModel {
    pub base: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for ScaleMagnitudeModel {
    fn default() -> Self {
        Self {
            base: 15.0,
            min: 6.0,
            max: 21.0,
        }
    }
}

impl MagnitudeModel for ScaleMagnitudeModel {
    fn limiting_magnitude(&self, pixel_scale_arcsec: f64) -> f64 {
        if pixel_scale_arcsec.is_nan() || pixel_scale_arcsec <= 0.0 {
            return self.max;
        }
        (self.base - 5.0 * pixel_scale_arcsec.log10()).clamp(self.min, self.max)
    }
}

/// In-memory catalog with magnitude-limited cone search.
pub struct MemoryCatalog {
    /// Sorted ascending by magnitude.
    stars: Vec<CatalogStar>,
    tree: KdTree<3>,
    limiting_magnitude: Option<f64>,
}

impl MemoryCatalog {
    pub fn new(mut stars: Vec<CatalogStar>) -> Self {
        stars.sort_by(|a, b| a.mag.total_cmp(&b.mag).then(a.id.cmp(&b.id)));
        let points = stars.iter().map(CatalogStar::xyz).collect();
        let ids = (0..stars.len()).collect();
        Self {
            tree: KdTree::<3>::build(points, ids),
            stars,
            limiting_magnitude: None,
        }
    }

    /// Read a plain text catalog with one `id ra_deg dec_deg mag` star per
    /// line. Blank lines and lines starting with `#` are skipped.
    pub fn from_reader(reader: impl BufRead) -> Result<Self, CatalogError> {
        let mut stars = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            stars.push(parse_star(line).map_err(|reason| CatalogError::Parse {
                line: n + 1,
                reason,
            })?);
        }
        Ok(Self::new(stars))
    }

    pub fn load_text(path: &Path) -> Result<Self, CatalogError> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    /// Load every star of a starfield binary catalog.
    #[cfg(feature = "starfield")]
    pub fn from_starfield(path: &Path) -> Result<Self, CatalogError> {
        use starfield::catalogs::{MinimalCatalog, StarCatalog};

        let catalog = MinimalCatalog::load(path).map_err(|e| CatalogError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let stars = catalog
            .star_data()
            .map(|s| CatalogStar::new(s.id, s.position.ra, s.position.dec, s.magnitude))
            .collect();
        Ok(Self::new(stars))
    }

    pub fn len(&self) -> usize {
        self.stars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stars.is_empty()
    }

    pub fn limiting_magnitude(&self) -> Option<f64> {
        self.limiting_magnitude
    }
}

impl CatalogSource for MemoryCatalog {
    fn set_limiting_magnitude(&mut self, mag: f64) {
        self.limiting_magnitude = Some(mag);
    }

    fn read(&mut self, center: SkyCoord, radius_deg: f64) -> Result<Vec<CatalogStar>, CatalogError> {
        if !(0.0..=180.0).contains(&radius_deg) {
            return Err(CatalogError::InvalidRadius(radius_deg));
        }
        let radius_sq = angular_to_chord_sq(radius_deg.to_radians());
        let limit = self.limiting_magnitude.unwrap_or(f64::INFINITY);

        let mut hits: Vec<usize> = self
            .tree
            .range_search(&center.to_xyz(), radius_sq)
            .iter()
            .map(|n| n.id)
            .filter(|&i| self.stars[i].mag <= limit)
            .collect();
        hits.sort_unstable();

        debug!(
            "cone search r={:.3} deg around {}: {} stars (mag <= {:.1})",
            radius_deg,
            center,
            hits.len(),
            limit
        );
        Ok(hits.into_iter().map(|i| self.stars[i]).collect())
    }
}

fn parse_star(line: &str) -> Result<CatalogStar, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [id, ra, dec, mag] = fields[..] else {
        return Err(format!("expected 4 fields, found {}", fields.len()));
    };
    let id: u64 = id.parse().map_err(|e| format!("bad id {id:?}: {e}"))?;
    let num = |s: &str| s.parse::<f64>().map_err(|e| format!("bad number {s:?}: {e}"));
    Ok(CatalogStar::new(
        id,
        num(ra)?.to_radians(),
        num(dec)?.to_radians(),
        num(mag)?,
    ))
}

/// Drop every star lying within `radius_arcsec` of a brighter kept star.
///
/// The result is sorted by brightness, brightest first.
pub fn deduplicate(stars: &[CatalogStar], radius_arcsec: f64) -> Vec<CatalogStar> {
    let mut sorted = stars.to_vec();
    sorted.sort_by(|a, b| a.mag.total_cmp(&b.mag));

    let points: Vec<[f64; 3]> = sorted.iter().map(CatalogStar::xyz).collect();
    let tree = KdTree::<3>::build(points.clone(), (0..sorted.len()).collect());
    let radius_sq = angular_to_chord_sq((radius_arcsec / 3600.0).to_radians());

    let mut dropped = vec![false; sorted.len()];
    let mut kept = Vec::with_capacity(sorted.len());
    for i in 0..sorted.len() {
        if dropped[i] {
            continue;
        }
        kept.push(sorted[i]);
        for n in tree.range_search(&points[i], radius_sq) {
            if n.id > i {
                dropped[n.id] = true;
            }
        }
    }

    if kept.len() < sorted.len() {
        debug!(
            "dropped {} catalog duplicates within {:.1} arcsec",
            sorted.len() - kept.len(),
            radius_arcsec
        );
    }
    kept
}
