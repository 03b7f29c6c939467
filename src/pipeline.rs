//! Astrometric solving pipeline.
//!
//! Ties the pieces together for one frame: fetch and clean the catalog
//! around the pointing guess, project it provisionally, match detected stars
//! against it, and fold the recovered transform into the final projection.
//! [`AstrometricSolver::solve_with_retries`] repeats this over a list of
//! alternate pointings.

use std::fmt;

use log::{debug, info, warn};
use thiserror::Error;

use crate::catalog::{
    CatalogError, CatalogSource, CatalogStar, MagnitudeModel, ScaleMagnitudeModel, deduplicate,
};
use crate::geom::map::MapFunction;
use crate::geom::sphere::SkyCoord;
use crate::geom::tan::TanProjection;
use crate::grid::{Area, StarPosition};
use crate::matcher::{MatchError, MatchOutcome, MatchResult};
use crate::orchestrator::{Judgement, MatchMode, MatchTuning, StarField, match_fields};
use crate::retry::RetryCandidates;
use crate::verify::Checklist;

/// A star found on the image, in top-left-origin pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedStar {
    pub x: f64,
    pub y: f64,
    pub mag: f64,
}

impl DetectedStar {
    pub fn new(x: f64, y: f64, mag: f64) -> Self {
        Self { x, y, mag }
    }
}

/// A catalog star placed on the image by the final projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacedStar {
    pub star: CatalogStar,
    pub x: f64,
    pub y: f64,
}

/// How far the pointing guess is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolveMode {
    /// Pointing is approximate; a match is required.
    #[default]
    Uncertain,
    /// Pointing is close; a rejected match that barely moves the guess is
    /// accepted anyway.
    SemiAccurate,
    /// Pointing is exact; no matching is done.
    Accurate,
}

/// Everything known about one frame before solving.
#[derive(Debug, Clone, Copy)]
pub struct SolveRequest<'a> {
    /// `(width, height)` in pixels.
    pub image_size: (f64, f64),
    pub stars: &'a [DetectedStar],
    pub center: SkyCoord,
    /// `(width, height)` in degrees.
    pub fov: (f64, f64),
    /// Degrees.
    pub position_angle: f64,
    pub mode: SolveMode,
    pub judgement: Judgement,
}

impl SolveRequest<'_> {
    /// Pixel scale along each axis in arcsec/pixel.
    pub fn pixel_scales(&self) -> (f64, f64) {
        (
            self.fov.0 * 3600.0 / self.image_size.0,
            self.fov.1 * 3600.0 / self.image_size.1,
        )
    }
}

/// Bounds for treating a transform as "no change".
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityTolerance {
    /// Pixels.
    pub max_translation: f64,
    pub scale_range: (f64, f64),
    /// Degrees.
    pub max_rotation: f64,
}

impl Default for IdentityTolerance {
    fn default() -> Self {
        Self {
            max_translation: 100.0,
            scale_range: (0.95, 1.05),
            max_rotation: 5.0,
        }
    }
}

impl IdentityTolerance {
    pub fn accepts(&self, map: &MapFunction) -> bool {
        map.translation_distance() < self.max_translation
            && map.scale() >= self.scale_range.0
            && map.scale() <= self.scale_range.1
            && map.rotation_degrees().abs() <= self.max_rotation
    }
}

/// Solver settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    pub tuning: MatchTuning,
    /// Catalog search radius as a multiple of the larger FOV side.
    pub catalog_radius_factor: f64,
    /// Magnitudes added to the modelled limit.
    pub magnitude_margin: f64,
    /// Catalog stars closer than this (arcsec) to a brighter one are dropped.
    pub dedup_radius: f64,
    pub near_identity: IdentityTolerance,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            tuning: MatchTuning::default(),
            catalog_radius_factor: 1.0,
            magnitude_margin: 3.0,
            dedup_radius: 10.0,
            near_identity: IdentityTolerance::default(),
        }
    }
}

/// Result of a successful solve.
#[derive(Debug, Clone)]
pub struct Solution {
    /// Final projection in top-left-origin pixel coordinates.
    pub projection: TanProjection,
    pub center: SkyCoord,
    /// Arcsec/pixel.
    pub pixel_scale: f64,
    /// Degrees.
    pub position_angle: f64,
    pub catalog: Vec<PlacedStar>,
    /// `None` in [`SolveMode::Accurate`].
    pub refinement: Option<MatchResult>,
    /// Detected stars with a placed catalog star within the check accuracy.
    pub n_matched: usize,
}

impl fmt::Display for Solution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "center {}, scale {:.4} arcsec/px, rotation {:+.3} deg, {} stars matched",
            self.center, self.pixel_scale, self.position_angle, self.n_matched
        )
    }
}

#[derive(Debug, Error)]
pub enum SolveError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error("no acceptable match (best score {:.3}, {})", .best.score, .best.map)]
    NoMatch { best: MatchResult },
    #[error("no match after {attempts} pointing candidates")]
    RetriesExhausted {
        attempts: usize,
        best: Option<MatchResult>,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Solver over a catalog and a limiting-magnitude model.
pub struct AstrometricSolver<C, M = ScaleMagnitudeModel> {
    catalog: C,
    magnitude_model: M,
    config: SolverConfig,
}

impl<C: CatalogSource> AstrometricSolver<C> {
    pub fn new(catalog: C) -> Self {
        Self::with_model(catalog, ScaleMagnitudeModel::default(), SolverConfig::default())
    }
}

impl<C: CatalogSource, M: MagnitudeModel> AstrometricSolver<C, M> {
    pub fn with_model(catalog: C, magnitude_model: M, config: SolverConfig) -> Self {
        Self {
            catalog,
            magnitude_model,
            config,
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Solve one frame from the pointing in `request`.
    pub fn solve(&mut self, request: &SolveRequest<'_>) -> Result<Solution, SolveError> {
        validate(request)?;
        let (w, h) = request.image_size;

        let detected: Vec<StarPosition> = request
            .stars
            .iter()
            .enumerate()
            .map(|(i, s)| StarPosition::new(i, s.x - w / 2.0, s.y - h / 2.0, s.mag))
            .collect();

        let (sx, sy) = request.pixel_scales();
        let limit =
            self.magnitude_model.limiting_magnitude(sx.max(sy)) + self.config.magnitude_margin;
        self.catalog.set_limiting_magnitude(limit);

        let radius = self.config.catalog_radius_factor * request.fov.0.max(request.fov.1);
        let raw = self.catalog.read(request.center, radius)?;
        let stars = deduplicate(&raw, self.config.dedup_radius);
        debug!(
            "catalog: {} stars to mag {:.1} within {:.3} deg, {} after dedup",
            raw.len(),
            limit,
            radius,
            stars.len()
        );

        let provisional = TanProjection::from_pointing(
            request.center,
            (sx * sy).sqrt(),
            request.position_angle,
            [0.0, 0.0],
            [w, h],
        );

        let refinement = match request.mode {
            SolveMode::Accurate => None,
            mode => {
                let projected: Vec<StarPosition> = stars
                    .iter()
                    .enumerate()
                    .filter_map(|(i, s)| {
                        let (x, y) = provisional.sky_to_pixel(&s.coord())?;
                        Some(StarPosition::new(i, x, y, s.mag))
                    })
                    .collect();
                Some(self.refine(&detected, &projected, mode, request)?)
            }
        };

        let centered = match &refinement {
            Some(result) => provisional.refined(&result.map),
            None => provisional,
        };
        let projection = centered.shifted(w / 2.0, h / 2.0);

        let catalog: Vec<PlacedStar> = stars
            .iter()
            .filter_map(|s| {
                let (x, y) = projection.sky_to_pixel(&s.coord())?;
                Some(PlacedStar { star: *s, x, y })
            })
            .collect();

        let accuracy = self.config.tuning.check_accuracy(request.judgement);
        let n_matched = count_matched(request.stars, &catalog, accuracy);

        let solution = Solution {
            center: projection.center(),
            pixel_scale: projection.pixel_scale(),
            position_angle: projection.position_angle(),
            projection,
            catalog,
            refinement,
            n_matched,
        };
        info!("{}", solution);
        Ok(solution)
    }

    /// Run [`solve`](Self::solve) at each pointing of `retries` until one
    /// succeeds.
    ///
    /// Match failures move on to the next candidate; catalog and request
    /// errors end the loop immediately.
    pub fn solve_with_retries(
        &mut self,
        request: &SolveRequest<'_>,
        retries: &mut RetryCandidates,
    ) -> Result<Solution, SolveError> {
        let mut attempts = 0;
        let mut best: Option<MatchResult> = None;

        loop {
            attempts += 1;
            let attempt = SolveRequest {
                center: retries.current_center(),
                fov: retries.current_fov(),
                ..*request
            };

            match self.solve(&attempt) {
                Ok(solution) => return Ok(solution),
                Err(SolveError::NoMatch { best: result }) => {
                    info!(
                        "attempt {} at {}: no match (score {:.3})",
                        attempts, attempt.center, result.score
                    );
                    if best.is_none_or(|b| result.score > b.score) {
                        best = Some(result);
                    }
                }
                Err(SolveError::Match(e)) => {
                    info!("attempt {} at {}: {}", attempts, attempt.center, e);
                }
                Err(e) => return Err(e),
            }

            if retries.increment().is_err() {
                warn!("giving up after {} pointing candidates", attempts);
                return Err(SolveError::RetriesExhausted { attempts, best });
            }
        }
    }

    /// Match centred detected stars against provisionally projected catalog
    /// stars and apply the acceptance policy of `mode`.
    fn refine(
        &self,
        detected: &[StarPosition],
        projected: &[StarPosition],
        mode: SolveMode,
        request: &SolveRequest<'_>,
    ) -> Result<MatchResult, SolveError> {
        let (w, h) = request.image_size;
        let side = 2.0 * w.max(h);

        let outcome = match_fields(
            StarField::new(detected, Area::centered(w, h)),
            StarField::accepting_out_of_bounds(projected, Area::centered(side, side)),
            MatchMode::ImageToCatalog,
            request.judgement,
            &self.config.tuning,
        )?;

        match outcome {
            MatchOutcome::Accepted(result) => Ok(result),
            MatchOutcome::Weak(result) => {
                debug!("weak match accepted (score {:.3})", result.score);
                Ok(result)
            }
            MatchOutcome::Rejected(result)
                if mode == SolveMode::SemiAccurate
                    && self.config.near_identity.accepts(&result.map) =>
            {
                warn!(
                    "match rejected (score {:.3}) but close to the guess, keeping {}",
                    result.score, result.map
                );
                Ok(result)
            }
            MatchOutcome::Rejected(result) => Err(SolveError::NoMatch { best: result }),
        }
    }
}

fn validate(request: &SolveRequest<'_>) -> Result<(), SolveError> {
    let positive = |v: f64| v.is_finite() && v > 0.0;
    let (w, h) = request.image_size;
    if !(positive(w) && positive(h)) {
        return Err(SolveError::InvalidRequest(format!("image size {w}x{h}")));
    }
    let (fw, fh) = request.fov;
    if !(positive(fw) && positive(fh) && fw < 180.0 && fh < 180.0) {
        return Err(SolveError::InvalidRequest(format!(
            "field of view {fw}x{fh} deg"
        )));
    }
    Ok(())
}

/// Detected stars with a placed catalog star within `accuracy` pixels.
fn count_matched(detected: &[DetectedStar], catalog: &[PlacedStar], accuracy: f64) -> usize {
    let placed: Vec<StarPosition> = catalog
        .iter()
        .enumerate()
        .map(|(i, p)| StarPosition::new(i, p.x, p.y, p.star.mag))
        .collect();
    let stars: Vec<StarPosition> = detected
        .iter()
        .enumerate()
        .map(|(i, s)| StarPosition::new(i, s.x, s.y, s.mag))
        .collect();
    Checklist::new(&placed)
        .verify(&MapFunction::identity(), &stars, accuracy, &[])
        .n_matched
}
