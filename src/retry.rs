//! Alternate pointing guesses for repeated solve attempts.
//!
//! Candidates are laid out as pixel offsets in a unit-scale TAN projection
//! (one pixel per degree) centred on the original guess and converted back
//! to sky coordinates. The field of view is the same for every candidate.

use log::debug;
use thiserror::Error;

use crate::geom::sphere::SkyCoord;
use crate::geom::tan::TanProjection;

/// Arcsec per pixel of the offset projection.
const UNIT_SCALE_ARCSEC: f64 = 3600.0;

/// Largest candidate list a position search may produce.
pub const MAX_SEARCH_CANDIDATES: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryPolicy {
    /// Only the original pointing.
    NoRetry,
    /// The original pointing plus the eight neighbours of a 3x3 grid with
    /// spacing `min(w, h) / 3`.
    PositionUncertain,
    /// A square grid with spacing `min(w, h) / 2`, kept within `radius`
    /// degrees of the original pointing and ordered nearest first.
    PositionSearch { radius: f64 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetryError {
    #[error("all {count} retry candidates have been tried")]
    Exhausted { count: usize },
    #[error(
        "position search over {radius} deg with {spacing} deg spacing needs more than {limit} candidates"
    )]
    TooManyCandidates {
        radius: f64,
        spacing: f64,
        limit: usize,
    },
}

/// Precomputed candidate list with a cursor.
#[derive(Debug, Clone)]
pub struct RetryCandidates {
    candidates: Vec<SkyCoord>,
    fov: (f64, f64),
    cursor: usize,
}

impl RetryCandidates {
    /// Candidates around `center` for a field of view `(w, h)` in degrees.
    ///
    /// A position search that would need more than
    /// [`MAX_SEARCH_CANDIDATES`] pointings fails with
    /// [`RetryError::TooManyCandidates`].
    pub fn new(center: SkyCoord, fov: (f64, f64), policy: RetryPolicy) -> Result<Self, RetryError> {
        let offsets = match policy {
            RetryPolicy::NoRetry => vec![(0.0, 0.0)],
            RetryPolicy::PositionUncertain => uncertain_offsets(fov.0.min(fov.1) / 3.0),
            RetryPolicy::PositionSearch { radius } => {
                let spacing = fov.0.min(fov.1) / 2.0;
                if search_count(spacing, radius) > MAX_SEARCH_CANDIDATES {
                    return Err(RetryError::TooManyCandidates {
                        radius,
                        spacing,
                        limit: MAX_SEARCH_CANDIDATES,
                    });
                }
                search_offsets(spacing, radius)
            }
        };

        let projection =
            TanProjection::from_pointing(center, UNIT_SCALE_ARCSEC, 0.0, [0.0, 0.0], [0.0, 0.0]);
        let candidates: Vec<SkyCoord> = offsets
            .iter()
            .map(|&(dx, dy)| {
                if dx == 0.0 && dy == 0.0 {
                    center
                } else {
                    projection.pixel_to_sky(dx, dy)
                }
            })
            .collect();

        debug!("{:?}: {} pointing candidates around {}", policy, candidates.len(), center);

        Ok(Self {
            candidates,
            fov,
            cursor: 0,
        })
    }

    /// The active candidate. After exhaustion this stays on the last one.
    pub fn current_center(&self) -> SkyCoord {
        self.candidates[self.cursor.min(self.candidates.len() - 1)]
    }

    /// Field of view `(w, h)` in degrees, identical for every candidate.
    pub fn current_fov(&self) -> (f64, f64) {
        self.fov
    }

    /// Move to the next candidate.
    ///
    /// Fails with [`RetryError::Exhausted`] once the cursor reaches the
    /// candidate count, i.e. on the `len()`-th call.
    pub fn increment(&mut self) -> Result<(), RetryError> {
        if self.cursor < self.candidates.len() {
            self.cursor += 1;
        }
        if self.cursor >= self.candidates.len() {
            return Err(RetryError::Exhausted {
                count: self.candidates.len(),
            });
        }
        Ok(())
    }

    /// Zero-based index of the active candidate.
    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn candidates(&self) -> &[SkyCoord] {
        &self.candidates
    }
}

/// Centre, N, S, E, W, then the four diagonals.
fn uncertain_offsets(step: f64) -> Vec<(f64, f64)> {
    vec![
        (0.0, 0.0),
        (0.0, step),
        (0.0, -step),
        (step, 0.0),
        (-step, 0.0),
        (step, step),
        (-step, step),
        (step, -step),
        (-step, -step),
    ]
}

fn searchable(spacing: f64, radius: f64) -> bool {
    spacing.is_finite() && radius.is_finite() && spacing > 0.0 && radius > 0.0
}

/// Number of grid points [`search_offsets`] would return, without building
/// them. Saturates just above [`MAX_SEARCH_CANDIDATES`].
fn search_count(spacing: f64, radius: f64) -> usize {
    if !searchable(spacing, radius) {
        return 1;
    }
    let n = (radius / spacing).floor();
    // The centre row alone already holds 2n + 1 points.
    if n >= MAX_SEARCH_CANDIDATES as f64 {
        return MAX_SEARCH_CANDIDATES + 1;
    }
    let n = n as i64;
    let mut count = 0;
    for row in -n..=n {
        for col in -n..=n {
            if (col as f64 * spacing).hypot(row as f64 * spacing) <= radius {
                count += 1;
            }
        }
        if count > MAX_SEARCH_CANDIDATES {
            break;
        }
    }
    count
}

/// Grid points within `radius`, nearest first; ties keep row-major order.
fn search_offsets(spacing: f64, radius: f64) -> Vec<(f64, f64)> {
    if !searchable(spacing, radius) {
        return vec![(0.0, 0.0)];
    }
    let n = (radius / spacing).floor() as i64;
    let mut offsets = Vec::new();
    for row in -n..=n {
        for col in -n..=n {
            let (dx, dy) = (col as f64 * spacing, row as f64 * spacing);
            if dx.hypot(dy) <= radius {
                offsets.push((dx, dy));
            }
        }
    }
    offsets.sort_by(|a, b| a.0.hypot(a.1).total_cmp(&b.0.hypot(b.1)));
    offsets
}
