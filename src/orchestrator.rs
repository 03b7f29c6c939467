//! Mode-aware preparation of matcher inputs.
//!
//! Each side is bucketed into a [`PositionGrid`], seeds and checklists are
//! sampled per cell, and the triangle matcher runs exactly once with tuning
//! chosen for the mode.

use log::debug;

use crate::grid::{Area, PositionGrid, StarPosition};
use crate::matcher::{MatchError, MatchOutcome, MatcherConfig, find_match};

/// Stars per cell used as triangle seeds.
const SEEDS_PER_CELL: usize = 3;
/// Stars per cell used for scoring.
const CHECKS_PER_CELL: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Two detected star lists of similar density.
    ImageToImage,
    /// Detected stars (A) against projected catalog stars (B).
    ImageToCatalog,
}

impl MatchMode {
    /// `(grid A divisions, grid B divisions)`, square grids.
    pub fn divisions(&self) -> (usize, usize) {
        match self {
            MatchMode::ImageToImage => (4, 4),
            MatchMode::ImageToCatalog => (3, 8),
        }
    }
}

/// How strict the positional check is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Judgement {
    #[default]
    Normal,
    Loose,
}

/// Fixed matcher tuning shared by every mode.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchTuning {
    pub graph_search_steps: (usize, usize),
    pub triangle_division: (usize, f64),
    pub score_to_pass: f64,
    pub score_to_fail: f64,
    pub acceptable_ratio: f64,
    pub min_matches: usize,
    /// Check accuracy in pixels under [`Judgement::Normal`].
    pub normal_accuracy: f64,
    /// Check accuracy in pixels under [`Judgement::Loose`].
    pub loose_accuracy: f64,
}

impl Default for MatchTuning {
    fn default() -> Self {
        Self {
            graph_search_steps: (3, 6),
            triangle_division: (40, 1.05),
            score_to_pass: 0.35,
            score_to_fail: 0.2,
            acceptable_ratio: 2.0,
            min_matches: 2,
            normal_accuracy: 2.0,
            loose_accuracy: 4.0,
        }
    }
}

impl MatchTuning {
    pub fn check_accuracy(&self, judgement: Judgement) -> f64 {
        match judgement {
            Judgement::Normal => self.normal_accuracy,
            Judgement::Loose => self.loose_accuracy,
        }
    }

    pub fn matcher_config(&self, judgement: Judgement) -> MatcherConfig {
        MatcherConfig {
            graph_search_steps: self.graph_search_steps,
            triangle_division: self.triangle_division,
            score_to_pass: self.score_to_pass,
            score_to_fail: self.score_to_fail,
            acceptable_ratio: self.acceptable_ratio,
            check_accuracy: self.check_accuracy(judgement),
            min_matches: self.min_matches,
        }
    }
}

/// One side of a match: stars plus the area their grid covers.
#[derive(Debug, Clone, Copy)]
pub struct StarField<'a> {
    pub stars: &'a [StarPosition],
    pub area: Area,
    pub accept_out_of_bounds: bool,
}

impl<'a> StarField<'a> {
    pub fn new(stars: &'a [StarPosition], area: Area) -> Self {
        Self {
            stars,
            area,
            accept_out_of_bounds: false,
        }
    }

    pub fn accepting_out_of_bounds(stars: &'a [StarPosition], area: Area) -> Self {
        Self {
            stars,
            area,
            accept_out_of_bounds: true,
        }
    }

    fn grid(&self, divisions: usize) -> PositionGrid {
        if self.accept_out_of_bounds {
            PositionGrid::accepting_out_of_bounds(self.stars, self.area, divisions, divisions)
        } else {
            PositionGrid::new(self.stars, self.area, divisions, divisions)
        }
    }
}

/// Bucket both sides and run the triangle matcher once.
///
/// A `Rejected` outcome is returned as a value; acceptance policy is left to
/// the caller.
pub fn match_fields(
    located: StarField<'_>,
    searched: StarField<'_>,
    mode: MatchMode,
    judgement: Judgement,
    tuning: &MatchTuning,
) -> Result<MatchOutcome, MatchError> {
    let (div_a, div_b) = mode.divisions();
    let grid_a = located.grid(div_a);
    let grid_b = searched.grid(div_b);

    let seeds_a = grid_a.select_top_n_per_cell(SEEDS_PER_CELL);
    let seeds_b = grid_b.select_top_n_per_cell(SEEDS_PER_CELL);
    let check_a = grid_a.select_top_n_per_cell(CHECKS_PER_CELL);
    let check_b = match mode {
        MatchMode::ImageToImage => grid_b.select_top_n_per_cell(CHECKS_PER_CELL),
        MatchMode::ImageToCatalog => grid_b.select_all(),
    };

    debug!(
        "{:?}: seeds {}/{}, checklists {}/{}, rejected {}/{}",
        mode,
        seeds_a.len(),
        seeds_b.len(),
        check_a.len(),
        check_b.len(),
        grid_a.rejected(),
        grid_b.rejected()
    );

    let config = tuning.matcher_config(judgement);
    find_match(&seeds_a, &seeds_b, Some((&check_a, &check_b)), &config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::MapFunction;
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn field(rng: &mut ChaCha8Rng, n: usize, half: f64) -> Vec<StarPosition> {
        (0..n)
            .map(|id| {
                StarPosition::new(
                    id,
                    rng.random_range(-half..half),
                    rng.random_range(-half..half),
                    rng.random_range(6.0..14.0),
                )
            })
            .collect()
    }

    fn moved(stars: &[StarPosition], map: &MapFunction) -> Vec<StarPosition> {
        stars
            .iter()
            .map(|s| {
                let (x, y) = map.map(s.xy());
                StarPosition::new(s.id, x, y, s.mag)
            })
            .collect()
    }

    #[test]
    fn tuning_defaults() {
        let tuning = MatchTuning::default();
        let normal = tuning.matcher_config(Judgement::Normal);
        assert_eq!(normal.check_accuracy, 2.0);
        assert_eq!(normal.graph_search_steps, (3, 6));
        assert_eq!(normal.triangle_division, (40, 1.05));
        assert_eq!(normal.min_matches, 2);
        assert_eq!(tuning.matcher_config(Judgement::Loose).check_accuracy, 4.0);
        assert_eq!(MatchMode::ImageToImage.divisions(), (4, 4));
        assert_eq!(MatchMode::ImageToCatalog.divisions(), (3, 8));
    }

    #[test]
    fn image_to_image_recovers_shift_and_turn() {
        let mut rng = ChaCha8Rng::seed_from_u64(31);
        let a = field(&mut rng, 150, 500.0);
        let truth = MapFunction::new(2f64.to_radians(), 1.0, (12.0, -9.0));
        let b = moved(&a, &truth);

        let area = Area::centered(1000.0, 1000.0);
        let outcome = match_fields(
            StarField::new(&a, area),
            StarField::accepting_out_of_bounds(&b, area),
            MatchMode::ImageToImage,
            Judgement::Normal,
            &MatchTuning::default(),
        )
        .unwrap();

        let MatchOutcome::Accepted(result) = outcome else {
            panic!("expected acceptance, got {outcome:?}");
        };
        assert_abs_diff_eq!(result.map.rotation_degrees(), 2.0, epsilon = 0.01);
        assert_abs_diff_eq!(result.map.translation().0, 12.0, epsilon = 0.1);
        assert_abs_diff_eq!(result.map.translation().1, -9.0, epsilon = 0.1);
    }

    #[test]
    fn image_to_catalog_with_extra_catalog_stars() {
        let mut rng = ChaCha8Rng::seed_from_u64(12);
        // Catalog covers twice the image extent; the image sees the centre.
        let catalog = field(&mut rng, 400, 1000.0);
        let truth = MapFunction::new(-1.5f64.to_radians(), 1.01, (-20.0, 15.0));
        let detected: Vec<StarPosition> = catalog
            .iter()
            .map(|s| {
                let (x, y) = truth.inverse().map(s.xy());
                StarPosition::new(s.id, x, y, s.mag + rng.random_range(-0.3..0.3))
            })
            .filter(|s| s.x.abs() < 500.0 && s.y.abs() < 500.0)
            .collect();

        let outcome = match_fields(
            StarField::new(&detected, Area::centered(1000.0, 1000.0)),
            StarField::accepting_out_of_bounds(&catalog, Area::centered(2000.0, 2000.0)),
            MatchMode::ImageToCatalog,
            Judgement::Loose,
            &MatchTuning::default(),
        )
        .unwrap();

        assert!(!outcome.is_rejected(), "got {outcome:?}");
        let map = outcome.result().map;
        assert_abs_diff_eq!(map.scale(), 1.01, epsilon = 1e-6);
        assert_abs_diff_eq!(map.rotation_degrees(), -1.5, epsilon = 1e-4);
    }

    #[test]
    fn out_of_area_detections_can_leave_too_few() {
        let stars = vec![
            StarPosition::new(0, 900.0, 900.0, 5.0),
            StarPosition::new(1, -900.0, 900.0, 5.0),
            StarPosition::new(2, 0.0, 0.0, 5.0),
        ];
        let err = match_fields(
            StarField::new(&stars, Area::centered(100.0, 100.0)),
            StarField::new(&stars, Area::centered(4000.0, 4000.0)),
            MatchMode::ImageToImage,
            Judgement::Normal,
            &MatchTuning::default(),
        )
        .unwrap_err();
        assert!(matches!(err, MatchError::InsufficientPoints { located: 1, .. }));
    }
}
