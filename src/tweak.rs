//! Least-squares refinement of a matched transform.
//!
//! The triangle search fits its candidate to three vertices only. Once a
//! candidate wins, every checklist star that found a counterpart is used to
//! refit it, which averages out the centroid noise of the seed stars.

use log::debug;

use crate::fitting::{FitError, fit_similarity};
use crate::geom::map::MapFunction;
use crate::grid::StarPosition;
use crate::verify::Checklist;

/// Minimum number of matched pairs for a refit.
pub const MIN_PAIRS: usize = 3;

/// Refit `initial` over the checklist pairs it explains.
///
/// Each iteration:
/// 1. Map the located checklist with the current transform
/// 2. Pair every star with its nearest searched star within `accuracy`
/// 3. Fit a similarity over all pairs and adopt it
///
/// Stops early when the set of pairs stops changing.
pub fn tweak_transform(
    initial: &MapFunction,
    located: &[StarPosition],
    searched: &Checklist,
    accuracy: f64,
    iterations: usize,
) -> Result<MapFunction, FitError> {
    let mut current = *initial;
    let mut last_pairs: Vec<(usize, usize)> = Vec::new();

    for iter in 0..iterations.max(1) {
        let verification = searched.verify(&current, located, accuracy, &[]);
        if verification.matched_pairs.len() < MIN_PAIRS {
            return Err(FitError::TooFewCorrespondences);
        }
        if verification.matched_pairs == last_pairs {
            break;
        }

        let pairs: Vec<_> = verification
            .matched_pairs
            .iter()
            .map(|&(a, b)| (located[a].xy(), searched.stars()[b].xy()))
            .collect();
        current = fit_similarity(&pairs)?;
        debug!(
            "tweak iteration {}: {} pairs -> {}",
            iter,
            pairs.len(),
            current
        );
        last_pairs = verification.matched_pairs;
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn recovers_truth_from_rough_start() {
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let truth = MapFunction::new(0.12, 1.02, (3.0, -4.0));
        let located: Vec<StarPosition> = (0..50)
            .map(|id| {
                StarPosition::new(
                    id,
                    rng.random_range(-500.0..500.0),
                    rng.random_range(-500.0..500.0),
                    10.0,
                )
            })
            .collect();
        let searched: Vec<StarPosition> = located
            .iter()
            .map(|s| {
                let (x, y) = truth.map(s.xy());
                StarPosition::new(s.id, x, y, s.mag)
            })
            .collect();

        // Off by half a pixel in shift and a little in rotation.
        let rough = MapFunction::new(0.1205, 1.02, (3.5, -4.4));
        let checklist = Checklist::new(&searched);
        let refined = tweak_transform(&rough, &located, &checklist, 4.0, 5).unwrap();

        assert_abs_diff_eq!(refined.rotation(), truth.rotation(), epsilon = 1e-9);
        assert_abs_diff_eq!(refined.scale(), truth.scale(), epsilon = 1e-9);
        assert_abs_diff_eq!(refined.translation().0, 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(refined.translation().1, -4.0, epsilon = 1e-6);
    }

    #[test]
    fn too_few_pairs() {
        let located = [StarPosition::new(0, 0.0, 0.0, 1.0)];
        let checklist = Checklist::new(&located);
        assert_eq!(
            tweak_transform(&MapFunction::identity(), &located, &checklist, 2.0, 3),
            Err(FitError::TooFewCorrespondences)
        );
    }
}
