//! Checklist scoring of candidate transforms.
//!
//! A candidate transform is judged by mapping a checklist of stars from the
//! located side and counting how many land within the check accuracy of some
//! star on the searched side.

use crate::geom::map::MapFunction;
use crate::grid::StarPosition;
use crate::kdtree::KdTree;

/// Outcome of scoring one transform against a checklist.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    /// `n_matched / n_checked`, or 0 when nothing was checked.
    pub score: f64,
    pub n_checked: usize,
    pub n_matched: usize,
    /// Matched pairs: (index into the located checklist, index into the
    /// searched checklist).
    pub matched_pairs: Vec<(usize, usize)>,
}

/// Searched-side checklist with a spatial index over its positions.
pub struct Checklist {
    stars: Vec<StarPosition>,
    tree: KdTree<2>,
}

impl Checklist {
    pub fn new(stars: &[StarPosition]) -> Self {
        let tree = KdTree::from_xy(stars.iter().map(StarPosition::xy));
        Self {
            stars: stars.to_vec(),
            tree,
        }
    }

    pub fn stars(&self) -> &[StarPosition] {
        &self.stars
    }

    /// Score `map` over `located`, skipping stars whose id is in `excluded`.
    ///
    /// Each located star is paired with its nearest searched star when that
    /// lies within `accuracy` pixels.
    pub fn verify(
        &self,
        map: &MapFunction,
        located: &[StarPosition],
        accuracy: f64,
        excluded: &[usize],
    ) -> Verification {
        let radius_sq = accuracy * accuracy;
        let mut n_checked = 0;
        let mut matched_pairs = Vec::new();

        for (i, star) in located.iter().enumerate() {
            if excluded.contains(&star.id) {
                continue;
            }
            n_checked += 1;
            let (x, y) = map.map(star.xy());
            if let Some(hit) = self.tree.nearest_within(&[x, y], radius_sq) {
                matched_pairs.push((i, hit.id));
            }
        }

        let n_matched = matched_pairs.len();
        let score = if n_checked == 0 {
            0.0
        } else {
            n_matched as f64 / n_checked as f64
        };

        Verification {
            score,
            n_checked,
            n_matched,
            matched_pairs,
        }
    }
}

/// Fraction of `checklist_a` (minus `excluded_ids`) that `map` places within
/// `accuracy` of some star in `checklist_b`.
pub fn score_transform(
    map: &MapFunction,
    checklist_a: &[StarPosition],
    checklist_b: &[StarPosition],
    accuracy: f64,
    excluded_ids: &[usize],
) -> f64 {
    Checklist::new(checklist_b)
        .verify(map, checklist_a, accuracy, excluded_ids)
        .score
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn field(rng: &mut ChaCha8Rng, n: usize) -> Vec<StarPosition> {
        (0..n)
            .map(|id| {
                StarPosition::new(
                    id,
                    rng.random_range(-400.0..400.0),
                    rng.random_range(-400.0..400.0),
                    rng.random_range(8.0..14.0),
                )
            })
            .collect()
    }

    fn mapped(stars: &[StarPosition], map: &MapFunction) -> Vec<StarPosition> {
        stars
            .iter()
            .map(|s| {
                let (x, y) = map.map(s.xy());
                StarPosition::new(s.id + 1000, x, y, s.mag)
            })
            .collect()
    }

    #[test]
    fn true_transform_scores_one() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let a = field(&mut rng, 40);
        let map = MapFunction::new(0.2, 1.1, (15.0, -8.0));
        let b = mapped(&a, &map);

        let v = Checklist::new(&b).verify(&map, &a, 1.0, &[]);
        assert_eq!(v.score, 1.0);
        assert_eq!(v.n_checked, 40);
        assert!(v.matched_pairs.iter().all(|&(i, j)| i == j));
    }

    #[test]
    fn excluded_ids_are_not_checked() {
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let a = field(&mut rng, 10);
        let b = mapped(&a, &MapFunction::identity());

        let v = Checklist::new(&b).verify(&MapFunction::identity(), &a, 1.0, &[0, 1, 2]);
        assert_eq!(v.n_checked, 7);
        assert_eq!(v.n_matched, 7);

        let all = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9];
        assert_eq!(score_transform(&MapFunction::identity(), &a, &b, 1.0, &all), 0.0);
    }

    #[test]
    fn score_is_monotone_in_accuracy() {
        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let a = field(&mut rng, 60);
        let b = field(&mut rng, 200);
        let map = MapFunction::new(0.05, 0.98, (3.0, 2.0));

        let mut last = 0.0;
        for step in 0..40 {
            let accuracy = step as f64 * 2.0;
            let score = score_transform(&map, &a, &b, accuracy, &[]);
            assert!(score >= last);
            last = score;
        }
        assert!(last > 0.0);
    }

    #[test]
    fn empty_checklists_score_zero() {
        let map = MapFunction::identity();
        assert_eq!(score_transform(&map, &[], &[], 5.0, &[]), 0.0);
        let one = [StarPosition::new(0, 0.0, 0.0, 1.0)];
        assert_eq!(score_transform(&map, &one, &[], 5.0, &[]), 0.0);
    }
}
