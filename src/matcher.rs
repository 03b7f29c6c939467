//! Triangle pattern matcher.
//!
//! Recovers the similarity transform that maps a list of stars to locate
//! (A) onto a list of stars to search (B). Triangles built from the
//! brightest stars of A are looked up by shape among the triangles of B;
//! every shape match yields a candidate transform, which is scored against
//! a checklist of held-out stars.
//!
//! The search is deterministic: triangles are enumerated and looked up in a
//! fixed order, and a candidate only replaces the current best on a strictly
//! higher score.

use log::debug;
use thiserror::Error;

use crate::fitting::{fit_similarity, max_residual};
use crate::geom::map::MapFunction;
use crate::grid::StarPosition;
use crate::triangles::{Triangle, TriangleIndex};
use crate::tweak::tweak_transform;
use crate::verify::Checklist;

/// Least-squares passes applied to the winning candidate.
const REFINE_ITERATIONS: usize = 4;

/// Tuning parameters of the triangle search.
#[derive(Debug, Clone, PartialEq)]
pub struct MatcherConfig {
    /// `(min_k, max_k)`: the search combines the `k` brightest stars of A
    /// for `k` in this range.
    pub graph_search_steps: (usize, usize),
    /// `(bins, tolerance)`: descriptor buckets per axis and the relative
    /// tolerance on each descriptor ratio.
    pub triangle_division: (usize, f64),
    /// Scores at or above this are accepted.
    pub score_to_pass: f64,
    /// Scores below this are rejected.
    pub score_to_fail: f64,
    /// Largest allowed scale between A and B, in either direction. Bounds
    /// the candidate scale and the size of indexed B triangles, not the
    /// relative sizes of the two lists.
    pub acceptable_ratio: f64,
    /// Pixel tolerance for a checklist star to count as matched.
    pub check_accuracy: f64,
    /// Held-out stars a candidate must match before its score counts.
    pub min_matches: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            graph_search_steps: (3, 6),
            triangle_division: (40, 1.05),
            score_to_pass: 0.35,
            score_to_fail: 0.2,
            acceptable_ratio: 2.0,
            check_accuracy: 2.0,
            min_matches: 2,
        }
    }
}

/// A transform together with its checklist score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub map: MapFunction,
    /// Fraction of checked stars with a counterpart, in `[0, 1]`.
    pub score: f64,
    /// Number of checked stars with a counterpart.
    pub n_matched: usize,
}

impl MatchResult {
    /// The placeholder result when no candidate survived.
    pub fn none() -> Self {
        Self {
            map: MapFunction::identity(),
            score: 0.0,
            n_matched: 0,
        }
    }
}

/// Classified outcome of a search. `Rejected` still carries the best
/// transform found so the caller can apply its own acceptance rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchOutcome {
    Accepted(MatchResult),
    Weak(MatchResult),
    Rejected(MatchResult),
}

impl MatchOutcome {
    pub fn classify(result: MatchResult, config: &MatcherConfig) -> Self {
        if result.score >= config.score_to_pass {
            MatchOutcome::Accepted(result)
        } else if result.score >= config.score_to_fail {
            MatchOutcome::Weak(result)
        } else {
            MatchOutcome::Rejected(result)
        }
    }

    pub fn result(&self) -> &MatchResult {
        match self {
            MatchOutcome::Accepted(r) | MatchOutcome::Weak(r) | MatchOutcome::Rejected(r) => r,
        }
    }

    pub fn into_result(self) -> MatchResult {
        *self.result()
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, MatchOutcome::Rejected(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("too few stars to match: {located} to locate, {searched} to search (need 3 each)")]
    InsufficientPoints { located: usize, searched: usize },
}

/// Counters collected during one search.
#[derive(Debug, Clone, Default)]
pub struct SearchStats {
    pub located_triangles: usize,
    pub searched_triangles: usize,
    pub candidates: usize,
    pub scored: usize,
    pub steps: usize,
}

/// Search for the transform mapping `to_locate` onto `to_search`.
///
/// `checklists` are the `(A', B')` lists used for scoring; without them the
/// seed lists themselves are used. Checklist stars are identified by `id`,
/// so the three stars forming a candidate's seed triangle are left out of
/// its score.
pub fn find_match(
    to_locate: &[StarPosition],
    to_search: &[StarPosition],
    checklists: Option<(&[StarPosition], &[StarPosition])>,
    config: &MatcherConfig,
) -> Result<MatchOutcome, MatchError> {
    if to_locate.len() < 3 || to_search.len() < 3 {
        return Err(MatchError::InsufficientPoints {
            located: to_locate.len(),
            searched: to_search.len(),
        });
    }

    let accuracy = config.check_accuracy;
    let (bins, tolerance) = config.triangle_division;
    let ratio = config.acceptable_ratio.max(1.0);
    let min_side = 2.0 * accuracy;

    let mut seeds = to_locate.to_vec();
    seeds.sort_by(|a, b| a.mag.total_cmp(&b.mag));
    let seed_xy: Vec<(f64, f64)> = seeds.iter().map(StarPosition::xy).collect();
    let mut searched = to_search.to_vec();
    searched.sort_by(|a, b| a.mag.total_cmp(&b.mag));
    let search_xy: Vec<(f64, f64)> = searched.iter().map(StarPosition::xy).collect();

    let mut stats = SearchStats::default();
    let steps = located_triangles(&seed_xy, config.graph_search_steps, min_side);
    stats.located_triangles = steps.iter().map(Vec::len).sum();

    let Some((min_c, max_c)) = steps
        .iter()
        .flatten()
        .map(|t| (t.longest, t.longest))
        .reduce(|a, b| (a.0.min(b.0), a.1.max(b.1)))
    else {
        debug!("triangle search: no usable triangle among the brightest stars to locate");
        return Ok(MatchOutcome::Rejected(MatchResult::none()));
    };

    let index = TriangleIndex::build(
        &search_xy,
        (min_c / ratio, max_c * ratio),
        min_side,
        bins,
        tolerance,
    );
    stats.searched_triangles = index.len();

    let (check_a, check_b) = checklists.unwrap_or((to_locate, to_search));
    let checklist = Checklist::new(check_b);

    let mut best: Option<(MatchResult, [usize; 3])> = None;

    'steps: for step in &steps {
        stats.steps += 1;
        for located in step {
            for candidate in index.candidates(located.descriptor) {
                for order in candidate.orderings(tolerance) {
                    stats.candidates += 1;
                    let pairs: [((f64, f64), (f64, f64)); 3] = std::array::from_fn(|n| {
                        (seed_xy[located.vertices[n]], search_xy[order[n]])
                    });
                    let Ok(map) = fit_similarity(&pairs) else {
                        continue;
                    };
                    if map.scale() < 1.0 / ratio || map.scale() > ratio {
                        continue;
                    }
                    if max_residual(&map, &pairs) > accuracy {
                        continue;
                    }

                    let excluded = located.vertices.map(|v| seeds[v].id);
                    let verification = checklist.verify(&map, check_a, accuracy, &excluded);
                    stats.scored += 1;
                    if verification.n_matched < config.min_matches {
                        continue;
                    }

                    let improves = best
                        .as_ref()
                        .is_none_or(|(b, _)| verification.score > b.score);
                    if improves {
                        best = Some((
                            MatchResult {
                                map,
                                score: verification.score,
                                n_matched: verification.n_matched,
                            },
                            excluded,
                        ));
                        if verification.score >= 1.0 {
                            break 'steps;
                        }
                    }
                }
            }
        }
        if best
            .as_ref()
            .is_some_and(|(b, _)| b.score >= config.score_to_pass)
        {
            break;
        }
    }

    let result = match best {
        Some((winner, excluded)) => refine(winner, &excluded, check_a, &checklist, accuracy),
        None => MatchResult::none(),
    };

    debug!(
        "triangle search: {} located / {} searched triangles, {} candidates, {} scored in {} steps, best {:.3} ({})",
        stats.located_triangles,
        stats.searched_triangles,
        stats.candidates,
        stats.scored,
        stats.steps,
        result.score,
        result.map
    );

    Ok(MatchOutcome::classify(result, config))
}

/// Triangles of the brightest stars, grouped by graph-search step.
///
/// Step `k` covers the `k` brightest stars. The first step takes every
/// triangle among them; each later step only those including the newly
/// added star, so no triangle is visited twice.
fn located_triangles(
    points: &[(f64, f64)],
    (min_k, max_k): (usize, usize),
    min_side: f64,
) -> Vec<Vec<Triangle>> {
    let max_k = max_k.max(3).min(points.len());
    let min_k = min_k.clamp(3, max_k.max(3));
    let mut steps = Vec::new();
    if points.len() < 3 {
        return steps;
    }

    let mut first = Vec::new();
    for i in 0..min_k {
        for j in i + 1..min_k {
            for k in j + 1..min_k {
                first.extend(Triangle::from_points(points, i, j, k, min_side));
            }
        }
    }
    steps.push(first);

    for k in min_k..max_k {
        let mut step = Vec::new();
        for i in 0..k {
            for j in i + 1..k {
                step.extend(Triangle::from_points(points, i, j, k, min_side));
            }
        }
        steps.push(step);
    }
    steps
}

/// Least-squares refit of the winner over every checklist pair it explains.
/// The refit is kept when it scores at least as well.
fn refine(
    winner: MatchResult,
    excluded: &[usize],
    located: &[StarPosition],
    checklist: &Checklist,
    accuracy: f64,
) -> MatchResult {
    match tweak_transform(&winner.map, located, checklist, accuracy, REFINE_ITERATIONS) {
        Ok(map) => {
            let verification = checklist.verify(&map, located, accuracy, excluded);
            if verification.score >= winner.score {
                MatchResult {
                    map,
                    score: verification.score,
                    n_matched: verification.n_matched,
                }
            } else {
                debug!(
                    "refit scored {:.3} < {:.3}, keeping triangle fit",
                    verification.score, winner.score
                );
                winner
            }
        }
        Err(e) => {
            debug!("refit skipped: {e}");
            winner
        }
    }
}
