//! Triangle shape descriptors for pattern matching.
//!
//! A triangle is described by its sorted side lengths `a <= b <= c` through
//! the ratios `(a/c, b/c)`, which do not change under rotation, uniform
//! scaling or translation. Each vertex is labelled by the side it faces, so
//! two triangles with matching descriptors also imply which vertex maps onto
//! which.

use crate::kdtree::KdTree;

/// Triangles flatter than this normalised area are skipped.
pub const MIN_QUALITY: f64 = 0.1;

/// Most later points combined with each vertex when building an index.
/// Earlier points win, so callers pass lists sorted brightest first.
pub const MAX_NEIGHBORS: usize = 48;

/// Rotation/scale/translation invariant shape code `(a/c, b/c)`.
pub type Descriptor = (f64, f64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    /// Point indices ordered by the length of the opposite side: `vertices[0]`
    /// faces the shortest side, `vertices[2]` the longest.
    pub vertices: [usize; 3],
    pub descriptor: Descriptor,
    /// Length of the longest side.
    pub longest: f64,
}

impl Triangle {
    /// Describe the triangle `(i, j, k)` of `points`.
    ///
    /// Returns `None` for triangles that are too flat or whose shortest side
    /// is below `min_side`.
    pub fn from_points(
        points: &[(f64, f64)],
        i: usize,
        j: usize,
        k: usize,
        min_side: f64,
    ) -> Option<Self> {
        let (pi, pj, pk) = (points[i], points[j], points[k]);
        // Side opposite each vertex.
        let mut sides = [(dist(pj, pk), i), (dist(pi, pk), j), (dist(pi, pj), k)];
        sides.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)));
        let [(a, va), (b, vb), (c, vc)] = sides;

        if a < min_side || c <= 0.0 {
            return None;
        }

        let twice_area = ((pj.0 - pi.0) * (pk.1 - pi.1) - (pj.1 - pi.1) * (pk.0 - pi.0)).abs();
        // 1.0 for an equilateral triangle, 0.0 for a degenerate one.
        let quality = 2.0 * 3f64.sqrt() * twice_area / (a * a + b * b + c * c);
        if quality < MIN_QUALITY {
            return None;
        }

        Some(Self {
            vertices: [va, vb, vc],
            descriptor: (a / c, b / c),
            longest: c,
        })
    }

    /// Vertex orderings of `self` that can pair with another triangle's
    /// `vertices` for the same descriptor.
    ///
    /// Sides whose lengths agree within `tolerance` cannot be told apart, so
    /// both labellings are offered for them.
    pub fn orderings(&self, tolerance: f64) -> Vec<[usize; 3]> {
        let [va, vb, vc] = self.vertices;
        let (u, v) = self.descriptor;
        let mut out = vec![[va, vb, vc]];
        if v <= u * tolerance {
            out.push([vb, va, vc]);
        }
        if 1.0 <= v * tolerance {
            out.push([va, vc, vb]);
        }
        out
    }

    /// Whether both ratios of `other` lie within the relative `tolerance`.
    pub fn similar_to(&self, other: &Descriptor, tolerance: f64) -> bool {
        within_ratio(self.descriptor.0, other.0, tolerance)
            && within_ratio(self.descriptor.1, other.1, tolerance)
    }
}

/// Triangles bucketed on a `bins x bins` grid over descriptor space.
#[derive(Debug, Clone)]
pub struct TriangleIndex {
    bins: usize,
    tolerance: f64,
    triangles: Vec<Triangle>,
    buckets: Vec<Vec<u32>>,
}

impl TriangleIndex {
    pub fn new(bins: usize, tolerance: f64) -> Self {
        let bins = bins.max(1);
        Self {
            bins,
            tolerance: tolerance.max(1.0),
            triangles: Vec::new(),
            buckets: vec![Vec::new(); bins * bins],
        }
    }

    /// Index every acceptable triangle of `points` whose longest side lies in
    /// `longest_range`.
    ///
    /// Candidate vertices are gathered through KD-tree neighbourhoods of
    /// radius `longest_range.1`, so distant point pairs are never combined.
    /// Each neighbourhood keeps its first [`MAX_NEIGHBORS`] points.
    pub fn build(
        points: &[(f64, f64)],
        longest_range: (f64, f64),
        min_side: f64,
        bins: usize,
        tolerance: f64,
    ) -> Self {
        let mut index = Self::new(bins, tolerance);
        let (min_c, max_c) = longest_range;
        if points.len() < 3 || max_c < min_c {
            return index;
        }

        let tree = KdTree::from_xy(points.iter().copied());
        let max_c_sq = max_c * max_c;

        for i in 0..points.len() {
            let mut near: Vec<usize> = tree
                .range_search(&[points[i].0, points[i].1], max_c_sq)
                .iter()
                .map(|n| n.id)
                .filter(|&id| id > i)
                .collect();
            near.sort_unstable();
            near.truncate(MAX_NEIGHBORS);

            for (pos, &j) in near.iter().enumerate() {
                for &k in &near[pos + 1..] {
                    if dist(points[j], points[k]) > max_c {
                        continue;
                    }
                    if let Some(tri) = Triangle::from_points(points, i, j, k, min_side)
                        && tri.longest >= min_c
                    {
                        index.insert(tri);
                    }
                }
            }
        }
        index
    }

    pub fn insert(&mut self, triangle: Triangle) {
        let bucket = self.bucket_of(triangle.descriptor);
        self.buckets[bucket].push(self.triangles.len() as u32);
        self.triangles.push(triangle);
    }

    /// Indexed triangles whose descriptor matches `descriptor` within the
    /// index tolerance, in a fixed order.
    pub fn candidates(&self, descriptor: Descriptor) -> Vec<&Triangle> {
        let (u, v) = descriptor;
        let t = self.tolerance;
        let (u_lo, u_hi) = (self.bin(u / t), self.bin(u * t));
        let (v_lo, v_hi) = (self.bin(v / t), self.bin(v * t));

        let mut out = Vec::new();
        for bu in u_lo..=u_hi {
            for bv in v_lo..=v_hi {
                for &idx in &self.buckets[bu * self.bins + bv] {
                    let tri = &self.triangles[idx as usize];
                    if tri.similar_to(&descriptor, t) {
                        out.push(tri);
                    }
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    fn bucket_of(&self, descriptor: Descriptor) -> usize {
        self.bin(descriptor.0) * self.bins + self.bin(descriptor.1)
    }

    fn bin(&self, ratio: f64) -> usize {
        if ratio.is_nan() || ratio <= 0.0 {
            return 0;
        }
        ((ratio * self.bins as f64) as usize).min(self.bins - 1)
    }
}

fn within_ratio(a: f64, b: f64, tolerance: f64) -> bool {
    a <= b * tolerance && b <= a * tolerance
}

fn dist(p: (f64, f64), q: (f64, f64)) -> f64 {
    (p.0 - q.0).hypot(p.1 - q.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::MapFunction;
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    const PTS: [(f64, f64); 4] = [(0.0, 0.0), (300.0, 0.0), (100.0, 150.0), (1.0, 0.5)];

    #[test]
    fn descriptor_and_labelling() {
        let tri = Triangle::from_points(&PTS, 0, 1, 2, 4.0).unwrap();
        let a = dist(PTS[0], PTS[2]);
        let b = dist(PTS[1], PTS[2]);
        let c = dist(PTS[0], PTS[1]);
        assert!(a <= b && b <= c);
        // Vertex 1 faces side a (0-2), vertex 0 faces b (1-2), vertex 2 faces c (0-1).
        assert_eq!(tri.vertices, [1, 0, 2]);
        assert_abs_diff_eq!(tri.descriptor.0, a / c, epsilon = 1e-15);
        assert_abs_diff_eq!(tri.descriptor.1, b / c, epsilon = 1e-15);
        assert_eq!(tri.longest, c);
    }

    #[test]
    fn descriptor_is_similarity_invariant() {
        let map = MapFunction::new(1.1, 0.37, (500.0, -20.0));
        let moved: Vec<_> = PTS.iter().map(|&p| map.map(p)).collect();
        let t1 = Triangle::from_points(&PTS, 0, 1, 2, 0.0).unwrap();
        let t2 = Triangle::from_points(&moved, 2, 0, 1, 0.0).unwrap();
        assert_abs_diff_eq!(t1.descriptor.0, t2.descriptor.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t1.descriptor.1, t2.descriptor.1, epsilon = 1e-12);
        assert_eq!(t1.vertices, t2.vertices);
    }

    #[test]
    fn rejects_short_and_flat_triangles() {
        assert!(Triangle::from_points(&PTS, 0, 1, 3, 4.0).is_none());
        let flat = [(0.0, 0.0), (100.0, 1.0), (200.0, 0.0)];
        assert!(Triangle::from_points(&flat, 0, 1, 2, 0.0).is_none());
    }

    #[test]
    fn isosceles_offers_both_labellings() {
        let iso = [(0.0, 0.0), (100.0, 0.0), (50.0, 300.0)];
        let tri = Triangle::from_points(&iso, 0, 1, 2, 0.0).unwrap();
        assert_eq!(tri.orderings(1.05).len(), 2);
        let scalene = Triangle::from_points(&PTS, 0, 1, 2, 0.0).unwrap();
        assert_eq!(scalene.orderings(1.05).len(), 1);
    }

    #[test]
    fn index_finds_matching_shape() {
        let map = MapFunction::new(-0.3, 1.5, (10.0, 10.0));
        let mut field: Vec<(f64, f64)> = vec![(-900.0, 800.0), (700.0, -650.0), (850.0, 900.0)];
        field.extend(PTS[..3].iter().map(|&p| map.map(p)));

        let index = TriangleIndex::build(&field, (10.0, 1000.0), 4.0, 40, 1.05);
        assert!(!index.is_empty());

        let query = Triangle::from_points(&PTS, 0, 1, 2, 4.0).unwrap();
        let found = index.candidates(query.descriptor);
        assert!(found.iter().any(|t| {
            let mut v = t.vertices;
            v.sort_unstable();
            v == [3, 4, 5]
        }));
        assert!(found.iter().all(|t| t.similar_to(&query.descriptor, 1.05)));
    }

    #[test]
    fn index_respects_longest_side_range() {
        let index = TriangleIndex::build(&PTS, (400.0, 1000.0), 0.0, 40, 1.05);
        assert!(index.is_empty());
        let index = TriangleIndex::build(&PTS, (100.0, 310.0), 0.0, 40, 1.05);
        assert!(index.len() >= 1);
    }

    #[test]
    fn dense_fields_cap_neighbourhoods() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let n = 150;
        let field: Vec<(f64, f64)> = (0..n)
            .map(|_| (rng.random_range(0.0..100.0), rng.random_range(0.0..100.0)))
            .collect();

        let index = TriangleIndex::build(&field, (0.0, 1000.0), 0.0, 40, 1.05);
        let bound: usize = (0..n)
            .map(|i| {
                let m = (n - 1 - i).min(MAX_NEIGHBORS);
                m * m.saturating_sub(1) / 2
            })
            .sum();
        assert!(index.len() <= bound);
        assert!(bound < n * (n - 1) * (n - 2) / 6);

        // Every point lies within range, so the first vertex pairs with the
        // next MAX_NEIGHBORS points and never with the rest.
        let vertex_sets: Vec<[usize; 3]> = index
            .triangles
            .iter()
            .map(|t| {
                let mut v = t.vertices;
                v.sort_unstable();
                v
            })
            .collect();
        assert!(vertex_sets.iter().any(|v| v[0] == 0));
        assert!(
            vertex_sets
                .iter()
                .filter(|v| v[0] == 0)
                .all(|v| v[2] <= MAX_NEIGHBORS)
        );
    }

    #[test]
    fn bins_clamp_to_grid() {
        let index = TriangleIndex::new(40, 1.05);
        assert_eq!(index.bin(1.0), 39);
        assert_eq!(index.bin(0.0), 0);
        assert_eq!(index.bin(0.5), 20);
    }
}
