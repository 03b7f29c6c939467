//! KD-tree over fixed-dimension points.
//!
//! Used in 2D for pixel-space work (checklist scoring, triangle
//! neighbourhoods) and in 3D over unit vectors for catalog cone searches and
//! duplicate removal.

/// A point found by a search: the caller-supplied id and squared distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: usize,
    pub dist_sq: f64,
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        dim: usize,
        value: f64,
        left: usize,
        right: usize,
    },
    /// Range `[start, end)` into the reordered point storage.
    Leaf { start: usize, end: usize },
}

const LEAF_SIZE: usize = 12;

pub struct KdTree<const DIM: usize> {
    nodes: Vec<Node>,
    points: Vec<[f64; DIM]>,
    ids: Vec<usize>,
}

impl<const DIM: usize> KdTree<DIM> {
    /// Build a tree. `ids[i]` is reported for `points[i]`.
    pub fn build(points: Vec<[f64; DIM]>, ids: Vec<usize>) -> Self {
        assert_eq!(points.len(), ids.len());

        let mut order: Vec<usize> = (0..points.len()).collect();
        let mut nodes = Vec::new();
        if !points.is_empty() {
            split(&points, &mut order, 0, &mut nodes);
        }

        let points = order.iter().map(|&i| points[i]).collect();
        let ids = order.iter().map(|&i| ids[i]).collect();
        KdTree { nodes, points, ids }
    }

    /// All points within squared distance `radius_sq` of `query`.
    pub fn range_search(&self, query: &[f64; DIM], radius_sq: f64) -> Vec<Neighbor> {
        let mut found = Vec::new();
        if self.nodes.is_empty() {
            return found;
        }

        let mut stack = vec![0usize];
        while let Some(node) = stack.pop() {
            match self.nodes[node] {
                Node::Leaf { start, end } => {
                    for i in start..end {
                        let dist_sq = squared_distance(query, &self.points[i]);
                        if dist_sq <= radius_sq {
                            found.push(Neighbor {
                                id: self.ids[i],
                                dist_sq,
                            });
                        }
                    }
                }
                Node::Split {
                    dim,
                    value,
                    left,
                    right,
                } => {
                    let diff = query[dim] - value;
                    if diff <= 0.0 || diff * diff <= radius_sq {
                        stack.push(left);
                    }
                    if diff >= 0.0 || diff * diff <= radius_sq {
                        stack.push(right);
                    }
                }
            }
        }
        found
    }

    /// The closest point, if the tree is not empty.
    pub fn nearest(&self, query: &[f64; DIM]) -> Option<Neighbor> {
        self.nearest_within(query, f64::INFINITY)
    }

    /// The closest point at squared distance `<= radius_sq`.
    ///
    /// Ties are broken towards the smaller id so results do not depend on
    /// the tree layout.
    pub fn nearest_within(&self, query: &[f64; DIM], radius_sq: f64) -> Option<Neighbor> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut best: Option<Neighbor> = None;
        let mut bound = radius_sq;
        self.descend(0, query, &mut best, &mut bound);
        best
    }

    fn descend(
        &self,
        node: usize,
        query: &[f64; DIM],
        best: &mut Option<Neighbor>,
        bound: &mut f64,
    ) {
        match self.nodes[node] {
            Node::Leaf { start, end } => {
                for i in start..end {
                    let dist_sq = squared_distance(query, &self.points[i]);
                    let id = self.ids[i];
                    let better = match best {
                        None => dist_sq <= *bound,
                        Some(b) => dist_sq < b.dist_sq || (dist_sq == b.dist_sq && id < b.id),
                    };
                    if better {
                        *best = Some(Neighbor { id, dist_sq });
                        *bound = dist_sq;
                    }
                }
            }
            Node::Split {
                dim,
                value,
                left,
                right,
            } => {
                let diff = query[dim] - value;
                let (near, far) = if diff <= 0.0 {
                    (left, right)
                } else {
                    (right, left)
                };
                self.descend(near, query, best, bound);
                if diff * diff <= *bound {
                    self.descend(far, query, best, bound);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl KdTree<2> {
    /// Build a 2D tree from `(x, y)` positions, using their iteration index as id.
    pub fn from_xy(positions: impl IntoIterator<Item = (f64, f64)>) -> Self {
        let points: Vec<[f64; 2]> = positions.into_iter().map(|(x, y)| [x, y]).collect();
        let ids = (0..points.len()).collect();
        Self::build(points, ids)
    }
}

/// Recursively partition `order` around the median of its widest dimension.
/// Returns the index of the created node.
fn split<const DIM: usize>(
    points: &[[f64; DIM]],
    order: &mut [usize],
    offset: usize,
    nodes: &mut Vec<Node>,
) -> usize {
    let node = nodes.len();
    if order.len() <= LEAF_SIZE {
        nodes.push(Node::Leaf {
            start: offset,
            end: offset + order.len(),
        });
        return node;
    }

    let dim = widest_dimension(points, order);
    let mid = order.len() / 2;
    order.select_nth_unstable_by(mid, |&a, &b| points[a][dim].total_cmp(&points[b][dim]));
    let value = points[order[mid]][dim];

    nodes.push(Node::Leaf { start: 0, end: 0 });
    let (lower, upper) = order.split_at_mut(mid);
    let left = split(points, lower, offset, nodes);
    let right = split(points, upper, offset + mid, nodes);
    nodes[node] = Node::Split {
        dim,
        value,
        left,
        right,
    };
    node
}

fn widest_dimension<const DIM: usize>(points: &[[f64; DIM]], order: &[usize]) -> usize {
    (0..DIM)
        .map(|d| {
            let (lo, hi) = order.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                (lo.min(points[i][d]), hi.max(points[i][d]))
            });
            (d, hi - lo)
        })
        .fold((0, f64::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best })
        .0
}

#[inline]
fn squared_distance<const DIM: usize>(a: &[f64; DIM], b: &[f64; DIM]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_field(rng: &mut ChaCha8Rng, n: usize, size: f64) -> Vec<[f64; 2]> {
        (0..n)
            .map(|_| [rng.random_range(0.0..size), rng.random_range(0.0..size)])
            .collect()
    }

    #[test]
    fn empty_tree() {
        let tree = KdTree::<2>::build(vec![], vec![]);
        assert!(tree.is_empty());
        assert!(tree.nearest(&[0.0, 0.0]).is_none());
        assert!(tree.range_search(&[0.0, 0.0], 10.0).is_empty());
    }

    #[test]
    fn ids_are_reported() {
        let tree = KdTree::<2>::build(vec![[10.0, 20.0], [30.0, 40.0]], vec![7, 9]);
        assert_eq!(tree.nearest(&[29.0, 41.0]).unwrap().id, 9);
        assert_eq!(tree.nearest(&[10.0, 20.0]).unwrap().id, 7);
    }

    #[test]
    fn from_xy_uses_slice_index() {
        let tree = KdTree::<2>::from_xy([(0.0, 0.0), (5.0, 5.0), (9.0, 1.0)]);
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.nearest(&[8.0, 2.0]).unwrap().id, 2);
    }

    #[test]
    fn range_search_matches_brute_force() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let points = random_field(&mut rng, 800, 1000.0);
        let tree = KdTree::<2>::build(points.clone(), (0..points.len()).collect());

        for _ in 0..60 {
            let q = [rng.random_range(0.0..1000.0), rng.random_range(0.0..1000.0)];
            let r_sq = rng.random_range(0.0..20000.0);
            let mut got: Vec<usize> = tree.range_search(&q, r_sq).iter().map(|n| n.id).collect();
            got.sort();
            let expected: Vec<usize> = points
                .iter()
                .enumerate()
                .filter(|(_, p)| squared_distance(&q, p) <= r_sq)
                .map(|(i, _)| i)
                .collect();
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn nearest_matches_brute_force_3d() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let points: Vec<[f64; 3]> = (0..400)
            .map(|_| {
                [
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                ]
            })
            .collect();
        let tree = KdTree::<3>::build(points.clone(), (0..points.len()).collect());

        for _ in 0..100 {
            let q = [
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            ];
            let got = tree.nearest(&q).unwrap();
            let (idx, d) = points
                .iter()
                .enumerate()
                .map(|(i, p)| (i, squared_distance(&q, p)))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .unwrap();
            assert_eq!(got.id, idx);
            assert!((got.dist_sq - d).abs() < 1e-12);
        }
    }

    #[test]
    fn nearest_within_respects_radius() {
        let tree = KdTree::<2>::from_xy([(0.0, 0.0), (10.0, 0.0)]);
        assert!(tree.nearest_within(&[4.0, 0.0], 9.0).is_none());
        let hit = tree.nearest_within(&[4.0, 0.0], 16.0).unwrap();
        assert_eq!(hit.id, 0);
        assert_eq!(hit.dist_sq, 16.0);
    }

    #[test]
    fn nearest_tie_prefers_smaller_id() {
        let points = vec![[1.0, 1.0]; 30];
        let ids: Vec<usize> = (0..30).rev().collect();
        let tree = KdTree::<2>::build(points, ids);
        assert_eq!(tree.nearest(&[1.0, 1.0]).unwrap().id, 0);
        assert_eq!(tree.range_search(&[1.0, 1.0], 0.0).len(), 30);
    }
}
