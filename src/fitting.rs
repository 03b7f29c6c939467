//! Least-squares similarity fits between matched planar point sets.

use thiserror::Error;

use crate::geom::map::MapFunction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FitError {
    #[error("at least two correspondences are required")]
    TooFewCorrespondences,
    #[error("source points are coincident")]
    Degenerate,
}

/// Fit the similarity transform that best maps each `from` point onto its
/// paired `to` point.
///
/// With `p'` and `q'` the centroid-reduced source and target points, the
/// closed-form solution is
///
/// ```text
/// k cos(theta) = sum(p'.q') / sum(|p'|^2)
/// k sin(theta) = sum(p'x q'y - p'y q'x) / sum(|p'|^2)
/// t            = mean(q) - k R(theta) mean(p)
/// ```
pub fn fit_similarity(pairs: &[((f64, f64), (f64, f64))]) -> Result<MapFunction, FitError> {
    if pairs.len() < 2 {
        return Err(FitError::TooFewCorrespondences);
    }
    let n = pairs.len() as f64;

    let (mut px, mut py, mut qx, mut qy) = (0.0, 0.0, 0.0, 0.0);
    for &((fx, fy), (tx, ty)) in pairs {
        px += fx;
        py += fy;
        qx += tx;
        qy += ty;
    }
    px /= n;
    py /= n;
    qx /= n;
    qy /= n;

    let mut norm = 0.0;
    let mut dot = 0.0;
    let mut cross = 0.0;
    for &((fx, fy), (tx, ty)) in pairs {
        let (ax, ay) = (fx - px, fy - py);
        let (bx, by) = (tx - qx, ty - qy);
        norm += ax * ax + ay * ay;
        dot += ax * bx + ay * by;
        cross += ax * by - ay * bx;
    }

    if norm < 1e-12 {
        return Err(FitError::Degenerate);
    }

    let kc = dot / norm;
    let ks = cross / norm;
    if kc.hypot(ks) < 1e-12 {
        return Err(FitError::Degenerate);
    }

    let translation = (qx - (kc * px - ks * py), qy - (ks * px + kc * py));
    Ok(MapFunction::from_linear(kc, ks, translation))
}

/// Largest distance between `map(from)` and `to` over all pairs.
pub fn max_residual(map: &MapFunction, pairs: &[((f64, f64), (f64, f64))]) -> f64 {
    pairs
        .iter()
        .map(|&(from, to)| {
            let (x, y) = map.map(from);
            (x - to.0).hypot(y - to.1)
        })
        .fold(0.0, f64::max)
}
