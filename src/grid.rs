//! Spatial bucketing of star lists.
//!
//! A [`PositionGrid`] splits a rectangular pixel area into `rows x cols`
//! cells so that sampling the brightest stars per cell spreads the sample
//! over the whole field instead of clustering it around a few bright
//! regions.

use log::debug;

/// A star as seen by the matcher: an id back into the caller's list, a pixel
/// position and a brightness key (lower is brighter).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StarPosition {
    pub id: usize,
    pub x: f64,
    pub y: f64,
    pub mag: f64,
}

impl StarPosition {
    pub fn new(id: usize, x: f64, y: f64, mag: f64) -> Self {
        Self { id, x, y, mag }
    }

    pub fn xy(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Area {
    pub min: (f64, f64),
    pub max: (f64, f64),
}

impl Area {
    pub fn new(min: (f64, f64), max: (f64, f64)) -> Self {
        Self { min, max }
    }

    /// Area of size `width x height` centred on the origin.
    pub fn centered(width: f64, height: f64) -> Self {
        Self {
            min: (-width / 2.0, -height / 2.0),
            max: (width / 2.0, height / 2.0),
        }
    }

    pub fn width(&self) -> f64 {
        self.max.0 - self.min.0
    }

    pub fn height(&self) -> f64 {
        self.max.1 - self.min.1
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min.0 && x <= self.max.0 && y >= self.min.1 && y <= self.max.1
    }
}

/// Brightness-sorted copy of a star list, bucketed into grid cells.
#[derive(Debug, Clone)]
pub struct PositionGrid {
    area: Area,
    rows: usize,
    cols: usize,
    cell_size: (f64, f64),
    /// Stored stars, ascending by `mag`.
    stars: Vec<StarPosition>,
    /// Row-major cell index of each stored star.
    cells: Vec<usize>,
    rejected: usize,
}

impl PositionGrid {
    /// Grid that drops stars outside `area`.
    pub fn new(stars: &[StarPosition], area: Area, rows: usize, cols: usize) -> Self {
        Self::build(stars, area, rows, cols, false)
    }

    /// Grid that keeps stars outside `area`, assigning them to the nearest
    /// edge cell.
    pub fn accepting_out_of_bounds(
        stars: &[StarPosition],
        area: Area,
        rows: usize,
        cols: usize,
    ) -> Self {
        Self::build(stars, area, rows, cols, true)
    }

    fn build(
        stars: &[StarPosition],
        area: Area,
        rows: usize,
        cols: usize,
        accept_out_of_bounds: bool,
    ) -> Self {
        let rows = rows.max(1);
        let cols = cols.max(1);
        let cell_size = (area.width() / cols as f64, area.height() / rows as f64);

        let mut sorted = stars.to_vec();
        sorted.sort_by(|a, b| a.mag.total_cmp(&b.mag));

        let mut kept = Vec::with_capacity(sorted.len());
        let mut cells = Vec::with_capacity(sorted.len());
        let mut rejected = 0;
        for star in sorted {
            if !accept_out_of_bounds && !area.contains(star.x, star.y) {
                rejected += 1;
                continue;
            }
            let col = axis_cell(star.x - area.min.0, cell_size.0, cols);
            let row = axis_cell(star.y - area.min.1, cell_size.1, rows);
            cells.push(row * cols + col);
            kept.push(star);
        }

        if rejected > 0 {
            debug!(
                "position grid {}x{}: {} of {} stars outside the area",
                rows,
                cols,
                rejected,
                stars.len()
            );
        }

        Self {
            area,
            rows,
            cols,
            cell_size,
            stars: kept,
            cells,
            rejected,
        }
    }

    /// Up to `n` of the brightest stars from every cell, brightness-sorted.
    pub fn select_top_n_per_cell(&self, n: usize) -> Vec<StarPosition> {
        let mut taken = vec![0usize; self.rows * self.cols];
        let mut out = Vec::new();
        for (star, &cell) in self.stars.iter().zip(&self.cells) {
            if taken[cell] < n {
                taken[cell] += 1;
                out.push(*star);
            }
        }
        out
    }

    /// Every stored star, brightness-sorted.
    pub fn select_all(&self) -> Vec<StarPosition> {
        self.stars.clone()
    }

    /// Number of stars dropped for lying outside the area.
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    pub fn len(&self) -> usize {
        self.stars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stars.is_empty()
    }

    pub fn area(&self) -> Area {
        self.area
    }

    /// `(rows, cols)`.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// `(width, height)` of one cell.
    pub fn cell_size(&self) -> (f64, f64) {
        self.cell_size
    }
}

/// Cell index along one axis; positions past either edge land in the edge cell.
fn axis_cell(offset: f64, size: f64, count: usize) -> usize {
    if size <= 0.0 || !offset.is_finite() || offset <= 0.0 {
        return 0;
    }
    ((offset / size) as usize).min(count - 1)
}
