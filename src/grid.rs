//! The population grid.
//!
//! [`GridGeometry`] owns the partition function shared by preprocessing and
//! querying. [`CellAccumulator`] is a shard's private work area,
//! [`SharedGrid`] is the merge target guarded by one lock per row, and
//! [`GridIndex`] is the finished, immutable result. A `GridIndex` can only be
//! produced by consuming a `SharedGrid`, so no reader ever sees a partially
//! merged grid.

use crate::error::{PopGridError, Result};
use crate::preprocess::BuildStats;
use geo::Point;
use parking_lot::Mutex;
use popgrid_types::{Bounds, GridResolution, PopulationRecord};

/// Largest number of cells a grid may have.
pub const MAX_CELLS: usize = 1 << 27;

/// Cell layout of a region: bounds, resolution and the partition function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridGeometry {
    bounds: Bounds,
    resolution: GridResolution,
    cell_width: f64,
    cell_height: f64,
}

impl GridGeometry {
    /// Lay out `resolution` cells over `bounds`.
    ///
    /// # Examples
    ///
    /// ```
    /// use popgrid::grid::GridGeometry;
    /// use popgrid_types::{Bounds, GridResolution};
    ///
    /// let geometry = GridGeometry::new(
    ///     Bounds::new(0.0, 0.0, 10.0, 10.0),
    ///     GridResolution::new(10, 5),
    /// ).unwrap();
    /// assert_eq!(geometry.cell_width(), 1.0);
    /// assert_eq!(geometry.cell_of(9.5, 0.5), (0, 0));
    /// assert_eq!(geometry.cell_of(0.0, 10.0), (9, 4));
    /// ```
    pub fn new(bounds: Bounds, resolution: GridResolution) -> Result<Self> {
        Self::check_resolution(resolution)?;
        Ok(Self {
            bounds,
            resolution,
            cell_width: bounds.width() / resolution.columns as f64,
            cell_height: bounds.height() / resolution.rows as f64,
        })
    }

    /// Reject resolutions that are empty or too large to allocate.
    pub fn check_resolution(resolution: GridResolution) -> Result<usize> {
        if !resolution.is_valid() {
            return Err(PopGridError::InvalidInput(format!(
                "grid resolution must be at least 1x1, got {}x{}",
                resolution.columns, resolution.rows
            )));
        }
        match resolution.checked_cell_count() {
            Some(cells) if cells <= MAX_CELLS => Ok(cells),
            _ => Err(PopGridError::InvalidInput(format!(
                "grid resolution {}x{} exceeds the limit of {} cells",
                resolution.columns, resolution.rows, MAX_CELLS
            ))),
        }
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn resolution(&self) -> GridResolution {
        self.resolution
    }

    pub fn columns(&self) -> usize {
        self.resolution.columns
    }

    pub fn rows(&self) -> usize {
        self.resolution.rows
    }

    pub fn cell_width(&self) -> f64 {
        self.cell_width
    }

    pub fn cell_height(&self) -> f64 {
        self.cell_height
    }

    /// Map a coordinate to its `(col, row)` cell.
    ///
    /// Columns grow eastward from `west`, rows grow southward from `north`.
    /// Out-of-range results are clamped into the grid.
    #[inline]
    pub fn cell_of(&self, latitude: f64, longitude: f64) -> (usize, usize) {
        let col = axis_index(longitude - self.bounds.west(), self.cell_width, self.columns());
        let row = axis_index(self.bounds.north() - latitude, self.cell_height, self.rows());
        (col, row)
    }

    /// The last `(col, row)` cell whose interior lies west of `longitude` and
    /// north of `latitude`. An edge exactly on a cell boundary stops before
    /// the neighbouring cell.
    #[inline]
    pub fn cell_ending_at(&self, latitude: f64, longitude: f64) -> (usize, usize) {
        let col = axis_last(longitude - self.bounds.west(), self.cell_width, self.columns());
        let row = axis_last(self.bounds.north() - latitude, self.cell_height, self.rows());
        (col, row)
    }

    /// Row-major offset of a cell.
    #[inline]
    pub fn offset(&self, col: usize, row: usize) -> usize {
        row * self.columns() + col
    }

    /// Edges of a single cell. The last column and row end exactly on the
    /// region edge.
    pub fn cell_bounds(&self, col: usize, row: usize) -> Bounds {
        let west = self.bounds.west() + col as f64 * self.cell_width;
        let east = if col + 1 >= self.columns() {
            self.bounds.east()
        } else {
            self.bounds.west() + (col + 1) as f64 * self.cell_width
        };
        let north = self.bounds.north() - row as f64 * self.cell_height;
        let south = if row + 1 >= self.rows() {
            self.bounds.south()
        } else {
            self.bounds.north() - (row + 1) as f64 * self.cell_height
        };
        Bounds::new(west, south, east, north)
    }

    /// Center of a cell (x = longitude, y = latitude).
    pub fn cell_center(&self, col: usize, row: usize) -> Point {
        self.cell_bounds(col, row).center()
    }
}

#[inline]
fn axis_last(offset: f64, cell_size: f64, count: usize) -> usize {
    if cell_size <= 0.0 {
        return 0;
    }
    let end = (offset / cell_size).ceil();
    if !(end > 1.0) {
        0
    } else {
        (end as usize - 1).min(count - 1)
    }
}

#[inline]
fn axis_index(offset: f64, cell_size: f64, count: usize) -> usize {
    if cell_size <= 0.0 {
        return 0;
    }
    let index = (offset / cell_size).floor();
    // NaN falls through to 0 as well
    if !(index > 0.0) {
        0
    } else {
        (index as usize).min(count - 1)
    }
}

/// A shard's private per-cell partial sums.
#[derive(Debug)]
pub struct CellAccumulator {
    geometry: GridGeometry,
    cells: Vec<i64>,
    points: Option<Vec<(usize, PopulationRecord)>>,
}

impl CellAccumulator {
    pub fn new(geometry: GridGeometry, retain_points: bool) -> Self {
        Self {
            geometry,
            cells: vec![0; geometry.resolution().cell_count()],
            points: retain_points.then(Vec::new),
        }
    }

    /// Add one record to its cell.
    pub fn add(&mut self, record: &PopulationRecord) -> Result<()> {
        let (col, row) = self.geometry.cell_of(record.latitude, record.longitude);
        let offset = self.geometry.offset(col, row);
        self.cells[offset] = self.cells[offset]
            .checked_add(record.population)
            .ok_or(PopGridError::PopulationOverflow { col, row })?;
        if let Some(points) = &mut self.points {
            points.push((offset, *record));
        }
        Ok(())
    }

    pub fn cells(&self) -> &[i64] {
        &self.cells
    }
}

#[derive(Debug, Default)]
struct RowStripe {
    totals: Vec<i64>,
    points: Vec<(usize, PopulationRecord)>,
}

/// The merge target of a parallel build.
///
/// Every row is a separate stripe behind its own lock, so shards merging
/// different parts of the grid do not contend.
#[derive(Debug)]
pub struct SharedGrid {
    geometry: GridGeometry,
    retain_points: bool,
    rows: Vec<Mutex<RowStripe>>,
}

impl SharedGrid {
    pub fn new(geometry: GridGeometry, retain_points: bool) -> Self {
        let rows = (0..geometry.rows())
            .map(|_| {
                Mutex::new(RowStripe {
                    totals: vec![0; geometry.columns()],
                    points: Vec::new(),
                })
            })
            .collect();
        Self {
            geometry,
            retain_points,
            rows,
        }
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    /// A fresh accumulator shaped like this grid.
    pub fn accumulator(&self) -> CellAccumulator {
        CellAccumulator::new(self.geometry, self.retain_points)
    }

    /// Fold a shard's partial sums into the grid, one row lock at a time.
    pub fn merge(&self, accumulator: CellAccumulator) -> Result<()> {
        let columns = self.geometry.columns();
        let mut points = accumulator.points.unwrap_or_default();
        points.sort_unstable_by_key(|(offset, _)| *offset);
        let mut pending = points.as_slice();

        for (row, partial) in accumulator.cells.chunks_exact(columns).enumerate() {
            let split = pending
                .iter()
                .position(|(offset, _)| offset / columns != row)
                .unwrap_or(pending.len());
            let (row_points, rest) = pending.split_at(split);
            pending = rest;

            if row_points.is_empty() && partial.iter().all(|&v| v == 0) {
                continue;
            }

            let mut stripe = self.rows[row].lock();
            for (col, (total, &value)) in stripe.totals.iter_mut().zip(partial).enumerate() {
                *total = total
                    .checked_add(value)
                    .ok_or(PopGridError::PopulationOverflow { col, row })?;
            }
            stripe.points.extend_from_slice(row_points);
        }
        Ok(())
    }

    /// Consume the grid once every shard has merged.
    pub fn into_index(self, stats: BuildStats) -> Result<GridIndex> {
        let columns = self.geometry.columns();
        let mut cells = Vec::with_capacity(self.geometry.resolution().cell_count());
        let mut points = Vec::new();
        let mut total: i64 = 0;

        for (row, stripe) in self.rows.into_iter().enumerate() {
            let stripe = stripe.into_inner();
            for (col, &value) in stripe.totals.iter().enumerate() {
                total = total
                    .checked_add(value)
                    .ok_or(PopGridError::PopulationOverflow { col, row })?;
            }
            cells.extend_from_slice(&stripe.totals);
            points.extend(stripe.points);
        }

        let points = self
            .retain_points
            .then(|| CellPoints::from_unsorted(points, cells.len()));
        debug_assert_eq!(cells.len(), columns * self.geometry.rows());

        Ok(GridIndex {
            geometry: self.geometry,
            cells,
            total,
            points,
            stats,
        })
    }
}

/// Records grouped by cell, stored contiguously.
#[derive(Debug, Clone)]
struct CellPoints {
    /// `starts[i]..starts[i + 1]` indexes the records of cell `i`.
    starts: Vec<usize>,
    records: Vec<PopulationRecord>,
}

impl CellPoints {
    fn from_unsorted(mut points: Vec<(usize, PopulationRecord)>, cell_count: usize) -> Self {
        points.sort_by_key(|(offset, _)| *offset);
        let mut starts = Vec::with_capacity(cell_count + 1);
        let mut cursor = 0;
        for cell in 0..=cell_count {
            while cursor < points.len() && points[cursor].0 < cell {
                cursor += 1;
            }
            starts.push(cursor);
        }
        let records = points.into_iter().map(|(_, record)| record).collect();
        Self { starts, records }
    }

    fn cell(&self, offset: usize) -> &[PopulationRecord] {
        &self.records[self.starts[offset]..self.starts[offset + 1]]
    }
}

/// A finished population grid. Immutable; share it with `Arc`.
#[derive(Debug, Clone)]
pub struct GridIndex {
    geometry: GridGeometry,
    cells: Vec<i64>,
    total: i64,
    points: Option<CellPoints>,
    stats: BuildStats,
}

impl GridIndex {
    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn bounds(&self) -> &Bounds {
        self.geometry.bounds()
    }

    pub fn resolution(&self) -> GridResolution {
        self.geometry.resolution()
    }

    /// Population of one cell.
    ///
    /// # Panics
    ///
    /// Panics if the cell is outside the grid.
    pub fn cell(&self, col: usize, row: usize) -> i64 {
        self.cells[self.geometry.offset(col, row)]
    }

    /// All cell totals in row-major order.
    pub fn cells(&self) -> &[i64] {
        &self.cells
    }

    /// The cell totals of one row, west to east.
    pub fn row(&self, row: usize) -> &[i64] {
        let columns = self.geometry.columns();
        &self.cells[row * columns..(row + 1) * columns]
    }

    /// Sum over every cell.
    pub fn total(&self) -> i64 {
        self.total
    }

    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    /// Whether individual records were kept for exact queries.
    pub fn has_points(&self) -> bool {
        self.points.is_some()
    }

    /// Records that fell into a cell, when points were retained.
    pub fn points_in(&self, col: usize, row: usize) -> Option<&[PopulationRecord]> {
        let offset = self.geometry.offset(col, row);
        self.points.as_ref().map(|points| points.cell(offset))
    }
}
