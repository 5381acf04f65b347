use serde::{Deserialize, Serialize};

/// Number of grid columns (longitude) and rows (latitude).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridResolution {
    pub columns: usize,
    pub rows: usize,
}

impl GridResolution {
    pub const fn new(columns: usize, rows: usize) -> Self {
        Self { columns, rows }
    }

    /// A square grid.
    pub const fn square(size: usize) -> Self {
        Self::new(size, size)
    }

    /// Total number of cells, saturating at `usize::MAX`.
    pub const fn cell_count(&self) -> usize {
        self.columns.saturating_mul(self.rows)
    }

    /// Total number of cells, or `None` if it does not fit in `usize`.
    pub const fn checked_cell_count(&self) -> Option<usize> {
        self.columns.checked_mul(self.rows)
    }

    /// Both dimensions are at least one cell.
    pub const fn is_valid(&self) -> bool {
        self.columns > 0 && self.rows > 0
    }
}

impl Default for GridResolution {
    fn default() -> Self {
        Self::square(100)
    }
}
