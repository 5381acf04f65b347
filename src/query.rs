//! Rectangle queries against a finished [`GridIndex`].

use crate::config::{Config, OverlapPolicy};
use crate::grid::{GridGeometry, GridIndex};
use popgrid_types::{Bounds, QueryRectangle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Inclusive range of cells touched by a clipped query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub first_col: usize,
    pub last_col: usize,
    pub first_row: usize,
    pub last_row: usize,
}

impl CellRange {
    /// Cells whose interior overlaps `area`. Cells that only share an edge
    /// with it are left out.
    pub fn covering(geometry: &GridGeometry, area: &Bounds) -> Self {
        let (first_col, first_row) = geometry.cell_of(area.north(), area.west());
        let (last_col, last_row) = geometry.cell_ending_at(area.south(), area.east());
        Self {
            first_col,
            last_col: last_col.max(first_col),
            first_row,
            last_row: last_row.max(first_row),
        }
    }

    /// Cells that can hold a record inside the closed `area`, including
    /// neighbours that only share its east or south edge.
    pub fn touching(geometry: &GridGeometry, area: &Bounds) -> Self {
        let (first_col, first_row) = geometry.cell_of(area.north(), area.west());
        let (last_col, last_row) = geometry.cell_of(area.south(), area.east());
        Self {
            first_col,
            last_col,
            first_row,
            last_row,
        }
    }

    pub fn columns(&self) -> usize {
        self.last_col - self.first_col + 1
    }

    pub fn rows(&self) -> usize {
        self.last_row - self.first_row + 1
    }

    pub fn cell_count(&self) -> usize {
        self.columns() * self.rows()
    }
}

/// Population of a query and its share of the indexed total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub population: i64,
    /// Percentage of the indexed population, in `[0, 100]`
    pub percent: f32,
}

impl QueryResult {
    pub fn new(population: i64, total: i64) -> Self {
        let percent = if total > 0 {
            (population as f64 * 100.0 / total as f64) as f32
        } else {
            0.0
        };
        Self {
            population,
            percent,
        }
    }
}

/// Answers rectangle queries. Holds no state besides its policy, so one
/// engine can serve any number of threads and indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryEngine {
    policy: OverlapPolicy,
    parallel_threshold: usize,
}

impl QueryEngine {
    pub fn new(policy: OverlapPolicy) -> Self {
        Self {
            policy,
            parallel_threshold: Config::default().parallel_query_threshold,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            policy: config.overlap_policy,
            parallel_threshold: config.parallel_query_threshold,
        }
    }

    /// Sum in parallel once a query touches more than `cells` cells.
    pub fn with_parallel_threshold(mut self, cells: usize) -> Self {
        self.parallel_threshold = cells;
        self
    }

    pub fn policy(&self) -> OverlapPolicy {
        self.policy
    }

    /// Population inside `rect`.
    ///
    /// Degenerate, inverted and non-finite rectangles, and rectangles that
    /// miss the indexed region, return 0.
    ///
    /// # Examples
    ///
    /// ```
    /// use popgrid::{Config, OverlapPolicy, Preprocessor, QueryEngine};
    /// use popgrid::source::MemorySource;
    /// use popgrid_types::{GridResolution, QueryRectangle};
    ///
    /// let source = MemorySource::from_lines(
    ///     "demo",
    ///     "STATEFP,COUNTYFP,TRACTCE,BLKGRPCE,POPULATION,LATITUDE,LONGITUDE",
    ///     ["01,001,000100,1,100,40.0,-74.0", "06,037,000100,1,200,34.0,-118.0"],
    /// );
    /// let index = Preprocessor::default().build(&source, GridResolution::square(2))?;
    /// let engine = QueryEngine::new(OverlapPolicy::AnyOverlap);
    ///
    /// assert_eq!(engine.query(&index, &QueryRectangle::new(-80.0, 35.0, -70.0, 45.0)), 100);
    /// assert_eq!(engine.query(&index, &QueryRectangle::new(-80.0, 35.0, -80.0, 45.0)), 0);
    /// # Ok::<(), popgrid::PopGridError>(())
    /// ```
    pub fn query(&self, index: &GridIndex, rect: &QueryRectangle) -> i64 {
        if !rect.is_finite() {
            log::warn!("Rejecting query with non-finite coordinates: {:?}", rect);
            return 0;
        }
        let Some(clipped) = index.bounds().clip(rect) else {
            return 0;
        };
        let policy = match self.policy {
            OverlapPolicy::Exact if !index.has_points() => {
                log::debug!("Index holds no points; answering exact query by cell overlap");
                OverlapPolicy::AnyOverlap
            }
            policy => policy,
        };
        let range = match policy {
            OverlapPolicy::Exact => CellRange::touching(index.geometry(), &clipped),
            _ => CellRange::covering(index.geometry(), &clipped),
        };

        let row_sum = |row: usize| match policy {
            OverlapPolicy::AnyOverlap => index.row(row)[range.first_col..=range.last_col]
                .iter()
                .sum::<i64>(),
            OverlapPolicy::CellCenter => (range.first_col..=range.last_col)
                .filter(|&col| {
                    let center = index.geometry().cell_center(col, row);
                    clipped.contains(center.x(), center.y())
                })
                .map(|col| index.cell(col, row))
                .sum(),
            OverlapPolicy::Exact => (range.first_col..=range.last_col)
                .map(|col| exact_cell_sum(index, &clipped, col, row))
                .sum(),
        };

        // Totals are non-negative and their full sum was checked at build time,
        // so no partial sum can overflow.
        if range.cell_count() > self.parallel_threshold {
            (range.first_row..=range.last_row)
                .into_par_iter()
                .map(row_sum)
                .sum()
        } else {
            (range.first_row..=range.last_row).map(row_sum).sum()
        }
    }

    /// Population inside `rect` together with its share of the index total.
    pub fn query_with_share(&self, index: &GridIndex, rect: &QueryRectangle) -> QueryResult {
        QueryResult::new(self.query(index, rect), index.total())
    }
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new(OverlapPolicy::default())
    }
}

// A cell is taken whole only when none of its edges meets the query's:
// records on a shared edge may sit just outside after rounding.
fn exact_cell_sum(index: &GridIndex, clipped: &Bounds, col: usize, row: usize) -> i64 {
    if clipped.strictly_contains_bounds(&index.geometry().cell_bounds(col, row)) {
        return index.cell(col, row);
    }
    index
        .points_in(col, row)
        .unwrap_or_default()
        .iter()
        .filter(|record| clipped.contains(record.longitude, record.latitude))
        .map(|record| record.population)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegionPolicy;
    use crate::preprocess::Preprocessor;
    use crate::source::MemorySource;
    use popgrid_types::GridResolution;

    const HEADER: &str = "STATEFP,COUNTYFP,TRACTCE,BLKGRPCE,POPULATION,LATITUDE,LONGITUDE";

    fn scenario() -> MemorySource {
        MemorySource::from_lines(
            "scenario",
            HEADER,
            [
                "36,061,000100,1,100,40.0,-74.0",
                "06,037,000100,1,200,34.0,-118.0",
                "00,000,000000,0,50,90.0,-74.0",
            ],
        )
    }

    fn build(source: &MemorySource, policy: OverlapPolicy, resolution: GridResolution) -> GridIndex {
        Preprocessor::new(Config::default().with_overlap_policy(policy).with_shards(2))
            .build(source, resolution)
            .unwrap()
    }

    fn grid_source() -> MemorySource {
        // One record of population 1 at the center of every unit square of [0, 10]^2
        let mut lines = Vec::new();
        for x in 0..10 {
            for y in 0..10 {
                lines.push(format!("0,0,0,0,1,{}.5,{}.5", y, x));
            }
        }
        MemorySource::from_lines("unit", HEADER, lines)
    }

    fn unit_index(policy: OverlapPolicy, size: usize) -> GridIndex {
        let config = Config::default()
            .with_region(RegionPolicy::Fixed {
                west: 0.0,
                south: 0.0,
                east: 10.0,
                north: 10.0,
            })
            .with_overlap_policy(policy)
            .with_shards(3);
        Preprocessor::new(config)
            .build(&grid_source(), GridResolution::square(size))
            .unwrap()
    }

    #[test]
    fn test_concrete_scenario() {
        for policy in [OverlapPolicy::AnyOverlap, OverlapPolicy::Exact] {
            let index = build(&scenario(), policy, GridResolution::square(2));
            let engine = QueryEngine::new(policy);
            let east_coast = QueryRectangle::new(-80.0, 35.0, -70.0, 45.0);
            assert_eq!(engine.query(&index, &east_coast), 100, "{:?}", policy);
            let full = QueryRectangle::from(*index.bounds());
            assert_eq!(engine.query(&index, &full), 300, "{:?}", policy);
        }
    }

    #[test]
    fn test_cell_center_scenario() {
        let index = build(&scenario(), OverlapPolicy::CellCenter, GridResolution::square(2));
        let engine = QueryEngine::new(OverlapPolicy::CellCenter);
        // The north-east cell's center (-81.45, 43.14) lies west of the query
        let east_coast = QueryRectangle::new(-80.0, 35.0, -70.0, 45.0);
        assert_eq!(engine.query(&index, &east_coast), 0);
        let around_center = QueryRectangle::new(-85.0, 35.0, -70.0, 45.0);
        assert_eq!(engine.query(&index, &around_center), 100);
        let full = QueryRectangle::from(*index.bounds());
        assert_eq!(engine.query(&index, &full), 300);
    }

    #[test]
    fn test_degenerate_and_inverted_queries() {
        let index = build(&scenario(), OverlapPolicy::AnyOverlap, GridResolution::square(2));
        let engine = QueryEngine::default();
        assert_eq!(engine.query(&index, &QueryRectangle::new(-80.0, 35.0, -80.0, 45.0)), 0);
        assert_eq!(engine.query(&index, &QueryRectangle::new(-80.0, 40.0, -70.0, 40.0)), 0);
        assert_eq!(engine.query(&index, &QueryRectangle::new(-70.0, 35.0, -80.0, 45.0)), 0);
        assert_eq!(engine.query(&index, &QueryRectangle::new(-80.0, 45.0, -70.0, 35.0)), 0);
        assert_eq!(
            engine.query(&index, &QueryRectangle::new(f64::NAN, 35.0, -70.0, 45.0)),
            0
        );
    }

    #[test]
    fn test_query_outside_region() {
        let index = build(&scenario(), OverlapPolicy::AnyOverlap, GridResolution::square(2));
        let engine = QueryEngine::default();
        let europe = QueryRectangle::new(0.0, 40.0, 20.0, 55.0);
        assert_eq!(engine.query(&index, &europe), 0);
    }

    #[test]
    fn test_aligned_queries_agree_across_policies() {
        for policy in [
            OverlapPolicy::AnyOverlap,
            OverlapPolicy::CellCenter,
            OverlapPolicy::Exact,
        ] {
            let index = unit_index(policy, 10);
            let engine = QueryEngine::new(policy);
            assert_eq!(engine.query(&index, &QueryRectangle::new(0.0, 0.0, 10.0, 10.0)), 100);
            assert_eq!(engine.query(&index, &QueryRectangle::new(2.1, 3.1, 4.9, 5.9)), 9);
            assert_eq!(engine.query(&index, &QueryRectangle::new(-50.0, -50.0, 0.9, 50.0)), 10);
        }
    }

    #[test]
    fn test_query_edges_on_cell_boundaries() {
        for policy in [
            OverlapPolicy::AnyOverlap,
            OverlapPolicy::CellCenter,
            OverlapPolicy::Exact,
        ] {
            let index = unit_index(policy, 10);
            let engine = QueryEngine::new(policy);
            assert_eq!(engine.query(&index, &QueryRectangle::new(0.0, 0.0, 5.0, 10.0)), 50, "{:?}", policy);
            assert_eq!(engine.query(&index, &QueryRectangle::new(5.0, 0.0, 10.0, 10.0)), 50, "{:?}", policy);
            assert_eq!(engine.query(&index, &QueryRectangle::new(0.0, 0.0, 10.0, 5.0)), 50, "{:?}", policy);
            assert_eq!(engine.query(&index, &QueryRectangle::new(0.0, 5.0, 10.0, 10.0)), 50, "{:?}", policy);
            assert_eq!(engine.query(&index, &QueryRectangle::new(2.0, 2.0, 3.0, 3.0)), 1, "{:?}", policy);
        }
    }

    #[test]
    fn test_covering_range_of_exact_cell() {
        let index = unit_index(OverlapPolicy::AnyOverlap, 10);
        let range = CellRange::covering(index.geometry(), &Bounds::new(2.0, 2.0, 3.0, 3.0));
        assert_eq!((range.first_col, range.last_col), (2, 2));
        assert_eq!((range.first_row, range.last_row), (7, 7));
        assert_eq!(range.cell_count(), 1);

        let touching = CellRange::touching(index.geometry(), &Bounds::new(2.0, 2.0, 3.0, 3.0));
        assert_eq!(touching.cell_count(), 4);
    }

    #[test]
    fn test_exact_matches_records_on_shared_edges() {
        // Cell widths of 0.2 and 0.1 are not exact in binary
        let mut lines = Vec::new();
        for i in 0..=14 {
            for j in 0..=7 {
                lines.push(format!("0,0,0,0,1,{:.1},{:.1}", 0.1 + j as f64 * 0.1, -0.7 + i as f64 * 0.1));
            }
        }
        let source = MemorySource::from_lines("edges", HEADER, lines);
        let config = Config::default()
            .with_region(RegionPolicy::Fixed {
                west: -0.7,
                south: 0.1,
                east: 0.7,
                north: 0.8,
            })
            .with_overlap_policy(OverlapPolicy::Exact);
        let index = Preprocessor::new(config)
            .build(&source, GridResolution::new(7, 7))
            .unwrap();
        let engine = QueryEngine::new(OverlapPolicy::Exact);
        let geometry = *index.geometry();

        for (first_col, last_col) in [(0, 6), (1, 3), (2, 2), (3, 5)] {
            for (first_row, last_row) in [(0, 6), (1, 4), (5, 5)] {
                let west = geometry.cell_bounds(first_col, 0).west();
                let east = geometry.cell_bounds(last_col, 0).east();
                let north = geometry.cell_bounds(0, first_row).north();
                let south = geometry.cell_bounds(0, last_row).south();
                let rect = QueryRectangle::new(west, south, east, north);

                let mut expected = 0;
                crate::source::for_each_record(&source, |record| {
                    if index.bounds().contains(record.longitude, record.latitude)
                        && record.longitude >= west
                        && record.longitude <= east
                        && record.latitude >= south
                        && record.latitude <= north
                    {
                        expected += record.population;
                    }
                })
                .unwrap();
                assert_eq!(engine.query(&index, &rect), expected, "{:?}", rect);
            }
        }
    }

    #[test]
    fn test_exact_resolves_boundary_cells() {
        // 2x2 cells of 5 degrees: every cell straddles this query
        let index = unit_index(OverlapPolicy::Exact, 2);
        let rect = QueryRectangle::new(3.0, 3.0, 7.0, 7.0);

        assert_eq!(QueryEngine::new(OverlapPolicy::Exact).query(&index, &rect), 16);
        assert_eq!(QueryEngine::new(OverlapPolicy::AnyOverlap).query(&index, &rect), 100);
        assert_eq!(QueryEngine::new(OverlapPolicy::CellCenter).query(&index, &rect), 0);
    }

    #[test]
    fn test_exact_without_points_falls_back() {
        let index = unit_index(OverlapPolicy::AnyOverlap, 2);
        let rect = QueryRectangle::new(3.0, 3.0, 7.0, 7.0);
        assert_eq!(QueryEngine::new(OverlapPolicy::Exact).query(&index, &rect), 100);
    }

    #[test]
    fn test_monotonic_under_growth() {
        for policy in [
            OverlapPolicy::AnyOverlap,
            OverlapPolicy::CellCenter,
            OverlapPolicy::Exact,
        ] {
            let index = unit_index(policy, 4);
            let engine = QueryEngine::new(policy);
            let mut previous = 0;
            for step in 0..=12 {
                let half = step as f64 * 0.5;
                let rect = QueryRectangle::new(5.0 - half, 5.0 - half, 5.0 + half, 5.0 + half);
                let population = engine.query(&index, &rect);
                assert!(population >= previous, "{:?} step {}", policy, step);
                previous = population;
            }
            assert_eq!(previous, 100);
        }
    }

    #[test]
    fn test_parallel_sum_matches_sequential() {
        let index = unit_index(OverlapPolicy::AnyOverlap, 10);
        let sequential = QueryEngine::default().with_parallel_threshold(usize::MAX);
        let parallel = QueryEngine::default().with_parallel_threshold(0);
        for rect in [
            QueryRectangle::new(0.0, 0.0, 10.0, 10.0),
            QueryRectangle::new(1.2, 2.7, 8.8, 6.1),
            QueryRectangle::new(9.5, 0.0, 12.0, 0.5),
        ] {
            assert_eq!(sequential.query(&index, &rect), parallel.query(&index, &rect));
        }
    }

    #[test]
    fn test_cell_range_covering() {
        let index = unit_index(OverlapPolicy::AnyOverlap, 10);
        let range = CellRange::covering(index.geometry(), &Bounds::new(2.5, 3.5, 4.5, 5.5));
        assert_eq!((range.first_col, range.last_col), (2, 4));
        assert_eq!((range.first_row, range.last_row), (4, 6));
        assert_eq!(range.cell_count(), 9);
    }

    #[test]
    fn test_query_share() {
        let index = build(&scenario(), OverlapPolicy::AnyOverlap, GridResolution::square(2));
        let result = QueryEngine::default()
            .query_with_share(&index, &QueryRectangle::new(-80.0, 35.0, -70.0, 45.0));
        assert_eq!(result.population, 100);
        assert!((result.percent - 33.333).abs() < 0.01);
        assert_eq!(QueryResult::new(0, 0).percent, 0.0);
    }
}
