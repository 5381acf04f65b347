//! Parallel construction of a [`GridIndex`].
//!
//! The dataset is split into byte-range shards which a fixed-size worker pool
//! scans independently. Each shard sums into a private accumulator and merges
//! it into the shared grid once, at the end of its scan; the grid is published
//! only after every shard has joined.

use crate::config::{Config, RegionPolicy};
use crate::error::{PopGridError, Result};
use crate::grid::{GridGeometry, GridIndex, SharedGrid};
use crate::source::{RecordSource, ScanStats, Shard, plan_shards, scan_shard};
use popgrid_types::{Bounds, GridResolution};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Margin in degrees added to a data extent with no width or height.
const FLAT_EXTENT_MARGIN: f64 = 1e-6;

/// Counters describing one build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildStats {
    /// Line counters summed over all shards
    pub scan: ScanStats,
    /// Valid records dropped because they lie outside the indexed region
    pub outside_region: u64,
    /// Records that contributed to the grid
    pub indexed: u64,
    pub shards: usize,
    pub workers: usize,
    pub elapsed: Duration,
}

#[derive(Debug)]
struct ShardOutcome {
    scan: ScanStats,
    outside_region: u64,
}

/// Builds grid indexes from record sources.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    config: Config,
}

impl Preprocessor {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Scan `source` once in parallel and return the finished grid.
    ///
    /// Malformed lines are skipped. Any I/O error, or a population total
    /// that would overflow, fails the whole build.
    ///
    /// # Examples
    ///
    /// ```
    /// use popgrid::{Config, Preprocessor};
    /// use popgrid::source::MemorySource;
    /// use popgrid_types::GridResolution;
    ///
    /// let source = MemorySource::from_lines(
    ///     "demo",
    ///     "STATEFP,COUNTYFP,TRACTCE,BLKGRPCE,POPULATION,LATITUDE,LONGITUDE",
    ///     ["01,001,000100,1,100,40.0,-74.0", "06,037,000100,1,200,34.0,-118.0"],
    /// );
    /// let index = Preprocessor::new(Config::default().with_shards(2))
    ///     .build(&source, GridResolution::square(2))?;
    /// assert_eq!(index.total(), 300);
    /// # Ok::<(), popgrid::PopGridError>(())
    /// ```
    pub fn build<S>(&self, source: &S, resolution: GridResolution) -> Result<GridIndex>
    where
        S: RecordSource + ?Sized,
    {
        self.config.validate()?;
        GridGeometry::check_resolution(resolution)?;
        let started = Instant::now();

        let workers = self.config.worker_count();
        let shards = plan_shards(source.byte_len()?, self.config.shard_count());
        let pool = worker_pool(workers)?;

        log::info!(
            "Building {}x{} grid for {} ({} shards, {} workers)",
            resolution.columns,
            resolution.rows,
            source.identity(),
            shards.len(),
            workers
        );

        let bounds = match self.config.region {
            RegionPolicy::DataExtent => scan_extent(&pool, source, &shards)?,
            fixed => fixed
                .bounds()
                .ok_or_else(|| PopGridError::InvalidInput("region has no bounds".into()))?,
        };
        let geometry = GridGeometry::new(bounds, resolution)?;
        let grid = SharedGrid::new(geometry, self.config.overlap_policy.retains_points());

        let outcomes = pool.install(|| {
            shards
                .par_iter()
                .map(|shard| build_shard(source, shard, &grid))
                .collect::<Result<Vec<_>>>()
        })?;

        let mut stats = BuildStats {
            shards: shards.len(),
            workers,
            ..BuildStats::default()
        };
        for outcome in &outcomes {
            stats.scan.merge(&outcome.scan);
            stats.outside_region += outcome.outside_region;
        }
        stats.indexed = stats.scan.records - stats.outside_region;
        stats.elapsed = started.elapsed();

        let index = grid.into_index(stats)?;
        let stats = index.stats();
        log::info!(
            "Built grid for {} in {:?}: {} records indexed, {} outside region, {} malformed lines, total population {}",
            source.identity(),
            stats.elapsed,
            stats.indexed,
            stats.outside_region,
            stats.scan.malformed,
            index.total()
        );
        Ok(index)
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

fn worker_pool(workers: usize) -> Result<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("popgrid-build-{}", i))
        .build()
        .map_err(|e| PopGridError::WorkerPool(e.to_string()))
}

fn build_shard<S>(source: &S, shard: &Shard, grid: &SharedGrid) -> Result<ShardOutcome>
where
    S: RecordSource + ?Sized,
{
    let region = *grid.geometry().bounds();
    let mut accumulator = grid.accumulator();
    let mut outside_region = 0;
    let mut overflow = None;

    let scan = scan_shard(source, shard, |record| {
        if !region.contains(record.longitude, record.latitude) {
            outside_region += 1;
            return;
        }
        if let Err(err) = accumulator.add(&record) {
            overflow.get_or_insert(err);
        }
    })?;
    if let Some(err) = overflow {
        return Err(err);
    }
    let outcome = ShardOutcome {
        scan,
        outside_region,
    };

    grid.merge(accumulator)?;
    log::debug!(
        "Shard {} [{}..{}) merged: {} records, {} outside region, {} malformed",
        shard.index,
        shard.start,
        shard.end,
        outcome.scan.records,
        outcome.outside_region,
        outcome.scan.malformed
    );
    Ok(outcome)
}

/// Union of all valid record coordinates, computed shard by shard.
fn scan_extent<S>(pool: &ThreadPool, source: &S, shards: &[Shard]) -> Result<Bounds>
where
    S: RecordSource + ?Sized,
{
    let partials = pool.install(|| {
        shards
            .par_iter()
            .map(|shard| {
                let mut extent: Option<Bounds> = None;
                scan_shard(source, shard, |record| {
                    extent = Some(match extent {
                        Some(mut bounds) => {
                            bounds.include(record.longitude, record.latitude);
                            bounds
                        }
                        None => Bounds::from_point(record.longitude, record.latitude),
                    });
                })?;
                Ok(extent)
            })
            .collect::<Result<Vec<_>>>()
    })?;

    let extent = partials
        .into_iter()
        .flatten()
        .reduce(|a, b| a.union(&b))
        .ok_or(PopGridError::EmptyDataset)?;
    log::debug!(
        "Data extent: west={} south={} east={} north={}",
        extent.west(),
        extent.south(),
        extent.east(),
        extent.north()
    );
    Ok(extent.pad_flat_sides(FLAT_EXTENT_MARGIN))
}
