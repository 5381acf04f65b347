//! Configuration for preprocessing and querying.
//!
//! `Config` is plain serde data so it can be loaded from JSON or, with the
//! `toml` feature, from TOML.

use crate::error::{PopGridError, Result};
use popgrid_types::Bounds;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::thread;

/// West edge of the continental United States.
pub const USA_WEST: f64 = -125.0;
/// East edge of the continental United States.
pub const USA_EAST: f64 = -66.93457;
/// North edge of the continental United States.
pub const USA_NORTH: f64 = 49.384358;
/// South edge of the continental United States.
pub const USA_SOUTH: f64 = 24.396308;

/// Which region the grid covers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionPolicy {
    /// Index a fixed region; records outside it are dropped.
    Fixed {
        west: f64,
        south: f64,
        east: f64,
        north: f64,
    },
    /// Index the smallest region covering every valid record.
    DataExtent,
}

impl RegionPolicy {
    /// A fixed region from existing bounds.
    pub fn fixed(bounds: Bounds) -> Self {
        RegionPolicy::Fixed {
            west: bounds.west(),
            south: bounds.south(),
            east: bounds.east(),
            north: bounds.north(),
        }
    }

    /// The continental United States.
    pub fn continental_usa() -> Self {
        RegionPolicy::Fixed {
            west: USA_WEST,
            south: USA_SOUTH,
            east: USA_EAST,
            north: USA_NORTH,
        }
    }

    /// Bounds of a fixed region, `None` for `DataExtent`.
    pub fn bounds(&self) -> Option<Bounds> {
        match *self {
            RegionPolicy::Fixed {
                west,
                south,
                east,
                north,
            } => Some(Bounds::new(west, south, east, north)),
            RegionPolicy::DataExtent => None,
        }
    }
}

impl Default for RegionPolicy {
    fn default() -> Self {
        Self::continental_usa()
    }
}

/// How cells that straddle the edge of a query rectangle are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Count a cell when its center lies inside the query.
    CellCenter,
    /// Count every cell the query touches (conservative).
    #[default]
    AnyOverlap,
    /// Count interior cells whole and resolve edge cells point by point.
    Exact,
}

impl OverlapPolicy {
    /// Whether the index must keep per-cell points for this policy.
    pub fn retains_points(&self) -> bool {
        matches!(self, OverlapPolicy::Exact)
    }
}

/// Preprocessing and query configuration.
///
/// # Example
///
/// ```rust
/// use popgrid::{Config, OverlapPolicy};
///
/// let json = r#"{
///     "shards": 16,
///     "workers": 4,
///     "overlap_policy": "cell_center",
///     "region": "data_extent"
/// }"#;
/// let config = Config::from_json_str(json).unwrap();
/// assert_eq!(config.shard_count(), 16);
/// assert_eq!(config.overlap_policy, OverlapPolicy::CellCenter);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Number of byte-range shards the dataset is split into.
    /// `None` uses the available parallelism.
    #[serde(default)]
    pub shards: Option<usize>,

    /// Size of the preprocessing worker pool. `None` uses the available parallelism.
    #[serde(default)]
    pub workers: Option<usize>,

    /// Indexed region
    #[serde(default)]
    pub region: RegionPolicy,

    /// Partial-overlap policy for queries
    #[serde(default)]
    pub overlap_policy: OverlapPolicy,

    /// Queries touching more cells than this are summed in parallel.
    #[serde(default = "Config::default_parallel_query_threshold")]
    pub parallel_query_threshold: usize,
}

impl Config {
    const fn default_parallel_query_threshold() -> usize {
        16_384
    }

    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = Some(shards);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_region(mut self, region: RegionPolicy) -> Self {
        self.region = region;
        self
    }

    pub fn with_overlap_policy(mut self, policy: OverlapPolicy) -> Self {
        self.overlap_policy = policy;
        self
    }

    pub fn with_parallel_query_threshold(mut self, cells: usize) -> Self {
        self.parallel_query_threshold = cells;
        self
    }

    /// Effective shard count.
    pub fn shard_count(&self) -> usize {
        self.shards.unwrap_or_else(available_parallelism).max(1)
    }

    /// Effective worker pool size.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(available_parallelism).max(1)
    }

    /// Check values that serde cannot reject on its own.
    pub fn validate(&self) -> Result<()> {
        if self.shards == Some(0) {
            return Err(PopGridError::InvalidInput(
                "shard count must be at least 1".into(),
            ));
        }
        if self.workers == Some(0) {
            return Err(PopGridError::InvalidInput(
                "worker count must be at least 1".into(),
            ));
        }
        if let RegionPolicy::Fixed {
            west,
            south,
            east,
            north,
        } = self.region
        {
            let finite = [west, south, east, north].iter().all(|v| v.is_finite());
            if !finite || west >= east || south >= north {
                return Err(PopGridError::InvalidInput(format!(
                    "region must have positive area, got west={west} south={south} east={east} north={north}"
                )));
            }
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML configuration.
    #[cfg(feature = "toml")]
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file, choosing the format from its extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            #[cfg(feature = "toml")]
            Some("toml") => Self::from_toml_str(&text),
            Some("json") => Self::from_json_str(&text),
            other => Err(PopGridError::Config(format!(
                "unsupported config format: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shards: None,
            workers: None,
            region: RegionPolicy::default(),
            overlap_policy: OverlapPolicy::default(),
            parallel_query_threshold: Self::default_parallel_query_threshold(),
        }
    }
}

fn available_parallelism() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
