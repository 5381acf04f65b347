//! Build-once, query-many façade.
//!
//! `PopulationService` keeps one slot per [`BuildKey`]. The first request for a
//! key builds its index; concurrent requests for the same key block until that
//! build finishes and then share the result. A finished index is never
//! rebuilt. A failed build leaves its slot empty so that a later request can
//! try again.
//!
//! # Examples
//!
//! ```rust
//! use popgrid::{BuildParams, PopulationService};
//! use popgrid::source::MemorySource;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = MemorySource::from_lines(
//!     "demo",
//!     "STATEFP,COUNTYFP,TRACTCE,BLKGRPCE,POPULATION,LATITUDE,LONGITUDE",
//!     ["01,001,000100,1,100,40.0,-74.0", "06,037,000100,1,200,34.0,-118.0"],
//! );
//! let service = PopulationService::builder().shards(4).build()?;
//! let params = BuildParams::new(2, 2, 1);
//!
//! let result = service.single_interaction(&source, params, -80.0, 35.0, -70.0, 45.0)?;
//! assert_eq!(result.population, 100);
//! assert_eq!(service.build_count(), 1);
//! # Ok(())
//! # }
//! ```

use crate::builder::ServiceBuilder;
use crate::config::Config;
use crate::error::{PopGridError, Result};
use crate::grid::GridIndex;
use crate::preprocess::Preprocessor;
use crate::query::{QueryEngine, QueryResult};
use crate::source::RecordSource;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use popgrid_types::{GridResolution, QueryRectangle};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Parameters supplied for one build: grid shape and a version tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildParams {
    pub resolution: GridResolution,
    /// Bumping the version forces a fresh build of otherwise identical input.
    pub version: u32,
}

impl BuildParams {
    pub fn new(columns: usize, rows: usize, version: u32) -> Self {
        Self {
            resolution: GridResolution::new(columns, rows),
            version,
        }
    }
}

/// Identifies one cached index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildKey {
    pub source: String,
    pub columns: usize,
    pub rows: usize,
    pub version: u32,
}

impl BuildKey {
    pub fn new<S>(source: &S, params: BuildParams) -> Self
    where
        S: RecordSource + ?Sized,
    {
        Self {
            source: source.identity(),
            columns: params.resolution.columns,
            rows: params.resolution.rows,
            version: params.version,
        }
    }
}

impl fmt::Display for BuildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}x{}, v{})",
            self.source, self.columns, self.rows, self.version
        )
    }
}

/// Lifecycle of one build key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Unbuilt,
    Building,
    Ready,
}

#[derive(Debug, Default)]
struct BuildSlot {
    building: AtomicBool,
    index: OnceCell<Arc<GridIndex>>,
}

impl BuildSlot {
    fn state(&self) -> BuildState {
        if self.index.get().is_some() {
            BuildState::Ready
        } else if self.building.load(Ordering::Acquire) {
            BuildState::Building
        } else {
            BuildState::Unbuilt
        }
    }
}

/// Holds a slot's `building` flag up until dropped, unwinding included.
struct BuildingFlag<'a>(&'a AtomicBool);

impl<'a> BuildingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for BuildingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Thread-safe façade that builds each index once and answers queries on it.
///
/// Share it between threads with `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct PopulationService {
    preprocessor: Preprocessor,
    engine: QueryEngine,
    slots: RwLock<FxHashMap<BuildKey, Arc<BuildSlot>>>,
    builds: AtomicUsize,
}

impl PopulationService {
    /// Create a service with a validated configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            engine: QueryEngine::from_config(&config),
            preprocessor: Preprocessor::new(config),
            slots: RwLock::new(FxHashMap::default()),
            builds: AtomicUsize::new(0),
        })
    }

    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::new()
    }

    pub fn config(&self) -> &Config {
        self.preprocessor.config()
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    /// Number of builds started so far, failed ones included.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    /// Current state of a key.
    pub fn state(&self, key: &BuildKey) -> BuildState {
        self.slots
            .read()
            .get(key)
            .map_or(BuildState::Unbuilt, |slot| slot.state())
    }

    /// Keys that currently hold a finished index.
    pub fn ready_keys(&self) -> Vec<BuildKey> {
        self.slots
            .read()
            .iter()
            .filter(|(_, slot)| slot.state() == BuildState::Ready)
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn slot(&self, key: &BuildKey) -> Arc<BuildSlot> {
        if let Some(slot) = self.slots.read().get(key) {
            return Arc::clone(slot);
        }
        Arc::clone(self.slots.write().entry(key.clone()).or_default())
    }

    /// The finished index for `source` and `params`, building it on first use.
    pub fn index<S>(&self, source: &S, params: BuildParams) -> Result<Arc<GridIndex>>
    where
        S: RecordSource + ?Sized,
    {
        let key = BuildKey::new(source, params);
        let slot = self.slot(&key);

        let index = slot.index.get_or_try_init(|| {
            let _building = BuildingFlag::raise(&slot.building);
            self.builds.fetch_add(1, Ordering::Relaxed);
            log::debug!("Build of {} started", key);

            let built = self.preprocessor.build(source, params.resolution);
            built.map(Arc::new).map_err(|err| {
                log::error!("Build of {} failed: {}", key, err);
                PopGridError::BuildFailed {
                    key: key.clone(),
                    source: Box::new(err),
                }
            })
        })?;
        Ok(Arc::clone(index))
    }

    /// Build (or reuse) the index for a dataset with the given grid shape and version.
    pub fn preprocess<S>(
        &self,
        source: &S,
        columns: usize,
        rows: usize,
        version: u32,
    ) -> Result<Arc<GridIndex>>
    where
        S: RecordSource + ?Sized,
    {
        self.index(source, BuildParams::new(columns, rows, version))
    }

    /// Population inside `rect`.
    pub fn query<S>(&self, source: &S, params: BuildParams, rect: &QueryRectangle) -> Result<i64>
    where
        S: RecordSource + ?Sized,
    {
        let index = self.index(source, params)?;
        Ok(self.engine.query(&index, rect))
    }

    /// Answer one `(west, south, east, north)` query with its population share.
    pub fn single_interaction<S>(
        &self,
        source: &S,
        params: BuildParams,
        west: f64,
        south: f64,
        east: f64,
        north: f64,
    ) -> Result<QueryResult>
    where
        S: RecordSource + ?Sized,
    {
        let index = self.index(source, params)?;
        let rect = QueryRectangle::new(west, south, east, north);
        Ok(self.engine.query_with_share(&index, &rect))
    }
}

/// A service bound to one dataset and one set of build parameters.
#[derive(Debug)]
pub struct PopulationQuery<S: RecordSource> {
    service: PopulationService,
    source: S,
    params: BuildParams,
}

impl<S: RecordSource> PopulationQuery<S> {
    pub fn new(source: S, params: BuildParams, config: Config) -> Result<Self> {
        Ok(Self {
            service: PopulationService::new(config)?,
            source,
            params,
        })
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn params(&self) -> BuildParams {
        self.params
    }

    pub fn service(&self) -> &PopulationService {
        &self.service
    }

    pub fn state(&self) -> BuildState {
        self.service
            .state(&BuildKey::new(&self.source, self.params))
    }

    /// Build the index now instead of on the first query.
    pub fn preprocess(&self) -> Result<Arc<GridIndex>> {
        self.service.index(&self.source, self.params)
    }

    pub fn query(&self, rect: &QueryRectangle) -> Result<i64> {
        self.service.query(&self.source, self.params, rect)
    }

    pub fn single_interaction(
        &self,
        west: f64,
        south: f64,
        east: f64,
        north: f64,
    ) -> Result<QueryResult> {
        self.service
            .single_interaction(&self.source, self.params, west, south, east, north)
    }
}
