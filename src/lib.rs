//! Rectangular population queries over census centroid data.
//!
//! A dataset of population-weighted centroids is scanned once, in parallel,
//! into a fixed-resolution grid of population totals. Queries then sum the
//! cells a rectangle covers without touching the dataset again.
//!
//! ```rust
//! use popgrid::{BuildParams, PopulationService};
//! use popgrid::source::MemorySource;
//!
//! let source = MemorySource::from_lines(
//!     "tracts",
//!     "STATEFP,COUNTYFP,TRACTCE,BLKGRPCE,POPULATION,LATITUDE,LONGITUDE",
//!     ["36,061,000100,1,100,40.0,-74.0", "06,037,000100,1,200,34.0,-118.0"],
//! );
//! let service = PopulationService::builder().build()?;
//! let population = service.single_interaction(&source, BuildParams::new(100, 100, 1), -80.0, 35.0, -70.0, 45.0)?;
//! assert_eq!(population.population, 100);
//! # Ok::<(), popgrid::PopGridError>(())
//! ```

pub mod builder;
pub mod compute;
pub mod config;
pub mod error;
pub mod grid;
pub mod preprocess;
pub mod query;
pub mod service;
pub mod source;

pub use builder::ServiceBuilder;
pub use config::{Config, OverlapPolicy, RegionPolicy};
pub use error::{PopGridError, RecordError, Result};
pub use grid::{GridGeometry, GridIndex};
pub use preprocess::{BuildStats, Preprocessor};
pub use query::{QueryEngine, QueryResult};
pub use service::{BuildKey, BuildParams, BuildState, PopulationQuery, PopulationService};
pub use source::{FileSource, MemorySource, RecordSource};

pub use popgrid_types::{Bounds, GridResolution, PopulationRecord, QueryRectangle};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{PopGridError, PopulationQuery, PopulationService, Result, ServiceBuilder};

    pub use crate::{BuildParams, Config, OverlapPolicy, RegionPolicy};

    pub use crate::{FileSource, MemorySource, RecordSource};

    pub use crate::{GridIndex, QueryEngine, QueryResult};

    pub use popgrid_types::{Bounds, GridResolution, QueryRectangle};
}
