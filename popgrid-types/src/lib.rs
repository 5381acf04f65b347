//! # popgrid-types
//!
//! Core geographic and census record types for the popgrid population index.
//!
//! This crate provides the plain data types shared by the preprocessing and
//! query halves of popgrid:
//!
//! - **Regions**: `Bounds` (an indexed region) and `QueryRectangle` (a raw query)
//! - **Grid shape**: `GridResolution`
//! - **Records**: `PopulationRecord`, one census centroid
//!
//! All types are serializable with Serde and built on top of the `geo` crate's
//! geometric primitives (x = longitude, y = latitude).
//!
//! ## Examples
//!
//! ```rust
//! use popgrid_types::bounds::{Bounds, QueryRectangle};
//!
//! let usa = Bounds::new(-125.0, 24.396308, -66.93457, 49.384358);
//! let query = QueryRectangle::new(-80.0, 35.0, -70.0, 45.0);
//! let clipped = usa.clip(&query).unwrap();
//! assert_eq!(clipped.west(), -80.0);
//! ```

pub mod bounds;
pub mod record;
pub mod resolution;

pub use bounds::{Bounds, QueryRectangle};
pub use record::PopulationRecord;
pub use resolution::GridResolution;
