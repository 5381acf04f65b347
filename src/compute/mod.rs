//! Compute layer for preprocessing and query processing.
//!
//! This module holds the per-record logic shared by every scan:
//! - Line parsing by fixed column position
//! - Coordinate and population validation
//!
//! The grid, the parallel build and the query engine build on top of it.

pub mod validation;
