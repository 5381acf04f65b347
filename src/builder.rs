//! Service builder for flexible configuration
//!
//! This module provides a builder pattern for creating a
//! [`PopulationService`] from a base [`Config`] plus individual overrides.

use crate::config::{Config, OverlapPolicy, RegionPolicy};
use crate::error::Result;
use crate::service::PopulationService;
use std::path::Path;

/// Builder for a [`PopulationService`].
#[derive(Debug, Clone, Default)]
pub struct ServiceBuilder {
    config: Config,
}

impl ServiceBuilder {
    /// Create a new builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration. Later setters still apply on top of it.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Load the configuration from a JSON or TOML file.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        self.config = Config::from_path(path)?;
        Ok(self)
    }

    /// Number of byte-range shards per build.
    pub fn shards(mut self, shards: usize) -> Self {
        self.config = self.config.with_shards(shards);
        self
    }

    /// Size of the preprocessing worker pool.
    pub fn workers(mut self, workers: usize) -> Self {
        self.config = self.config.with_workers(workers);
        self
    }

    pub fn region(mut self, region: RegionPolicy) -> Self {
        self.config = self.config.with_region(region);
        self
    }

    pub fn overlap_policy(mut self, policy: OverlapPolicy) -> Self {
        self.config = self.config.with_overlap_policy(policy);
        self
    }

    /// Validate the configuration and create the service.
    pub fn build(self) -> Result<PopulationService> {
        PopulationService::new(self.config)
    }
}
