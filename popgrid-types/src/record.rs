use geo::Point;
use serde::{Deserialize, Serialize};

/// One census centroid: a population count at a population-weighted location.
///
/// # Examples
///
/// ```
/// use popgrid_types::record::PopulationRecord;
///
/// let tract = PopulationRecord::new(40.7128, -74.0060, 1_250);
/// assert_eq!(tract.point().x(), -74.0060);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PopulationRecord {
    /// Latitude in degrees, [-90, 90]
    pub latitude: f64,
    /// Longitude in degrees, [-180, 180]
    pub longitude: f64,
    /// Number of people represented by this centroid
    pub population: i64,
}

impl PopulationRecord {
    pub fn new(latitude: f64, longitude: f64, population: i64) -> Self {
        Self {
            latitude,
            longitude,
            population,
        }
    }

    /// The record location as a `geo::Point` (x = longitude, y = latitude).
    pub fn point(&self) -> Point {
        Point::new(self.longitude, self.latitude)
    }
}
