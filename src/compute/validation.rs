//! Parsing and validation of census centroid lines.

use crate::error::RecordError;
use popgrid_types::PopulationRecord;

/// Minimum number of comma-separated fields in a data line.
pub const FIELDS_PER_LINE: usize = 7;
/// Column holding the population count.
pub const POPULATION_FIELD: usize = 4;
/// Column holding the centroid latitude.
pub const LATITUDE_FIELD: usize = 5;
/// Column holding the centroid longitude.
pub const LONGITUDE_FIELD: usize = 6;

/// Validates that a coordinate is finite and on the globe.
///
/// Longitude: [-180.0, 180.0], Latitude: [-90.0, 90.0]
///
/// # Examples
///
/// ```
/// use popgrid::compute::validation::validate_coordinate;
///
/// assert!(validate_coordinate(40.7128, -74.0060).is_ok());
/// assert!(validate_coordinate(95.0, -74.0).is_err());
/// assert!(validate_coordinate(40.0, 200.0).is_err());
/// ```
pub fn validate_coordinate(latitude: f64, longitude: f64) -> Result<(), RecordError> {
    if !longitude.is_finite() {
        return Err(RecordError::OutOfRange(format!(
            "Longitude must be finite, got: {}",
            longitude
        )));
    }

    if !latitude.is_finite() {
        return Err(RecordError::OutOfRange(format!(
            "Latitude must be finite, got: {}",
            latitude
        )));
    }

    if !(-180.0..=180.0).contains(&longitude) {
        return Err(RecordError::OutOfRange(format!(
            "Longitude out of range [-180.0, 180.0]: {}",
            longitude
        )));
    }

    if !(-90.0..=90.0).contains(&latitude) {
        return Err(RecordError::OutOfRange(format!(
            "Latitude out of range [-90.0, 90.0]: {}",
            latitude
        )));
    }

    Ok(())
}

/// Parses one data line into a validated record.
///
/// Fields are located by position; any columns besides population, latitude
/// and longitude are ignored.
///
/// # Examples
///
/// ```
/// use popgrid::compute::validation::parse_line;
///
/// let record = parse_line("01,001,020100,1,698,+32.481531,-086.486731").unwrap();
/// assert_eq!(record.population, 698);
/// assert_eq!(record.latitude, 32.481531);
///
/// assert!(parse_line("01,001,020100").is_err());
/// ```
pub fn parse_line(line: &str) -> Result<PopulationRecord, RecordError> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < FIELDS_PER_LINE {
        return Err(RecordError::TooFewFields {
            expected: FIELDS_PER_LINE,
            found: fields.len(),
        });
    }

    let population = parse_field::<i64>(fields[POPULATION_FIELD], "population")?;
    let latitude = parse_field::<f64>(fields[LATITUDE_FIELD], "latitude")?;
    let longitude = parse_field::<f64>(fields[LONGITUDE_FIELD], "longitude")?;

    if population < 0 {
        return Err(RecordError::NegativePopulation(population));
    }
    validate_coordinate(latitude, longitude)?;

    Ok(PopulationRecord::new(latitude, longitude, population))
}

fn parse_field<T: std::str::FromStr>(raw: &str, field: &'static str) -> Result<T, RecordError> {
    let value = raw.trim();
    value.parse::<T>().map_err(|_| RecordError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}
