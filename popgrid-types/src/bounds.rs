use geo::{Point, Rect};
use serde::{Deserialize, Serialize};

/// An indexed geographic region.
///
/// Wraps a `geo::Rect` where x is longitude and y is latitude. The rectangle
/// is always normalised (`west <= east`, `south <= north`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// The underlying geometric rectangle
    pub rect: Rect,
}

impl Bounds {
    /// Create a region from its four edges.
    ///
    /// # Arguments
    ///
    /// * `west` - Minimum longitude
    /// * `south` - Minimum latitude
    /// * `east` - Maximum longitude
    /// * `north` - Maximum latitude
    ///
    /// # Examples
    ///
    /// ```
    /// use popgrid_types::bounds::Bounds;
    ///
    /// let usa = Bounds::new(-125.0, 24.396308, -66.93457, 49.384358);
    /// assert_eq!(usa.north(), 49.384358);
    /// ```
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            rect: Rect::new(
                geo::coord! { x: west, y: south },
                geo::coord! { x: east, y: north },
            ),
        }
    }

    /// Create a zero-area region around a single coordinate.
    pub fn from_point(longitude: f64, latitude: f64) -> Self {
        Self::new(longitude, latitude, longitude, latitude)
    }

    /// Create a region from a `geo::Rect`.
    pub fn from_rect(rect: Rect) -> Self {
        Self { rect }
    }

    pub fn west(&self) -> f64 {
        self.rect.min().x
    }

    pub fn east(&self) -> f64 {
        self.rect.max().x
    }

    pub fn south(&self) -> f64 {
        self.rect.min().y
    }

    pub fn north(&self) -> f64 {
        self.rect.max().y
    }

    /// Longitude span in degrees.
    pub fn width(&self) -> f64 {
        self.east() - self.west()
    }

    /// Latitude span in degrees.
    pub fn height(&self) -> f64 {
        self.north() - self.south()
    }

    /// Get the center point of the region.
    pub fn center(&self) -> Point {
        self.rect.center().into()
    }

    /// Check whether a coordinate lies in the region, edges included.
    pub fn contains(&self, longitude: f64, latitude: f64) -> bool {
        longitude >= self.west()
            && longitude <= self.east()
            && latitude >= self.south()
            && latitude <= self.north()
    }

    /// Check whether `other` lies entirely inside this region.
    pub fn contains_bounds(&self, other: &Bounds) -> bool {
        other.west() >= self.west()
            && other.east() <= self.east()
            && other.south() >= self.south()
            && other.north() <= self.north()
    }

    /// Check whether `other` lies inside this region without touching any of its edges.
    pub fn strictly_contains_bounds(&self, other: &Bounds) -> bool {
        other.west() > self.west()
            && other.east() < self.east()
            && other.south() > self.south()
            && other.north() < self.north()
    }

    /// Grow the region so that it includes the given coordinate.
    pub fn include(&mut self, longitude: f64, latitude: f64) {
        *self = Self::new(
            self.west().min(longitude),
            self.south().min(latitude),
            self.east().max(longitude),
            self.north().max(latitude),
        );
    }

    /// Smallest region covering both `self` and `other`.
    pub fn union(&self, other: &Bounds) -> Bounds {
        Self::new(
            self.west().min(other.west()),
            self.south().min(other.south()),
            self.east().max(other.east()),
            self.north().max(other.north()),
        )
    }

    /// Grow a flat side by `margin` degrees in each direction.
    ///
    /// Sides that already have a positive span are left untouched.
    pub fn pad_flat_sides(&self, margin: f64) -> Bounds {
        let (west, east) = if self.width() > 0.0 {
            (self.west(), self.east())
        } else {
            (self.west() - margin, self.east() + margin)
        };
        let (south, north) = if self.height() > 0.0 {
            (self.south(), self.north())
        } else {
            (self.south() - margin, self.north() + margin)
        };
        Self::new(west, south, east, north)
    }

    /// Intersect a query rectangle with this region.
    ///
    /// Returns `None` when the query is degenerate, inverted or non-finite, or
    /// when the intersection has no area.
    ///
    /// # Examples
    ///
    /// ```
    /// use popgrid_types::bounds::{Bounds, QueryRectangle};
    ///
    /// let region = Bounds::new(0.0, 0.0, 10.0, 10.0);
    /// let clipped = region.clip(&QueryRectangle::new(5.0, -5.0, 20.0, 5.0)).unwrap();
    /// assert_eq!((clipped.west(), clipped.south(), clipped.east(), clipped.north()), (5.0, 0.0, 10.0, 5.0));
    ///
    /// assert!(region.clip(&QueryRectangle::new(20.0, 0.0, 30.0, 5.0)).is_none());
    /// ```
    pub fn clip(&self, query: &QueryRectangle) -> Option<Bounds> {
        if query.is_empty() {
            return None;
        }

        let west = query.west.max(self.west());
        let east = query.east.min(self.east());
        let south = query.south.max(self.south());
        let north = query.north.min(self.north());

        if west >= east || south >= north {
            return None;
        }

        Some(Self::new(west, south, east, north))
    }
}

impl From<QueryRectangle> for Bounds {
    fn from(query: QueryRectangle) -> Self {
        Self::new(query.west, query.south, query.east, query.north)
    }
}

/// A caller-supplied query rectangle in degrees.
///
/// Unlike [`Bounds`] this is kept exactly as given: an inverted rectangle
/// (`west > east` or `south > north`) stays inverted so that it can be
/// answered with an empty result instead of being silently flipped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryRectangle {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl QueryRectangle {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// A rectangle with no width or no height.
    pub fn is_degenerate(&self) -> bool {
        self.west == self.east || self.south == self.north
    }

    pub fn is_inverted(&self) -> bool {
        self.west > self.east || self.south > self.north
    }

    pub fn is_finite(&self) -> bool {
        self.west.is_finite() && self.south.is_finite() && self.east.is_finite() && self.north.is_finite()
    }

    /// True when the rectangle cannot contain any population.
    pub fn is_empty(&self) -> bool {
        !self.is_finite() || self.is_degenerate() || self.is_inverted()
    }
}

impl From<Bounds> for QueryRectangle {
    fn from(bounds: Bounds) -> Self {
        Self::new(bounds.west(), bounds.south(), bounds.east(), bounds.north())
    }
}
