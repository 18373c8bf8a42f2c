// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Geographic primitives shared by the controller and the data sources.
//!
//! All coordinates are WGS84 degrees. Projection into tile CRSs is left to
//! the backend and the renderer.

use serde::{Deserialize, Serialize};

/// Check that a latitude/longitude pair lies on the globe.
#[must_use]
pub fn is_valid_lat_lng(lat: f64, lon: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Axis-aligned bounding box in geographic coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// The whole globe.
    pub const WORLD: Self = Self {
        min_lat: -90.0,
        min_lon: -180.0,
        max_lat: 90.0,
        max_lon: 180.0,
    };

    #[must_use]
    pub const fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// Build a box from two opposite corners given in any order.
    #[must_use]
    pub fn from_corners(a: (f64, f64), b: (f64, f64)) -> Self {
        Self {
            min_lat: a.0.min(b.0),
            min_lon: a.1.min(b.1),
            max_lat: a.0.max(b.0),
            max_lon: a.1.max(b.1),
        }
    }

    /// Build a box from the backend's `[lon_min, lat_min, lon_max, lat_max]` order.
    #[must_use]
    pub fn from_lon_lat(bbox: [f64; 4]) -> Self {
        let [min_lon, min_lat, max_lon, max_lat] = bbox;
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// Clip to [`Self::WORLD`]. A zoomed-out web map reports longitudes past
    /// the antimeridian. Non-finite values stay non-finite.
    #[must_use]
    pub fn clamped_to_world(&self) -> Self {
        Self {
            min_lat: self.min_lat.clamp(-90.0, 90.0),
            min_lon: self.min_lon.clamp(-180.0, 180.0),
            max_lat: self.max_lat.clamp(-90.0, 90.0),
            max_lon: self.max_lon.clamp(-180.0, 180.0),
        }
    }

    /// Finite, ordered and on the globe.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        [self.min_lat, self.min_lon, self.max_lat, self.max_lon]
            .iter()
            .all(|v| v.is_finite())
            && self.min_lat <= self.max_lat
            && self.min_lon <= self.max_lon
            && is_valid_lat_lng(self.min_lat, self.min_lon)
            && is_valid_lat_lng(self.max_lat, self.max_lon)
    }

    /// True when `other` lies fully inside this box (edges inclusive).
    #[must_use]
    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.min_lat >= self.min_lat
            && other.min_lon >= self.min_lon
            && other.max_lat <= self.max_lat
            && other.max_lon <= self.max_lon
    }

    #[must_use]
    pub fn contains_point(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }

    #[must_use]
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
            && self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{:.5}, {:.5}] - [{:.5}, {:.5}]",
            self.min_lat, self.min_lon, self.max_lat, self.max_lon
        )
    }
}

/// The visible part of the map: its bounds plus the zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub bounds: BoundingBox,
    pub zoom: u8,
}

impl Viewport {
    #[must_use]
    pub const fn new(bounds: BoundingBox, zoom: u8) -> Self {
        Self { bounds, zoom }
    }
}
