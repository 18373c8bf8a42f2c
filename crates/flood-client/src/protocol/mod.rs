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

//! Protocol layer: the messages exchanged between the controller and the
//! data sources, plus the wire formats of the remote APIs.
//!
//! - [`dgm1`]: the backend elevation tile API (terrain and custom threshold layers)
//! - [`stations`]: the WSV and NLWKN gauge-station APIs

pub mod dgm1;
pub mod stations;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::{BoundingBox, Viewport};
use crate::sink::MapControl;

pub use dgm1::{CustomSection, Dgm1Query, Dgm1Response, TerrainSection, TileDescriptor};
pub use stations::{GaugeZero, Reading, Station, StationAgency};

/// Errors that can occur while fetching overlay data.
///
/// None of these are fatal: the controller logs them and keeps the previously
/// rendered data on screen.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("source unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
                url: err.url().map(ToString::to_string).unwrap_or_default(),
            }
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// A named, independently toggled map overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    /// Colored elevation raster.
    Terrain,
    /// Flood-threshold raster, parameterized by a water level.
    Custom,
    /// Water-level gauge stations.
    Stations,
}

impl LayerKind {
    pub const ALL: [LayerKind; 3] = [LayerKind::Terrain, LayerKind::Custom, LayerKind::Stations];

    /// Name used on the wire and in the layer switcher.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LayerKind::Terrain => "terrain",
            LayerKind::Custom => "custom",
            LayerKind::Stations => "stations",
        }
    }

    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            LayerKind::Terrain => "terrain",
            LayerKind::Custom => "custom",
            LayerKind::Stations => "water level stations",
        }
    }

    /// Whether requests for this layer carry a user-adjustable parameter.
    #[must_use]
    pub fn is_parameterized(self) -> bool {
        matches!(self, LayerKind::Custom)
    }

    /// Whether the layer is taken off the map while zoomed out past its minimum zoom.
    #[must_use]
    pub fn hides_below_min_zoom(self) -> bool {
        matches!(self, LayerKind::Stations)
    }

    /// The UI control shown alongside the layer while it is visible.
    #[must_use]
    pub fn control(self) -> Option<MapControl> {
        match self {
            LayerKind::Terrain => Some(MapControl::ColorScale),
            LayerKind::Custom => Some(MapControl::ThresholdInput),
            LayerKind::Stations => None,
        }
    }
}

impl std::fmt::Display for LayerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LayerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "terrain" => Ok(LayerKind::Terrain),
            "custom" => Ok(LayerKind::Custom),
            "stations" | "water level stations" => Ok(LayerKind::Stations),
            other => Err(format!("unknown layer: {other}")),
        }
    }
}

/// Identifier of one issued fetch. Strictly increasing per controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A fetch the controller wants issued, scoped to a viewport.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub id: RequestId,
    pub layer: LayerKind,
    pub viewport: Viewport,
    /// Threshold for parameterized layers.
    pub parameter: Option<f64>,
}

/// Renderable content of one layer.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerContent {
    Raster(Vec<TileDescriptor>),
    Stations(Vec<Station>),
}

impl LayerContent {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            LayerContent::Raster(tiles) => tiles.len(),
            LayerContent::Stations(stations) => stations.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of a successful fetch for one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerPayload {
    /// Area the data covers, as declared by the source. May be larger than the request.
    pub bbox: BoundingBox,
    pub content: LayerContent,
    /// Color-scale image reference (terrain layer).
    pub colormap: Option<String>,
    /// Threshold the source actually applied (custom layer).
    pub level: Option<f64>,
}

impl LayerPayload {
    #[must_use]
    pub fn raster(bbox: BoundingBox, tiles: Vec<TileDescriptor>) -> Self {
        Self {
            bbox,
            content: LayerContent::Raster(tiles),
            colormap: None,
            level: None,
        }
    }

    #[must_use]
    pub fn stations(stations: Vec<Station>) -> Self {
        Self {
            bbox: BoundingBox::WORLD,
            content: LayerContent::Stations(stations),
            colormap: None,
            level: None,
        }
    }

    #[must_use]
    pub fn with_colormap(mut self, colormap: impl Into<String>) -> Self {
        self.colormap = Some(colormap.into());
        self
    }

    #[must_use]
    pub fn with_level(mut self, level: f64) -> Self {
        self.level = Some(level);
        self
    }
}
