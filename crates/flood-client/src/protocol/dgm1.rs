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

//! Wire format of the backend DGM1 elevation tile API.
//!
//! Request: `GET /api/dgm1?lat_min=..&lon_min=..&lat_max=..&lon_max=..&terrain=..&custom=..[&custom_level=..]`
//!
//! Response: `{"bbox": [lon_min, lat_min, lon_max, lat_max], "terrain": {...}, "custom": {...}}`
//! where each layer section is optional. The declared `bbox` is the 1 km grid
//! cover of the request and is usually larger than the requested viewport.

use serde::{Deserialize, Serialize};

use super::{FetchError, FetchRequest, LayerContent, LayerKind, LayerPayload};
use crate::geo::BoundingBox;

/// Path of the tile endpoint relative to the backend base URL.
pub const DGM1_PATH: &str = "/api/dgm1";

/// Threshold the backend applies when `custom_level` is omitted.
pub const DEFAULT_CUSTOM_LEVEL: f64 = 19.2;

/// One georeferenced raster image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileDescriptor {
    /// Image URL or `data:` URI.
    #[serde(rename = "rasterImage")]
    pub raster_image: String,
    /// `[left, bottom, right, top]` in the tile's own CRS.
    pub bounds: [f64; 4],
    /// CRS identifier, e.g. `EPSG:25832`.
    pub crs: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainSection {
    #[serde(default)]
    pub colormap: Option<String>,
    #[serde(default)]
    pub tiles: Vec<TileDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomSection {
    #[serde(default)]
    pub level: Option<f64>,
    #[serde(default)]
    pub tiles: Vec<TileDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dgm1Response {
    pub bbox: [f64; 4],
    #[serde(default)]
    pub terrain: Option<TerrainSection>,
    #[serde(default)]
    pub custom: Option<CustomSection>,
}

impl Dgm1Response {
    /// Extract the section for `layer` as a payload.
    ///
    /// A missing section yields an empty payload, which the controller treats
    /// as "nothing to show". An unusable `bbox` is a malformed response.
    pub fn into_payload(self, layer: LayerKind) -> Result<LayerPayload, FetchError> {
        let bbox = BoundingBox::from_lon_lat(self.bbox);
        if !bbox.is_valid() {
            return Err(FetchError::Malformed(format!(
                "invalid bbox {:?}",
                self.bbox
            )));
        }

        match layer {
            LayerKind::Terrain => {
                let section = self.terrain.unwrap_or(TerrainSection {
                    colormap: None,
                    tiles: Vec::new(),
                });
                Ok(LayerPayload {
                    bbox,
                    content: LayerContent::Raster(section.tiles),
                    colormap: section.colormap,
                    level: None,
                })
            }
            LayerKind::Custom => {
                let section = self.custom.unwrap_or(CustomSection {
                    level: None,
                    tiles: Vec::new(),
                });
                Ok(LayerPayload {
                    bbox,
                    content: LayerContent::Raster(section.tiles),
                    colormap: None,
                    level: section.level,
                })
            }
            LayerKind::Stations => Err(FetchError::Unavailable(
                "the tile API does not serve stations".to_string(),
            )),
        }
    }
}

/// Query parameters for one tile request.
#[derive(Debug, Clone, PartialEq)]
pub struct Dgm1Query {
    pub bounds: BoundingBox,
    pub terrain: bool,
    pub custom: bool,
    pub custom_level: Option<f64>,
}

impl Dgm1Query {
    /// Build the query for a controller request. Only raster layers map to a query.
    #[must_use]
    pub fn for_request(request: &FetchRequest) -> Option<Self> {
        let bounds = request.viewport.bounds;
        match request.layer {
            LayerKind::Terrain => Some(Self {
                bounds,
                terrain: true,
                custom: false,
                custom_level: None,
            }),
            LayerKind::Custom => Some(Self {
                bounds,
                terrain: false,
                custom: true,
                custom_level: request.parameter,
            }),
            LayerKind::Stations => None,
        }
    }

    /// Query string pairs in the order the backend documents them.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("lat_min", self.bounds.min_lat.to_string()),
            ("lon_min", self.bounds.min_lon.to_string()),
            ("lat_max", self.bounds.max_lat.to_string()),
            ("lon_max", self.bounds.max_lon.to_string()),
            ("terrain", self.terrain.to_string()),
            ("custom", self.custom.to_string()),
        ];
        if let Some(level) = self.custom_level {
            pairs.push(("custom_level", level.to_string()));
        }
        pairs
    }
}
