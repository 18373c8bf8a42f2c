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

//! Base-map catalog.
//!
//! The background layers under the overlays: two XYZ tile services and a
//! group of regional aerial-photo (DOP) WMS services that only cover parts of
//! northern Germany.

use flood_client::BoundingBox;

const TILE_SIZE: u32 = 256;

/// Half the circumference of the EPSG:3857 world square in metres.
const MERCATOR_EXTENT: f64 = 20_037_508.342_789_244;

/// Latitude limit of the Web Mercator projection.
const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_6;

/// Web Mercator projection utilities
#[derive(Debug)]
pub struct WebMercator;

impl WebMercator {
    /// Convert latitude to a fractional tile Y coordinate
    #[must_use]
    pub fn lat_to_y(lat: f64, zoom: u8) -> f64 {
        let lat_rad = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
        let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / std::f64::consts::PI) / 2.0;
        y * Self::tiles_per_axis(zoom)
    }

    /// Convert longitude to a fractional tile X coordinate
    #[must_use]
    pub fn lon_to_x(lon: f64, zoom: u8) -> f64 {
        ((lon + 180.0) / 360.0) * Self::tiles_per_axis(zoom)
    }

    /// Convert a tile Y coordinate back to latitude
    #[must_use]
    pub fn tile_to_lat(y: f64, zoom: u8) -> f64 {
        let n = Self::tiles_per_axis(zoom);
        (std::f64::consts::PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees()
    }

    /// Convert a tile X coordinate back to longitude
    #[must_use]
    pub fn tile_to_lon(x: f64, zoom: u8) -> f64 {
        x / Self::tiles_per_axis(zoom) * 360.0 - 180.0
    }

    fn tiles_per_axis(zoom: u8) -> f64 {
        2_f64.powi(i32::from(zoom))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
    pub zoom: u8,
}

impl TileCoord {
    #[must_use]
    pub fn new(x: u32, y: u32, zoom: u8) -> Self {
        Self { x, y, zoom }
    }

    /// The tile containing a point.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "tile indices are clamped to 0..2^zoom"
    )]
    pub fn containing(lat: f64, lon: f64, zoom: u8) -> Self {
        let max_index = WebMercator::tiles_per_axis(zoom) - 1.0;
        let x = WebMercator::lon_to_x(lon, zoom).floor().clamp(0.0, max_index);
        let y = WebMercator::lat_to_y(lat, zoom).floor().clamp(0.0, max_index);
        Self::new(x as u32, y as u32, zoom)
    }

    /// Geographic bounds of the tile.
    #[must_use]
    pub fn bounds(&self) -> BoundingBox {
        let (x, y) = (f64::from(self.x), f64::from(self.y));
        BoundingBox::from_corners(
            (WebMercator::tile_to_lat(y + 1.0, self.zoom), WebMercator::tile_to_lon(x, self.zoom)),
            (WebMercator::tile_to_lat(y, self.zoom), WebMercator::tile_to_lon(x + 1.0, self.zoom)),
        )
    }

    /// EPSG:3857 extent `[min_x, min_y, max_x, max_y]` in metres.
    #[must_use]
    pub fn mercator_extent(&self) -> [f64; 4] {
        let size = 2.0 * MERCATOR_EXTENT / WebMercator::tiles_per_axis(self.zoom);
        let min_x = -MERCATOR_EXTENT + f64::from(self.x) * size;
        let max_y = MERCATOR_EXTENT - f64::from(self.y) * size;
        [min_x, max_y - size, min_x + size, max_y]
    }
}

/// A slippy-map tile service.
#[derive(Debug, Clone, PartialEq)]
pub struct XyzLayer {
    pub name: &'static str,
    /// URL with `{s}`, `{z}`, `{x}` and `{y}` placeholders.
    pub template: &'static str,
    pub subdomains: &'static [char],
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub attribution: &'static str,
}

impl XyzLayer {
    #[must_use]
    pub fn tile_url(&self, tile: &TileCoord) -> String {
        let mut url = self
            .template
            .replace("{z}", &tile.zoom.to_string())
            .replace("{x}", &tile.x.to_string())
            .replace("{y}", &tile.y.to_string());
        if !self.subdomains.is_empty() {
            // Subdomain load balancing based on tile coordinates
            let index = (tile.x + tile.y) as usize % self.subdomains.len();
            url = url.replace("{s}", &self.subdomains[index].to_string());
        }
        url
    }
}

/// One WMS service with the area it has imagery for.
#[derive(Debug, Clone, PartialEq)]
pub struct WmsService {
    pub name: &'static str,
    pub url: &'static str,
    pub layers: &'static str,
    pub bounds: BoundingBox,
    pub attribution: &'static str,
}

impl WmsService {
    /// GetMap request for one 256 px tile, transparent PNG in EPSG:3857.
    #[must_use]
    pub fn get_map_url(&self, tile: &TileCoord) -> String {
        let [min_x, min_y, max_x, max_y] = tile.mercator_extent();
        format!(
            "{}?SERVICE=WMS&REQUEST=GetMap&VERSION=1.1.1&LAYERS={}&STYLES=&FORMAT=image%2Fpng\
             &TRANSPARENT=true&SRS=EPSG%3A3857&WIDTH={TILE_SIZE}&HEIGHT={TILE_SIZE}\
             &BBOX={min_x:.3},{min_y:.3},{max_x:.3},{max_y:.3}",
            self.url, self.layers
        )
    }
}

/// A base map made of several WMS services shown together.
#[derive(Debug, Clone, PartialEq)]
pub struct WmsGroup {
    pub name: &'static str,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub services: Vec<WmsService>,
}

impl WmsGroup {
    /// Services with imagery inside `bounds`.
    pub fn services_for<'a>(&'a self, bounds: &'a BoundingBox) -> impl Iterator<Item = &'a WmsService> {
        self.services.iter().filter(|s| s.bounds.intersects(bounds))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BaseMap {
    Xyz(XyzLayer),
    Wms(WmsGroup),
}

impl BaseMap {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            BaseMap::Xyz(layer) => layer.name,
            BaseMap::Wms(group) => group.name,
        }
    }

    #[must_use]
    pub fn zoom_range(&self) -> (u8, u8) {
        match self {
            BaseMap::Xyz(layer) => (layer.min_zoom, layer.max_zoom),
            BaseMap::Wms(group) => (group.min_zoom, group.max_zoom),
        }
    }

    /// URLs to request for the tile at `tile`. Empty outside the zoom range
    /// or the service area.
    #[must_use]
    pub fn tile_urls(&self, tile: &TileCoord) -> Vec<String> {
        let (min_zoom, max_zoom) = self.zoom_range();
        if !(min_zoom..=max_zoom).contains(&tile.zoom) {
            return Vec::new();
        }
        match self {
            BaseMap::Xyz(layer) => vec![layer.tile_url(tile)],
            BaseMap::Wms(group) => {
                let bounds = tile.bounds();
                group
                    .services_for(&bounds)
                    .map(|service| service.get_map_url(tile))
                    .collect()
            }
        }
    }
}

/// The base maps in switcher order. The first one is shown at start-up.
#[must_use]
pub fn catalog() -> Vec<BaseMap> {
    vec![
        BaseMap::Xyz(XyzLayer {
            name: "TopPlusOpen",
            template: "https://sgx.geodatenzentrum.de/wmts_topplus_open/tile/1.0.0/web/default/WEBMERCATOR/{z}/{y}/{x}.png",
            subdomains: &[],
            min_zoom: 5,
            max_zoom: 18,
            attribution: "© BKG, data sources: sg.geodatenzentrum.de",
        }),
        BaseMap::Xyz(XyzLayer {
            name: "OpenStreetMap",
            template: "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png",
            subdomains: &['a', 'b', 'c'],
            min_zoom: 5,
            max_zoom: 19,
            attribution: "© OpenStreetMap contributors",
        }),
        BaseMap::Wms(WmsGroup {
            name: "DOP",
            min_zoom: 12,
            max_zoom: 20,
            services: dop_services(),
        }),
    ]
}

fn dop_services() -> Vec<WmsService> {
    vec![
        WmsService {
            name: "Hamburg",
            url: "https://geodienste.hamburg.de/HH_WMS_DOP",
            layers: "DOP",
            bounds: BoundingBox::from_corners((53.3, 8.4), (54.0, 10.4)),
            attribution: "© Freie und Hansestadt Hamburg, LGV",
        },
        WmsService {
            name: "Lower Saxony",
            url: "https://opendata.lgln.niedersachsen.de/doorman/noauth/dop_wms",
            layers: "ni_dop20",
            bounds: BoundingBox::from_corners((51.29, 6.6), (53.9, 11.6)),
            attribution: "© LGLN, CC BY 4.0",
        },
        WmsService {
            name: "North Rhine-Westphalia",
            url: "https://www.wms.nrw.de/geobasis/wms_nw_dop",
            layers: "nw_dop_rgb",
            bounds: BoundingBox::from_corners((50.3, 5.8), (52.4, 9.5)),
            attribution: "© Bezirksregierung Köln",
        },
        WmsService {
            name: "Schleswig-Holstein",
            url: "https://dienste.gdi-sh.de/WMS_SH_DOP20col_OpenGBD",
            layers: "sh_dop20_rgb",
            bounds: BoundingBox::from_corners((55.0, 7.8), (53.4, 11.4)),
            attribution: "© GeoBasis-DE/LVermGeo SH, CC BY 4.0",
        },
        WmsService {
            name: "Bremen",
            url: "https://geodienste.bremen.de/wms_dop20_2023",
            layers: "DOP20_2023_HB,DOP20_2023_BHV",
            bounds: BoundingBox::from_corners((53.0, 8.4), (53.61, 9.0)),
            attribution: "© Landesamt GeoInformation Bremen",
        },
    ]
}

/// Look up a base map by name, ignoring case.
#[must_use]
pub fn find(name: &str) -> Option<BaseMap> {
    catalog()
        .into_iter()
        .find(|basemap| basemap.name().eq_ignore_ascii_case(name))
}
