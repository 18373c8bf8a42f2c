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

//! Gauge-station feeds.
//!
//! Two agencies publish water levels for the area:
//!
//! - **WSV** (PEGELONLINE): federal waterways, one JSON array of stations with
//!   their time series, plus a per-station measurement endpoint.
//! - **NLWKN**: Lower Saxony state gauges, master data wrapped in
//!   `getStammdatenResult` and per-station data traces.
//!
//! Both are decoded into the common [`Station`] model. Only the fields the map
//! uses are read; everything else in the feeds is ignored.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};

use crate::geo::is_valid_lat_lng;

/// Shortname of the water-level time series in PEGELONLINE.
const WATER_LEVEL_SERIES: &str = "W";

/// Parameter name of the water-level trace in the NLWKN feed.
const NLWKN_WATER_LEVEL: &str = "Wasserstand";

/// Datum units that a centimetre reading can be lifted onto.
const HEIGHT_DATUMS: [&str; 2] = ["m. ü. NN", "m. ü. NHN"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StationAgency {
    Wsv,
    Nlwkn,
}

impl StationAgency {
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            StationAgency::Wsv => "WSV",
            StationAgency::Nlwkn => "NLWKN",
        }
    }
}

/// Zero point of a gauge relative to a height datum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeZero {
    pub unit: String,
    pub value: f64,
}

/// One water-level sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub value: f64,
    pub unit: String,
    /// Timestamp as published by the agency.
    pub time: String,
    pub timestamp: Option<DateTime<FixedOffset>>,
    /// Level above the height datum in metres, when it can be derived.
    pub level_above_datum: Option<f64>,
}

impl Reading {
    /// `HH:MM` of the sample.
    #[must_use]
    pub fn time_of_day(&self) -> String {
        if let Some(ts) = self.timestamp {
            return ts.format("%H:%M").to_string();
        }
        // NLWKN publishes "dd.mm.yyyy HH:MM[:SS]"
        let clock = self.time.split(' ').nth(1).unwrap_or(&self.time);
        clock.chars().take(5).collect()
    }
}

/// A gauge station placed on the map.
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub agency: StationAgency,
    /// UUID (WSV) or station number (NLWKN).
    pub id: String,
    pub name: String,
    pub water: String,
    pub latitude: f64,
    pub longitude: f64,
    /// River kilometre, WSV only.
    pub km: Option<f64>,
    pub unit: Option<String>,
    pub gauge_zero: Option<GaugeZero>,
    pub latest: Option<Reading>,
}

impl Station {
    /// Convert a raw reading into metres above the gauge's height datum.
    ///
    /// Only centimetre readings on gauges with a zero in `m. ü. NN` or
    /// `m. ü. NHN` can be converted.
    #[must_use]
    pub fn adjusted_level(&self, value: f64) -> Option<f64> {
        let gauge_zero = self.gauge_zero.as_ref()?;
        if self.unit.as_deref() != Some("cm") || !HEIGHT_DATUMS.contains(&gauge_zero.unit.as_str()) {
            return None;
        }
        Some(value / 100.0 + gauge_zero.value)
    }
}

// ---------------------------------------------------------------------------
// PEGELONLINE (WSV)

#[derive(Debug, Clone, Deserialize)]
pub struct WsvWater {
    #[serde(default)]
    pub shortname: String,
    #[serde(default)]
    pub longname: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsvGaugeZero {
    pub unit: String,
    pub value: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsvTimeseries {
    pub shortname: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default, rename = "gaugeZero")]
    pub gauge_zero: Option<WsvGaugeZero>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsvStation {
    pub uuid: String,
    #[serde(default)]
    pub longname: String,
    #[serde(default)]
    pub km: Option<f64>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    pub water: Option<WsvWater>,
    #[serde(default)]
    pub timeseries: Vec<WsvTimeseries>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsvMeasurement {
    pub timestamp: String,
    pub value: f64,
}

/// Keep stations that have a position and a water-level series.
#[must_use]
pub fn decode_wsv_stations(stations: Vec<WsvStation>) -> Vec<Station> {
    stations
        .into_iter()
        .filter_map(|station| {
            let (lat, lon) = (station.latitude?, station.longitude?);
            if !is_valid_lat_lng(lat, lon) {
                return None;
            }
            let series = station
                .timeseries
                .into_iter()
                .find(|s| s.shortname == WATER_LEVEL_SERIES)?;
            Some(Station {
                agency: StationAgency::Wsv,
                id: station.uuid,
                name: station.longname,
                water: station.water.map(|w| w.longname).unwrap_or_default(),
                latitude: lat,
                longitude: lon,
                km: station.km,
                unit: series.unit,
                gauge_zero: series.gauge_zero.map(|gz| GaugeZero {
                    unit: gz.unit,
                    value: gz.value,
                }),
                latest: None,
            })
        })
        .collect()
}

/// The most recent sample of a PEGELONLINE measurement series.
#[must_use]
pub fn decode_wsv_measurements(station: &Station, measurements: &[WsvMeasurement]) -> Option<Reading> {
    let last = measurements.last()?;
    Some(Reading {
        value: last.value,
        unit: station.unit.clone().unwrap_or_default(),
        time: last.timestamp.clone(),
        timestamp: DateTime::parse_from_rfc3339(&last.timestamp).ok(),
        level_above_datum: station.adjusted_level(last.value),
    })
}

// ---------------------------------------------------------------------------
// NLWKN

#[derive(Debug, Clone, Deserialize)]
pub struct NlwknTrace {
    #[serde(rename = "AktuellerMesswert", default, deserialize_with = "lenient_f64")]
    pub value: Option<f64>,
    #[serde(rename = "AktuellerMesswertNNM", default, deserialize_with = "lenient_f64")]
    pub value_above_datum: Option<f64>,
    #[serde(rename = "AktuellerMesswert_Zeitpunkt", default)]
    pub time: Option<String>,
    #[serde(rename = "ParameterEinheit", default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NlwknParameter {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Datenspuren", default)]
    pub traces: Vec<NlwknTrace>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NlwknStation {
    #[serde(rename = "STA_ID", deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "GewaesserName", default)]
    pub water: String,
    #[serde(rename = "Latitude", default, deserialize_with = "lenient_f64")]
    pub latitude: Option<f64>,
    #[serde(rename = "Longitude", default, deserialize_with = "lenient_f64")]
    pub longitude: Option<f64>,
    #[serde(rename = "Parameter", default)]
    pub parameters: Vec<NlwknParameter>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NlwknMasterData {
    #[serde(rename = "getStammdatenResult", default)]
    pub stations: Vec<NlwknStation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NlwknStationData {
    #[serde(rename = "getPegelDatenspurenResult")]
    pub station: Option<NlwknStation>,
}

fn nlwkn_reading(station: &NlwknStation) -> Option<Reading> {
    let trace = station.parameters.first()?.traces.first()?;
    Some(Reading {
        value: trace.value?,
        unit: trace.unit.clone().unwrap_or_default(),
        time: trace.time.clone().unwrap_or_default(),
        timestamp: None,
        level_above_datum: trace.value_above_datum,
    })
}

/// Keep stations whose primary parameter is the water level.
#[must_use]
pub fn decode_nlwkn_stations(data: NlwknMasterData) -> Vec<Station> {
    data.stations
        .into_iter()
        .filter(|station| {
            station
                .parameters
                .first()
                .is_some_and(|p| p.name == NLWKN_WATER_LEVEL)
        })
        .filter_map(|station| {
            // NLWKN publishes the axes swapped: "Latitude" carries the longitude.
            let (lon, lat) = (station.latitude?, station.longitude?);
            if !is_valid_lat_lng(lat, lon) {
                return None;
            }
            let latest = nlwkn_reading(&station);
            Some(Station {
                agency: StationAgency::Nlwkn,
                unit: latest.as_ref().map(|r| r.unit.clone()),
                id: station.id,
                name: station.name,
                water: station.water,
                latitude: lat,
                longitude: lon,
                km: None,
                gauge_zero: None,
                latest,
            })
        })
        .collect()
}

#[must_use]
pub fn decode_nlwkn_station_data(data: &NlwknStationData) -> Option<Reading> {
    nlwkn_reading(data.station.as_ref()?)
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    })
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}
