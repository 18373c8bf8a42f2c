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

//! Overlay data sources.
//!
//! [`OverlaySource`] is the seam between the controller runtime and the
//! network. [`HttpSource`] talks to the real services:
//!
//! - the backend elevation tile API for the terrain and custom layers
//! - PEGELONLINE (WSV) and the NLWKN gauge API for the stations layer

use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};
use serde::de::DeserializeOwned;

use crate::protocol::dgm1::{Dgm1Query, Dgm1Response, DGM1_PATH};
use crate::protocol::stations::{
    decode_nlwkn_station_data, decode_nlwkn_stations, decode_wsv_measurements,
    decode_wsv_stations, NlwknMasterData, NlwknStationData, WsvMeasurement, WsvStation,
};
use crate::protocol::{
    FetchError, FetchRequest, LayerKind, LayerPayload, Reading, Station, StationAgency,
};

/// Default backend serving `/api/dgm1`.
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";

/// PEGELONLINE REST API v2.
pub const DEFAULT_WSV_URL: &str = "https://pegelonline.wsv.de/webservices/rest-api/v2";

/// NLWKN public gauge API.
pub const DEFAULT_NLWKN_URL: &str = "https://bis.azure-api.net/PegelonlinePublic/REST";

/// Window of recent WSV measurements requested for a reading.
const WSV_MEASUREMENT_WINDOW: &str = "PT3H";

/// Something that can answer a controller [`FetchRequest`].
pub trait OverlaySource: Send + Sync + 'static {
    fn fetch(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = Result<LayerPayload, FetchError>> + Send;
}

/// Endpoints and limits for [`HttpSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct HttpSourceConfig {
    pub backend_url: String,
    pub wsv_url: String,
    pub nlwkn_url: String,
    /// NLWKN stations are skipped without a key.
    pub nlwkn_api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            wsv_url: DEFAULT_WSV_URL.to_string(),
            nlwkn_url: DEFAULT_NLWKN_URL.to_string(),
            nlwkn_api_key: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// [`OverlaySource`] backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    config: HttpSourceConfig,
}

impl HttpSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("flood-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    #[must_use]
    pub fn config(&self) -> &HttpSourceConfig {
        &self.config
    }

    #[must_use]
    pub fn dgm1_url(&self) -> String {
        format!("{}{DGM1_PATH}", trim_base(&self.config.backend_url))
    }

    #[must_use]
    pub fn wsv_stations_url(&self) -> String {
        format!("{}/stations.json", trim_base(&self.config.wsv_url))
    }

    #[must_use]
    pub fn wsv_measurements_url(&self, uuid: &str) -> String {
        format!(
            "{}/stations/{uuid}/W/measurements.json",
            trim_base(&self.config.wsv_url)
        )
    }

    #[must_use]
    pub fn nlwkn_stations_url(&self) -> String {
        format!("{}/stammdaten/stationen/All", trim_base(&self.config.nlwkn_url))
    }

    #[must_use]
    pub fn nlwkn_station_url(&self, id: &str) -> String {
        format!(
            "{}/station/{id}/datenspuren/parameter/1/tage/-1",
            trim_base(&self.config.nlwkn_url)
        )
    }

    /// All gauge stations of both agencies.
    ///
    /// One agency failing is logged and the other's stations are returned.
    pub async fn stations(&self) -> Result<Vec<Station>, FetchError> {
        let (wsv, nlwkn) = tokio::join!(self.wsv_stations(), self.nlwkn_stations());
        merge_agencies(wsv, nlwkn)
    }

    /// Most recent water level of `station`.
    pub async fn latest_reading(&self, station: &Station) -> Result<Option<Reading>, FetchError> {
        match station.agency {
            StationAgency::Wsv => {
                let measurements: Vec<WsvMeasurement> = self
                    .get_json(
                        &self.wsv_measurements_url(&station.id),
                        &[("start", WSV_MEASUREMENT_WINDOW.to_string())],
                    )
                    .await?;
                Ok(decode_wsv_measurements(station, &measurements))
            }
            StationAgency::Nlwkn => {
                let key = self.nlwkn_key()?;
                let data: NlwknStationData = self
                    .get_json(&self.nlwkn_station_url(&station.id), &[("key", key.to_string())])
                    .await?;
                Ok(decode_nlwkn_station_data(&data))
            }
        }
    }

    async fn fetch_raster(&self, request: &FetchRequest) -> Result<LayerPayload, FetchError> {
        let query = Dgm1Query::for_request(request).ok_or_else(|| {
            FetchError::Unavailable(format!("no tile query for layer {}", request.layer))
        })?;
        let response: Dgm1Response = self.get_json(&self.dgm1_url(), &query.to_pairs()).await?;
        response.into_payload(request.layer)
    }

    async fn wsv_stations(&self) -> Result<Vec<Station>, FetchError> {
        let stations: Vec<WsvStation> = self
            .get_json(
                &self.wsv_stations_url(),
                &[("includeTimeseries", "true".to_string())],
            )
            .await?;
        Ok(decode_wsv_stations(stations))
    }

    async fn nlwkn_stations(&self) -> Result<Vec<Station>, FetchError> {
        let Ok(key) = self.nlwkn_key() else {
            debug!("No NLWKN API key configured, skipping NLWKN stations");
            return Ok(Vec::new());
        };
        let data: NlwknMasterData = self
            .get_json(&self.nlwkn_stations_url(), &[("key", key.to_string())])
            .await?;
        Ok(decode_nlwkn_stations(data))
    }

    fn nlwkn_key(&self) -> Result<&str, FetchError> {
        self.config
            .nlwkn_api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| FetchError::Unavailable("no NLWKN API key configured".to_string()))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        debug!("GET {url}");
        let response = self.client.get(url).query(query).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

impl OverlaySource for HttpSource {
    async fn fetch(&self, request: &FetchRequest) -> Result<LayerPayload, FetchError> {
        match request.layer {
            LayerKind::Terrain | LayerKind::Custom => self.fetch_raster(request).await,
            LayerKind::Stations => Ok(LayerPayload::stations(self.stations().await?)),
        }
    }
}

fn trim_base(url: &str) -> &str {
    url.trim_end_matches('/')
}

fn merge_agencies(
    wsv: Result<Vec<Station>, FetchError>,
    nlwkn: Result<Vec<Station>, FetchError>,
) -> Result<Vec<Station>, FetchError> {
    if let (Err(wsv), Err(nlwkn)) = (&wsv, &nlwkn) {
        return Err(FetchError::Unavailable(format!(
            "WSV: {wsv}; NLWKN: {nlwkn}"
        )));
    }

    let mut stations = Vec::new();
    for (agency, result) in [(StationAgency::Wsv, wsv), (StationAgency::Nlwkn, nlwkn)] {
        match result {
            Ok(list) => {
                info!("Loaded {} {} station(s)", list.len(), agency.display_name());
                stations.extend(list);
            }
            Err(e) => warn!("{} stations unavailable: {e}", agency.display_name()),
        }
    }
    Ok(stations)
}
