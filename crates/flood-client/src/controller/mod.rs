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

//! Viewport fetch controller.
//!
//! Decides, for every map event, whether a layer needs new data. The
//! controller performs no I/O: operations return the [`FetchRequest`]s the
//! host has to issue, and the host reports each outcome back through
//! [`FetchController::on_fetch_completed`]. At most one request per layer is
//! outstanding at any time; triggers that arrive while a layer is fetching
//! are dropped, not queued.

mod legend;
mod state;

use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::geo::Viewport;
use crate::protocol::dgm1::DEFAULT_CUSTOM_LEVEL;
use crate::protocol::{FetchError, FetchRequest, LayerKind, LayerPayload, RequestId};
use crate::sink::RenderSink;

pub use legend::{BandColor, LegendBand, ThresholdLegend};
pub use state::LayerFetchState;

/// Minimum zoom for the elevation rasters.
pub const RASTER_MIN_ZOOM: u8 = 14;

/// Minimum zoom at which gauge stations are shown.
pub const STATIONS_MIN_ZOOM: u8 = 10;

/// Configuration for the fetch controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerConfig {
    /// Minimum zoom for the terrain and custom layers.
    pub raster_min_zoom: u8,
    /// Minimum zoom for the stations layer.
    pub stations_min_zoom: u8,
    /// Threshold used by the custom layer until the user sets one.
    pub default_threshold: f64,
    /// Re-evaluate a layer once after a successful fetch if the viewport or
    /// parameter moved while the request was in flight. Off by default:
    /// triggers that arrive during a fetch are dropped.
    pub catch_up_after_fetch: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            raster_min_zoom: RASTER_MIN_ZOOM,
            stations_min_zoom: STATIONS_MIN_ZOOM,
            default_threshold: DEFAULT_CUSTOM_LEVEL,
            catch_up_after_fetch: false,
        }
    }
}

impl ControllerConfig {
    #[must_use]
    pub fn min_zoom(&self, layer: LayerKind) -> u8 {
        match layer {
            LayerKind::Terrain | LayerKind::Custom => self.raster_min_zoom,
            LayerKind::Stations => self.stations_min_zoom,
        }
    }
}

/// Events emitted by the host map surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MapEvent {
    /// The map was panned or zoomed.
    ViewportChanged { viewport: Viewport },
    /// A layer was toggled in the layer switcher.
    LayerVisibilityChanged { layer: LayerKind, visible: bool },
    /// The user edited a layer parameter. `value` is the raw input text.
    ParameterChanged { layer: LayerKind, value: String },
}

/// Outcome of a fetch, reported back by the host.
#[derive(Debug)]
pub struct FetchCompletion {
    pub request: FetchRequest,
    pub result: Result<LayerPayload, FetchError>,
}

/// A visible layer and the parameter it is currently requested with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveLayer {
    pub layer: LayerKind,
    pub parameter: Option<f64>,
}

#[derive(Debug, Clone, Default)]
struct LayerSlot {
    state: LayerFetchState,
    visible: bool,
    /// Current parameter (input value) for parameterized layers.
    parameter: Option<f64>,
    /// Whether the sink currently shows this layer's data.
    rendered: bool,
}

fn render<R: RenderSink>(sink: &mut R, layer: LayerKind, payload: &LayerPayload) {
    sink.replace_layer(layer, &payload.content);
    if let Some(colormap) = &payload.colormap {
        sink.update_color_scale(colormap);
    }
}

/// Per-layer fetch state machine driving a [`RenderSink`].
#[derive(Debug)]
pub struct FetchController<R: RenderSink> {
    config: ControllerConfig,
    slots: BTreeMap<LayerKind, LayerSlot>,
    viewport: Option<Viewport>,
    sink: R,
    next_request: u64,
}

impl<R: RenderSink> FetchController<R> {
    /// Create a controller with every layer hidden and no fetch history.
    #[must_use]
    pub fn new(config: ControllerConfig, sink: R) -> Self {
        let slots = LayerKind::ALL
            .into_iter()
            .map(|layer| {
                let slot = LayerSlot {
                    parameter: layer.is_parameterized().then_some(config.default_threshold),
                    ..LayerSlot::default()
                };
                (layer, slot)
            })
            .collect();

        Self {
            config,
            slots,
            viewport: None,
            sink,
            next_request: 1,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    #[must_use]
    pub fn sink(&self) -> &R {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut R {
        &mut self.sink
    }

    #[must_use]
    pub fn into_sink(self) -> R {
        self.sink
    }

    /// Last viewport reported by the host.
    #[must_use]
    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    #[must_use]
    pub fn state(&self, layer: LayerKind) -> Option<&LayerFetchState> {
        self.slots.get(&layer).map(|slot| &slot.state)
    }

    #[must_use]
    pub fn is_visible(&self, layer: LayerKind) -> bool {
        self.slots.get(&layer).is_some_and(|slot| slot.visible)
    }

    /// Current parameter of a parameterized layer.
    #[must_use]
    pub fn parameter(&self, layer: LayerKind) -> Option<f64> {
        self.slots.get(&layer).and_then(|slot| slot.parameter)
    }

    /// The visible layers with the parameters they are requested with.
    #[must_use]
    pub fn active_layers(&self) -> Vec<ActiveLayer> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.visible)
            .map(|(layer, slot)| ActiveLayer {
                layer: *layer,
                parameter: slot.parameter,
            })
            .collect()
    }

    /// Dispatch a host event to the matching operation.
    pub fn handle(&mut self, event: MapEvent) -> Vec<FetchRequest> {
        match event {
            MapEvent::ViewportChanged { viewport } => self.on_viewport_changed(viewport),
            MapEvent::LayerVisibilityChanged { layer, visible } => self
                .on_layer_visibility_changed(layer, visible)
                .into_iter()
                .collect(),
            MapEvent::ParameterChanged { layer, value } => self
                .on_parameter_changed(layer, &value)
                .into_iter()
                .collect(),
        }
    }

    /// Re-evaluate every active layer against a new viewport.
    pub fn on_viewport_changed(&mut self, viewport: Viewport) -> Vec<FetchRequest> {
        let viewport = Viewport::new(viewport.bounds.clamped_to_world(), viewport.zoom);
        if !viewport.bounds.is_valid() {
            warn!("Ignoring invalid viewport {}", viewport.bounds);
            return Vec::new();
        }

        self.viewport = Some(viewport);
        self.refresh_zoom_dependent_layers();

        LayerKind::ALL
            .into_iter()
            .filter_map(|layer| self.evaluate(layer))
            .collect()
    }

    /// Apply a raw parameter edit. Input that is not a finite number is ignored.
    pub fn on_parameter_changed(&mut self, layer: LayerKind, raw: &str) -> Option<FetchRequest> {
        match raw.trim().parse::<f64>() {
            Ok(value) => self.set_parameter(layer, value),
            Err(_) => {
                debug!("{layer}: ignoring non-numeric parameter {raw:?}");
                None
            }
        }
    }

    /// Numeric parameter entry point with the same validation as
    /// [`Self::on_parameter_changed`].
    pub fn set_parameter(&mut self, layer: LayerKind, value: f64) -> Option<FetchRequest> {
        if !layer.is_parameterized() {
            debug!("{layer}: layer takes no parameter");
            return None;
        }
        if !value.is_finite() {
            debug!("{layer}: ignoring non-finite parameter {value}");
            return None;
        }

        // The legend follows the input right away, whatever the network does.
        self.sink.update_legend(&ThresholdLegend::new(value));
        self.slots.get_mut(&layer)?.parameter = Some(value);

        self.evaluate(layer)
    }

    /// Show or hide a layer.
    pub fn on_layer_visibility_changed(
        &mut self,
        layer: LayerKind,
        visible: bool,
    ) -> Option<FetchRequest> {
        if visible {
            self.show_layer(layer)
        } else {
            self.hide_layer(layer);
            None
        }
    }

    /// Apply the outcome of a fetch issued earlier.
    ///
    /// Any completion matching the outstanding request clears the pending
    /// guard. Failures are logged and change nothing else.
    pub fn on_fetch_completed(&mut self, completion: FetchCompletion) -> Vec<FetchRequest> {
        let FetchCompletion { request, result } = completion;
        let layer = request.layer;
        let displayable = self.is_displayable(layer);

        let Some(slot) = self.slots.get_mut(&layer) else {
            return Vec::new();
        };

        if slot.state.in_flight != Some(request.id) {
            warn!("{layer}: discarding response {} that is not the outstanding request", request.id);
            return Vec::new();
        }
        slot.state.in_flight = None;

        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                warn!("{layer}: fetch {} failed, keeping previous data: {e}", request.id);
                return Vec::new();
            }
        };

        if payload.content.is_empty() {
            info!("{layer}: no data for {}", request.viewport.bounds);
        } else {
            info!(
                "{layer}: received {} item(s) covering {}",
                payload.content.len(),
                payload.bbox
            );
            let parameter = if layer.is_parameterized() {
                payload.level.or(request.parameter)
            } else {
                None
            };
            if displayable {
                render(&mut self.sink, layer, &payload);
                slot.rendered = true;
            }
            slot.state.record(payload, parameter);
        }

        if self.config.catch_up_after_fetch && self.moved_since(&request) {
            debug!("{layer}: view changed during fetch {}, re-evaluating", request.id);
            return self.evaluate(layer).into_iter().collect();
        }
        Vec::new()
    }

    /// Decide whether `layer` needs a fetch for the current viewport and, if
    /// so, mark it pending and return the request.
    fn evaluate(&mut self, layer: LayerKind) -> Option<FetchRequest> {
        let viewport = self.viewport?;
        let min_zoom = self.config.min_zoom(layer);
        let slot = self.slots.get_mut(&layer)?;

        if !slot.visible {
            return None;
        }
        if slot.state.is_pending() {
            debug!("{layer}: fetch already in flight, dropping trigger");
            return None;
        }
        if viewport.zoom < min_zoom {
            debug!("{layer}: zoom {} below {min_zoom}, not fetching", viewport.zoom);
            return None;
        }
        if slot.state.covers(&viewport.bounds, slot.parameter) {
            debug!("{layer}: cached data covers {}", viewport.bounds);
            return None;
        }

        let id = RequestId(self.next_request);
        self.next_request += 1;
        slot.state.in_flight = Some(id);

        info!(
            "{layer}: requesting {} at zoom {} ({id})",
            viewport.bounds, viewport.zoom
        );
        Some(FetchRequest {
            id,
            layer,
            viewport,
            parameter: slot.parameter,
        })
    }

    fn show_layer(&mut self, layer: LayerKind) -> Option<FetchRequest> {
        let slot = self.slots.get_mut(&layer)?;
        slot.visible = true;

        if let Some(control) = layer.control() {
            self.sink.attach_control(control);
        }
        if layer.is_parameterized() {
            if let Some(last) = slot.state.last_fetched_parameter {
                slot.parameter = Some(last);
            }
            if let Some(parameter) = slot.parameter {
                self.sink.update_legend(&ThresholdLegend::new(parameter));
            }
        }

        let displayable = self.is_displayable(layer);
        let slot = self.slots.get_mut(&layer)?;
        let cache_usable = slot.state.parameter_matches(slot.parameter);
        if displayable && cache_usable && !slot.rendered {
            if let Some(payload) = &slot.state.cached {
                debug!("{layer}: restoring cached data");
                render(&mut self.sink, layer, payload);
                slot.rendered = true;
            }
        }

        self.evaluate(layer)
    }

    fn hide_layer(&mut self, layer: LayerKind) {
        let Some(slot) = self.slots.get_mut(&layer) else {
            return;
        };
        slot.visible = false;
        slot.rendered = false;

        self.sink.clear_layer(layer);
        if let Some(control) = layer.control() {
            self.sink.detach_control(control);
        }
    }

    /// Take zoom-limited layers off the map when zoomed out, and put them back
    /// from cache when zoomed in again.
    fn refresh_zoom_dependent_layers(&mut self) {
        for layer in LayerKind::ALL {
            if !layer.hides_below_min_zoom() {
                continue;
            }
            let displayable = self.is_displayable(layer);
            let Some(slot) = self.slots.get_mut(&layer) else {
                continue;
            };
            if !slot.visible {
                continue;
            }

            if !displayable && slot.rendered {
                debug!("{layer}: zoomed out, hiding");
                self.sink.clear_layer(layer);
                slot.rendered = false;
            } else if displayable && !slot.rendered {
                if let Some(payload) = &slot.state.cached {
                    render(&mut self.sink, layer, payload);
                    slot.rendered = true;
                }
            }
        }
    }

    /// Whether data for `layer` may be put on the map right now.
    fn is_displayable(&self, layer: LayerKind) -> bool {
        let Some(slot) = self.slots.get(&layer) else {
            return false;
        };
        if !slot.visible {
            return false;
        }
        if layer.hides_below_min_zoom() {
            return self
                .viewport
                .is_some_and(|v| v.zoom >= self.config.min_zoom(layer));
        }
        true
    }

    fn moved_since(&self, request: &FetchRequest) -> bool {
        self.viewport != Some(request.viewport)
            || self
                .slots
                .get(&request.layer)
                .is_some_and(|slot| slot.parameter != request.parameter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::BoundingBox;
    use crate::protocol::{LayerContent, Station, StationAgency, TileDescriptor};
    use crate::sink::{MapControl, SceneSink};

    fn viewport(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64, zoom: u8) -> Viewport {
        Viewport::new(BoundingBox::new(min_lat, min_lon, max_lat, max_lon), zoom)
    }

    fn tile(name: &str) -> TileDescriptor {
        TileDescriptor {
            raster_image: format!("data:image/png;base64,{name}"),
            bounds: [390_000.0, 5_816_000.0, 391_000.0, 5_817_000.0],
            crs: "EPSG:25832".to_string(),
        }
    }

    fn station(name: &str) -> Station {
        Station {
            agency: StationAgency::Wsv,
            id: name.to_string(),
            name: name.to_string(),
            water: "EMS".to_string(),
            latitude: 52.5,
            longitude: 7.3,
            km: None,
            unit: Some("cm".to_string()),
            gauge_zero: None,
            latest: None,
        }
    }

    fn controller() -> FetchController<SceneSink> {
        FetchController::new(ControllerConfig::default(), SceneSink::new())
    }

    fn catch_up_controller() -> FetchController<SceneSink> {
        let config = ControllerConfig {
            catch_up_after_fetch: true,
            ..ControllerConfig::default()
        };
        FetchController::new(config, SceneSink::new())
    }

    fn complete(
        controller: &mut FetchController<SceneSink>,
        request: &FetchRequest,
        result: Result<LayerPayload, FetchError>,
    ) -> Vec<FetchRequest> {
        controller.on_fetch_completed(FetchCompletion {
            request: request.clone(),
            result,
        })
    }

    fn raster_tiles(controller: &FetchController<SceneSink>, layer: LayerKind) -> Vec<TileDescriptor> {
        match controller.sink().layer(layer) {
            Some(LayerContent::Raster(tiles)) => tiles.clone(),
            _ => Vec::new(),
        }
    }

    #[test]
    fn test_zoom_below_threshold_then_fetch() {
        let mut c = controller();
        assert!(c.on_layer_visibility_changed(LayerKind::Terrain, true).is_none());

        let requests = c.on_viewport_changed(viewport(52.0, 7.0, 52.5, 7.5, 10));
        assert!(requests.is_empty());

        let fresh = viewport(52.50, 7.30, 52.51, 7.32, 15);
        let requests = c.on_viewport_changed(fresh);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].layer, LayerKind::Terrain);
        assert_eq!(requests[0].viewport, fresh);
        assert_eq!(requests[0].parameter, None);
    }

    #[test]
    fn test_pending_guard_allows_one_request() {
        let mut c = controller();
        c.on_layer_visibility_changed(LayerKind::Terrain, true);

        let first = c.on_viewport_changed(viewport(52.50, 7.30, 52.51, 7.32, 15));
        let second = c.on_viewport_changed(viewport(52.60, 7.40, 52.61, 7.42, 15));
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert!(c.state(LayerKind::Terrain).unwrap().is_pending());
    }

    #[test]
    fn test_response_bbox_suppresses_refetch() {
        let mut c = controller();
        c.on_layer_visibility_changed(LayerKind::Terrain, true);
        let requested = viewport(52.500, 7.300, 52.505, 7.310, 15);
        let request = c.on_viewport_changed(requested).remove(0);

        // The backend answers with the larger 1 km grid cover
        let declared = BoundingBox::new(52.49, 7.28, 52.52, 7.33);
        let follow_up = complete(
            &mut c,
            &request,
            Ok(LayerPayload::raster(declared, vec![tile("a")])),
        );
        assert!(follow_up.is_empty());
        assert_eq!(c.state(LayerKind::Terrain).unwrap().last_fetched_bbox, Some(declared));

        for vp in [
            viewport(52.501, 7.301, 52.506, 7.311, 15),
            viewport(52.49, 7.28, 52.52, 7.33, 16),
            viewport(52.51, 7.32, 52.515, 7.325, 17),
        ] {
            assert!(c.on_viewport_changed(vp).is_empty());
        }
        assert_eq!(c.sink().replacements(), 1);
    }

    #[test]
    fn test_failure_resets_pending_and_keeps_content() {
        let mut c = controller();
        c.on_layer_visibility_changed(LayerKind::Terrain, true);
        let request = c.on_viewport_changed(viewport(52.50, 7.30, 52.51, 7.32, 15)).remove(0);
        let covered = BoundingBox::new(52.49, 7.28, 52.52, 7.33);
        complete(&mut c, &request, Ok(LayerPayload::raster(covered, vec![tile("a")])));

        let request = c.on_viewport_changed(viewport(53.00, 8.00, 53.01, 8.02, 15)).remove(0);
        let follow_up = complete(
            &mut c,
            &request,
            Err(FetchError::Transport("connection refused".to_string())),
        );

        assert!(follow_up.is_empty());
        let state = c.state(LayerKind::Terrain).unwrap();
        assert!(!state.is_pending());
        assert_eq!(state.last_fetched_bbox, Some(covered));
        assert_eq!(raster_tiles(&c, LayerKind::Terrain), vec![tile("a")]);
    }

    #[test]
    fn test_non_numeric_parameter_is_ignored() {
        let mut c = controller();
        c.on_layer_visibility_changed(LayerKind::Custom, true);
        let request = c.on_viewport_changed(viewport(52.50, 7.30, 52.51, 7.32, 15)).remove(0);
        let covered = BoundingBox::new(52.49, 7.28, 52.52, 7.33);
        complete(
            &mut c,
            &request,
            Ok(LayerPayload::raster(covered, vec![tile("a")]).with_level(19.2)),
        );
        let legend_before = c.sink().legend().cloned();

        for raw in ["", "abc", "NaN", "inf", "19,5", "20m"] {
            assert!(c.on_parameter_changed(LayerKind::Custom, raw).is_none());
        }

        assert_eq!(c.state(LayerKind::Custom).unwrap().last_fetched_parameter, Some(19.2));
        assert_eq!(c.parameter(LayerKind::Custom), Some(19.2));
        assert_eq!(c.sink().legend().cloned(), legend_before);
        assert_eq!(raster_tiles(&c, LayerKind::Custom), vec![tile("a")]);
    }

    #[test]
    fn test_parameter_change_forces_refetch() {
        let mut c = controller();
        c.on_layer_visibility_changed(LayerKind::Custom, true);
        let vp = viewport(52.50, 7.30, 52.51, 7.32, 15);
        let request = c.on_viewport_changed(vp).remove(0);
        assert_eq!(request.parameter, Some(DEFAULT_CUSTOM_LEVEL));
        let covered = BoundingBox::new(52.49, 7.28, 52.52, 7.33);
        complete(
            &mut c,
            &request,
            Ok(LayerPayload::raster(covered, vec![tile("a")]).with_level(DEFAULT_CUSTOM_LEVEL)),
        );

        // Same viewport, same value: nothing to do
        assert!(c.on_parameter_changed(LayerKind::Custom, "19.2").is_none());

        let request = c.on_parameter_changed(LayerKind::Custom, " 20.5 ").unwrap();
        assert_eq!(request.parameter, Some(20.5));
        assert_eq!(request.viewport, vp);
        assert_eq!(c.sink().legend().map(|l| l.level), Some(20.5));

        complete(
            &mut c,
            &request,
            Ok(LayerPayload::raster(covered, vec![tile("b")]).with_level(20.5)),
        );
        assert_eq!(c.state(LayerKind::Custom).unwrap().last_fetched_parameter, Some(20.5));
        assert_eq!(raster_tiles(&c, LayerKind::Custom), vec![tile("b")]);
    }

    #[test]
    fn test_legend_updates_while_pending() {
        let mut c = catch_up_controller();
        c.on_layer_visibility_changed(LayerKind::Custom, true);
        let request = c.on_viewport_changed(viewport(52.50, 7.30, 52.51, 7.32, 15)).remove(0);

        assert!(c.on_parameter_changed(LayerKind::Custom, "21").is_none());
        assert_eq!(c.sink().legend().map(|l| l.level), Some(21.0));

        // The dropped trigger is caught up once the outstanding fetch lands
        let covered = BoundingBox::new(52.49, 7.28, 52.52, 7.33);
        let follow_up = complete(
            &mut c,
            &request,
            Ok(LayerPayload::raster(covered, vec![tile("a")]).with_level(DEFAULT_CUSTOM_LEVEL)),
        );
        assert_eq!(follow_up.len(), 1);
        assert_eq!(follow_up[0].parameter, Some(21.0));
    }

    #[test]
    fn test_parameter_on_unparameterized_layer_ignored() {
        let mut c = controller();
        c.on_layer_visibility_changed(LayerKind::Terrain, true);
        assert!(c.on_parameter_changed(LayerKind::Terrain, "20").is_none());
        assert!(c.sink().legend().is_none());
    }

    #[test]
    fn test_hide_keeps_cache_and_show_restores() {
        let mut c = controller();
        c.on_layer_visibility_changed(LayerKind::Terrain, true);
        assert!(c.sink().has_control(MapControl::ColorScale));
        let request = c.on_viewport_changed(viewport(52.50, 7.30, 52.51, 7.32, 15)).remove(0);
        let covered = BoundingBox::new(52.49, 7.28, 52.52, 7.33);
        complete(&mut c, &request, Ok(LayerPayload::raster(covered, vec![tile("a")])));

        c.on_layer_visibility_changed(LayerKind::Terrain, false);
        assert!(c.sink().layer(LayerKind::Terrain).is_none());
        assert!(!c.sink().has_control(MapControl::ColorScale));
        assert_eq!(c.state(LayerKind::Terrain).unwrap().last_fetched_bbox, Some(covered));

        assert!(c.on_layer_visibility_changed(LayerKind::Terrain, true).is_none());
        assert_eq!(raster_tiles(&c, LayerKind::Terrain), vec![tile("a")]);
        assert!(c.sink().has_control(MapControl::ColorScale));
    }

    #[test]
    fn test_show_custom_restores_last_level() {
        let mut c = controller();
        c.on_layer_visibility_changed(LayerKind::Custom, true);
        assert!(c.sink().has_control(MapControl::ThresholdInput));
        let covered = BoundingBox::new(52.49, 7.28, 52.52, 7.33);
        let request = c.on_viewport_changed(viewport(52.50, 7.30, 52.51, 7.32, 15)).remove(0);
        complete(
            &mut c,
            &request,
            Ok(LayerPayload::raster(covered, vec![tile("a")]).with_level(DEFAULT_CUSTOM_LEVEL)),
        );
        let request = c.set_parameter(LayerKind::Custom, 20.0).unwrap();
        complete(
            &mut c,
            &request,
            Ok(LayerPayload::raster(covered, vec![tile("b")]).with_level(20.0)),
        );

        c.on_layer_visibility_changed(LayerKind::Custom, false);
        assert!(!c.sink().has_control(MapControl::ThresholdInput));
        assert!(c.set_parameter(LayerKind::Custom, 25.0).is_none());

        assert!(c.on_layer_visibility_changed(LayerKind::Custom, true).is_none());
        assert_eq!(c.parameter(LayerKind::Custom), Some(20.0));
        assert_eq!(c.sink().legend().map(|l| l.level), Some(20.0));
        assert_eq!(raster_tiles(&c, LayerKind::Custom), vec![tile("b")]);
    }

    #[test]
    fn test_stale_completion_is_discarded() {
        let mut c = controller();
        c.on_layer_visibility_changed(LayerKind::Terrain, true);
        let request = c.on_viewport_changed(viewport(52.50, 7.30, 52.51, 7.32, 15)).remove(0);

        let bogus = FetchRequest {
            id: RequestId(request.id.0 + 100),
            ..request.clone()
        };
        let covered = BoundingBox::new(52.49, 7.28, 52.52, 7.33);
        complete(&mut c, &bogus, Ok(LayerPayload::raster(covered, vec![tile("x")])));

        assert!(c.state(LayerKind::Terrain).unwrap().is_pending());
        assert!(c.sink().layer(LayerKind::Terrain).is_none());
    }

    #[test]
    fn test_catch_up_after_viewport_moved() {
        let mut c = catch_up_controller();
        c.on_layer_visibility_changed(LayerKind::Terrain, true);
        let request = c.on_viewport_changed(viewport(52.50, 7.30, 52.51, 7.32, 15)).remove(0);
        let moved = viewport(52.60, 7.40, 52.61, 7.42, 15);
        assert!(c.on_viewport_changed(moved).is_empty());

        let covered = BoundingBox::new(52.49, 7.28, 52.52, 7.33);
        let follow_up = complete(&mut c, &request, Ok(LayerPayload::raster(covered, vec![tile("a")])));
        assert_eq!(follow_up.len(), 1);
        assert_eq!(follow_up[0].viewport, moved);
        assert!(follow_up[0].id > request.id);
    }

    #[test]
    fn test_triggers_during_fetch_are_dropped_by_default() {
        let mut c = controller();
        c.on_layer_visibility_changed(LayerKind::Terrain, true);
        let request = c.on_viewport_changed(viewport(52.50, 7.30, 52.51, 7.32, 15)).remove(0);
        let moved = viewport(52.60, 7.40, 52.61, 7.42, 15);
        assert!(c.on_viewport_changed(moved).is_empty());

        let covered = BoundingBox::new(52.49, 7.28, 52.52, 7.33);
        assert!(complete(&mut c, &request, Ok(LayerPayload::raster(covered, vec![tile("a")]))).is_empty());
        assert!(!c.state(LayerKind::Terrain).unwrap().is_pending());

        // The next viewport event re-evaluates
        assert_eq!(c.on_viewport_changed(moved).len(), 1);
    }

    #[test]
    fn test_empty_response_changes_nothing() {
        let mut c = controller();
        c.on_layer_visibility_changed(LayerKind::Terrain, true);
        let request = c.on_viewport_changed(viewport(52.50, 7.30, 52.51, 7.32, 15)).remove(0);
        let covered = BoundingBox::new(52.49, 7.28, 52.52, 7.33);
        complete(&mut c, &request, Ok(LayerPayload::raster(covered, Vec::new())));

        let state = c.state(LayerKind::Terrain).unwrap();
        assert!(!state.is_pending());
        assert!(state.last_fetched_bbox.is_none());
        assert_eq!(c.sink().replacements(), 0);
    }

    #[test]
    fn test_terrain_colormap_reaches_sink() {
        let mut c = controller();
        c.on_layer_visibility_changed(LayerKind::Terrain, true);
        let request = c.on_viewport_changed(viewport(52.50, 7.30, 52.51, 7.32, 15)).remove(0);
        let covered = BoundingBox::new(52.49, 7.28, 52.52, 7.33);
        complete(
            &mut c,
            &request,
            Ok(LayerPayload::raster(covered, vec![tile("a")]).with_colormap("data:image/png;base64,CMAP")),
        );
        assert_eq!(c.sink().color_scale(), Some("data:image/png;base64,CMAP"));
    }

    #[test]
    fn test_completion_for_hidden_layer_is_cached_not_rendered() {
        let mut c = controller();
        c.on_layer_visibility_changed(LayerKind::Terrain, true);
        let request = c.on_viewport_changed(viewport(52.50, 7.30, 52.51, 7.32, 15)).remove(0);
        c.on_layer_visibility_changed(LayerKind::Terrain, false);

        let covered = BoundingBox::new(52.49, 7.28, 52.52, 7.33);
        complete(&mut c, &request, Ok(LayerPayload::raster(covered, vec![tile("a")])));
        assert!(c.sink().layer(LayerKind::Terrain).is_none());

        c.on_layer_visibility_changed(LayerKind::Terrain, true);
        assert_eq!(raster_tiles(&c, LayerKind::Terrain), vec![tile("a")]);
    }

    #[test]
    fn test_layers_are_independent() {
        let mut c = controller();
        c.on_layer_visibility_changed(LayerKind::Terrain, true);
        c.on_layer_visibility_changed(LayerKind::Custom, true);
        let requests = c.on_viewport_changed(viewport(52.50, 7.30, 52.51, 7.32, 15));
        assert_eq!(requests.len(), 2);
        assert_ne!(requests[0].id, requests[1].id);

        let terrain = requests.iter().find(|r| r.layer == LayerKind::Terrain).unwrap();
        complete(&mut c, terrain, Err(FetchError::Malformed("truncated".to_string())));
        assert!(!c.state(LayerKind::Terrain).unwrap().is_pending());
        assert!(c.state(LayerKind::Custom).unwrap().is_pending());
    }

    #[test]
    fn test_stations_follow_zoom() {
        let mut c = controller();
        c.on_layer_visibility_changed(LayerKind::Stations, true);
        assert!(c.on_viewport_changed(viewport(52.0, 7.0, 53.0, 8.0, 8)).is_empty());

        let request = c.on_viewport_changed(viewport(52.4, 7.2, 52.6, 7.4, 11)).remove(0);
        complete(&mut c, &request, Ok(LayerPayload::stations(vec![station("HERBRUM")])));
        assert!(c.sink().layer(LayerKind::Stations).is_some());

        // Zoomed out: hidden but not refetched
        assert!(c.on_viewport_changed(viewport(50.0, 5.0, 55.0, 10.0, 7)).is_empty());
        assert!(c.sink().layer(LayerKind::Stations).is_none());

        // Zoomed back in anywhere: restored from cache, the world bbox covers it
        assert!(c.on_viewport_changed(viewport(53.5, 9.9, 53.6, 10.1, 12)).is_empty());
        assert_eq!(c.sink().layer(LayerKind::Stations).map(LayerContent::len), Some(1));
    }

    #[test]
    fn test_world_wrapping_viewport_hides_stations() {
        let mut c = controller();
        c.on_layer_visibility_changed(LayerKind::Stations, true);
        let request = c.on_viewport_changed(viewport(52.4, 7.2, 52.6, 7.4, 11)).remove(0);
        complete(&mut c, &request, Ok(LayerPayload::stations(vec![station("HERBRUM")])));
        assert!(c.sink().layer(LayerKind::Stations).is_some());

        assert!(c.on_viewport_changed(viewport(-60.0, -200.0, 80.0, 215.0, 2)).is_empty());
        assert!(c.sink().layer(LayerKind::Stations).is_none());
        let current = c.viewport().unwrap();
        assert_eq!(current.zoom, 2);
        assert_eq!(current.bounds, BoundingBox::new(-60.0, -180.0, 80.0, 180.0));
    }

    #[test]
    fn test_invalid_viewport_ignored() {
        let mut c = controller();
        c.on_layer_visibility_changed(LayerKind::Terrain, true);
        assert!(c.on_viewport_changed(viewport(52.6, 7.3, 52.5, 7.32, 15)).is_empty());
        assert!(c.viewport().is_none());
    }

    #[test]
    fn test_handle_dispatch_and_active_layers() {
        let mut c = controller();
        let events: Vec<MapEvent> = serde_json::from_str(
            r#"[
                {"type": "layer_visibility_changed", "layer": "custom", "visible": true},
                {"type": "parameter_changed", "layer": "custom", "value": "18.5"},
                {"type": "viewport_changed", "viewport": {"bounds": {"min_lat": 52.5, "min_lon": 7.3, "max_lat": 52.51, "max_lon": 7.32}, "zoom": 15}}
            ]"#,
        )
        .unwrap();

        let requests: Vec<FetchRequest> = events.into_iter().flat_map(|e| c.handle(e)).collect();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].parameter, Some(18.5));
        assert_eq!(
            c.active_layers(),
            vec![ActiveLayer {
                layer: LayerKind::Custom,
                parameter: Some(18.5)
            }]
        );
    }
}
