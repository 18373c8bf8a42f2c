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

//! Rendering sink abstraction.
//!
//! The controller never touches a map library directly. Everything it wants
//! displayed goes through [`RenderSink`], which a host implements on top of
//! whatever draws the map. Two adapters ship with the crate:
//!
//! - [`SceneSink`]: keeps the displayed state in memory (headless hosts, tests)
//! - [`ChannelSink`]: forwards [`SinkEvent`]s to another task over a channel

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use tokio::sync::mpsc;

use crate::controller::ThresholdLegend;
use crate::protocol::{LayerContent, LayerKind};

/// UI controls the controller attaches next to a visible layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MapControl {
    /// Color-scale image for the terrain layer.
    ColorScale,
    /// Threshold input and legend for the custom layer.
    ThresholdInput,
}

/// Destination for everything the controller wants shown on the map.
pub trait RenderSink {
    /// Replace the displayed content of `layer` with `content` as a whole.
    fn replace_layer(&mut self, layer: LayerKind, content: &LayerContent);

    /// Remove everything displayed for `layer`.
    fn clear_layer(&mut self, layer: LayerKind);

    fn attach_control(&mut self, control: MapControl);

    fn detach_control(&mut self, control: MapControl);

    fn update_legend(&mut self, legend: &ThresholdLegend);

    /// Point the color-scale control at a new image reference.
    fn update_color_scale(&mut self, colormap: &str);
}

/// In-memory picture of what is on the map.
#[derive(Debug, Default, Clone)]
pub struct SceneSink {
    layers: BTreeMap<LayerKind, LayerContent>,
    controls: BTreeSet<MapControl>,
    legend: Option<ThresholdLegend>,
    color_scale: Option<String>,
    replacements: usize,
}

impl SceneSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Content currently displayed for `layer`, if any.
    #[must_use]
    pub fn layer(&self, layer: LayerKind) -> Option<&LayerContent> {
        self.layers.get(&layer)
    }

    #[must_use]
    pub fn has_control(&self, control: MapControl) -> bool {
        self.controls.contains(&control)
    }

    #[must_use]
    pub fn legend(&self) -> Option<&ThresholdLegend> {
        self.legend.as_ref()
    }

    #[must_use]
    pub fn color_scale(&self) -> Option<&str> {
        self.color_scale.as_deref()
    }

    /// Number of layer replacements since creation.
    #[must_use]
    pub fn replacements(&self) -> usize {
        self.replacements
    }
}

impl RenderSink for SceneSink {
    fn replace_layer(&mut self, layer: LayerKind, content: &LayerContent) {
        self.layers.insert(layer, content.clone());
        self.replacements += 1;
    }

    fn clear_layer(&mut self, layer: LayerKind) {
        self.layers.remove(&layer);
    }

    fn attach_control(&mut self, control: MapControl) {
        self.controls.insert(control);
    }

    fn detach_control(&mut self, control: MapControl) {
        self.controls.remove(&control);
    }

    fn update_legend(&mut self, legend: &ThresholdLegend) {
        self.legend = Some(legend.clone());
    }

    fn update_color_scale(&mut self, colormap: &str) {
        self.color_scale = Some(colormap.to_string());
    }
}

/// Sink operations as messages.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    LayerReplaced { layer: LayerKind, content: LayerContent },
    LayerCleared(LayerKind),
    ControlAttached(MapControl),
    ControlDetached(MapControl),
    LegendUpdated(ThresholdLegend),
    ColorScaleUpdated(String),
}

/// Forwards sink operations to a receiver, typically a UI task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver its events arrive on.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: SinkEvent) {
        if self.tx.send(event).is_err() {
            debug!("Sink receiver dropped, discarding event");
        }
    }
}

impl RenderSink for ChannelSink {
    fn replace_layer(&mut self, layer: LayerKind, content: &LayerContent) {
        self.emit(SinkEvent::LayerReplaced {
            layer,
            content: content.clone(),
        });
    }

    fn clear_layer(&mut self, layer: LayerKind) {
        self.emit(SinkEvent::LayerCleared(layer));
    }

    fn attach_control(&mut self, control: MapControl) {
        self.emit(SinkEvent::ControlAttached(control));
    }

    fn detach_control(&mut self, control: MapControl) {
        self.emit(SinkEvent::ControlDetached(control));
    }

    fn update_legend(&mut self, legend: &ThresholdLegend) {
        self.emit(SinkEvent::LegendUpdated(legend.clone()));
    }

    fn update_color_scale(&mut self, colormap: &str) {
        self.emit(SinkEvent::ColorScaleUpdated(colormap.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_sink_replace_and_clear() {
        let mut sink = SceneSink::new();
        sink.replace_layer(LayerKind::Terrain, &LayerContent::Raster(Vec::new()));
        assert!(sink.layer(LayerKind::Terrain).is_some());
        assert_eq!(sink.replacements(), 1);

        sink.clear_layer(LayerKind::Terrain);
        assert!(sink.layer(LayerKind::Terrain).is_none());
    }

    #[test]
    fn test_scene_sink_controls() {
        let mut sink = SceneSink::new();
        sink.attach_control(MapControl::ThresholdInput);
        assert!(sink.has_control(MapControl::ThresholdInput));
        sink.detach_control(MapControl::ThresholdInput);
        assert!(!sink.has_control(MapControl::ThresholdInput));
    }

    #[test]
    fn test_channel_sink_forwards_in_order() {
        let (mut sink, mut rx) = ChannelSink::channel();
        sink.attach_control(MapControl::ColorScale);
        sink.update_color_scale("data:image/png;base64,AAAA");
        sink.clear_layer(LayerKind::Custom);

        assert_eq!(rx.try_recv().unwrap(), SinkEvent::ControlAttached(MapControl::ColorScale));
        assert_eq!(
            rx.try_recv().unwrap(),
            SinkEvent::ColorScaleUpdated("data:image/png;base64,AAAA".to_string())
        );
        assert_eq!(rx.try_recv().unwrap(), SinkEvent::LayerCleared(LayerKind::Custom));
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (mut sink, rx) = ChannelSink::channel();
        drop(rx);
        sink.clear_layer(LayerKind::Terrain);
    }
}
