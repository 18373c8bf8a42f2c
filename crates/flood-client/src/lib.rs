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

//! Flood-map overlay client.
//!
//! Keeps the data of three map overlays in step with what the user is looking
//! at, without hammering the backends:
//!
//! - **Terrain**: elevation rasters with a color scale
//! - **Custom**: rasters of the area below a user-chosen water level
//! - **Stations**: water-level gauges from the WSV and NLWKN feeds
//!
//! The crate is split into layers that can be used on their own:
//!
//! - **Controller layer**: [`FetchController`], a synchronous state machine
//!   that decides when a layer needs new data (zoom limits, coverage of the
//!   last response, one request in flight per layer)
//! - **Source layer**: [`OverlaySource`] and its HTTP implementation [`HttpSource`]
//! - **Sink layer**: [`RenderSink`], implemented by [`SceneSink`] and [`ChannelSink`]
//! - **Runtime layer**: [`ControllerHandle`], which runs everything in a tokio task
//!
//! # Quick Start
//!
//! ```no_run
//! use flood_client::{
//!     BoundingBox, ChannelSink, ControllerHandle, HttpSource, HttpSourceConfig, LayerKind,
//!     MapEvent, RuntimeConfig, Viewport,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = HttpSource::new(HttpSourceConfig::default())?;
//!     let (sink, mut sink_events) = ChannelSink::channel();
//!     let handle = ControllerHandle::spawn(RuntimeConfig::default(), source, sink);
//!
//!     handle
//!         .send(MapEvent::LayerVisibilityChanged { layer: LayerKind::Terrain, visible: true })
//!         .await?;
//!     handle
//!         .send(MapEvent::ViewportChanged {
//!             viewport: Viewport::new(BoundingBox::new(52.50, 7.30, 52.51, 7.32), 15),
//!         })
//!         .await?;
//!
//!     while let Some(event) = sink_events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Controller Only
//!
//! ```
//! use flood_client::{BoundingBox, ControllerConfig, FetchController, LayerKind, SceneSink, Viewport};
//!
//! let mut controller = FetchController::new(ControllerConfig::default(), SceneSink::new());
//! controller.on_layer_visibility_changed(LayerKind::Terrain, true);
//!
//! let far_out = Viewport::new(BoundingBox::new(52.0, 7.0, 53.0, 8.0), 9);
//! assert!(controller.on_viewport_changed(far_out).is_empty());
//!
//! let close_up = Viewport::new(BoundingBox::new(52.50, 7.30, 52.51, 7.32), 15);
//! let requests = controller.on_viewport_changed(close_up);
//! assert_eq!(requests.len(), 1);
//! ```

pub mod controller;
pub mod geo;
pub mod protocol;
pub mod runtime;
pub mod sink;
pub mod source;

pub use controller::{
    ActiveLayer, ControllerConfig, FetchCompletion, FetchController, LayerFetchState, MapEvent,
    ThresholdLegend,
};
pub use geo::{BoundingBox, Viewport};
pub use protocol::{
    FetchError, FetchRequest, LayerContent, LayerKind, LayerPayload, Reading, RequestId, Station,
    StationAgency, TileDescriptor,
};
pub use runtime::{ControllerHandle, RuntimeConfig, RuntimeError};
pub use sink::{ChannelSink, MapControl, RenderSink, SceneSink, SinkEvent};
pub use source::{HttpSource, HttpSourceConfig, OverlaySource};
