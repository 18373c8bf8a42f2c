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

//! Per-layer fetch bookkeeping.

use crate::geo::BoundingBox;
use crate::protocol::{LayerPayload, RequestId};

/// What the controller remembers about one layer's fetches.
///
/// Idle while `in_flight` is `None`, Fetching otherwise. There are no other
/// states.
#[derive(Debug, Clone, Default)]
pub struct LayerFetchState {
    /// Area covered by the last successful fetch, as declared by the source.
    pub last_fetched_bbox: Option<BoundingBox>,
    /// Parameter the last successful fetch was made with.
    pub last_fetched_parameter: Option<f64>,
    /// The one outstanding request, if any.
    pub in_flight: Option<RequestId>,
    /// Data of the last successful fetch.
    pub cached: Option<LayerPayload>,
}

impl LayerFetchState {
    /// Pending guard.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.in_flight.is_some()
    }

    /// True when the cached data still answers a request for `bounds` with
    /// `parameter`.
    #[must_use]
    pub fn covers(&self, bounds: &BoundingBox, parameter: Option<f64>) -> bool {
        self.last_fetched_bbox
            .is_some_and(|bbox| bbox.contains(bounds))
            && self.parameter_matches(parameter)
    }

    #[must_use]
    pub fn parameter_matches(&self, parameter: Option<f64>) -> bool {
        self.last_fetched_parameter == parameter
    }

    /// Record a successful, non-empty fetch.
    pub fn record(&mut self, payload: LayerPayload, parameter: Option<f64>) {
        self.last_fetched_bbox = Some(payload.bbox);
        self.last_fetched_parameter = parameter;
        self.cached = Some(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_state_covers_nothing() {
        let state = LayerFetchState::default();
        assert!(!state.is_pending());
        assert!(!state.covers(&BoundingBox::new(52.0, 7.0, 52.1, 7.1), None));
    }

    #[test]
    fn test_covers_requires_matching_parameter() {
        let mut state = LayerFetchState::default();
        state.record(
            LayerPayload::raster(BoundingBox::new(52.0, 7.0, 53.0, 8.0), Vec::new()),
            Some(19.2),
        );
        let inner = BoundingBox::new(52.2, 7.2, 52.4, 7.4);
        assert!(state.covers(&inner, Some(19.2)));
        assert!(!state.covers(&inner, Some(20.0)));
        assert!(!state.covers(&inner, None));
    }
}
