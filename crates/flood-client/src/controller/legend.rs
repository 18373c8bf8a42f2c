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

//! Legend bands for the flood-threshold layer.

/// Color of a legend band, matching the backend's threshold colorcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandColor {
    Blue,
    Red,
    Yellow,
}

/// One elevation band in metres. `lower == None` means unbounded below.
#[derive(Debug, Clone, PartialEq)]
pub struct LegendBand {
    pub color: BandColor,
    pub lower: Option<f64>,
    pub upper: f64,
}

impl LegendBand {
    #[must_use]
    pub fn label(&self) -> String {
        match self.lower {
            Some(lower) => format!("{lower} to {}", self.upper),
            None => format!("< {}", self.upper),
        }
    }
}

/// Legend for a threshold `level`:
/// blue below `level - 1`, red up to `level`, yellow up to `level + 0.5`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdLegend {
    pub level: f64,
    pub bands: [LegendBand; 3],
}

impl ThresholdLegend {
    #[must_use]
    pub fn new(level: f64) -> Self {
        Self {
            level,
            bands: [
                LegendBand {
                    color: BandColor::Blue,
                    lower: None,
                    upper: level - 1.0,
                },
                LegendBand {
                    color: BandColor::Red,
                    lower: Some(level - 1.0),
                    upper: level,
                },
                LegendBand {
                    color: BandColor::Yellow,
                    lower: Some(level),
                    upper: level + 0.5,
                },
            ],
        }
    }

    /// The band for `color`.
    #[must_use]
    pub fn band(&self, color: BandColor) -> &LegendBand {
        match color {
            BandColor::Blue => &self.bands[0],
            BandColor::Red => &self.bands[1],
            BandColor::Yellow => &self.bands[2],
        }
    }
}
