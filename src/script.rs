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

//! Recorded map sessions.
//!
//! A script is a JSON-lines file. Each line is either a map event as the
//! controller receives it, or a pause:
//!
//! ```text
//! # show the threshold layer around Papenburg
//! {"type": "layer_visibility_changed", "layer": "custom", "visible": true}
//! {"type": "viewport_changed", "viewport": {"bounds": {"min_lat": 53.07, "min_lon": 7.38, "max_lat": 53.09, "max_lon": 7.41}, "zoom": 15}}
//! {"type": "wait", "ms": 1500}
//! {"type": "parameter_changed", "layer": "custom", "value": "20.5"}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use std::path::Path;
use std::time::Duration;

use flood_client::MapEvent;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to read script: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
}

/// Non-event script instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Pause {
    Wait { ms: u64 },
}

impl Pause {
    #[must_use]
    pub fn duration(self) -> Duration {
        match self {
            Pause::Wait { ms } => Duration::from_millis(ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ScriptStep {
    Event(MapEvent),
    Pause(Pause),
}

pub fn parse(text: &str) -> Result<Vec<ScriptStep>, ScriptError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|source| ScriptError::Parse {
                line: index + 1,
                source,
            })
        })
        .collect()
}

pub fn load(path: &Path) -> Result<Vec<ScriptStep>, ScriptError> {
    parse(&std::fs::read_to_string(path)?)
}
