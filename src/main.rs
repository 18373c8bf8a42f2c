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

mod basemaps;
mod config;
mod script;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use flood_client::controller::BandColor;
use flood_client::{
    BoundingBox, ChannelSink, ControllerHandle, HttpSource, LayerContent, SinkEvent, Station,
};
use log::{info, warn};

use basemaps::TileCoord;
use config::AppConfig;
use script::ScriptStep;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Flood map overlay host")]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drive the overlay controller from a recorded JSON-lines session
    Replay {
        /// Script of map events and waits
        script: PathBuf,

        /// Time to let outstanding fetches finish before exiting
        #[arg(long, default_value_t = 3000)]
        settle_ms: u64,
    },

    /// List water-level gauge stations
    Stations {
        /// Only stations inside lat_min,lon_min,lat_max,lon_max
        #[arg(long, value_parser = parse_bbox)]
        bbox: Option<BoundingBox>,

        /// Fetch the latest reading of every listed station
        #[arg(long)]
        readings: bool,
    },

    /// Print base-map tile URLs for a location
    Basemaps {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        #[arg(long, allow_negative_numbers = true)]
        lon: f64,

        #[arg(long, default_value_t = 15)]
        zoom: u8,
    },

    /// Show the configuration file path and effective values
    Config {
        /// Write the effective configuration back to disk
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    match args.command {
        Command::Replay { script, settle_ms } => {
            replay(&config, &script, Duration::from_millis(settle_ms)).await
        }
        Command::Stations { bbox, readings } => stations(&config, bbox, readings).await,
        Command::Basemaps { lat, lon, zoom } => {
            print_basemaps(&config, lat, lon, zoom);
            Ok(())
        }
        Command::Config { write } => show_config(&config, args.config.as_deref(), write),
    }
}

async fn replay(config: &AppConfig, script: &Path, settle: Duration) -> Result<(), Box<dyn Error>> {
    let steps = script::load(script)?;
    info!("Replaying {} step(s) from {}", steps.len(), script.display());

    let source = HttpSource::new(config.http_source_config())?;
    let (sink, mut sink_events) = ChannelSink::channel();
    let handle = ControllerHandle::spawn(config.runtime_config(), source, sink);

    let printer = tokio::spawn(async move {
        while let Some(event) = sink_events.recv().await {
            println!("{}", describe_sink_event(&event));
        }
    });

    for step in steps {
        match step {
            ScriptStep::Event(event) => handle.send(event).await?,
            ScriptStep::Pause(pause) => tokio::time::sleep(pause.duration()).await,
        }
    }

    tokio::time::sleep(settle).await;
    let sink = handle.join().await?;
    drop(sink);
    printer.await?;
    Ok(())
}

async fn stations(
    config: &AppConfig,
    bbox: Option<BoundingBox>,
    readings: bool,
) -> Result<(), Box<dyn Error>> {
    let source = HttpSource::new(config.http_source_config())?;
    let mut stations = source.stations().await?;
    if let Some(bbox) = bbox {
        stations.retain(|s| bbox.contains_point(s.latitude, s.longitude));
    }

    println!(
        "{} station(s) as of {}",
        stations.len(),
        chrono::Local::now().format("%Y-%m-%d %H:%M")
    );
    for station in &mut stations {
        if readings {
            match source.latest_reading(station).await {
                Ok(Some(reading)) => station.latest = Some(reading),
                Ok(None) => {}
                Err(e) => warn!("No reading for {}: {e}", station.name),
            }
        }
        println!("{}", describe_station(station));
    }
    Ok(())
}

fn print_basemaps(config: &AppConfig, lat: f64, lon: f64, zoom: u8) {
    let tile = TileCoord::containing(lat, lon, zoom);
    println!("Tile {}/{}/{}", tile.zoom, tile.x, tile.y);

    let default_name = default_basemap_name(config);
    for basemap in basemaps::catalog() {
        let marker = if Some(basemap.name()) == default_name {
            " (default)"
        } else {
            ""
        };
        let (min_zoom, max_zoom) = basemap.zoom_range();
        println!("{}{marker} [zoom {min_zoom}-{max_zoom}]", basemap.name());

        let urls = basemap.tile_urls(&tile);
        if urls.is_empty() {
            println!("  not available here");
        }
        for url in urls {
            println!("  {url}");
        }
    }
}

/// Canonical name of the configured default base map, if it is in the catalog.
fn default_basemap_name(config: &AppConfig) -> Option<&'static str> {
    let found = basemaps::find(&config.default_basemap).map(|basemap| basemap.name());
    if found.is_none() {
        warn!("Unknown default base map {:?}", config.default_basemap);
    }
    found
}

fn show_config(config: &AppConfig, path: Option<&Path>, write: bool) -> Result<(), Box<dyn Error>> {
    let shown_path = match path {
        Some(path) => path.to_path_buf(),
        None => AppConfig::get_config_path()?,
    };
    println!("Configuration file: {}", shown_path.display());
    println!("{config:#?}");

    let key_source = if std::env::var(config::NLWKN_API_KEY_ENV).is_ok_and(|k| !k.is_empty()) {
        "environment variable"
    } else if config.resolve_nlwkn_api_key().is_some() {
        "config file"
    } else {
        "not set, NLWKN stations disabled"
    };
    println!("NLWKN API key: {key_source}");

    if write {
        config.save(path)?;
        println!("Configuration written");
    }
    Ok(())
}

/// Parse `lat_min,lon_min,lat_max,lon_max`.
fn parse_bbox(value: &str) -> Result<BoundingBox, String> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid number in bbox: {e}"))?;
    let [min_lat, min_lon, max_lat, max_lon] = parts[..] else {
        return Err("bbox needs four values: lat_min,lon_min,lat_max,lon_max".to_string());
    };

    let bbox = BoundingBox::new(min_lat, min_lon, max_lat, max_lon);
    if bbox.is_valid() {
        Ok(bbox)
    } else {
        Err(format!("bbox {bbox} is not a valid area"))
    }
}

fn describe_sink_event(event: &SinkEvent) -> String {
    match event {
        SinkEvent::LayerReplaced { layer, content } => match content {
            LayerContent::Raster(tiles) => format!("{layer}: showing {} tile(s)", tiles.len()),
            LayerContent::Stations(stations) => {
                format!("{layer}: showing {} station(s)", stations.len())
            }
        },
        SinkEvent::LayerCleared(layer) => format!("{layer}: cleared"),
        SinkEvent::ControlAttached(control) => format!("control {control:?} attached"),
        SinkEvent::ControlDetached(control) => format!("control {control:?} detached"),
        SinkEvent::LegendUpdated(legend) => format!(
            "legend for {} m: blue {}, red {}, yellow {}",
            legend.level,
            legend.band(BandColor::Blue).label(),
            legend.band(BandColor::Red).label(),
            legend.band(BandColor::Yellow).label()
        ),
        SinkEvent::ColorScaleUpdated(_) => "terrain color scale updated".to_string(),
    }
}

fn describe_station(station: &Station) -> String {
    let mut line = format!("[{}] {}", station.agency.display_name(), station.name);
    match (station.water.is_empty(), station.km) {
        (false, Some(km)) => line.push_str(&format!(" ({}, km {km})", station.water)),
        (false, None) => line.push_str(&format!(" ({})", station.water)),
        (true, _) => {}
    }
    line.push_str(&format!(" at {:.4},{:.4}", station.latitude, station.longitude));

    if let Some(reading) = &station.latest {
        line.push_str(&format!(
            " | {} {} at {}",
            reading.value,
            reading.unit,
            reading.time_of_day()
        ));
        if let Some(level) = reading.level_above_datum {
            line.push_str(&format!(" ({level:.2} m above datum)"));
        }
    }
    line
}
