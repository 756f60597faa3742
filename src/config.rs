use crate::error::{RadioError, Result};
use crate::station::{default_stations, Station, StreamSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const APP_DIR: &str = "station_radio";
const STATIONS_FILE: &str = "stations.json";

pub const DEFAULT_VOLUME: f32 = 0.5;
pub const MAX_VOLUME: f32 = 2.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Decode the live stream as it arrives. Live radio is not seekable.
    #[default]
    Streaming,
    /// Download the whole resource, then decode it. Finite files only.
    Buffered,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StationConfig {
    pub frequency_label: String,
    pub title: String,
    pub sources: Vec<String>,
    /// `formats[i]` describes `sources[i]`.
    #[serde(default)]
    pub formats: Option<Vec<String>>,
}

impl From<StationConfig> for Station {
    fn from(cfg: StationConfig) -> Self {
        let formats = cfg.formats.unwrap_or_default();
        let sources = cfg
            .sources
            .iter()
            .enumerate()
            .map(|(i, url)| StreamSource::new(url.as_str(), formats.get(i).map(String::as_str)))
            .collect();

        Station {
            frequency_label: cfg.frequency_label,
            title: cfg.title,
            sources,
        }
    }
}

impl From<&Station> for StationConfig {
    fn from(station: &Station) -> Self {
        let formats: Option<Vec<String>> = station
            .sources
            .iter()
            .map(|s| s.format.clone())
            .collect();

        StationConfig {
            frequency_label: station.frequency_label.clone(),
            title: station.title.clone(),
            sources: station.sources.iter().map(|s| s.url.clone()).collect(),
            formats,
        }
    }
}

fn default_volume() -> f32 {
    DEFAULT_VOLUME
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RadioConfig {
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub transport: Transport,
    pub stations: Vec<StationConfig>,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            volume: DEFAULT_VOLUME,
            transport: Transport::Streaming,
            stations: default_stations().iter().map(StationConfig::from).collect(),
        }
    }
}

impl RadioConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join(STATIONS_FILE))
    }

    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut cfg: RadioConfig = serde_json::from_str(text)?;

        if cfg.stations.is_empty() {
            return Err(RadioError::Config("no stations configured".into()));
        }
        if let Some(bad) = cfg.stations.iter().find(|s| s.sources.is_empty()) {
            return Err(RadioError::Config(format!(
                "station '{}' has no sources",
                bad.frequency_label
            )));
        }

        cfg.volume = if cfg.volume.is_finite() {
            cfg.volume.clamp(0.0, MAX_VOLUME)
        } else {
            DEFAULT_VOLUME
        };
        Ok(cfg)
    }

    pub fn stations(&self) -> Vec<Station> {
        self.stations.iter().cloned().map(Station::from).collect()
    }
}
