use serde::{Deserialize, Serialize};

pub const KNOWN_FORMATS: &[&str] = &["mp3", "aac", "ogg", "opus", "flac", "wav"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSource {
    pub url: String,
    /// Declared format. `None` means "guess from the URL".
    pub format: Option<String>,
}

impl StreamSource {
    pub fn new(url: impl Into<String>, format: Option<&str>) -> Self {
        Self {
            url: url.into(),
            format: format.map(|f| f.to_ascii_lowercase()),
        }
    }

    pub fn effective_format(&self) -> Option<String> {
        self.format.clone().or_else(|| infer_format(&self.url))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Station {
    pub frequency_label: String,
    pub title: String,
    pub sources: Vec<StreamSource>,
}

impl Station {
    pub fn new(frequency_label: &str, title: &str, sources: Vec<StreamSource>) -> Self {
        Self {
            frequency_label: frequency_label.to_string(),
            title: title.to_string(),
            sources,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StationState {
    #[default]
    Unloaded,
    Stopped,
    Playing,
}

/// Guesses the format from the last `.`, `-`, `/` or `;` separated token of the
/// URL path, e.g. `http://host:8301/listen-aac` or `http://host/stream.mp3`.
pub fn infer_format(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let token = path
        .rsplit(['.', '-', '/', ';'])
        .next()?
        .to_ascii_lowercase();

    KNOWN_FORMATS
        .iter()
        .find(|f| **f == token)
        .map(|f| f.to_string())
}

fn paired(urls: &[&str]) -> Vec<StreamSource> {
    const DEMO_FORMATS: [&str; 2] = ["mp3", "aac"];
    urls.iter()
        .enumerate()
        .map(|(i, url)| StreamSource::new(*url, DEMO_FORMATS.get(i).copied()))
        .collect()
}

pub fn default_stations() -> Vec<Station> {
    vec![
        Station::new(
            "RADIO RACHETEE",
            "Abidjan",
            paired(&[
                "http://87.117.228.65:14696/;playlist-mp3",
                "http://87.117.228.65:14696/;playlist-aac",
            ]),
        ),
        Station::new(
            "LOUANGE FM",
            "en MARTINIQUE",
            paired(&[
                "http://198.178.123.8:7280/;stream/1-mp3",
                "http://198.178.123.8:7280/;stream/1-aac",
            ]),
        ),
        Station::new(
            "SPIRITUAL CONNECT RADIO",
            "USA",
            paired(&[
                "http://us1.internet-radio.com:8301/listen-mp3",
                "http://us1.internet-radio.com:8301/listen-aac",
            ]),
        ),
        Station::new(
            "SUNSET C RADIO",
            "Gospel Music 24H/7",
            paired(&[
                "http://knight.wavestreamer.com:9841/;stream/1-mp3",
                "http://knight.wavestreamer.com:9841/;stream/1-aac",
            ]),
        ),
        Station::new(
            "RCCG RADIO",
            "Redemption CAMP Nigeria",
            paired(&[
                "http://s8.voscast.com:9516/;stream-mp3",
                "http://s8.voscast.com:9516/;stream-aac",
            ]),
        ),
    ]
}
