use serde::{Deserialize, Serialize};

/// Genre shortcuts offered next to the search box.
pub const DEFAULT_GENRES: &[&str] = &[
    "Pop",
    "Rock",
    "Jazz",
    "Classical",
    "Electronic",
    "Hip Hop",
    "News",
    "Country",
    "Blues",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Station {
    /// Catalog identity (radio-browser `stationuuid`).
    pub id: String,
    pub name: String,
    /// Stream URL as submitted to the catalog.
    pub stream_url: String,
    /// Playlist-resolved stream URL; preferred for playback when present.
    #[serde(default)]
    pub resolved_stream_url: Option<String>,
    #[serde(default)]
    pub artwork_url: Option<String>,
    /// Comma-separated genre/style tags, possibly empty.
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub bitrate_kbps: Option<u32>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub country_code: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub codec: String,
    #[serde(default)]
    pub votes: u64,
}

impl Station {
    /// The URL the engine should be pointed at.
    pub fn playback_url(&self) -> &str {
        match self.resolved_stream_url.as_deref() {
            Some(url) if !url.trim().is_empty() => url,
            _ => &self.stream_url,
        }
    }

    pub fn same_station(&self, other: &Station) -> bool {
        self.id == other.id
    }
}

// ── radio-browser catalog records ─────────────────────────────────────────────

/// One entry of a radio-browser `json/stations` response.
/// Kept apart from `Station` so the catalog schema can change without touching
/// the wire protocol struct.
#[derive(Debug, Deserialize)]
struct CatalogStation {
    stationuuid: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    url_resolved: String,
    #[serde(default)]
    homepage: String,
    #[serde(default)]
    favicon: String,
    #[serde(default)]
    tags: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    countrycode: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    votes: i64,
    #[serde(default)]
    codec: String,
    #[serde(default)]
    bitrate: i64,
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

impl From<CatalogStation> for Station {
    fn from(c: CatalogStation) -> Self {
        Station {
            id: c.stationuuid,
            name: c.name.trim().to_string(),
            stream_url: c.url,
            resolved_stream_url: non_empty(c.url_resolved),
            artwork_url: non_empty(c.favicon),
            tags: c.tags,
            // the catalog reports 0 when the bitrate is unknown
            bitrate_kbps: u32::try_from(c.bitrate).ok().filter(|b| *b > 0),
            homepage: non_empty(c.homepage),
            country: c.country,
            country_code: c.countrycode,
            language: c.language,
            codec: c.codec,
            votes: c.votes.max(0) as u64,
        }
    }
}

/// Decode a radio-browser station array.  Entries without a stream URL are
/// dropped since they can never be played.
pub fn parse_catalog_json(body: &[u8]) -> anyhow::Result<Vec<Station>> {
    let records: Vec<CatalogStation> = serde_json::from_slice(body)?;
    Ok(records
        .into_iter()
        .map(Station::from)
        .filter(|s| !s.playback_url().is_empty())
        .collect())
}
