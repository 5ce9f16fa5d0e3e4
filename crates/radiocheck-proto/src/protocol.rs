use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, SecondsFormat};
use serde::{Deserialize, Serialize};

/// Where a station's now-playing data comes from.
///
/// Declaration order is the de-duplication priority: a station covered by an
/// earlier kind is not polled again through a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// One shared homepage listing many stations at once.
    PrimaryAggregator,
    /// Per-station playlist page, container keyed by slug.
    PlaylistSiteA,
    /// Per-station playlist page, link blocks with a table fallback.
    PlaylistSiteB,
    /// Direct audio stream with in-band ICY metadata.
    StreamMetadata,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::PrimaryAggregator,
        SourceKind::PlaylistSiteA,
        SourceKind::PlaylistSiteB,
        SourceKind::StreamMetadata,
    ];

    /// Stable identifier used in the `stations.source` column and station files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrimaryAggregator => "aggregator",
            Self::PlaylistSiteA => "playlist_a",
            Self::PlaylistSiteB => "playlist_b",
            Self::StreamMetadata => "stream",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aggregator" | "relisten" | "primary_aggregator" => Ok(Self::PrimaryAggregator),
            "playlist_a" | "playlist_site_a" => Ok(Self::PlaylistSiteA),
            "playlist_b" | "playlist_site_b" => Ok(Self::PlaylistSiteB),
            "stream" | "icy" | "stream_metadata" => Ok(Self::StreamMetadata),
            other => anyhow::bail!("unknown source kind: {:?}", other),
        }
    }
}

/// One configured (station, source) pair. Identity is `(name, source)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationEntry {
    pub name: String,
    pub source: SourceKind,
    /// Site slug for the playlist sources, stream URL for `StreamMetadata`,
    /// section heading override (or empty) for the aggregator.
    #[serde(default)]
    pub slug: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: bool,
}

fn default_true() -> bool {
    true
}

impl StationEntry {
    pub fn new(name: impl Into<String>, source: SourceKind, slug: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source,
            slug: slug.into(),
            enabled: true,
            priority: false,
        }
    }

    pub fn with_priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Raw `(artist, title)` as extracted by one adapter call. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackObservation {
    pub artist: String,
    pub title: String,
}

impl TrackObservation {
    pub fn new(artist: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
        }
    }
}

/// Observation after prefix stripping (and optional title-casing / aliasing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedTrack {
    pub artist: String,
    pub title: String,
}

impl fmt::Display for NormalizedTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.artist, self.title)
    }
}

/// A detected change whose artist or song hit a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchEvent {
    pub station: String,
    pub artist: String,
    pub song: String,
    /// ISO 8601, local time with offset.
    pub timestamp: String,
}

impl MatchEvent {
    pub fn new(station: &str, track: &NormalizedTrack, at: DateTime<Local>) -> Self {
        Self {
            station: station.to_string(),
            artist: track.artist.clone(),
            song: track.title.clone(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, false),
        }
    }
}

/// Targets and priority stations, as read from the settings store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfiguration {
    #[serde(default)]
    pub target_artists: BTreeSet<String>,
    #[serde(default)]
    pub target_songs: BTreeSet<String>,
    #[serde(default)]
    pub priority_stations: BTreeSet<String>,
}

impl TargetConfiguration {
    pub fn is_empty(&self) -> bool {
        self.target_artists.is_empty() && self.target_songs.is_empty()
    }

    /// Case-insensitive substring match of the artist against every target
    /// artist, and of the title against every target song.
    pub fn matches(&self, track: &NormalizedTrack) -> bool {
        let artist = track.artist.to_lowercase();
        let title = track.title.to_lowercase();
        self.target_artists
            .iter()
            .any(|t| contains_target(&artist, t))
            || self.target_songs.iter().any(|t| contains_target(&title, t))
    }
}

fn contains_target(haystack: &str, target: &str) -> bool {
    let needle = target.trim().to_lowercase();
    !needle.is_empty() && haystack.contains(&needle)
}
