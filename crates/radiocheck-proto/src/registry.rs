use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::protocol::{SourceKind, StationEntry};

/// Enabled stations partitioned by source kind, plus the de-duplicated poll
/// sets derived from them.
///
/// A station covered by an earlier [`SourceKind`] is left out of every later
/// kind's de-duplicated set. Priority stations are polled through playlist A
/// before anything else; the aggregator only sees those that stage missed.
#[derive(Debug, Clone, Default)]
pub struct StationRegistry {
    stations: Vec<StationEntry>,
    priority: BTreeSet<String>,
    full: BTreeMap<SourceKind, Vec<StationEntry>>,
    deduped: BTreeMap<SourceKind, Vec<StationEntry>>,
}

impl StationRegistry {
    /// `priority` is the settings-store list; entries flagged `priority` in
    /// the station table are added to it.
    pub fn new(stations: Vec<StationEntry>, priority: &BTreeSet<String>) -> Self {
        let mut registry = Self::default();
        registry.reload(stations, priority);
        registry
    }

    /// Replace the station definitions and recompute every poll set.
    pub fn reload(&mut self, stations: Vec<StationEntry>, priority: &BTreeSet<String>) {
        self.stations = stations.into_iter().filter(|s| s.enabled).collect();
        self.priority = priority.clone();
        self.priority.extend(
            self.stations
                .iter()
                .filter(|s| s.priority)
                .map(|s| s.name.clone()),
        );
        self.rebuild();
    }

    fn rebuild(&mut self) {
        self.full.clear();
        self.deduped.clear();

        for station in &self.stations {
            let set = self.full.entry(station.source).or_default();
            if set.iter().any(|s| s.name == station.name) {
                warn!("[registry] duplicate station {} for {}", station.name, station.source);
                continue;
            }
            set.push(station.clone());
        }
        for set in self.full.values_mut() {
            set.sort_by(|a, b| a.name.cmp(&b.name));
        }

        let mut covered: BTreeSet<String> = BTreeSet::new();
        for kind in SourceKind::ALL {
            let full = self.full.get(&kind).cloned().unwrap_or_default();
            let kept: Vec<StationEntry> = full
                .iter()
                .filter(|s| !covered.contains(&s.name))
                .cloned()
                .collect();
            covered.extend(full.into_iter().map(|s| s.name));
            debug!(
                "[registry] {}: {} configured, {} after de-duplication",
                kind,
                self.full.get(&kind).map_or(0, Vec::len),
                kept.len()
            );
            self.deduped.insert(kind, kept);
        }

        for name in &self.priority {
            if !self.full_set(SourceKind::PlaylistSiteA).iter().any(|s| &s.name == name) {
                warn!(
                    "[registry] priority station {} has no playlist-A entry, left to the aggregator",
                    name
                );
            }
        }
    }

    /// Every enabled station of this kind, sorted by name.
    pub fn full_set(&self, kind: SourceKind) -> &[StationEntry] {
        self.full.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    /// Stations of this kind not already covered by a higher-priority kind.
    pub fn deduplicated_set(&self, kind: SourceKind) -> &[StationEntry] {
        self.deduped.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    /// Playlist-A entries of the priority stations.
    pub fn priority_stations(&self) -> Vec<StationEntry> {
        self.full_set(SourceKind::PlaylistSiteA)
            .iter()
            .filter(|s| self.priority.contains(&s.name))
            .cloned()
            .collect()
    }

    pub fn priority_names(&self) -> &BTreeSet<String> {
        &self.priority
    }

    pub fn stations(&self) -> &[StationEntry] {
        &self.stations
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

// ── TOML station loader ───────────────────────────────────────────────────────

/// The station file is a list of `[[station]]` tables. The source is kept as
/// a string here so an unknown kind names the offending station.
#[derive(Debug, Deserialize)]
struct TomlStationFile {
    #[serde(default)]
    station: Vec<TomlStation>,
}

#[derive(Debug, Deserialize)]
struct TomlStation {
    name: String,
    source: String,
    #[serde(default)]
    slug: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    priority: bool,
}

fn default_enabled() -> bool {
    true
}

pub fn load_stations_from_toml(path: &Path) -> anyhow::Result<Vec<StationEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    parse_stations_from_toml_str(&content)
}

pub fn parse_stations_from_toml_str(content: &str) -> anyhow::Result<Vec<StationEntry>> {
    let file: TomlStationFile = toml::from_str(content)?;
    file.station
        .into_iter()
        .map(|s| {
            let source = s
                .source
                .parse::<SourceKind>()
                .with_context(|| format!("station {}", s.name))?;
            Ok(StationEntry::new(s.name, source, s.slug)
                .with_enabled(s.enabled)
                .with_priority(s.priority))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use SourceKind::*;

    fn entry(name: &str, kind: SourceKind) -> StationEntry {
        StationEntry::new(name, kind, name.to_lowercase().replace(' ', "-"))
    }

    fn names(set: &[StationEntry]) -> Vec<&str> {
        set.iter().map(|s| s.name.as_str()).collect()
    }

    fn sample() -> Vec<StationEntry> {
        vec![
            entry("Radio 2", PrimaryAggregator),
            entry("Radio 10", PrimaryAggregator),
            entry("Sky Radio", PrimaryAggregator),
            entry("Radio 2", PlaylistSiteA),
            entry("Qmusic", PlaylistSiteA),
            entry("Sky Radio", PlaylistSiteA),
            entry("Qmusic", PlaylistSiteB),
            entry("Veronica", PlaylistSiteB),
            entry("Radio 10", PlaylistSiteB),
            entry("Veronica", StreamMetadata),
            entry("Joe", StreamMetadata),
        ]
    }

    #[test]
    fn test_dedup_follows_kind_priority() {
        let registry = StationRegistry::new(sample(), &BTreeSet::new());
        assert_eq!(
            names(registry.deduplicated_set(PrimaryAggregator)),
            vec!["Radio 10", "Radio 2", "Sky Radio"]
        );
        assert_eq!(names(registry.deduplicated_set(PlaylistSiteA)), vec!["Qmusic"]);
        assert_eq!(names(registry.deduplicated_set(PlaylistSiteB)), vec!["Veronica"]);
        assert_eq!(names(registry.deduplicated_set(StreamMetadata)), vec!["Joe"]);
        assert_eq!(registry.full_set(PlaylistSiteB).len(), 3);
    }

    #[test]
    fn test_priority_stations_are_playlist_a_entries() {
        let priority: BTreeSet<String> = ["Sky Radio".to_string(), "Radio 10".to_string()].into();
        let registry = StationRegistry::new(sample(), &priority);
        // Radio 10 has no playlist-A entry, so only Sky Radio is polled early.
        assert_eq!(names(&registry.priority_stations()), vec!["Sky Radio"]);
        assert_eq!(registry.full_set(PrimaryAggregator).len(), 3);
    }

    #[test]
    fn test_priority_flag_on_entry_counts() {
        let mut stations = sample();
        stations[3] = entry("Radio 2", PlaylistSiteA).with_priority(true);
        let registry = StationRegistry::new(stations, &BTreeSet::new());
        assert!(registry.priority_names().contains("Radio 2"));
        assert_eq!(names(&registry.priority_stations()), vec!["Radio 2"]);
    }

    #[test]
    fn test_disabled_stations_are_ignored() {
        let mut stations = sample();
        stations.push(entry("Arrow", PlaylistSiteA).with_enabled(false));
        let registry = StationRegistry::new(stations, &BTreeSet::new());
        assert!(!names(registry.full_set(PlaylistSiteA)).contains(&"Arrow"));
        assert_eq!(registry.len(), 11);
    }

    #[test]
    fn test_reload_recomputes_sets() {
        let mut registry = StationRegistry::new(sample(), &BTreeSet::new());
        registry.reload(
            vec![entry("Qmusic", PlaylistSiteA), entry("Qmusic", PlaylistSiteB)],
            &BTreeSet::new(),
        );
        assert!(registry.deduplicated_set(PrimaryAggregator).is_empty());
        assert_eq!(names(registry.deduplicated_set(PlaylistSiteA)), vec!["Qmusic"]);
        assert!(registry.deduplicated_set(PlaylistSiteB).is_empty());
    }

    #[test]
    fn test_parse_station_file() {
        let stations = parse_stations_from_toml_str(
            r#"
            [[station]]
            name = "Radio 2"
            source = "aggregator"

            [[station]]
            name = "Sky Radio"
            source = "playlist_a"
            slug = "sky-radio"
            priority = true

            [[station]]
            name = "Joe"
            source = "stream"
            slug = "http://stream.example/joe.mp3"
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(stations.len(), 3);
        assert_eq!(stations[0].slug, "");
        assert!(stations[1].priority);
        assert_eq!(stations[2].source, StreamMetadata);
        assert!(!stations[2].enabled);
    }

    #[test]
    fn test_unknown_source_names_station() {
        let err = parse_stations_from_toml_str(
            r#"
            [[station]]
            name = "Radio Veronica"
            source = "myspace"
            "#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("Radio Veronica"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stations.toml");
        std::fs::write(&path, "[[station]]\nname = \"Qmusic\"\nsource = \"playlist_b\"\nslug = \"qmusic\"\n")
            .unwrap();
        let stations = load_stations_from_toml(&path).unwrap();
        assert_eq!(stations, vec![StationEntry::new("Qmusic", PlaylistSiteB, "qmusic")]);
        assert!(load_stations_from_toml(&dir.path().join("missing.toml")).is_err());
    }
}
