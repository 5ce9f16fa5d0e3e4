//! The poll loop: fetch from every source, merge, detect changes, match.
//!
//! One cycle walks the stages priority → aggregator → playlist A →
//! playlist B → streams. Within a stage stations are fetched concurrently
//! (bounded, each call under its own timeout); across stages a station that
//! is already in the merged map is never fetched or overwritten again, so
//! earlier stages win regardless of completion order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, TargetsConfig};
use crate::normalize::{build_comparison_key, Normalizer};
use crate::protocol::{MatchEvent, SourceKind, StationEntry, TargetConfiguration, TrackObservation};
use crate::registry::StationRegistry;
use crate::sources::SourceAdapter;
use crate::state::SnapshotManager;
use crate::store::{load_targets, MatchSink};

/// Station name → comparison key of the last track seen there.
pub type LastSeenMap = BTreeMap<String, String>;

/// Slack on top of an adapter's own timeout before a call is abandoned.
const CALL_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationScope {
    /// Every configured station of the kind.
    Full,
    /// Only stations no higher-priority kind covers.
    Deduplicated,
}

/// Without the aggregator, playlist A takes over everything it knows.
pub fn playlist_a_scope(aggregator_failed: bool) -> StationScope {
    if aggregator_failed {
        StationScope::Full
    } else {
        StationScope::Deduplicated
    }
}

/// Playlist B also broadens when coverage so far is thin.
pub fn playlist_b_scope(
    aggregator_failed: bool,
    merged_so_far: usize,
    min_merged: usize,
) -> StationScope {
    if aggregator_failed || merged_so_far < min_merged {
        StationScope::Full
    } else {
        StationScope::Deduplicated
    }
}

pub fn stream_scope(aggregator_failed: bool) -> StationScope {
    playlist_a_scope(aggregator_failed)
}

/// Settings are checked on every `every`-th cycle; `0` disables the check.
pub fn reload_due(cycle: u64, every: u64) -> bool {
    every > 0 && cycle % every == 0
}

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub request_timeout: Duration,
    pub stream_timeout: Duration,
    pub reload_every_cycles: u64,
    pub min_merged_stations: usize,
    pub concurrency: usize,
    pub audible_alert: bool,
    /// Targets used when the settings store has none.
    pub fallback_targets: TargetsConfig,
}

impl PollSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.poll.interval(),
            request_timeout: config.poll.request_timeout(),
            stream_timeout: config.poll.stream_timeout(),
            reload_every_cycles: config.poll.reload_every_cycles,
            min_merged_stations: config.poll.min_merged_stations,
            concurrency: config.poll.concurrency.max(1),
            audible_alert: config.matching.audible_alert,
            fallback_targets: config.targets.clone(),
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Summary of one cycle, also written into the now-playing snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub reloaded: bool,
    pub priority_results: usize,
    pub aggregator_results: usize,
    pub aggregator_failed: bool,
    pub playlist_a_results: usize,
    pub playlist_b_results: usize,
    pub stream_results: usize,
    pub merged: usize,
    pub changes: usize,
    pub matches: usize,
    pub persist_failures: usize,
    pub no_data: bool,
}

#[derive(Debug, Clone)]
struct Merged {
    source: SourceKind,
    observation: TrackObservation,
}

pub struct PollOrchestrator {
    adapters: BTreeMap<SourceKind, Arc<dyn SourceAdapter>>,
    sink: Arc<dyn MatchSink>,
    settings: PollSettings,
    normalizer: Normalizer,
    registry: StationRegistry,
    targets: TargetConfiguration,
    last_seen: LastSeenMap,
    snapshot: SnapshotManager,
    settings_marker: Option<String>,
    cycle: u64,
}

impl PollOrchestrator {
    /// Reads targets and stations from the sink straight away.
    pub fn new(sink: Arc<dyn MatchSink>, settings: PollSettings, normalizer: Normalizer) -> Self {
        let mut orchestrator = Self {
            adapters: BTreeMap::new(),
            sink,
            settings,
            normalizer,
            registry: StationRegistry::default(),
            targets: TargetConfiguration::default(),
            last_seen: LastSeenMap::new(),
            snapshot: SnapshotManager::new(None),
            settings_marker: None,
            cycle: 0,
        };
        orchestrator.settings_marker = orchestrator.read_marker();
        orchestrator.reload_configuration();
        orchestrator
    }

    /// Register the adapter for its source kind, replacing any previous one.
    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    pub fn with_snapshot(mut self, snapshot: SnapshotManager) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn last_seen(&self) -> &LastSeenMap {
        &self.last_seen
    }

    pub fn targets(&self) -> &TargetConfiguration {
        &self.targets
    }

    pub fn registry(&self) -> &StationRegistry {
        &self.registry
    }

    pub fn snapshot(&self) -> &SnapshotManager {
        &self.snapshot
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Poll until cancelled. Cancellation is honoured between cycles and
    /// during the sleep; a running cycle finishes first.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(
            "[poll] starting: {} stations, interval {}s",
            self.registry.len(),
            self.settings.interval.as_secs()
        );
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let report = self.run_cycle().await;
            debug!("[poll] cycle report: {:?}", report);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
        }
        info!("[poll] stopped after {} cycles", self.cycle);
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycle += 1;
        let mut report = CycleReport {
            cycle: self.cycle,
            ..Default::default()
        };

        if reload_due(self.cycle, self.settings.reload_every_cycles) {
            report.reloaded = self.check_reload();
        }

        let mut merged: BTreeMap<String, Merged> = BTreeMap::new();

        let priority = self.registry.priority_stations();
        let found = self.fetch_each(SourceKind::PlaylistSiteA, priority).await;
        report.priority_results = merge_absent(&mut merged, SourceKind::PlaylistSiteA, found);

        let aggregator_set: Vec<StationEntry> = self
            .registry
            .full_set(SourceKind::PrimaryAggregator)
            .iter()
            .filter(|s| !merged.contains_key(&s.name))
            .cloned()
            .collect();
        if !aggregator_set.is_empty() {
            let found = self.fetch_aggregator(&aggregator_set).await;
            report.aggregator_failed = found.is_empty();
            report.aggregator_results =
                merge_absent(&mut merged, SourceKind::PrimaryAggregator, found);
            if report.aggregator_failed {
                warn!("[poll] aggregator returned nothing, widening fallback sources");
            }
        }

        let scope = playlist_a_scope(report.aggregator_failed);
        let found = self.fetch_stage(SourceKind::PlaylistSiteA, scope, &merged).await;
        report.playlist_a_results = merge_absent(&mut merged, SourceKind::PlaylistSiteA, found);

        let scope = playlist_b_scope(
            report.aggregator_failed,
            merged.len(),
            self.settings.min_merged_stations,
        );
        let found = self.fetch_stage(SourceKind::PlaylistSiteB, scope, &merged).await;
        report.playlist_b_results = merge_absent(&mut merged, SourceKind::PlaylistSiteB, found);

        let scope = stream_scope(report.aggregator_failed);
        let found = self.fetch_stage(SourceKind::StreamMetadata, scope, &merged).await;
        report.stream_results = merge_absent(&mut merged, SourceKind::StreamMetadata, found);

        report.merged = merged.len();
        if merged.is_empty() {
            warn!("[poll] no data from any source this cycle");
            report.no_data = true;
        } else {
            self.detect_and_match(&merged, &mut report).await;
        }

        if let Err(e) = self.snapshot.finish_cycle(&report).await {
            warn!("[poll] writing now-playing snapshot: {:#}", e);
        }
        report
    }

    /// Stations are visited in name order; `merged` is a sorted map.
    async fn detect_and_match(&mut self, merged: &BTreeMap<String, Merged>, report: &mut CycleReport) {
        for (station, entry) in merged {
            let track = self.normalizer.normalize(&entry.observation);
            let key = build_comparison_key(&track.artist, &track.title);

            if self.last_seen.get(station) == Some(&key) {
                continue;
            }
            self.last_seen.insert(station.clone(), key);
            report.changes += 1;
            self.snapshot.set_track(station, &track, entry.source).await;

            if !self.targets.matches(&track) {
                info!("[{}] {}", station, track);
                continue;
            }

            report.matches += 1;
            warn!(">>> MATCH [{}] {} (via {})", station, track, entry.source);
            if self.settings.audible_alert {
                eprint!("\x07");
            }
            let event = MatchEvent::new(station, &track, Local::now());
            if let Err(e) = self.sink.record_match(&event) {
                report.persist_failures += 1;
                error!("[store] match on {} not saved: {}", station, e);
            }
        }

        if report.changes == 0 {
            info!("[poll] no changes ({} stations)", merged.len());
        }
    }

    fn read_marker(&self) -> Option<String> {
        match self.sink.settings_last_modified() {
            Ok(marker) => marker,
            Err(e) => {
                warn!("[poll] reading settings marker: {}", e);
                None
            }
        }
    }

    /// Reload when the settings marker moved. Returns whether it did.
    fn check_reload(&mut self) -> bool {
        let marker = match self.sink.settings_last_modified() {
            Ok(marker) => marker,
            Err(e) => {
                warn!("[poll] reading settings marker: {}", e);
                return false;
            }
        };
        if marker == self.settings_marker {
            return false;
        }
        info!("[poll] settings changed, reloading targets and stations");
        self.settings_marker = marker;
        self.reload_configuration();
        true
    }

    /// A failed station read keeps the stations already loaded.
    fn reload_configuration(&mut self) {
        self.targets = load_targets(self.sink.as_ref(), &self.settings.fallback_targets);
        let stations = match self.sink.list_stations(true) {
            Ok(stations) => stations,
            Err(e) => {
                warn!("[poll] reading stations: {}", e);
                self.registry.stations().to_vec()
            }
        };
        self.registry.reload(stations, &self.targets.priority_stations);
        info!(
            "[poll] {} stations, {} target artists, {} target songs, {} priority",
            self.registry.len(),
            self.targets.target_artists.len(),
            self.targets.target_songs.len(),
            self.registry.priority_names().len()
        );
    }

    async fn fetch_aggregator(&self, stations: &[StationEntry]) -> BTreeMap<String, TrackObservation> {
        let Some(adapter) = self.adapters.get(&SourceKind::PrimaryAggregator) else {
            debug!("[poll] no aggregator adapter registered");
            return BTreeMap::new();
        };
        let limit = self.settings.request_timeout + CALL_GRACE;
        match timeout(limit, adapter.fetch_bulk(stations)).await {
            Ok(found) => found,
            Err(_) => {
                warn!("[aggregator] gave up after {}s", limit.as_secs());
                BTreeMap::new()
            }
        }
    }

    async fn fetch_stage(
        &self,
        kind: SourceKind,
        scope: StationScope,
        merged: &BTreeMap<String, Merged>,
    ) -> BTreeMap<String, TrackObservation> {
        let candidates = match scope {
            StationScope::Full => self.registry.full_set(kind),
            StationScope::Deduplicated => self.registry.deduplicated_set(kind),
        };
        let pending: Vec<StationEntry> = candidates
            .iter()
            .filter(|s| !merged.contains_key(&s.name))
            .cloned()
            .collect();
        debug!("[poll] {} ({:?}): {} stations to fetch", kind, scope, pending.len());
        self.fetch_each(kind, pending).await
    }

    /// Fetch stations one adapter call each, at most `concurrency` at a time.
    async fn fetch_each(
        &self,
        kind: SourceKind,
        stations: Vec<StationEntry>,
    ) -> BTreeMap<String, TrackObservation> {
        if stations.is_empty() {
            return BTreeMap::new();
        }
        let Some(adapter) = self.adapters.get(&kind).cloned() else {
            debug!("[poll] no adapter for {}, skipping {} stations", kind, stations.len());
            return BTreeMap::new();
        };
        let limit = match kind {
            SourceKind::StreamMetadata => self.settings.stream_timeout,
            _ => self.settings.request_timeout,
        } + CALL_GRACE;

        let results: Vec<(String, Option<TrackObservation>)> = stream::iter(stations)
            .map(|station| {
                let adapter = Arc::clone(&adapter);
                async move {
                    let found = match timeout(limit, adapter.fetch(&station)).await {
                        Ok(found) => found,
                        Err(_) => {
                            debug!("[poll] {} via {} timed out", station.name, kind);
                            None
                        }
                    };
                    (station.name, found)
                }
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut out = BTreeMap::new();
        for (name, found) in results {
            if let Some(obs) = found {
                out.entry(name).or_insert(obs);
            }
        }
        out
    }
}

/// Insert-if-absent merge; returns how many stations were added.
fn merge_absent(
    merged: &mut BTreeMap<String, Merged>,
    source: SourceKind,
    found: BTreeMap<String, TrackObservation>,
) -> usize {
    let mut added = 0;
    for (name, observation) in found {
        if merged.contains_key(&name) {
            continue;
        }
        merged.insert(name, Merged { source, observation });
        added += 1;
    }
    added
}
