use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::poll::CycleReport;
use crate::protocol::{NormalizedTrack, SourceKind};

/// What one station is playing, as last detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub artist: String,
    pub song: String,
    pub source: SourceKind,
    /// When this track was first seen on the station.
    pub since: String,
}

/// Read model for the web layer: current track per station plus the summary
/// of the last cycle. `rev` increments on every change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NowPlayingState {
    pub rev: u64,
    pub updated_at: Option<String>,
    pub stations: BTreeMap<String, NowPlaying>,
    pub last_cycle: Option<CycleReport>,
}

pub struct SnapshotManager {
    state: Arc<RwLock<NowPlayingState>>,
    snapshot_file: Option<PathBuf>,
}

impl SnapshotManager {
    /// With no file the snapshot only lives in memory.
    pub fn new(snapshot_file: Option<PathBuf>) -> Self {
        Self {
            state: Arc::new(RwLock::new(NowPlayingState::default())),
            snapshot_file,
        }
    }

    pub async fn get_state(&self) -> NowPlayingState {
        self.state.read().await.clone()
    }

    pub async fn set_track(&self, station: &str, track: &NormalizedTrack, source: SourceKind) {
        let mut state = self.state.write().await;
        state.stations.insert(
            station.to_string(),
            NowPlaying {
                artist: track.artist.clone(),
                song: track.title.clone(),
                source,
                since: now(),
            },
        );
        state.rev += 1;
    }

    /// Record the cycle summary and write the snapshot file.
    pub async fn finish_cycle(&self, report: &CycleReport) -> anyhow::Result<()> {
        {
            let mut state = self.state.write().await;
            state.last_cycle = Some(report.clone());
            state.updated_at = Some(now());
            state.rev += 1;
        }
        self.save().await
    }

    async fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.snapshot_file else {
            return Ok(());
        };
        let json = {
            let state = self.state.read().await;
            serde_json::to_string_pretty(&*state)?
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write then rename so readers never see a half-written file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

fn now() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}
