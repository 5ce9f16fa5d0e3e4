//! Match sink: where matches go and where targets and stations come from.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::TargetsConfig;
use crate::error::StoreError;
use crate::protocol::{MatchEvent, SourceKind, StationEntry, TargetConfiguration};
use crate::registry::load_stations_from_toml;

pub const SETTING_TARGET_ARTISTS: &str = "target_artists";
pub const SETTING_TARGET_SONGS: &str = "target_songs";
pub const SETTING_PRIORITY_STATIONS: &str = "priority_stations";

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS songs (
    id INTEGER PRIMARY KEY,
    station TEXT,
    song TEXT,
    artist TEXT,
    timestamp TEXT
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT,
    updated_at TEXT
);

CREATE TABLE IF NOT EXISTS stations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    slug TEXT NOT NULL,
    source TEXT NOT NULL,
    enabled INTEGER DEFAULT 1,
    priority INTEGER DEFAULT 0,
    updated_at TEXT,
    UNIQUE(name, source)
);

CREATE INDEX IF NOT EXISTS idx_songs_station ON songs(station);
";

/// Persistence collaborator of the poll loop.
pub trait MatchSink: Send + Sync {
    fn record_match(&self, event: &MatchEvent) -> Result<(), StoreError>;

    /// JSON value of a setting, `None` when unset.
    fn get_setting(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Marker that changes whenever any setting is written.
    fn settings_last_modified(&self) -> Result<Option<String>, StoreError>;

    fn list_stations(&self, enabled_only: bool) -> Result<Vec<StationEntry>, StoreError>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        info!("[store] opening {}", path.display());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("creating {}: {}", parent.display(), e))
            })?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
    }

    pub fn set_setting(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let json = serde_json::to_string(value)?;
        self.conn()?.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, json, now_marker()],
        )?;
        Ok(())
    }

    pub fn upsert_station(&self, station: &StationEntry) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO stations (name, slug, source, enabled, priority, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(name, source) DO UPDATE SET
                slug = excluded.slug,
                enabled = excluded.enabled,
                priority = excluded.priority,
                updated_at = excluded.updated_at",
            params![
                station.name,
                station.slug,
                station.source.as_str(),
                station.enabled,
                station.priority,
                now_marker()
            ],
        )?;
        Ok(())
    }

    pub fn station_count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM stations", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Newest matches first.
    pub fn recent_matches(&self, limit: usize) -> Result<Vec<MatchEvent>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT station, artist, song, timestamp FROM songs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(MatchEvent {
                station: row.get(0)?,
                artist: row.get(1)?,
                song: row.get(2)?,
                timestamp: row.get(3)?,
            })
        })?;
        let matches = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(matches)
    }

    pub fn match_count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM songs", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

impl MatchSink for SqliteStore {
    fn record_match(&self, event: &MatchEvent) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO songs (station, song, artist, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![event.station, event.song, event.artist, event.timestamp],
        )?;
        Ok(())
    }

    fn get_setting(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let raw: Option<Option<String>> = self
            .conn()?
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        match raw.flatten() {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn settings_last_modified(&self) -> Result<Option<String>, StoreError> {
        let marker: Option<String> = self
            .conn()?
            .query_row("SELECT MAX(updated_at) FROM settings", [], |row| row.get(0))?;
        Ok(marker)
    }

    fn list_stations(&self, enabled_only: bool) -> Result<Vec<StationEntry>, StoreError> {
        let sql = if enabled_only {
            "SELECT name, slug, source, enabled, priority FROM stations WHERE enabled = 1 ORDER BY name, source"
        } else {
            "SELECT name, slug, source, enabled, priority FROM stations ORDER BY name, source"
        };
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, bool>(4)?,
            ))
        })?;

        let mut stations = Vec::new();
        for row in rows {
            let (name, slug, source, enabled, priority) = row?;
            match source.parse::<SourceKind>() {
                Ok(kind) => stations.push(
                    StationEntry::new(name, kind, slug)
                        .with_enabled(enabled)
                        .with_priority(priority),
                ),
                Err(e) => warn!("[store] skipping station {}: {}", name, e),
            }
        }
        Ok(stations)
    }
}

fn now_marker() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Targets from the settings store. Unset keys fall back to the config file
/// lists; unreadable or malformed ones fall back as well, with a warning.
pub fn load_targets(sink: &dyn MatchSink, fallback: &TargetsConfig) -> TargetConfiguration {
    TargetConfiguration {
        target_artists: setting_list(sink, SETTING_TARGET_ARTISTS)
            .unwrap_or_else(|| fallback.artists.iter().cloned().collect()),
        target_songs: setting_list(sink, SETTING_TARGET_SONGS)
            .unwrap_or_else(|| fallback.songs.iter().cloned().collect()),
        priority_stations: setting_list(sink, SETTING_PRIORITY_STATIONS).unwrap_or_default(),
    }
}

fn setting_list(sink: &dyn MatchSink, key: &str) -> Option<BTreeSet<String>> {
    match sink.get_setting(key) {
        Ok(Some(Value::Array(items))) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        Ok(Some(other)) => {
            warn!("[store] setting {} is not a list: {}", key, other);
            None
        }
        Ok(None) => None,
        Err(e) => {
            warn!("[store] reading setting {}: {}", key, e);
            None
        }
    }
}

/// Fill an empty `stations` table from the station file. Returns how many
/// stations were written.
pub fn seed_stations(store: &SqliteStore, stations_toml: &Path) -> anyhow::Result<usize> {
    if store.station_count()? > 0 {
        return Ok(0);
    }
    if !stations_toml.exists() {
        warn!(
            "[store] no stations configured and {} does not exist",
            stations_toml.display()
        );
        return Ok(0);
    }
    let stations = load_stations_from_toml(stations_toml)?;
    for station in &stations {
        store.upsert_station(station)?;
    }
    info!(
        "[store] seeded {} stations from {}",
        stations.len(),
        stations_toml.display()
    );
    Ok(stations.len())
}
