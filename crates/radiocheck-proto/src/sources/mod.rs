//! Now-playing source adapters.
//!
//! Every adapter answers "what is this station playing right now?" and
//! swallows its own failures: a transport error, a non-200 status or markup
//! that no longer looks the way we expect all come back as "no data", so one
//! broken source never takes the rest of the cycle down with it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::protocol::{SourceKind, StationEntry, TrackObservation};

pub mod aggregator;
pub mod http;
pub mod icy;
pub mod playlist_a;
pub mod playlist_b;

pub use aggregator::AggregatorAdapter;
pub use icy::StreamAdapter;
pub use playlist_a::PlaylistAAdapter;
pub use playlist_b::PlaylistBAdapter;

/// Extracted text shorter than this is treated as placeholder markup.
pub const MIN_TEXT_LEN: usize = 2;

/// Capability shared by the four source variants.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Current track for one station, or `None` when the source has nothing.
    async fn fetch(&self, station: &StationEntry) -> Option<TrackObservation>;

    /// Current tracks for a set of stations, keyed by station name.
    ///
    /// The default polls one station after the other; the aggregator
    /// overrides this with a single page fetch.
    async fn fetch_bulk(&self, stations: &[StationEntry]) -> BTreeMap<String, TrackObservation> {
        let mut out = BTreeMap::new();
        for station in stations {
            if let Some(obs) = self.fetch(station).await {
                out.entry(station.name.clone()).or_insert(obs);
            }
        }
        out
    }
}

/// One adapter per source kind, wired from the configuration. The HTML
/// sources share a client.
pub fn build_adapters(config: &Config) -> anyhow::Result<Vec<Arc<dyn SourceAdapter>>> {
    let sources = &config.sources;
    let html = http::build_client(&sources.user_agent, config.poll.request_timeout())?;
    let audio = http::build_stream_client(&sources.user_agent, config.poll.stream_timeout())?;

    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::with_capacity(SourceKind::ALL.len());
    adapters.push(Arc::new(AggregatorAdapter::new(
        html.clone(),
        sources.aggregator_url.clone(),
        sources.aggregator_skip_headings.clone(),
    )));
    adapters.push(Arc::new(PlaylistAAdapter::new(
        html.clone(),
        sources.playlist_a_url_template.clone(),
    )));
    adapters.push(Arc::new(PlaylistBAdapter::new(
        html,
        sources.playlist_b_url_template.clone(),
    )));
    adapters.push(Arc::new(StreamAdapter::new(
        audio,
        config.poll.stream_timeout(),
        &config.stream,
    )));
    Ok(adapters)
}

/// Trim and accept text only when it is long enough to be real data.
pub fn accept_text(raw: &str) -> Option<String> {
    let text = raw.trim();
    if text.chars().count() < MIN_TEXT_LEN {
        None
    } else {
        Some(text.to_string())
    }
}

/// Build an observation when both fields pass [`accept_text`].
pub fn observation(artist: &str, title: &str) -> Option<TrackObservation> {
    Some(TrackObservation::new(accept_text(artist)?, accept_text(title)?))
}
