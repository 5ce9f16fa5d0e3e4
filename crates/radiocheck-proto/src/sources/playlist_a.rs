//! Playlist site A: one page per station.
//!
//! The page holds a container whose `data-station` attribute (or `id`) is the
//! station slug. Inside it, rows marked with the `playlist-item` class list
//! the history newest first. Artist and title are the schema.org typed
//! children (`itemprop="byArtist"` and `itemprop="name"`).

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::{http, observation, SourceAdapter};
use crate::config::expand_template;
use crate::error::SourceError;
use crate::protocol::{SourceKind, StationEntry, TrackObservation};

const ROW_SELECTOR: &str = ".playlist-item";
const ARTIST_SELECTOR: &str = r#"[itemprop="byArtist"]"#;
const TITLE_SELECTOR: &str = r#"[itemprop="name"]"#;

pub struct PlaylistAAdapter {
    client: Client,
    url_template: String,
}

impl PlaylistAAdapter {
    pub fn new(client: Client, url_template: impl Into<String>) -> Self {
        Self {
            client,
            url_template: url_template.into(),
        }
    }

    async fn try_fetch(&self, station: &StationEntry) -> Result<TrackObservation, SourceError> {
        let url = expand_template(&self.url_template, &station.slug);
        let html = http::fetch_html(&self.client, &url).await?;
        parse_playlist_a(&html, &station.slug)
    }
}

#[async_trait]
impl SourceAdapter for PlaylistAAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::PlaylistSiteA
    }

    async fn fetch(&self, station: &StationEntry) -> Option<TrackObservation> {
        match self.try_fetch(station).await {
            Ok(obs) => Some(obs),
            Err(e) => {
                debug!("[playlist-a] {} ({}): {}", station.name, station.slug, e);
                None
            }
        }
    }
}

/// Most recent track from a playlist-A page.
pub fn parse_playlist_a(html: &str, slug: &str) -> Result<TrackObservation, SourceError> {
    let document = Html::parse_document(html);

    let container = document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| {
            let v = el.value();
            v.attr("data-station") == Some(slug) || v.id() == Some(slug)
        })
        .ok_or(SourceError::MissingStructure("station container"))?;

    let rows = selector(ROW_SELECTOR)?;
    let row = container
        .select(&rows)
        .next()
        .ok_or(SourceError::MissingStructure("playlist row"))?;

    let artist_sel = selector(ARTIST_SELECTOR)?;
    let title_sel = selector(TITLE_SELECTOR)?;

    let artist = row
        .select(&artist_sel)
        .next()
        .map(|el| el.text().collect::<String>())
        .ok_or(SourceError::MissingStructure("artist element"))?;

    // The artist element may carry its own itemprop="name"; skip those.
    let title = row
        .select(&title_sel)
        .find(|el| !inside_artist(el))
        .map(|el| el.text().collect::<String>())
        .ok_or(SourceError::MissingStructure("title element"))?;

    observation(&artist, &title).ok_or(SourceError::MissingStructure("empty artist or title"))
}

fn inside_artist(el: &ElementRef) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| a.value().attr("itemprop") == Some("byArtist"))
}

fn selector(css: &'static str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|_| SourceError::MissingStructure(css))
}
