//! Playlist site B: one page per station, two known layouts.
//!
//! The current layout renders each track as a `.song` block holding links to
//! the title and artist pages; the link target tells which is which. Older
//! pages are a plain `<table>`, handled by column count: two columns are
//! artist/title, three are time/artist/title.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::{http, observation, SourceAdapter};
use crate::config::expand_template;
use crate::error::SourceError;
use crate::protocol::{SourceKind, StationEntry, TrackObservation};

const BLOCK_SELECTOR: &str = ".song";
const LINK_SELECTOR: &str = "a[href]";
const ROW_SELECTOR: &str = "table tr";
const CELL_SELECTOR: &str = "td";

const TITLE_PATHS: &[&str] = &["/title/", "/titel/", "/song/"];
const ARTIST_PATHS: &[&str] = &["/artist/", "/artiest/"];

/// Column headers in English and Dutch. Rows made of these are not tracks.
const HEADER_LABELS: &[&str] = &[
    "time", "artist", "title", "song", "tijd", "artiest", "titel", "nummer",
];

pub struct PlaylistBAdapter {
    client: Client,
    url_template: String,
}

impl PlaylistBAdapter {
    pub fn new(client: Client, url_template: impl Into<String>) -> Self {
        Self {
            client,
            url_template: url_template.into(),
        }
    }

    async fn try_fetch(&self, station: &StationEntry) -> Result<TrackObservation, SourceError> {
        let url = expand_template(&self.url_template, &station.slug);
        let html = http::fetch_html(&self.client, &url).await?;
        parse_playlist_b(&html)
    }
}

#[async_trait]
impl SourceAdapter for PlaylistBAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::PlaylistSiteB
    }

    async fn fetch(&self, station: &StationEntry) -> Option<TrackObservation> {
        match self.try_fetch(station).await {
            Ok(obs) => Some(obs),
            Err(e) => {
                debug!("[playlist-b] {} ({}): {}", station.name, station.slug, e);
                None
            }
        }
    }
}

/// Most recent track from a playlist-B page, block layout first.
pub fn parse_playlist_b(html: &str) -> Result<TrackObservation, SourceError> {
    let document = Html::parse_document(html);
    if let Some(obs) = parse_blocks(&document)? {
        return Ok(obs);
    }
    parse_table(&document)?.ok_or(SourceError::MissingStructure("track block or table row"))
}

fn parse_blocks(document: &Html) -> Result<Option<TrackObservation>, SourceError> {
    let blocks = selector(BLOCK_SELECTOR)?;
    let links = selector(LINK_SELECTOR)?;

    for block in document.select(&blocks) {
        let mut title = None;
        let mut artist = None;
        for link in block.select(&links) {
            let href = link.value().attr("href").unwrap_or_default().to_ascii_lowercase();
            if title.is_none() && TITLE_PATHS.iter().any(|p| href.contains(p)) {
                title = Some(text_of(&link));
            } else if artist.is_none() && ARTIST_PATHS.iter().any(|p| href.contains(p)) {
                artist = Some(text_of(&link));
            }
        }
        if let (Some(artist), Some(title)) = (artist, title) {
            if let Some(obs) = observation(&artist, &title) {
                return Ok(Some(obs));
            }
        }
    }
    Ok(None)
}

fn parse_table(document: &Html) -> Result<Option<TrackObservation>, SourceError> {
    let rows = selector(ROW_SELECTOR)?;
    let cells = selector(CELL_SELECTOR)?;

    for row in document.select(&rows) {
        let texts: Vec<String> = row
            .select(&cells)
            .map(|c| text_of(&c).trim().to_string())
            .collect();
        if texts.iter().any(|t| is_header_label(t)) {
            continue;
        }
        let candidate = match texts.as_slice() {
            [artist, title] => observation(artist, title),
            [_time, artist, title] => observation(artist, title),
            _ => None,
        };
        if candidate.is_some() {
            return Ok(candidate);
        }
    }
    Ok(None)
}

fn is_header_label(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    HEADER_LABELS.iter().any(|label| lower == *label)
}

fn text_of(el: &ElementRef) -> String {
    el.text().collect::<String>()
}

fn selector(css: &'static str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|_| SourceError::MissingStructure(css))
}
