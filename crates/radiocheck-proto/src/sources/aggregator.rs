//! Aggregator homepage: one page, many stations.
//!
//! Each station is an `<h2>` section heading. The nearest following `<h4>`
//! carries the track title (its first line; a timestamp follows on the next
//! one) and the nearest `<p>` after that carries the artist.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html};
use tracing::{debug, info, warn};

use super::{accept_text, http, SourceAdapter};
use crate::protocol::{SourceKind, StationEntry, TrackObservation};

pub struct AggregatorAdapter {
    client: Client,
    url: String,
    skip_headings: Vec<String>,
}

impl AggregatorAdapter {
    pub fn new(client: Client, url: impl Into<String>, skip_headings: Vec<String>) -> Self {
        Self {
            client,
            url: url.into(),
            skip_headings,
        }
    }
}

/// Heading the aggregator uses for this station: the slug when set, else the name.
fn heading_for(station: &StationEntry) -> &str {
    if station.slug.trim().is_empty() {
        &station.name
    } else {
        station.slug.trim()
    }
}

#[async_trait]
impl SourceAdapter for AggregatorAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::PrimaryAggregator
    }

    async fn fetch(&self, station: &StationEntry) -> Option<TrackObservation> {
        self.fetch_bulk(std::slice::from_ref(station))
            .await
            .remove(&station.name)
    }

    async fn fetch_bulk(&self, stations: &[StationEntry]) -> BTreeMap<String, TrackObservation> {
        let html = match http::fetch_html(&self.client, &self.url).await {
            Ok(html) => html,
            Err(e) => {
                warn!("[aggregator] fetch {} failed: {}", self.url, e);
                return BTreeMap::new();
            }
        };

        let allow: Vec<String> = stations.iter().map(|s| heading_for(s).to_string()).collect();
        let sections = parse_aggregator_page(&html, &self.skip_headings, &allow);

        // Re-key from page heading to configured station name.
        let mut out = BTreeMap::new();
        for station in stations {
            let heading = heading_for(station).to_lowercase();
            let hit = sections
                .iter()
                .find(|(h, _)| h.to_lowercase() == heading)
                .map(|(_, obs)| obs.clone());
            match hit {
                Some(obs) => {
                    out.insert(station.name.clone(), obs);
                }
                None => debug!("[aggregator] no section for {}", station.name),
            }
        }
        info!(
            "[aggregator] {} of {} stations found on page",
            out.len(),
            stations.len()
        );
        out
    }
}

/// Extract every station section from the aggregator page, keyed by heading.
///
/// `skip` lists decorative headings. When `allow` is non-empty only headings
/// in it (case-insensitive) are kept.
pub fn parse_aggregator_page(
    html: &str,
    skip: &[String],
    allow: &[String],
) -> BTreeMap<String, TrackObservation> {
    let document = Html::parse_document(html);

    // Flatten the interesting elements in document order so that "nearest
    // following" is a forward scan.
    let markers: Vec<ElementRef> = document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "h2" | "h4" | "p"))
        .collect();

    let is_listed = |needle: &str, list: &[String]| {
        list.iter().any(|s| s.trim().eq_ignore_ascii_case(needle))
    };

    let mut stations = BTreeMap::new();
    for (i, el) in markers.iter().enumerate() {
        if el.value().name() != "h2" {
            continue;
        }
        let Some(heading) = accept_text(&element_text(el)) else {
            continue;
        };
        if is_listed(&heading, skip) {
            continue;
        }
        if !allow.is_empty() && !is_listed(&heading, allow) {
            continue;
        }

        let Some(title_idx) = next_tag(&markers, i + 1, "h4") else {
            continue;
        };
        let title_text = element_text(&markers[title_idx]);
        let first_line = title_text.trim().split('\n').next().unwrap_or_default();
        let Some(title) = accept_text(first_line) else {
            continue;
        };

        let Some(artist_idx) = next_tag(&markers, title_idx + 1, "p") else {
            continue;
        };
        let Some(artist) = accept_text(&element_text(&markers[artist_idx])) else {
            continue;
        };

        stations.insert(heading, TrackObservation::new(artist, title));
    }
    stations
}

fn next_tag(markers: &[ElementRef], from: usize, tag: &str) -> Option<usize> {
    (from..markers.len()).find(|&j| markers[j].value().name() == tag)
}

fn element_text(el: &ElementRef) -> String {
    el.text().collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <h2>Muziekspeler</h2>
          <div class="player"><h4>Nu live</h4><p>Speler</p></div>
          <section>
            <h2>Radio 2</h2>
            <div class="now">
              <h4>In The Air Tonight
                <span class="time">14:02</span></h4>
              <p>Phil Collins</p>
            </div>
          </section>
          <section>
            <h2>Radio 10</h2>
            <div class="now"><h4>Mama</h4><p>Genesis</p></div>
          </section>
          <section>
            <h2>Sky Radio</h2>
            <div class="now"><h4> </h4><p>Nobody</p></div>
          </section>
          <section>
            <h2>Q</h2>
            <div class="now"><h4>Too Short</h4><p>Heading</p></div>
          </section>
        </body></html>
    "#;

    #[test]
    fn test_parses_sections_and_skips_chrome() {
        let skip = vec!["Muziekspeler".to_string()];
        let map = parse_aggregator_page(PAGE, &skip, &[]);

        assert!(!map.contains_key("Muziekspeler"));
        assert!(!map.contains_key("Q"));
        assert_eq!(
            map.get("Radio 2"),
            Some(&TrackObservation::new("Phil Collins", "In The Air Tonight"))
        );
        assert_eq!(map.get("Radio 10"), Some(&TrackObservation::new("Genesis", "Mama")));
    }

    #[test]
    fn test_blank_title_drops_section() {
        let map = parse_aggregator_page(PAGE, &[], &[]);
        assert!(!map.contains_key("Sky Radio"));
    }

    #[test]
    fn test_allow_list_restricts_sections() {
        let allow = vec!["radio 10".to_string()];
        let map = parse_aggregator_page(PAGE, &[], &allow);
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("Radio 10"));
    }

    #[test]
    fn test_garbage_input_yields_nothing() {
        assert!(parse_aggregator_page("<<<not html", &[], &[]).is_empty());
        assert!(parse_aggregator_page("", &[], &[]).is_empty());
    }

    #[test]
    fn test_heading_for_prefers_slug() {
        let plain = StationEntry::new("Radio 2", SourceKind::PrimaryAggregator, "");
        let renamed = StationEntry::new("NPO Radio 2", SourceKind::PrimaryAggregator, "Radio 2");
        assert_eq!(heading_for(&plain), "Radio 2");
        assert_eq!(heading_for(&renamed), "Radio 2");
    }
}
