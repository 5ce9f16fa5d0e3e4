//! Title normalization and the order-invariant comparison key.
//!
//! One of the playlist sites prefixes titles with its catalog number
//! (`"#742: Two Hearts"`), and some sources swap the artist and title fields.
//! The comparison key folds both quirks away so change detection only fires
//! on a real track change.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::protocol::{NormalizedTrack, TrackObservation};

/// Separator between the two sorted fields of a comparison key.
pub const KEY_SEPARATOR: &str = " | ";

fn numeric_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // A run of `#<digits>:` groups, each followed by optional whitespace.
    // Consuming the whole run keeps the strip idempotent.
    RE.get_or_init(|| Regex::new(r"^(?:#\d+:\s*)+").expect("static regex"))
}

/// Remove a leading `#<digits>:` catalog prefix. Everything else, case and
/// internal whitespace included, is left untouched.
pub fn strip_numeric_prefix(title: &str) -> String {
    numeric_prefix().replace(title, "").into_owned()
}

/// Build the change-detection key for an `(artist, title)` pair.
///
/// Both fields are prefix-stripped, whitespace-collapsed and lower-cased, then
/// sorted so that `build_comparison_key(a, b) == build_comparison_key(b, a)`.
pub fn build_comparison_key(artist: &str, title: &str) -> String {
    let mut pair = [key_part(artist), key_part(title)];
    pair.sort();
    pair.join(KEY_SEPARATOR)
}

fn key_part(field: &str) -> String {
    strip_numeric_prefix(field.trim())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Capitalize each whitespace-separated word, lower-casing the rest of it.
/// Apostrophes stay word-internal: `"I CAN'T DANCE"` becomes `"I Can't Dance"`.
pub fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| match word.split_once('\'') {
            Some((head, tail)) => format!("{}'{}", capitalize(head), tail.to_lowercase()),
            None => capitalize(word),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Normalize one display field: strip the catalog prefix, collapse runs of
/// whitespace, then optionally title-case.
pub fn normalize_field(text: &str, title_case_enabled: bool) -> String {
    let stripped = strip_numeric_prefix(text.trim());
    if title_case_enabled {
        title_case(&stripped)
    } else {
        stripped.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Maps artist spellings onto one canonical name. An artist whose lower-cased
/// text contains a needle is replaced by that needle's canonical name.
#[derive(Debug, Clone, Default)]
pub struct ArtistAliases {
    entries: Vec<(String, String)>,
}

impl ArtistAliases {
    pub fn new(map: &BTreeMap<String, String>) -> Self {
        let entries = map
            .iter()
            .map(|(needle, canonical)| (needle.trim().to_lowercase(), canonical.clone()))
            .filter(|(needle, _)| !needle.is_empty())
            .collect();
        Self { entries }
    }

    pub fn resolve(&self, artist: &str) -> Option<&str> {
        let lower = artist.to_lowercase();
        self.entries
            .iter()
            .find(|(needle, _)| lower.contains(needle.as_str()))
            .map(|(_, canonical)| canonical.as_str())
    }
}

/// Turns raw observations into the values that are displayed, matched and stored.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    title_case: bool,
    aliases: ArtistAliases,
}

impl Normalizer {
    pub fn new(title_case: bool, aliases: ArtistAliases) -> Self {
        Self { title_case, aliases }
    }

    pub fn normalize(&self, raw: &TrackObservation) -> NormalizedTrack {
        let artist = normalize_field(&raw.artist, self.title_case);
        let artist = match self.aliases.resolve(&artist) {
            Some(canonical) => canonical.to_string(),
            None => artist,
        };
        NormalizedTrack {
            artist,
            title: normalize_field(&raw.title, self.title_case),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "",
        " ",
        "#742: Two Hearts",
        "#742:Two Hearts",
        "#1: #2: Nested",
        "#12:   spaced",
        "# 12: not a prefix",
        "Track #5: keeps inner",
        "  #3: leading space stays",
        "#: no digits",
        "Sussudio",
        "IN THE AIR TONIGHT",
    ];

    #[test]
    fn test_strip_numeric_prefix_scenario() {
        assert_eq!(strip_numeric_prefix("#742: Two Hearts"), "Two Hearts");
    }

    #[test]
    fn test_strip_numeric_prefix_is_idempotent() {
        for s in SAMPLES {
            let once = strip_numeric_prefix(s);
            assert_eq!(strip_numeric_prefix(&once), once, "input {:?}", s);
        }
    }

    #[test]
    fn test_strip_preserves_case_and_inner_whitespace() {
        assert_eq!(strip_numeric_prefix("#9: ONE  more   NIGHT"), "ONE  more   NIGHT");
        assert_eq!(strip_numeric_prefix("Track #5: keeps inner"), "Track #5: keeps inner");
        assert_eq!(strip_numeric_prefix("# 12: not a prefix"), "# 12: not a prefix");
    }

    #[test]
    fn test_key_is_symmetric() {
        for a in SAMPLES {
            for b in SAMPLES {
                assert_eq!(
                    build_comparison_key(a, b),
                    build_comparison_key(b, a),
                    "pair ({:?}, {:?})",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_key_is_case_invariant() {
        assert_eq!(
            build_comparison_key("Phil Collins", "In The Air"),
            build_comparison_key("PHIL COLLINS", "in the air")
        );
    }

    #[test]
    fn test_key_ignores_prefix_and_padding() {
        assert_eq!(
            build_comparison_key("Phil Collins", "#742: Two Hearts"),
            build_comparison_key("  phil collins ", "two hearts")
        );
        assert_eq!(build_comparison_key("B", "a"), "a | b");
    }

    #[test]
    fn test_key_collapses_inner_whitespace() {
        assert_eq!(
            build_comparison_key("Phil  Collins", "Easy \t Lover"),
            build_comparison_key("Phil Collins", "Easy Lover")
        );
    }

    #[test]
    fn test_title_case_handles_apostrophes() {
        let cases = [
            ("PHIL COLLINS", "Phil Collins"),
            ("I CAN'T DANCE", "I Can't Dance"),
            ("I can't dance", "I Can't Dance"),
            ("two hearts", "Two Hearts"),
            ("IN THE AIR TONIGHT", "In The Air Tonight"),
            ("You Can't Hurry Love", "You Can't Hurry Love"),
        ];
        for (input, expected) in cases {
            assert_eq!(title_case(input), expected);
        }
    }

    #[test]
    fn test_normalizer_applies_alias_after_stripping() {
        let mut map = BTreeMap::new();
        map.insert("Bailey".to_string(), "Phil Collins & Philip Bailey".to_string());
        let normalizer = Normalizer::new(false, ArtistAliases::new(&map));

        let out = normalizer.normalize(&TrackObservation::new(
            "Philip Bailey ft. Phil Collins",
            "#12: Easy Lover",
        ));
        assert_eq!(out.artist, "Phil Collins & Philip Bailey");
        assert_eq!(out.title, "Easy Lover");
    }

    #[test]
    fn test_normalize_field_collapses_whitespace() {
        assert_eq!(normalize_field("#3:  In The\n  Air ", false), "In The Air");
        assert_eq!(normalize_field("#3: IN THE  AIR", true), "In The Air");
    }

    #[test]
    fn test_normalizer_without_title_case_keeps_case() {
        let out = Normalizer::default().normalize(&TrackObservation::new(" Genesis ", "Land of Confusion"));
        assert_eq!(out.artist, "Genesis");
        assert_eq!(out.title, "Land of Confusion");
    }
}
