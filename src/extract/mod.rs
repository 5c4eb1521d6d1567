//! Pure extractors: raw document in, typed records (or a structural failure)
//! out. Nothing in here touches the network, the clock (callers pass `now`)
//! or the store, so every extractor is pinned by saved fixture pages.
//!
//! Failure policy shared by all extractors:
//! - a missing structural anchor fails the whole document
//!   (`ExtractionError::AnchorMissing`);
//! - a missing field inside an otherwise recognised record is `None`, never
//!   a made-up default.

pub mod match_detail;
pub mod match_list;
pub mod rankings;
pub mod tournaments;

pub use match_detail::{extract_match_detail, MatchDetail, PlayerInfo};
pub use match_list::{extract_match_list, MatchLink, MatchListing};
pub use rankings::{extract_rankings_page, RankingRow};
pub use tournaments::{
    extract_tournament_detail, extract_tournament_list, TournamentDetail, TournamentLink,
};

use regex::Regex;
use scraper::{ElementRef, Selector};
use url::Url;

use crate::error::ExtractionError;

pub(crate) fn selector(css: &'static str) -> Result<Selector, ExtractionError> {
    Selector::parse(css).map_err(|e| ExtractionError::Malformed {
        what: "selector",
        detail: format!("{css}: {e}"),
    })
}

pub(crate) fn regex(pattern: &'static str) -> Result<Regex, ExtractionError> {
    Regex::new(pattern).map_err(|e| ExtractionError::Malformed {
        what: "pattern",
        detail: format!("{pattern}: {e}"),
    })
}

/// Element text with runs of whitespace collapsed and ends trimmed.
pub(crate) fn element_text(el: &ElementRef) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

pub(crate) fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Table-cell text; the source renders unknown values as "-".
pub(crate) fn clean_cell_text(el: &ElementRef) -> Option<String> {
    let t = element_text(el);
    if t.is_empty() || t == "-" {
        None
    } else {
        Some(t)
    }
}

/// Resolve a possibly relative link against the source base URL.
pub(crate) fn absolutize(base: &Url, href: &str) -> Option<String> {
    base.join(href).ok().map(String::from)
}

/// Detail page of a scraped match.
pub fn match_detail_url(base: &Url, id: &str) -> String {
    let mut url = base.clone();
    url.set_path("/match-detail/");
    url.query_pairs_mut().clear().append_pair("id", id);
    url.into()
}

/// Value of `?id=` in a detail-page link.
pub(crate) fn id_param(base: &Url, href: &str) -> Option<String> {
    let url = base.join(href).ok()?;
    let id = url
        .query_pairs()
        .find(|(k, _)| k == "id")
        .map(|(_, v)| v.into_owned());
    id.filter(|v| !v.is_empty())
}

/// Parse an integer out of decorated text ("1.", "11,245", "185 cm").
/// Text without any digit yields `None`.
pub(crate) fn parse_int_loose(s: &str) -> Option<i64> {
    let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

/// Pair loosely associated fragments with the two match participants by
/// position: the first distinct item belongs to player 1 (home), the second
/// to player 2 (away). Duplicates are skipped, extras ignored.
///
/// The source exposes no per-player identifiers next to names and photos, so
/// document order is the only join key. Swap this out for an id-based join if
/// that ever changes.
pub(crate) fn pair_by_position<T: PartialEq>(items: impl IntoIterator<Item = T>) -> [Option<T>; 2] {
    let mut out: [Option<T>; 2] = [None, None];
    for item in items {
        if out.iter().flatten().any(|seen| *seen == item) {
            continue;
        }
        if out[0].is_none() {
            out[0] = Some(item);
        } else {
            out[1] = Some(item);
            break;
        }
    }
    out
}
