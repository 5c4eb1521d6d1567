use chrono::NaiveDate;
use scraper::{ElementRef, Html};
use serde::Serialize;
use url::Url;

use super::{absolutize, collapse_whitespace, element_text, regex, selector};
use crate::db::models::Surface;
use crate::error::ExtractionError;

const WEEK_ANCHOR: &str = "This week's tournaments";
const MAIN_MARKER: &str = "Main tournaments";
const LOWER_MARKER: &str = "Lower level tournaments";

/// Surface vocabulary in precedence order; the first keyword found wins.
const SURFACE_KEYWORDS: [(&str, Surface); 4] = [
    (r"\bhard", Surface::Hard),
    (r"\bgrass", Surface::Grass),
    (r"\bclay", Surface::Clay),
    (r"\bindoor", Surface::Hard),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TournamentLink {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TournamentDetail {
    pub name: String,
    pub year: Option<i32>,
    pub surface: Option<Surface>,
    /// Date of the most recent listed result
    pub latest_match_date: Option<NaiveDate>,
}

/// Men's main-tour tournaments listed for the current week.
///
/// Only the "Main tournaments" block is read; lower level events
/// (challengers, ITF) and women's events are dropped. Duplicate links are
/// collapsed.
pub fn extract_tournament_list(
    html: &str,
    base: &Url,
) -> Result<Vec<TournamentLink>, ExtractionError> {
    let doc = Html::parse_document(html);
    let any = selector("*")?;

    let anchor = doc
        .select(&any)
        .filter(|el| normalize_quotes(&element_text(el)).contains(WEEK_ANCHOR))
        .min_by_key(|el| element_text(el).len())
        .ok_or(ExtractionError::AnchorMissing(WEEK_ANCHOR))?;

    // Climb to the smallest block that holds both the heading and the list.
    let container = std::iter::once(anchor)
        .chain(anchor.ancestors().filter_map(ElementRef::wrap))
        .find(|el| element_text(el).contains(MAIN_MARKER))
        .ok_or(ExtractionError::AnchorMissing(MAIN_MARKER))?;

    let mut links: Vec<TournamentLink> = Vec::new();
    let mut in_main = false;
    for el in container.descendants().filter_map(ElementRef::wrap) {
        let text = element_text(&el);
        if text == MAIN_MARKER {
            in_main = true;
            continue;
        }
        if text == LOWER_MARKER {
            break;
        }
        if !in_main || el.value().name() != "a" {
            continue;
        }
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let Some(url) = absolutize(base, href) else {
            continue;
        };
        if text.is_empty() || !is_main_tour(&text, &url) {
            continue;
        }
        if links.iter().any(|l| l.url == url) {
            continue;
        }
        links.push(TournamentLink { name: text, url });
    }

    Ok(links)
}

fn normalize_quotes(s: &str) -> String {
    s.replace('\u{2019}', "'")
}

fn is_main_tour(name: &str, url: &str) -> bool {
    let lower = name.to_lowercase();
    let womens = ["wta", "women", "girls"].iter().any(|w| lower.contains(w));
    !womens && url.contains("atp-men")
}

/// Name, year, surface and latest result date from a tournament page.
pub fn extract_tournament_detail(html: &str) -> Result<TournamentDetail, ExtractionError> {
    let doc = Html::parse_document(html);

    let heading = doc
        .select(&selector("h1")?)
        .next()
        .map(|h| element_text(&h))
        .filter(|t| !t.is_empty())
        .ok_or(ExtractionError::AnchorMissing("tournament heading"))?;
    let (name, year) = parse_heading(&heading)?;

    // Prefer the main column so navigation menus don't leak surface words.
    let region = doc
        .select(&selector("#center")?)
        .next()
        .or_else(|| doc.select(&selector("body").ok()?).next())
        .map(|el| element_text(&el))
        .unwrap_or_default();
    let surface = detect_surface(&region)?;

    let latest_match_date = match year {
        Some(year) => doc
            .select(&selector("table.result td.date")?)
            .next()
            .and_then(|cell| parse_day_month(&element_text(&cell), year)),
        None => None,
    };

    Ok(TournamentDetail {
        name,
        year,
        surface,
        latest_match_date,
    })
}

/// "Paris Masters 2025 (France)" -> ("Paris Masters", Some(2025))
fn parse_heading(raw: &str) -> Result<(String, Option<i32>), ExtractionError> {
    let without_parens = regex(r"\([^)]*\)")?.replace_all(raw, " ");
    let cleaned = collapse_whitespace(&without_parens);

    let trailing_year = regex(r"^(.*?)\s*\b(\d{4})$")?;
    let (name, year) = match trailing_year.captures(&cleaned) {
        Some(caps) => (
            caps[1].trim().to_string(),
            caps[2].parse::<i32>().ok(),
        ),
        None => (cleaned.clone(), None),
    };

    if name.is_empty() {
        return Err(ExtractionError::Malformed {
            what: "tournament heading",
            detail: raw.to_string(),
        });
    }
    Ok((name, year))
}

fn detect_surface(text: &str) -> Result<Option<Surface>, ExtractionError> {
    let lower = text.to_lowercase();
    for (pattern, surface) in SURFACE_KEYWORDS {
        if regex(pattern)?.is_match(&lower) {
            return Ok(Some(surface));
        }
    }
    Ok(None)
}

/// "02.11." with the tournament year.
fn parse_day_month(text: &str, year: i32) -> Option<NaiveDate> {
    let re = regex(r"^(\d{1,2})\.(\d{1,2})\.").ok()?;
    let caps = re.captures(text.trim())?;
    let day = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST: &str = include_str!("fixtures/tournament_list.html");
    const DETAIL: &str = include_str!("fixtures/tournament_detail.html");

    fn base() -> Url {
        Url::parse("https://www.tennisexplorer.com").unwrap()
    }

    #[test]
    fn lists_main_tour_events_only() {
        let links = extract_tournament_list(LIST, &base()).unwrap();
        let names: Vec<_> = links.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["Paris Masters", "Metz Open", "Davis Cup"]);
        assert_eq!(
            links[0].url,
            "https://www.tennisexplorer.com/paris/2025/atp-men/"
        );
    }

    #[test]
    fn missing_week_anchor_fails_whole_page() {
        let html = "<html><body><h3>Live tennis</h3><a href='/x/atp-men/'>X Open</a></body></html>";
        let err = extract_tournament_list(html, &base()).unwrap_err();
        assert_eq!(err, ExtractionError::AnchorMissing(WEEK_ANCHOR));
    }

    #[test]
    fn typographic_apostrophe_still_anchors() {
        let html = "<div><h3>This week\u{2019}s tournaments</h3><table>\
            <tr><td>Main tournaments</td></tr>\
            <tr><td><a href='/metz/2025/atp-men/'>Metz Open</a></td></tr></table></div>";
        let links = extract_tournament_list(html, &base()).unwrap();
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn detail_fields() {
        let detail = extract_tournament_detail(DETAIL).unwrap();
        assert_eq!(detail.name, "Paris Masters");
        assert_eq!(detail.year, Some(2025));
        // "indoors hard" in the main column; the menu's "Clay" is ignored
        assert_eq!(detail.surface, Some(Surface::Hard));
        assert_eq!(
            detail.latest_match_date,
            NaiveDate::from_ymd_opt(2025, 11, 2)
        );
    }

    #[test]
    fn detail_without_heading_is_fatal() {
        let err = extract_tournament_detail("<html><body><p>nothing</p></body></html>").unwrap_err();
        assert_eq!(err, ExtractionError::AnchorMissing("tournament heading"));
    }

    #[test]
    fn unknown_surface_is_none() {
        let html = "<div id='center'><h1>Exhibition 2025</h1><p>carpet</p></div>";
        let detail = extract_tournament_detail(html).unwrap();
        assert_eq!(detail.surface, None);
        assert_eq!(detail.latest_match_date, None);
    }

    #[test]
    fn heading_without_year() {
        assert_eq!(
            parse_heading("Laver Cup (World)").unwrap(),
            ("Laver Cup".to_string(), None)
        );
    }
}
