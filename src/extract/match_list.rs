use scraper::{ElementRef, Html};
use serde::Serialize;
use url::Url;

use super::{absolutize, element_text, id_param, selector};
use crate::error::ExtractionError;

const NEXT_MARKER: &str = "Next matches";
const RESULTS_MARKER: &str = "Results";
const DETAIL_LINK: &str = r#"a[href*="match-detail/?id="]"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchLink {
    /// Source match id, the `id` query parameter of the detail page
    pub id: String,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchListing {
    pub upcoming: Vec<MatchLink>,
    /// Ids of matches listed in the results table
    pub completed_ids: Vec<String>,
}

/// Upcoming and completed matches on a tournament page.
///
/// The page is only rejected when neither the "Next matches" section nor a
/// results table exists; an empty section is a valid (quiet) tournament day.
pub fn extract_match_list(html: &str, base: &Url) -> Result<MatchListing, ExtractionError> {
    let upcoming = match next_matches_section(html) {
        Some(section) => Some(upcoming_links(section, base)?),
        None => None,
    };

    let doc = Html::parse_document(html);
    let results_table = doc.select(&selector("#center table.result")?).next();

    if upcoming.is_none() && results_table.is_none() {
        return Err(ExtractionError::AnchorMissing("match list"));
    }
    let upcoming = upcoming.unwrap_or_default();

    let mut completed_ids: Vec<String> = Vec::new();
    if results_table.is_some() {
        let link = selector(DETAIL_LINK)?;
        for table in doc.select(&selector("#center table.result")?) {
            for a in table.select(&link) {
                let Some(id) = a.value().attr("href").and_then(|h| id_param(base, h)) else {
                    continue;
                };
                if upcoming.iter().any(|m| m.id == id) || completed_ids.contains(&id) {
                    continue;
                }
                completed_ids.push(id);
            }
        }
    }

    Ok(MatchListing {
        upcoming,
        completed_ids,
    })
}

/// Raw slice from the "Next matches" heading up to the results heading.
/// Slicing the markup holds up better than walking siblings, which shift
/// whenever the source adds a banner.
fn next_matches_section(html: &str) -> Option<&str> {
    let start = html.find(NEXT_MARKER)?;
    let rest = &html[start..];
    Some(match rest.find(RESULTS_MARKER) {
        Some(end) => &rest[..end],
        None => rest,
    })
}

fn upcoming_links(section: &str, base: &Url) -> Result<Vec<MatchLink>, ExtractionError> {
    let frag = Html::parse_fragment(section);
    let link = selector(DETAIL_LINK)?;
    let name_cell = selector("td.t-name")?;

    let mut out: Vec<MatchLink> = Vec::new();
    for a in frag.select(&link) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let (Some(id), Some(url)) = (id_param(base, href), absolutize(base, href)) else {
            continue;
        };
        if out.iter().any(|m| m.id == id) {
            continue;
        }

        let row_name = a
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "tr")
            .and_then(|tr| tr.select(&name_cell).next())
            .map(|td| element_text(&td))
            .filter(|t| !t.is_empty());
        let name = row_name.unwrap_or_else(|| element_text(&a));
        if name.is_empty() {
            continue;
        }

        out.push(MatchLink { id, name, url });
    }
    Ok(out)
}
