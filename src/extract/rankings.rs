use scraper::{ElementRef, Html};
use serde::Serialize;

use super::{element_text, parse_int_loose, selector};
use crate::error::ExtractionError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankingRow {
    pub rank: i64,
    pub name: String,
    pub points: i64,
}

/// One page of the ranking table.
///
/// Layout is `rank | move | player | country | points`. Rows with fewer
/// than four cells (headers, ads) or without a usable rank, name or points
/// value are skipped. An empty result is the caller's end-of-pagination
/// signal; a page with no ranking table at all is an error.
pub fn extract_rankings_page(html: &str) -> Result<Vec<RankingRow>, ExtractionError> {
    let doc = Html::parse_document(html);

    let table = doc
        .select(&selector("table")?)
        .find(|t| {
            let text = element_text(t);
            text.contains("Rank") && text.contains("Player name") && text.contains("Points")
        })
        .ok_or(ExtractionError::AnchorMissing("ranking table"))?;

    let cells = selector("td")?;
    let link = selector("a")?;

    let mut rows = Vec::new();
    for tr in table.select(&selector("tr")?) {
        let tds: Vec<ElementRef> = tr.select(&cells).collect();
        if tds.len() < 4 {
            continue;
        }

        let rank = parse_int_loose(&element_text(&tds[0])).filter(|r| *r > 0);
        let name = tds[2]
            .select(&link)
            .next()
            .map(|a| element_text(&a))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| element_text(&tds[2]));
        let points = tds.last().and_then(|td| parse_int_loose(&element_text(td)));

        if let (Some(rank), Some(points), false) = (rank, points, name.is_empty()) {
            rows.push(RankingRow { rank, name, points });
        }
    }

    Ok(rows)
}
