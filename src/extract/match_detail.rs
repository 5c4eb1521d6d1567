use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use scraper::{ElementRef, Html};
use serde::Serialize;
use url::Url;

use super::{
    absolutize, clean_cell_text, element_text, pair_by_position, parse_int_loose, regex, selector,
};
use crate::db::models::{FinalScore, MatchStatus, OddsPair, Side, Surface};
use crate::error::ExtractionError;
use crate::time::{from_source_local, source_today};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlayerInfo {
    pub name: String,
    pub birth_date: Option<NaiveDate>,
    pub height_cm: Option<i64>,
    pub weight_kg: Option<i64>,
    pub plays: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchDetail {
    pub title: Option<String>,
    pub start_time: DateTime<Utc>,
    /// Raw court descriptor from the meta line ("indoors", "clay")
    pub court: Option<String>,
    pub home: PlayerInfo,
    pub away: PlayerInfo,
    pub final_score: Option<FinalScore>,
    /// The "Average odds" row; individual bookmakers are ignored
    pub average_odds: Option<OddsPair>,
}

impl MatchDetail {
    pub fn surface(&self) -> Option<Surface> {
        self.court.as_deref().and_then(Surface::canonicalize)
    }

    /// A printed final score means the match is over; otherwise the start
    /// time decides between not yet started and underway.
    pub fn status(&self, now: DateTime<Utc>) -> MatchStatus {
        if self.final_score.is_some() {
            MatchStatus::Completed
        } else if self.start_time > now {
            MatchStatus::Scheduled
        } else {
            MatchStatus::InProgress
        }
    }

    pub fn winner(&self) -> Option<Side> {
        self.final_score.and_then(FinalScore::winner)
    }
}

/// Parse a match-detail page. `now` resolves the "Today" shorthand.
///
/// The meta line (start date/time) and the two-player info grid are
/// required; score, odds, images and per-player attributes are optional.
pub fn extract_match_detail(
    html: &str,
    base: &Url,
    now: DateTime<Utc>,
) -> Result<MatchDetail, ExtractionError> {
    let doc = Html::parse_document(html);

    let heading = doc.select(&selector("h1")?).next();
    let title = heading
        .map(|h| element_text(&h).trim_start_matches('#').trim().to_string())
        .filter(|t| !t.is_empty());

    let meta = find_meta_line(heading)?.ok_or(ExtractionError::AnchorMissing("match meta line"))?;
    let (start_time, court) = parse_meta_line(&meta, now)?;

    let (mut home, mut away) = extract_players(&doc)?;
    let [home_img, away_img] = pair_by_position(player_images(&doc, base)?);
    home.image_url = home_img;
    away.image_url = away_img;

    Ok(MatchDetail {
        title,
        start_time,
        court,
        home,
        away,
        final_score: extract_final_score(&doc)?,
        average_odds: extract_average_odds(&doc)?,
    })
}

/// First sibling after the heading shaped like "Today, 14:05, ..." or
/// "31.10.2025, 19:30, ...".
fn find_meta_line(heading: Option<ElementRef>) -> Result<Option<String>, ExtractionError> {
    let Some(heading) = heading else {
        return Ok(None);
    };
    let today = regex(r"(?i)^today,\s*\d{1,2}:\d{2}")?;
    let dated = regex(r"^\d{1,2}\.\d{1,2}\.\d{4},\s*\d{1,2}:\d{2}")?;

    let candidates: Vec<String> = heading
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .map(|el| element_text(&el))
        .filter(|t| !t.is_empty())
        .collect();

    Ok(candidates
        .iter()
        .find(|t| today.is_match(t))
        .or_else(|| candidates.iter().find(|t| dated.is_match(t)))
        .cloned())
}

/// "Today, 14:05, indoors" -> (instant, Some("indoors")). Times are source
/// local (UTC+1).
pub(crate) fn parse_meta_line(
    line: &str,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, Option<String>), ExtractionError> {
    let malformed = || ExtractionError::Malformed {
        what: "match meta line",
        detail: line.to_string(),
    };

    let parts: Vec<&str> = line
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let (Some(date_token), Some(time_token)) = (parts.first(), parts.get(1)) else {
        return Err(malformed());
    };

    let date = if date_token.eq_ignore_ascii_case("today") {
        source_today(now)
    } else {
        let caps = regex(r"^(\d{1,2})\.(\d{1,2})\.(\d{4})$")?
            .captures(date_token)
            .ok_or_else(malformed)?;
        let day: u32 = caps[1].parse().map_err(|_| malformed())?;
        let month: u32 = caps[2].parse().map_err(|_| malformed())?;
        let year: i32 = caps[3].parse().map_err(|_| malformed())?;
        NaiveDate::from_ymd_opt(year, month, day).ok_or_else(malformed)?
    };
    let time = NaiveTime::parse_from_str(time_token, "%H:%M").map_err(|_| malformed())?;
    let start = from_source_local(date, time).ok_or_else(malformed)?;

    // Date and time come first; anything after is the court descriptor.
    let court = if parts.len() > 2 {
        parts.last().map(|c| c.to_string())
    } else {
        None
    };

    Ok((start, court))
}

fn extract_players(doc: &Html) -> Result<(PlayerInfo, PlayerInfo), ExtractionError> {
    let table = doc
        .select(&selector("table")?)
        .find(|t| {
            let text = element_text(t);
            text.contains("Birthdate") && text.contains("Plays")
        })
        .ok_or(ExtractionError::AnchorMissing("player info table"))?;

    let link = selector(r#"a[href*="/player/"]"#)?;
    let mut names: Vec<String> = table
        .select(&link)
        .filter_map(|a| clean_cell_text(&a))
        .collect();
    if names.len() < 2 {
        if let Some(parent) = table.parent().and_then(ElementRef::wrap) {
            names = parent
                .select(&link)
                .filter_map(|a| clean_cell_text(&a))
                .collect();
        }
    }
    let [Some(home_name), Some(away_name)] = pair_by_position(names) else {
        return Err(ExtractionError::Malformed {
            what: "player info table",
            detail: "fewer than two player names".into(),
        });
    };

    let mut home = PlayerInfo {
        name: home_name,
        ..Default::default()
    };
    let mut away = PlayerInfo {
        name: away_name,
        ..Default::default()
    };

    let cells = selector("td, th")?;
    for row in table.select(&selector("tr")?) {
        let values: Vec<Option<String>> = row.select(&cells).map(|c| clean_cell_text(&c)).collect();
        if values.len() < 3 {
            continue;
        }
        let label = values[1].as_deref().unwrap_or_default().to_lowercase();
        let (left, right) = (values[0].as_deref(), values[2].as_deref());

        if label.contains("birthdate") {
            home.birth_date = left.and_then(parse_birthdate);
            away.birth_date = right.and_then(parse_birthdate);
        } else if label.contains("height") {
            home.height_cm = left.and_then(leading_int);
            away.height_cm = right.and_then(leading_int);
        } else if label.contains("weight") {
            home.weight_kg = left.and_then(leading_int);
            away.weight_kg = right.and_then(leading_int);
        } else if label.contains("plays") {
            home.plays = left.map(str::to_string);
            away.plays = right.map(str::to_string);
        }
    }

    Ok((home, away))
}

/// "16. 8. 2001", "16.8.2001"
fn parse_birthdate(raw: &str) -> Option<NaiveDate> {
    let re = regex(r"^(\d{1,2})\s*\.\s*(\d{1,2})\s*\.\s*(\d{4})$").ok()?;
    let caps = re.captures(raw.trim())?;
    NaiveDate::from_ymd_opt(
        caps[3].parse().ok()?,
        caps[2].parse().ok()?,
        caps[1].parse().ok()?,
    )
}

/// "191 cm / 6' 3"" -> 191
fn leading_int(raw: &str) -> Option<i64> {
    raw.split_whitespace().next().and_then(parse_int_loose)
}

fn player_images(doc: &Html, base: &Url) -> Result<Vec<String>, ExtractionError> {
    Ok(doc
        .select(&selector(r#"img[src*="/res/img/player/"]"#)?)
        .filter_map(|img| img.value().attr("src"))
        .filter_map(|src| absolutize(base, src))
        .collect())
}

fn extract_final_score(doc: &Html) -> Result<Option<FinalScore>, ExtractionError> {
    let Some(cell) = doc.select(&selector(".gScore")?).next() else {
        return Ok(None);
    };
    let text = element_text(&cell);
    let Some(caps) = regex(r"(\d+)\s*:\s*(\d+)")?.captures(&text) else {
        return Ok(None);
    };
    Ok(match (caps[1].parse(), caps[2].parse()) {
        (Ok(home), Ok(away)) => Some(FinalScore { home, away }),
        _ => None,
    })
}

fn extract_average_odds(doc: &Html) -> Result<Option<OddsPair>, ExtractionError> {
    let numeric = regex(r"^\d+(\.\d+)?$")?;
    let rows = selector("tr")?;
    let cells = selector("td")?;

    for table in doc.select(&selector("table")?) {
        if !element_text(&table).to_lowercase().contains("odds") {
            continue;
        }
        for row in table.select(&rows) {
            let tds: Vec<ElementRef> = row.select(&cells).collect();
            if tds.len() < 3 {
                continue;
            }
            let label = clean_cell_text(&tds[0]).unwrap_or_default().to_lowercase();
            if !label.contains("average") {
                continue;
            }
            let prices: Vec<f64> = tds[1..]
                .iter()
                .filter_map(|td| clean_cell_text(td))
                .filter(|t| numeric.is_match(t))
                .filter_map(|t| t.parse().ok())
                .collect();
            if let &[home, away, ..] = prices.as_slice() {
                return Ok(OddsPair::new(home, away));
            }
        }
    }
    Ok(None)
}
