//! Wire types of the structured tennis provider. Only the fields the
//! pipeline reads are modelled; everything else is ignored by serde.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::db::models::{OddsPair, Side};

const IMAGE_BASE_URL: &str = "https://images.sportdevs.com";

/// Image URL for a provider `hash_image` value.
pub fn image_url(hash: &str) -> String {
    format!("{IMAGE_BASE_URL}/{hash}.png")
}

/// One row of `leagues-by-date`.
#[derive(Debug, Clone, Deserialize)]
pub struct LeagueDay {
    #[serde(default)]
    pub leagues: Vec<LeagueSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeagueSummary {
    pub league_id: i64,
    #[serde(default)]
    pub class_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeagueInfo {
    pub league_id: i64,
    #[serde(default)]
    pub competition_name: Option<String>,
    #[serde(default)]
    pub city_name: Option<String>,
    #[serde(default)]
    pub surface_type: Option<String>,
    #[serde(default)]
    pub match_type: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl LeagueInfo {
    pub fn is_singles(&self) -> bool {
        self.match_type.as_deref() == Some("singles")
    }
}

/// Set and per-set game counts for one side.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TeamScore {
    #[serde(default)]
    pub current: Option<i64>,
    #[serde(default)]
    pub period_1: Option<i64>,
    #[serde(default)]
    pub period_2: Option<i64>,
    #[serde(default)]
    pub period_3: Option<i64>,
    #[serde(default)]
    pub period_4: Option<i64>,
    #[serde(default)]
    pub period_5: Option<i64>,
}

impl TeamScore {
    pub fn last_period(&self) -> Option<i64> {
        [
            self.period_5,
            self.period_4,
            self.period_3,
            self.period_2,
            self.period_1,
        ]
        .into_iter()
        .flatten()
        .next()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMatch {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    pub league_id: i64,
    #[serde(default)]
    pub status_type: Option<String>,
    #[serde(default)]
    pub ground_type: Option<String>,
    pub start_time: DateTime<Utc>,
    pub home_team_id: i64,
    #[serde(default)]
    pub home_team_name: Option<String>,
    #[serde(default)]
    pub home_team_hash_image: Option<String>,
    pub away_team_id: i64,
    #[serde(default)]
    pub away_team_name: Option<String>,
    #[serde(default)]
    pub away_team_hash_image: Option<String>,
    #[serde(default)]
    pub home_team_score: Option<TeamScore>,
    #[serde(default)]
    pub away_team_score: Option<TeamScore>,
}

impl ProviderMatch {
    /// Winner of a finished match. Set counts decide; the provider sometimes
    /// leaves them level after the final set, so a tie falls back to the last
    /// reported set. Still level means undetermined.
    pub fn winner_side(&self) -> Option<Side> {
        let home = self.home_team_score.as_ref()?;
        let away = self.away_team_score.as_ref()?;
        compare(home.current, away.current)
            .or_else(|| compare(home.last_period(), away.last_period()))
    }

    /// "3:1" style set score when both set counts are known.
    pub fn set_score(&self) -> Option<String> {
        let home = self.home_team_score.as_ref()?.current?;
        let away = self.away_team_score.as_ref()?.current?;
        Some(format!("{home}:{away}"))
    }
}

fn compare(home: Option<i64>, away: Option<i64>) -> Option<Side> {
    match (home, away) {
        (Some(h), Some(a)) if h > a => Some(Side::Home),
        (Some(h), Some(a)) if a > h => Some(Side::Away),
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RankingEntry {
    pub team_id: i64,
    pub team_name: String,
    #[serde(default)]
    pub team_hash_image: Option<String>,
    pub rank: i64,
    pub points: i64,
}

/// `odds/match-winner` row.
#[derive(Debug, Clone, Deserialize)]
pub struct OddsMarket {
    #[serde(default)]
    pub periods: Vec<OddsPeriod>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OddsPeriod {
    pub period_type: String,
    #[serde(default)]
    pub odds: Vec<BookmakerOdds>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookmakerOdds {
    #[serde(default)]
    pub bookmaker_name: Option<String>,
    #[serde(default)]
    pub home: Option<f64>,
    #[serde(default)]
    pub away: Option<f64>,
}

impl BookmakerOdds {
    pub fn pair(&self) -> Option<OddsPair> {
        OddsPair::new(self.home?, self.away?)
    }
}

/// `teams` row; `kind` 1 is a singles player, 2 a doubles pairing.
#[derive(Debug, Clone, Deserialize)]
pub struct Team {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub hash_image: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(home: serde_json::Value, away: serde_json::Value) -> ProviderMatch {
        serde_json::from_value(serde_json::json!({
            "id": 77,
            "league_id": 5,
            "status_type": "finished",
            "start_time": "2025-10-29T13:00:00+00:00",
            "home_team_id": 1,
            "away_team_id": 2,
            "home_team_score": home,
            "away_team_score": away,
        }))
        .unwrap()
    }

    #[test]
    fn winner_from_set_count() {
        let m = finished(
            serde_json::json!({"current": 2, "period_1": 6, "period_2": 6}),
            serde_json::json!({"current": 0, "period_1": 3, "period_2": 4}),
        );
        assert_eq!(m.winner_side(), Some(Side::Home));
        assert_eq!(m.set_score().as_deref(), Some("2:0"));
    }

    #[test]
    fn stale_set_count_falls_back_to_last_period() {
        let m = finished(
            serde_json::json!({"current": 1, "period_1": 6, "period_2": 3, "period_3": 4}),
            serde_json::json!({"current": 1, "period_1": 4, "period_2": 6, "period_3": 6}),
        );
        assert_eq!(m.winner_side(), Some(Side::Away));
    }

    #[test]
    fn level_everywhere_is_undetermined() {
        let m = finished(
            serde_json::json!({"current": 1, "period_1": 6}),
            serde_json::json!({"current": 1, "period_1": 6}),
        );
        assert_eq!(m.winner_side(), None);
    }

    #[test]
    fn missing_scores_are_undetermined() {
        let m: ProviderMatch = serde_json::from_value(serde_json::json!({
            "id": 1, "league_id": 5, "start_time": "2025-10-29T13:00:00Z",
            "home_team_id": 1, "away_team_id": 2
        }))
        .unwrap();
        assert_eq!(m.winner_side(), None);
        assert_eq!(m.set_score(), None);
    }
}
