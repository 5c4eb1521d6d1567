use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Playing surface, canonicalized from whatever free text a source shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Surface {
    Hard,
    Clay,
    Grass,
}

impl Surface {
    pub const ALL: [Surface; 3] = [Surface::Hard, Surface::Clay, Surface::Grass];

    /// Map a raw surface / court-type string onto the three canonical
    /// surfaces. Indoor courts are hard courts. Unknown text yields `None`.
    pub fn canonicalize(raw: &str) -> Option<Surface> {
        let lower = raw.to_lowercase();
        if lower.contains("hard") {
            Some(Surface::Hard)
        } else if lower.contains("clay") {
            Some(Surface::Clay)
        } else if lower.contains("grass") {
            Some(Surface::Grass)
        } else if lower.contains("indoor") {
            Some(Surface::Hard)
        } else {
            None
        }
    }

    /// Numeric code expected by the scoring service.
    pub fn code(self) -> u8 {
        match self {
            Surface::Hard => 0,
            Surface::Clay => 1,
            Surface::Grass => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Surface::Hard => "Hard",
            Surface::Clay => "Clay",
            Surface::Grass => "Grass",
        }
    }

    pub fn parse(s: &str) -> Option<Surface> {
        Surface::ALL.into_iter().find(|v| v.as_str() == s)
    }
}

/// Match lifecycle, normalized across sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    Scheduled,
    InProgress,
    Interrupted,
    Suspended,
    Completed,
    Canceled,
}

impl MatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStatus::Scheduled => "Scheduled",
            MatchStatus::InProgress => "InProgress",
            MatchStatus::Interrupted => "Interrupted",
            MatchStatus::Suspended => "Suspended",
            MatchStatus::Completed => "Completed",
            MatchStatus::Canceled => "Canceled",
        }
    }

    pub fn parse(s: &str) -> Option<MatchStatus> {
        [
            MatchStatus::Scheduled,
            MatchStatus::InProgress,
            MatchStatus::Interrupted,
            MatchStatus::Suspended,
            MatchStatus::Completed,
            MatchStatus::Canceled,
        ]
        .into_iter()
        .find(|v| v.as_str() == s)
    }

    /// Normalize the structured provider's `status_type` vocabulary.
    pub fn from_provider(raw: &str) -> MatchStatus {
        match raw.trim().to_lowercase().replace([' ', '_', '-'], "").as_str() {
            // A postponed match is played later, so it stays open.
            "notstarted" | "scheduled" | "delayed" | "postponed" => MatchStatus::Scheduled,
            "finished" | "completed" | "ended" | "retired" | "walkover" => MatchStatus::Completed,
            "canceled" | "cancelled" | "abandoned" => MatchStatus::Canceled,
            "interrupted" => MatchStatus::Interrupted,
            "suspended" => MatchStatus::Suspended,
            _ => MatchStatus::InProgress,
        }
    }

    fn stage(self) -> u8 {
        match self {
            MatchStatus::Scheduled => 0,
            MatchStatus::InProgress | MatchStatus::Interrupted | MatchStatus::Suspended => 1,
            MatchStatus::Completed | MatchStatus::Canceled => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.stage() == 2
    }

    /// Apply an observed status to the stored one. Status only moves
    /// forward; terminal states are never left.
    pub fn advance(self, observed: MatchStatus) -> MatchStatus {
        if self.is_terminal() || observed.stage() < self.stage() {
            self
        } else {
            observed
        }
    }
}

/// Which feature set (and therefore which scoring endpoint) produced a
/// prediction. Lower number means richer input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionTier {
    Full = 1,
    OddsOnly = 2,
    RankOnly = 3,
}

impl PredictionTier {
    pub fn number(self) -> i64 {
        self as i64
    }

    pub fn from_number(n: i64) -> Option<PredictionTier> {
        match n {
            1 => Some(PredictionTier::Full),
            2 => Some(PredictionTier::OddsOnly),
            3 => Some(PredictionTier::RankOnly),
            _ => None,
        }
    }

    pub fn is_better_than(self, other: PredictionTier) -> bool {
        self.number() < other.number()
    }
}

/// Where a match record originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchSource {
    Scrape,
    Provider,
}

impl MatchSource {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchSource::Scrape => "scrape",
            MatchSource::Provider => "provider",
        }
    }

    pub fn parse(s: &str) -> Option<MatchSource> {
        match s {
            "scrape" => Some(MatchSource::Scrape),
            "provider" => Some(MatchSource::Provider),
            _ => None,
        }
    }
}

macro_rules! text_column {
    ($ty:ty, $what:literal) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                <$ty>::parse(s).ok_or_else(|| {
                    FromSqlError::Other(format!("unknown {} '{}'", $what, s).into())
                })
            }
        }
    };
}

text_column!(Surface, "surface");
text_column!(MatchStatus, "match status");
text_column!(MatchSource, "match source");

impl ToSql for PredictionTier {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.number()))
    }
}

impl FromSql for PredictionTier {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let n = value.as_i64()?;
        PredictionTier::from_number(n).ok_or(FromSqlError::OutOfRange(n))
    }
}

/// Decimal odds quoted for the two participants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OddsPair {
    pub home: f64,
    pub away: f64,
}

impl OddsPair {
    /// `None` unless both prices are finite and positive.
    pub fn new(home: f64, away: f64) -> Option<OddsPair> {
        if home.is_finite() && away.is_finite() && home > 0.0 && away > 0.0 {
            Some(OddsPair { home, away })
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Home,
    Away,
}

/// Sets won by each side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalScore {
    pub home: u32,
    pub away: u32,
}

impl FinalScore {
    pub fn winner(self) -> Option<Side> {
        match self.home.cmp(&self.away) {
            std::cmp::Ordering::Greater => Some(Side::Home),
            std::cmp::Ordering::Less => Some(Side::Away),
            std::cmp::Ordering::Equal => None,
        }
    }
}

impl std::fmt::Display for FinalScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.home, self.away)
    }
}

/// A tournament (scraped) or league (structured provider).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tournament {
    pub id: i64,
    /// Provider league id; scraped tournaments have none
    pub external_id: Option<i64>,
    pub name: String,
    pub surface: Surface,
    /// Curated by hand; never written by the pipeline
    pub is_grand_slam: bool,
    pub city: Option<String>,
    pub category: Option<String>,
    pub source_url: Option<String>,
    pub last_observed: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: i64,
    pub external_id: Option<i64>,
    pub name: String,
    pub image_url: Option<String>,
    /// Present exactly when `points` is present
    pub rank: Option<i64>,
    pub points: Option<i64>,
    pub height_cm: Option<i64>,
    pub weight_kg: Option<i64>,
    /// e.g. "right-handed"
    pub plays: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub last_observed: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: i64,
    pub source: MatchSource,
    /// Source-specific match id (scraped detail-page id or provider id)
    pub external_id: Option<String>,
    pub tournament_id: i64,
    pub name: Option<String>,
    pub start_time: DateTime<Utc>,
    pub surface: Surface,
    pub status: MatchStatus,
    pub home_player_id: i64,
    pub away_player_id: i64,
    /// Sets won, "home:away"
    pub score: Option<String>,
    pub winner_id: Option<i64>,
    /// Decimal bookmaker odds
    pub home_odds: Option<f64>,
    pub away_odds: Option<f64>,
    pub home_win_prob: Option<f64>,
    pub away_win_prob: Option<f64>,
    pub prediction_tier: Option<PredictionTier>,
    pub predicted_winner_id: Option<i64>,
    pub last_observed: DateTime<Utc>,
}

impl Match {
    pub fn has_odds(&self) -> bool {
        self.home_odds.is_some() && self.away_odds.is_some()
    }
}

/// Grouping key for accuracy statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key")]
pub enum AccuracyScope {
    Overall,
    /// A tournament or provider league row
    Tournament(i64),
    Surface(Surface),
}

impl AccuracyScope {
    /// (kind, key) pair used as the storage key.
    pub fn storage_key(self) -> (&'static str, String) {
        match self {
            AccuracyScope::Overall => ("overall", String::new()),
            AccuracyScope::Tournament(id) => ("tournament", id.to_string()),
            AccuracyScope::Surface(s) => ("surface", s.as_str().to_string()),
        }
    }

    pub fn from_storage_key(kind: &str, key: &str) -> Option<AccuracyScope> {
        match kind {
            "overall" => Some(AccuracyScope::Overall),
            "tournament" => key.parse().ok().map(AccuracyScope::Tournament),
            "surface" => Surface::parse(key).map(AccuracyScope::Surface),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccuracySnapshot {
    pub scope: AccuracyScope,
    pub correct: i64,
    pub incorrect: i64,
    pub computed_at: DateTime<Utc>,
}

impl AccuracySnapshot {
    /// Derived view; never stored.
    pub fn accuracy_pct(&self) -> Option<f64> {
        let total = self.correct + self.incorrect;
        if total == 0 {
            None
        } else {
            Some(self.correct as f64 * 100.0 / total as f64)
        }
    }
}
