//! Feature-tier selection and dispatch to the external scoring service.

pub mod dispatcher;
pub mod scoring;

pub use dispatcher::{DispatchOutcome, Dispatcher, SkipReason};
pub use scoring::{HttpScoringClient, ScoringService, WinProbabilities};

use serde::Serialize;

use crate::db::models::{OddsPair, Player, PredictionTier, Surface};

/// Rank and points, only ever present together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Standing {
    pub rank: i64,
    pub points: i64,
}

impl Standing {
    pub fn of(player: &Player) -> Option<Standing> {
        Some(Standing {
            rank: player.rank?,
            points: player.points?,
        })
    }
}

/// Request body for one scoring endpoint. Field names are the scoring
/// service's; `p1` is the home player.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FeatureVector {
    Full {
        surface: u8,
        p1_rank: i64,
        p2_rank: i64,
        p1_points: i64,
        p2_points: i64,
        p1_b365_odds: f64,
        p2_b365_odds: f64,
    },
    OddsOnly {
        surface: u8,
        p1_b365_odds: f64,
        p2_b365_odds: f64,
    },
    RankOnly {
        surface: u8,
        p1_rank: i64,
        p2_rank: i64,
        p1_points: i64,
        p2_points: i64,
    },
}

impl FeatureVector {
    pub fn tier(&self) -> PredictionTier {
        match self {
            FeatureVector::Full { .. } => PredictionTier::Full,
            FeatureVector::OddsOnly { .. } => PredictionTier::OddsOnly,
            FeatureVector::RankOnly { .. } => PredictionTier::RankOnly,
        }
    }
}

/// Richest feature set the known inputs support, or `None` when not even
/// rank-only scoring is possible yet.
pub fn select_features(
    surface: Surface,
    home: Option<Standing>,
    away: Option<Standing>,
    odds: Option<OddsPair>,
) -> Option<FeatureVector> {
    let surface = surface.code();
    match (home, away, odds) {
        (Some(h), Some(a), Some(o)) => Some(FeatureVector::Full {
            surface,
            p1_rank: h.rank,
            p2_rank: a.rank,
            p1_points: h.points,
            p2_points: a.points,
            p1_b365_odds: o.home,
            p2_b365_odds: o.away,
        }),
        (_, _, Some(o)) => Some(FeatureVector::OddsOnly {
            surface,
            p1_b365_odds: o.home,
            p2_b365_odds: o.away,
        }),
        (Some(h), Some(a), None) => Some(FeatureVector::RankOnly {
            surface,
            p1_rank: h.rank,
            p2_rank: a.rank,
            p1_points: h.points,
            p2_points: a.points,
        }),
        _ => None,
    }
}
