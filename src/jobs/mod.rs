//! Scheduled ingestion passes.
//!
//! A pass runs its phases strictly in order (extract, reconcile, resolve
//! odds, dispatch predictions, aggregate) because every phase reads what the
//! previous one wrote. Feeds may read the store but never write it; every
//! write happens in [`pipeline`].

pub mod pipeline;
pub mod provider_feed;
pub mod scheduler;
pub mod scrape_feed;

pub use pipeline::{Pipeline, PipelineSettings, SweepReport, COARSE_JOB};
pub use provider_feed::ProviderFeed;
pub use scheduler::{next_coarse_run, run_scheduler};
pub use scrape_feed::ScrapeFeed;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::models::{Match, MatchSource, MatchStatus, OddsPair, Side, Surface};
use crate::error::PipelineError;
use crate::reconcile::{PlayerObservation, RankingObservation, TournamentObservation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Extract,
    Reconcile,
    ResolveOdds,
    Dispatch,
    Aggregate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "phase", rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running(Phase),
}

/// One match as a feed saw it, before any player or tournament is resolved
/// to a stored id.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchHarvest {
    pub external_id: String,
    pub name: Option<String>,
    pub start_time: DateTime<Utc>,
    /// `None` falls back to the tournament's surface
    pub surface: Option<Surface>,
    pub status: MatchStatus,
    pub home: PlayerObservation,
    pub away: PlayerObservation,
    pub score: Option<String>,
    pub winner: Option<Side>,
    pub odds: Option<OddsPair>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TournamentHarvest {
    pub tournament: TournamentObservation,
    pub matches: Vec<MatchHarvest>,
}

/// A source of tournaments, matches and rankings.
///
/// Per-entity failures (one tournament page, one match) are logged and
/// skipped inside the feed. An `Err` means the feed as a whole is unusable
/// for this pass.
#[async_trait]
pub trait Feed: Send + Sync {
    fn name(&self) -> &str;

    fn source(&self) -> MatchSource;

    /// Complete current ranking snapshot.
    async fn rankings(&self) -> Result<Vec<RankingObservation>, PipelineError>;

    /// Tournaments in play and their matches starting before `until`.
    async fn harvest(
        &self,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<TournamentHarvest>, PipelineError>;

    /// Fresh observations of already stored matches from this feed. Matches
    /// the feed no longer knows about are left out.
    async fn refresh(
        &self,
        stored: &[Match],
        now: DateTime<Utc>,
    ) -> Result<Vec<(Match, MatchHarvest)>, PipelineError>;
}
