use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::{Feed, JobState, MatchHarvest, Phase, TournamentHarvest};
use crate::accuracy::Aggregator;
use crate::db::models::{Match, MatchSource, MatchStatus, Side, Surface};
use crate::db::Database;
use crate::error::PipelineError;
use crate::fetch::RetryPolicy;
use crate::odds::OddsResolver;
use crate::predict::{DispatchOutcome, Dispatcher, ScoringService};
use crate::reconcile::{MatchObservation, Reconciler};
use crate::time::{source_day_start, source_today};

/// Job name under which successful coarse sweeps are recorded.
pub const COARSE_JOB: &str = "coarse";

/// Day on which the fine sweep last tried to make up for a missed coarse
/// sweep, so a failing catch-up is attempted once per day.
const CATCH_UP_JOB: &str = "coarse_catch_up";

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// How far ahead the coarse sweep ingests matches
    pub match_lookahead: Duration,
    /// Odds are only requested for matches starting within this window
    pub odds_lookahead: Duration,
    /// The fine sweep covers matches started this long ago and starting
    /// within the same span from now
    pub live_window: Duration,
    /// Tournaments observed within this window get their own accuracy row
    pub recent_window: Duration,
    pub coarse_retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            match_lookahead: Duration::days(2),
            odds_lookahead: Duration::hours(48),
            live_window: Duration::hours(10),
            recent_window: Duration::hours(24),
            coarse_retry: RetryPolicy::new(3, StdDuration::from_secs(600)),
        }
    }
}

/// Per-pass counters, logged at the end of every pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub ranked: usize,
    pub tournaments: usize,
    pub matches: usize,
    pub odds: usize,
    pub predicted: usize,
    pub deferred: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Pipeline {
    db: Database,
    reconciler: Reconciler,
    feeds: Vec<Arc<dyn Feed>>,
    odds: Arc<OddsResolver>,
    dispatcher: Dispatcher,
    backfill_dispatcher: Dispatcher,
    aggregator: Aggregator,
    settings: PipelineSettings,
    state: watch::Sender<JobState>,
}

impl Pipeline {
    /// `feeds[0]` is the ranking source.
    pub fn new(
        db: Database,
        feeds: Vec<Arc<dyn Feed>>,
        odds: Arc<OddsResolver>,
        scorer: Arc<dyn ScoringService>,
        settings: PipelineSettings,
    ) -> Self {
        let (state, _) = watch::channel(JobState::Idle);
        Pipeline {
            reconciler: Reconciler::new(db.clone()),
            // Sweeps resolve odds in their own phase before dispatching.
            dispatcher: Dispatcher::new(db.clone(), scorer.clone()),
            backfill_dispatcher: Dispatcher::new(db.clone(), scorer)
                .with_odds(odds.clone(), settings.odds_lookahead),
            aggregator: Aggregator::new(db.clone()),
            db,
            feeds,
            odds,
            settings,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.state.subscribe()
    }

    fn enter(&self, phase: Phase) {
        info!("Phase: {:?}", phase);
        self.state.send_replace(JobState::Running(phase));
    }

    // ── Passes ───────────────────────────────────────────────────────────────

    /// Rankings, tournaments and the multi-day match window, then odds,
    /// predictions and accuracy. Records the run on success.
    pub async fn coarse_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let result = self.run_coarse(now).await;
        self.state.send_replace(JobState::Idle);
        result
    }

    /// Coarse sweep under the coarse retry policy.
    pub async fn coarse_sweep_with_retry(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        self.settings
            .coarse_retry
            .run("coarse sweep", || self.coarse_sweep(now), |_: &anyhow::Error| true)
            .await
    }

    /// Re-poll in-progress and near-term matches. If no coarse sweep has
    /// completed today, one attempt is made first, at most once per day and
    /// without the coarse retry ladder.
    pub async fn fine_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let today = source_today(now);
        if self.db.last_job_run(COARSE_JOB)? != Some(today)
            && self.db.last_job_run(CATCH_UP_JOB)? != Some(today)
        {
            info!("No coarse sweep recorded for {}; running it first", today);
            self.db.record_job_run(CATCH_UP_JOB, today, now)?;
            if let Err(e) = self.coarse_sweep(now).await {
                error!("Catch-up coarse sweep failed: {:#}", e);
            }
        }
        let result = self.run_fine(now).await;
        self.state.send_replace(JobState::Idle);
        result
    }

    /// Re-dispatch predictions for matches starting on `from..=to` (source
    /// calendar days), then recompute accuracy. Frozen predictions stay.
    pub async fn backfill(&self, from: NaiveDate, to: NaiveDate, now: DateTime<Utc>) -> Result<SweepReport> {
        if to < from {
            bail!("backfill range is empty: {} is after {}", from, to);
        }
        let result = self.run_backfill(from, to, now).await;
        self.state.send_replace(JobState::Idle);
        result
    }

    pub fn last_coarse_run(&self) -> Result<Option<NaiveDate>> {
        self.db.last_job_run(COARSE_JOB)
    }

    async fn run_coarse(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let until = now + self.settings.match_lookahead;

        self.enter(Phase::Extract);
        let rankings = match self.feeds.first() {
            Some(feed) => Some(
                feed.rankings()
                    .await
                    .with_context(|| format!("{} rankings failed", feed.name()))?,
            ),
            None => None,
        };
        // One broken source must not hold back the others.
        let mut harvests: Vec<(MatchSource, Vec<TournamentHarvest>)> = Vec::new();
        let mut last_error = None;
        for feed in &self.feeds {
            match feed.harvest(now, until).await {
                Ok(tournaments) => harvests.push((feed.source(), tournaments)),
                Err(e) => {
                    error!("{} harvest failed: {}", feed.name(), e);
                    last_error =
                        Some(anyhow::Error::new(e).context(format!("{} harvest failed", feed.name())));
                }
            }
        }
        if harvests.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        self.enter(Phase::Reconcile);
        if let Some(entries) = rankings {
            match self.reconciler.refresh_rankings(&entries, now) {
                Ok(n) => report.ranked = n,
                Err(PipelineError::EmptySnapshot(what)) => {
                    warn!("Empty {} snapshot; keeping stored ranks", what)
                }
                Err(e) => return Err(e.into()),
            }
        }
        for (source, tournaments) in &harvests {
            for t in tournaments {
                self.reconcile_tournament(*source, t, now, &mut report);
            }
        }

        let window_start = source_day_start(source_today(now));
        let window = self.db.list_matches_starting_between(window_start, until)?;
        self.resolve_odds(&window, now, &mut report).await;
        self.dispatch_all(&self.dispatcher, ids(&window), now, &mut report).await;

        self.aggregate(now)?;
        self.db.record_job_run(COARSE_JOB, source_today(now), now)?;
        info!("Coarse sweep done: {:?}", report);
        Ok(report)
    }

    async fn run_fine(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let live_window = self.settings.live_window;

        self.enter(Phase::Extract);
        let mut stored = self.db.list_live_matches(now - live_window, now)?;
        stored.extend(
            self.db
                .list_matches_starting_between(now, now + live_window)?
                .into_iter()
                .filter(|m| !m.status.is_terminal()),
        );
        stored.sort_by_key(|m| m.id);
        stored.dedup_by_key(|m| m.id);
        info!("Fine sweep covers {} matches", stored.len());

        let mut refreshed = Vec::new();
        for feed in &self.feeds {
            match feed.refresh(&stored, now).await {
                Ok(r) => refreshed.extend(r),
                Err(e) => error!("{} re-poll failed: {}", feed.name(), e),
            }
        }

        self.enter(Phase::Reconcile);
        for (m, h) in &refreshed {
            match self.reconcile_match(m.source, m.tournament_id, m.surface, h, now) {
                Ok(_) => report.matches += 1,
                Err(e) => {
                    warn!("Skipping match {} ({}): {}", m.id, h.external_id, e);
                    report.failed += 1;
                }
            }
        }

        let current = self.reload(&stored)?;
        self.resolve_odds(&current, now, &mut report).await;
        self.dispatch_all(&self.dispatcher, ids(&current), now, &mut report).await;

        self.aggregate(now)?;
        info!("Fine sweep done: {:?}", report);
        Ok(report)
    }

    async fn run_backfill(&self, from: NaiveDate, to: NaiveDate, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let matches = self
            .db
            .list_matches_starting_between(source_day_start(from), source_day_start(to + Duration::days(1)))?;
        info!("Backfill {}..={}: {} matches", from, to, matches.len());

        self.dispatch_all(&self.backfill_dispatcher, ids(&matches), now, &mut report)
            .await;
        self.aggregate(now)?;
        info!("Backfill done: {:?}", report);
        Ok(report)
    }

    // ── Phases ───────────────────────────────────────────────────────────────

    fn reconcile_tournament(
        &self,
        source: MatchSource,
        harvest: &TournamentHarvest,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        let name = &harvest.tournament.name;
        let stored = self
            .reconciler
            .upsert_tournament(&harvest.tournament, now)
            .and_then(|id| Ok(self.db.get_tournament(id)?));
        let tournament = match stored {
            Ok(Some(t)) => t,
            Ok(None) => {
                warn!("Tournament {} vanished after upsert", name);
                report.failed += 1;
                return;
            }
            Err(e) => {
                warn!("Skipping tournament {}: {}", name, e);
                report.failed += 1;
                return;
            }
        };
        report.tournaments += 1;

        for h in &harvest.matches {
            match self.reconcile_match(source, tournament.id, tournament.surface, h, now) {
                Ok(_) => report.matches += 1,
                Err(e) => {
                    warn!("Skipping match {} of {}: {}", h.external_id, name, e);
                    report.failed += 1;
                }
            }
        }
    }

    fn reconcile_match(
        &self,
        source: MatchSource,
        tournament_id: i64,
        fallback_surface: Surface,
        h: &MatchHarvest,
        now: DateTime<Utc>,
    ) -> Result<i64, PipelineError> {
        let home = self.reconciler.upsert_player(&h.home, now)?;
        let away = self.reconciler.upsert_player(&h.away, now)?;
        let winner_id = h.winner.map(|side| match side {
            Side::Home => home,
            Side::Away => away,
        });
        self.reconciler.upsert_match(
            &MatchObservation {
                source,
                external_id: Some(h.external_id.clone()),
                tournament_id,
                name: h.name.clone(),
                start_time: h.start_time,
                surface: h.surface.unwrap_or(fallback_surface),
                status: h.status,
                home_player_id: home,
                away_player_id: away,
                score: h.score.clone(),
                winner_id,
                odds: h.odds,
            },
            now,
        )
    }

    async fn resolve_odds(&self, matches: &[Match], now: DateTime<Utc>, report: &mut SweepReport) {
        self.enter(Phase::ResolveOdds);
        let due = matches.iter().filter(|m| {
            let until_start = m.start_time - now;
            m.status == MatchStatus::Scheduled
                && !m.has_odds()
                && until_start > Duration::zero()
                && until_start <= self.settings.odds_lookahead
        });
        for m in due {
            match self.odds.resolve_match(m).await {
                Ok(Some(_)) => report.odds += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!("Odds for match {} failed: {}", m.id, e);
                    report.failed += 1;
                }
            }
        }
    }

    /// Each match is re-read at dispatch time so odds written by the
    /// previous phase are seen.
    async fn dispatch_all(
        &self,
        dispatcher: &Dispatcher,
        ids: Vec<i64>,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        self.enter(Phase::Dispatch);
        for id in ids {
            match dispatcher.dispatch(id, now).await {
                Ok(DispatchOutcome::Dispatched { .. }) => report.predicted += 1,
                Ok(DispatchOutcome::Deferred) => report.deferred += 1,
                Ok(DispatchOutcome::Skipped(_)) => report.skipped += 1,
                Err(e) => {
                    warn!("Prediction for match {} failed: {}", id, e);
                    report.failed += 1;
                }
            }
        }
    }

    fn aggregate(&self, now: DateTime<Utc>) -> Result<()> {
        self.enter(Phase::Aggregate);
        self.aggregator
            .recompute_all(now, self.settings.recent_window)
            .context("accuracy recompute failed")?;
        Ok(())
    }

    fn reload(&self, matches: &[Match]) -> Result<Vec<Match>> {
        let mut out = Vec::with_capacity(matches.len());
        for m in matches {
            if let Some(current) = self.db.get_match(m.id)? {
                out.push(current);
            }
        }
        Ok(out)
    }
}

fn ids(matches: &[Match]) -> Vec<i64> {
    matches.iter().map(|m| m.id).collect()
}
