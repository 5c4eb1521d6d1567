use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{select_features, ScoringService, Standing};
use crate::db::models::{Match, MatchStatus, OddsPair, PredictionTier};
use crate::db::Database;
use crate::error::PipelineError;
use crate::odds::OddsResolver;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DispatchOutcome {
    Dispatched {
        tier: PredictionTier,
        home_prob: f64,
        away_prob: f64,
        predicted_winner_id: i64,
    },
    /// Not enough features yet; try again on a later pass.
    Deferred,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Canceled, interrupted or suspended.
    Inactive(MatchStatus),
    /// Completed with a full-tier prediction already stored.
    Frozen,
    /// The stored prediction came from a richer tier than is available now.
    WouldDowngrade(PredictionTier),
}

pub struct Dispatcher {
    db: Database,
    scorer: Arc<dyn ScoringService>,
    odds: Option<Arc<OddsResolver>>,
    odds_lookahead: Duration,
}

impl Dispatcher {
    pub fn new(db: Database, scorer: Arc<dyn ScoringService>) -> Self {
        Dispatcher {
            db,
            scorer,
            odds: None,
            odds_lookahead: Duration::hours(48),
        }
    }

    /// Let the dispatcher fetch missing odds itself for matches starting
    /// within `lookahead` of now.
    pub fn with_odds(mut self, resolver: Arc<OddsResolver>, lookahead: Duration) -> Self {
        self.odds = Some(resolver);
        self.odds_lookahead = lookahead;
        self
    }

    pub async fn dispatch(&self, match_id: i64, now: DateTime<Utc>) -> Result<DispatchOutcome, PipelineError> {
        let m = self
            .db
            .get_match(match_id)?
            .ok_or_else(|| PipelineError::DataConflict(format!("match {match_id} not found")))?;
        self.dispatch_match(m, now).await
    }

    async fn dispatch_match(&self, m: Match, now: DateTime<Utc>) -> Result<DispatchOutcome, PipelineError> {
        if matches!(
            m.status,
            MatchStatus::Canceled | MatchStatus::Interrupted | MatchStatus::Suspended
        ) {
            debug!("Match {}: {} - not dispatching", m.id, m.status.as_str());
            return Ok(DispatchOutcome::Skipped(SkipReason::Inactive(m.status)));
        }
        if m.status == MatchStatus::Completed && m.prediction_tier == Some(PredictionTier::Full) {
            return Ok(DispatchOutcome::Skipped(SkipReason::Frozen));
        }

        let odds = match (m.home_odds, m.away_odds) {
            (Some(home), Some(away)) => Some(OddsPair { home, away }),
            _ => self.odds_if_due(&m, now).await,
        };

        let home = self.standing(m.home_player_id)?;
        let away = self.standing(m.away_player_id)?;
        let Some(features) = select_features(m.surface, home, away, odds) else {
            debug!("Match {}: not enough features yet", m.id);
            return Ok(DispatchOutcome::Deferred);
        };
        let tier = features.tier();

        if let Some(existing) = m.prediction_tier {
            let allowed = if m.status == MatchStatus::Completed {
                tier.is_better_than(existing)
            } else {
                !existing.is_better_than(tier)
            };
            if !allowed {
                debug!(
                    "Match {}: keeping tier {} prediction over tier {}",
                    m.id,
                    existing.number(),
                    tier.number()
                );
                return Ok(DispatchOutcome::Skipped(SkipReason::WouldDowngrade(existing)));
            }
        }

        let (home_prob, away_prob) = self.scorer.score(&features).await?.normalized()?;
        // Exact ties go to the home player.
        let predicted_winner_id = if home_prob >= away_prob {
            m.home_player_id
        } else {
            m.away_player_id
        };
        self.db
            .record_prediction(m.id, home_prob, away_prob, tier, predicted_winner_id)?;

        info!(
            "Match {}: tier {} prediction {:.3} / {:.3}",
            m.id,
            tier.number(),
            home_prob,
            away_prob
        );
        Ok(DispatchOutcome::Dispatched {
            tier,
            home_prob,
            away_prob,
            predicted_winner_id,
        })
    }

    /// Odds are only worth asking for between now and the look-ahead horizon.
    /// A failed lookup degrades to "no odds" so rank-only scoring still runs.
    async fn odds_if_due(&self, m: &Match, now: DateTime<Utc>) -> Option<OddsPair> {
        let resolver = self.odds.as_ref()?;
        let until_start = m.start_time - now;
        if until_start <= Duration::zero() || until_start > self.odds_lookahead {
            return None;
        }
        match resolver.resolve_match(m).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Match {}: odds lookup failed: {}", m.id, e);
                None
            }
        }
    }

    fn standing(&self, player_id: i64) -> Result<Option<Standing>, PipelineError> {
        Ok(self.db.get_player(player_id)?.as_ref().and_then(Standing::of))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{MatchSource, Surface};
    use crate::odds::ProviderOdds;
    use crate::predict::scoring::testing::StubScorer;
    use crate::predict::FeatureVector;
    use crate::provider::testing::StubProvider;
    use crate::reconcile::tests::{at, player, scheduled, seeded};
    use crate::reconcile::{MatchObservation, RankingObservation, Reconciler};
    use approx::assert_relative_eq;

    fn rank_both(rec: &Reconciler) {
        rec.refresh_rankings(
            &[
                RankingObservation {
                    player: player("Sinner Jannik"),
                    rank: 2,
                    points: 10000,
                },
                RankingObservation {
                    player: player("Shelton Ben"),
                    rank: 6,
                    points: 4200,
                },
            ],
            at(8),
        )
        .unwrap();
    }

    fn with_odds(obs: MatchObservation) -> MatchObservation {
        MatchObservation {
            odds: Some(OddsPair { home: 1.35, away: 3.27 }),
            ..obs
        }
    }

    #[tokio::test]
    async fn ranks_without_odds_use_rank_only_tier() {
        let (rec, db, t, a, b) = seeded();
        rank_both(&rec);
        let id = rec.upsert_match(&scheduled(t, a, b), at(8)).unwrap();
        let scorer = Arc::new(StubScorer::returning(0.7, 0.3));
        let dispatcher = Dispatcher::new(db.clone(), scorer.clone());

        let outcome = dispatcher.dispatch(id, at(9)).await.unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::Dispatched { tier: PredictionTier::RankOnly, .. }
        ));
        assert_eq!(
            scorer.calls(),
            vec![FeatureVector::RankOnly {
                surface: 0,
                p1_rank: 2,
                p2_rank: 6,
                p1_points: 10000,
                p2_points: 4200,
            }]
        );
        let stored = db.get_match(id).unwrap().unwrap();
        assert_eq!(stored.prediction_tier, Some(PredictionTier::RankOnly));
        assert_eq!(stored.predicted_winner_id, Some(a));
    }

    #[tokio::test]
    async fn ranks_and_odds_use_full_tier() {
        let (rec, db, t, a, b) = seeded();
        rank_both(&rec);
        let id = rec.upsert_match(&with_odds(scheduled(t, a, b)), at(8)).unwrap();
        let scorer = Arc::new(StubScorer::returning(0.2, 0.8));
        let outcome = Dispatcher::new(db.clone(), scorer).dispatch(id, at(9)).await.unwrap();

        assert!(matches!(
            outcome,
            DispatchOutcome::Dispatched { tier: PredictionTier::Full, .. }
        ));
        assert_eq!(db.get_match(id).unwrap().unwrap().predicted_winner_id, Some(b));
    }

    #[tokio::test]
    async fn odds_without_ranks_use_odds_only_tier() {
        let (rec, db, t, a, b) = seeded();
        let id = rec.upsert_match(&with_odds(scheduled(t, a, b)), at(8)).unwrap();
        let scorer = Arc::new(StubScorer::returning(0.6, 0.4));
        let outcome = Dispatcher::new(db, scorer).dispatch(id, at(9)).await.unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::Dispatched { tier: PredictionTier::OddsOnly, .. }
        ));
    }

    #[tokio::test]
    async fn stored_probabilities_sum_to_one() {
        let (rec, db, t, a, b) = seeded();
        rank_both(&rec);
        let id = rec.upsert_match(&scheduled(t, a, b), at(8)).unwrap();
        let scorer = Arc::new(StubScorer::returning(0.64, 0.41));
        Dispatcher::new(db.clone(), scorer).dispatch(id, at(9)).await.unwrap();

        let stored = db.get_match(id).unwrap().unwrap();
        let (home, away) = (stored.home_win_prob.unwrap(), stored.away_win_prob.unwrap());
        assert_relative_eq!(home + away, 1.0, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn completed_full_tier_is_frozen() {
        let (rec, db, t, a, b) = seeded();
        rank_both(&rec);
        let id = rec.upsert_match(&with_odds(scheduled(t, a, b)), at(8)).unwrap();
        let first = Arc::new(StubScorer::returning(0.7, 0.3));
        Dispatcher::new(db.clone(), first).dispatch(id, at(9)).await.unwrap();

        let finished = MatchObservation {
            status: MatchStatus::Completed,
            score: Some("2:0".into()),
            winner_id: Some(a),
            ..scheduled(t, a, b)
        };
        rec.upsert_match(&finished, at(16)).unwrap();

        let second = Arc::new(StubScorer::returning(0.1, 0.9));
        let outcome = Dispatcher::new(db.clone(), second.clone())
            .dispatch(id, at(17))
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Skipped(SkipReason::Frozen));
        assert!(second.calls().is_empty());
        let stored = db.get_match(id).unwrap().unwrap();
        assert_eq!(stored.prediction_tier, Some(PredictionTier::Full));
        assert_eq!(stored.predicted_winner_id, Some(a));
    }

    #[tokio::test]
    async fn completed_match_accepts_only_an_upgrade() {
        let (rec, db, t, a, b) = seeded();
        rank_both(&rec);
        let id = rec.upsert_match(&scheduled(t, a, b), at(8)).unwrap();
        let scorer = Arc::new(StubScorer::returning(0.7, 0.3));
        let dispatcher = Dispatcher::new(db.clone(), scorer.clone());
        dispatcher.dispatch(id, at(9)).await.unwrap();

        let finished = MatchObservation {
            status: MatchStatus::Completed,
            score: Some("2:1".into()),
            winner_id: Some(b),
            ..scheduled(t, a, b)
        };
        rec.upsert_match(&finished, at(16)).unwrap();

        // Same rank-only inputs: nothing new to say.
        let again = dispatcher.dispatch(id, at(17)).await.unwrap();
        assert_eq!(
            again,
            DispatchOutcome::Skipped(SkipReason::WouldDowngrade(PredictionTier::RankOnly))
        );

        // Late odds allow a full-tier rescoring.
        db.set_match_odds(id, 1.4, 3.0).unwrap();
        let upgraded = dispatcher.dispatch(id, at(18)).await.unwrap();
        assert!(matches!(
            upgraded,
            DispatchOutcome::Dispatched { tier: PredictionTier::Full, .. }
        ));
        assert_eq!(scorer.calls().len(), 2);
    }

    #[tokio::test]
    async fn inactive_matches_are_skipped() {
        let (rec, db, t, a, b) = seeded();
        rank_both(&rec);
        let canceled = MatchObservation {
            status: MatchStatus::Canceled,
            ..scheduled(t, a, b)
        };
        let id = rec.upsert_match(&canceled, at(8)).unwrap();
        let scorer = Arc::new(StubScorer::returning(0.5, 0.5));
        let outcome = Dispatcher::new(db, scorer.clone()).dispatch(id, at(9)).await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Skipped(SkipReason::Inactive(MatchStatus::Canceled))
        );
        assert!(scorer.calls().is_empty());
    }

    #[tokio::test]
    async fn exact_tie_goes_to_home_player() {
        let (rec, db, t, a, b) = seeded();
        rank_both(&rec);
        let id = rec.upsert_match(&scheduled(t, a, b), at(8)).unwrap();
        let scorer = Arc::new(StubScorer::returning(0.5, 0.5));
        let outcome = Dispatcher::new(db, scorer).dispatch(id, at(9)).await.unwrap();
        match outcome {
            DispatchOutcome::Dispatched { predicted_winner_id, .. } => {
                assert_eq!(predicted_winner_id, a)
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn unusable_probabilities_leave_match_untouched() {
        let (rec, db, t, a, b) = seeded();
        rank_both(&rec);
        let id = rec.upsert_match(&scheduled(t, a, b), at(8)).unwrap();
        let scorer = Arc::new(StubScorer::returning(f64::NAN, 0.5));
        let err = Dispatcher::new(db.clone(), scorer).dispatch(id, at(9)).await;
        assert!(matches!(err, Err(PipelineError::InvalidProbabilities(..))));
        assert_eq!(db.get_match(id).unwrap().unwrap().prediction_tier, None);
    }

    fn provider_dispatcher(db: &Database, stub: Arc<StubProvider>) -> Dispatcher {
        let resolver = OddsResolver::new(db.clone(), "Bet365")
            .with_source(MatchSource::Provider, Arc::new(ProviderOdds::new(stub)));
        Dispatcher::new(db.clone(), Arc::new(StubScorer::returning(0.6, 0.4)))
            .with_odds(Arc::new(resolver), Duration::hours(48))
    }

    fn provider_match(t: i64, a: i64, b: i64, start: DateTime<Utc>) -> MatchObservation {
        MatchObservation {
            source: MatchSource::Provider,
            external_id: Some("777".into()),
            start_time: start,
            surface: Surface::Clay,
            ..scheduled(t, a, b)
        }
    }

    #[tokio::test]
    async fn far_match_without_odds_defers_without_lookup() {
        let (rec, db, t, a, b) = seeded();
        let id = rec
            .upsert_match(&provider_match(t, a, b, at(9) + Duration::days(6)), at(8))
            .unwrap();
        let stub = Arc::new(StubProvider::default());
        let dispatcher = provider_dispatcher(&db, stub.clone());

        let outcome = dispatcher.dispatch(id, at(9)).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Deferred);
        assert!(stub.odds_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn near_match_pulls_odds_before_scoring() {
        let (rec, db, t, a, b) = seeded();
        rank_both(&rec);
        let id = rec
            .upsert_match(&provider_match(t, a, b, at(9) + Duration::hours(5)), at(8))
            .unwrap();
        let mut stub = StubProvider::default();
        stub.odds.insert(
            777,
            vec![serde_json::from_value(serde_json::json!({
                "periods": [{"period_type": "Full Time", "odds": [
                    {"bookmaker_name": "Bet365", "home": 1.5, "away": 2.5}
                ]}]
            }))
            .unwrap()],
        );
        let stub = Arc::new(stub);
        let outcome = provider_dispatcher(&db, stub.clone()).dispatch(id, at(9)).await.unwrap();

        assert!(matches!(
            outcome,
            DispatchOutcome::Dispatched { tier: PredictionTier::Full, .. }
        ));
        assert_eq!(*stub.odds_calls.lock().unwrap(), vec![777]);
        assert!(db.get_match(id).unwrap().unwrap().has_odds());
    }

    #[tokio::test]
    async fn started_match_without_odds_is_not_looked_up() {
        let (rec, db, t, a, b) = seeded();
        rank_both(&rec);
        let id = rec
            .upsert_match(&provider_match(t, a, b, at(9) - Duration::hours(1)), at(8))
            .unwrap();
        let stub = Arc::new(StubProvider::default());
        let outcome = provider_dispatcher(&db, stub.clone()).dispatch(id, at(9)).await.unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::Dispatched { tier: PredictionTier::RankOnly, .. }
        ));
        assert!(stub.odds_calls.lock().unwrap().is_empty());
    }
}
