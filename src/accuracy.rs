//! Prediction accuracy counts, recomputed from scratch on every run.

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::db::models::{AccuracyScope, AccuracySnapshot, Surface};
use crate::db::Database;
use crate::error::PipelineError;

/// Count (correct, incorrect) over (winner, predicted winner) pairs. Pairs
/// missing either side are not evaluable and count for neither.
pub fn tally(outcomes: &[(Option<i64>, Option<i64>)]) -> (i64, i64) {
    outcomes
        .iter()
        .filter_map(|(winner, predicted)| Some((winner.as_ref()?, predicted.as_ref()?)))
        .fold((0, 0), |(correct, incorrect), (w, p)| {
            if w == p {
                (correct + 1, incorrect)
            } else {
                (correct, incorrect + 1)
            }
        })
}

#[derive(Clone)]
pub struct Aggregator {
    db: Database,
}

impl Aggregator {
    pub fn new(db: Database) -> Self {
        Aggregator { db }
    }

    pub fn recompute(&self, scope: AccuracyScope, now: DateTime<Utc>) -> Result<AccuracySnapshot, PipelineError> {
        let (correct, incorrect) = tally(&self.db.completed_outcomes(scope)?);
        let snapshot = AccuracySnapshot {
            scope,
            correct,
            incorrect,
            computed_at: now,
        };
        self.db.write_accuracy(&snapshot)?;
        Ok(snapshot)
    }

    /// Overall, every surface, and every tournament observed within
    /// `recent_window`.
    pub fn recompute_all(
        &self,
        now: DateTime<Utc>,
        recent_window: Duration,
    ) -> Result<Vec<AccuracySnapshot>, PipelineError> {
        let mut scopes = vec![AccuracyScope::Overall];
        scopes.extend(Surface::ALL.iter().map(|s| AccuracyScope::Surface(*s)));
        scopes.extend(
            self.db
                .list_tournaments_observed_since(now - recent_window)?
                .into_iter()
                .map(|t| AccuracyScope::Tournament(t.id)),
        );

        let snapshots = scopes
            .into_iter()
            .map(|scope| self.recompute(scope, now))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(overall) = snapshots.first() {
            info!(
                "Accuracy: {} correct / {} incorrect overall ({} scopes)",
                overall.correct,
                overall.incorrect,
                snapshots.len()
            );
        }
        Ok(snapshots)
    }
}
