use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

use crate::db::models::{AccuracyScope, Match, Player, Tournament};
use crate::db::Database;
use crate::jobs::{JobState, COARSE_JOB};
use crate::time::{source_day_start, source_today};

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 500;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub job_state: watch::Receiver<JobState>,
}

/// Build the read-only Axum router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/matches", get(matches_handler))
        .route("/api/matches/:id", get(match_handler))
        .route("/api/players", get(players_handler))
        .route("/api/tournaments", get(tournaments_handler))
        .route("/api/accuracy", get(accuracy_handler))
        .route("/api/status", get(status_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

#[derive(Debug)]
pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct MatchRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// GET /api/matches?from=&to= (RFC 3339). Defaults to today and tomorrow in
/// the source timezone.
async fn matches_handler(
    State(state): State<Arc<AppState>>,
    Query(range): Query<MatchRange>,
) -> ApiResult<Vec<Match>> {
    let from = range
        .from
        .unwrap_or_else(|| source_day_start(source_today(Utc::now())));
    let to = range.to.unwrap_or(from + Duration::days(2));
    if to <= from {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            "`to` must be after `from`".into(),
        ));
    }
    Ok(Json(state.db.list_matches_starting_between(from, to)?))
}

/// GET /api/matches/:id
async fn match_handler(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResult<Match> {
    state
        .db
        .get_match(id)?
        .map(Json)
        .ok_or_else(|| ApiError(StatusCode::NOT_FOUND, format!("match {id} not found")))
}

#[derive(Debug, Default, Deserialize)]
pub struct Page {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /api/players?limit=50&offset=0, ranked players first
async fn players_handler(
    State(state): State<Arc<AppState>>,
    Query(page): Query<Page>,
) -> ApiResult<Vec<Player>> {
    let limit = page.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let offset = page.offset.unwrap_or(0).max(0);
    Ok(Json(state.db.list_players(limit, offset)?))
}

/// GET /api/tournaments
async fn tournaments_handler(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Tournament>> {
    Ok(Json(state.db.list_tournaments()?))
}

#[derive(Debug, Serialize)]
pub struct AccuracyView {
    pub scope: AccuracyScope,
    pub correct: i64,
    pub incorrect: i64,
    /// Derived from the counts on every request
    pub accuracy_pct: Option<f64>,
    pub computed_at: DateTime<Utc>,
}

/// GET /api/accuracy
async fn accuracy_handler(State(state): State<Arc<AppState>>) -> ApiResult<Vec<AccuracyView>> {
    let views = state
        .db
        .list_accuracy()?
        .into_iter()
        .map(|s| AccuracyView {
            accuracy_pct: s.accuracy_pct(),
            scope: s.scope,
            correct: s.correct,
            incorrect: s.incorrect,
            computed_at: s.computed_at,
        })
        .collect();
    Ok(Json(views))
}

#[derive(Debug, Serialize)]
pub struct StatusView {
    pub job: JobState,
    pub last_coarse_run: Option<NaiveDate>,
}

/// GET /api/status
async fn status_handler(State(state): State<Arc<AppState>>) -> ApiResult<StatusView> {
    Ok(Json(StatusView {
        job: *state.job_state.borrow(),
        last_coarse_run: state.db.last_job_run(COARSE_JOB)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accuracy::Aggregator;
    use crate::db::models::{MatchStatus, PredictionTier};
    use crate::jobs::Phase;
    use crate::reconcile::tests::{at, scheduled, seeded};
    use crate::reconcile::MatchObservation;

    fn state(db: Database, job: JobState) -> Arc<AppState> {
        let (_tx, rx) = watch::channel(job);
        Arc::new(AppState { db, job_state: rx })
    }

    #[tokio::test]
    async fn match_range_and_lookup() {
        let (rec, db, t, a, b) = seeded();
        let id = rec.upsert_match(&scheduled(t, a, b), at(8)).unwrap();
        let st = state(db, JobState::Idle);

        let Json(found) = matches_handler(
            State(st.clone()),
            Query(MatchRange {
                from: Some(at(12)),
                to: Some(at(14)),
            }),
        )
        .await
        .unwrap();
        assert_eq!(found.len(), 1);

        let Json(one) = match_handler(State(st.clone()), Path(id)).await.unwrap();
        assert_eq!(one.home_player_id, a);

        let missing = match_handler(State(st.clone()), Path(id + 1)).await.unwrap_err();
        assert_eq!(missing.0, StatusCode::NOT_FOUND);

        let reversed = matches_handler(
            State(st),
            Query(MatchRange {
                from: Some(at(14)),
                to: Some(at(12)),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(reversed.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn accuracy_includes_derived_percentage() {
        let (rec, db, t, a, b) = seeded();
        let id = rec
            .upsert_match(
                &MatchObservation {
                    status: MatchStatus::Completed,
                    score: Some("2:0".into()),
                    winner_id: Some(a),
                    ..scheduled(t, a, b)
                },
                at(16),
            )
            .unwrap();
        db.record_prediction(id, 0.7, 0.3, PredictionTier::RankOnly, a).unwrap();
        Aggregator::new(db.clone())
            .recompute(AccuracyScope::Overall, at(17))
            .unwrap();

        let Json(views) = accuracy_handler(State(state(db, JobState::Idle))).await.unwrap();
        let overall = views
            .iter()
            .find(|v| v.scope == AccuracyScope::Overall)
            .unwrap();
        assert_eq!(overall.accuracy_pct, Some(100.0));
    }

    #[tokio::test]
    async fn status_reports_running_phase() {
        let db = Database::open_in_memory().unwrap();
        let Json(status) = status_handler(State(state(db, JobState::Running(Phase::Dispatch))))
            .await
            .unwrap();
        assert_eq!(status.job, JobState::Running(Phase::Dispatch));
        assert_eq!(status.last_coarse_run, None);
        assert_eq!(
            serde_json::to_value(&status.job).unwrap(),
            serde_json::json!({"state": "running", "phase": "dispatch"})
        );
    }
}
