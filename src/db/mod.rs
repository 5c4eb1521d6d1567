use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::sync::{Arc, Mutex, MutexGuard};

pub mod models;
use models::*;

/// Thread-safe SQLite handle (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::with_connection(conn)
    }

    /// Private in-memory database, used by tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        self.conn()?.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))
    }

    /// Run `f` inside a single transaction; it commits only if `f` succeeds.
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ── Tournaments ──────────────────────────────────────────────────────────

    pub fn get_tournament(&self, id: i64) -> Result<Option<Tournament>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {TOURNAMENT_COLUMNS} FROM tournaments WHERE id=?1");
        Ok(conn.query_row(&sql, params![id], map_tournament).optional()?)
    }

    pub fn list_tournaments(&self) -> Result<Vec<Tournament>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {TOURNAMENT_COLUMNS} FROM tournaments ORDER BY last_observed DESC, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], map_tournament)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Tournaments sighted at or after `since`; these are the "current" ones.
    pub fn list_tournaments_observed_since(&self, since: DateTime<Utc>) -> Result<Vec<Tournament>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {TOURNAMENT_COLUMNS} FROM tournaments WHERE last_observed >= ?1 ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![since], map_tournament)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Players ──────────────────────────────────────────────────────────────

    pub fn get_player(&self, id: i64) -> Result<Option<Player>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {PLAYER_COLUMNS} FROM players WHERE id=?1");
        Ok(conn.query_row(&sql, params![id], map_player).optional()?)
    }

    pub fn player_exists_with_external_id(&self, external_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM players WHERE external_id=?1",
                params![external_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// List players, ranked ones first in rank order (paginated)
    pub fn list_players(&self, limit: i64, offset: i64) -> Result<Vec<Player>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {PLAYER_COLUMNS} FROM players
             ORDER BY rank IS NULL, rank, name LIMIT ?1 OFFSET ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![limit, offset], map_player)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Matches ──────────────────────────────────────────────────────────────

    pub fn get_match(&self, id: i64) -> Result<Option<Match>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id=?1");
        Ok(conn.query_row(&sql, params![id], map_match).optional()?)
    }

    pub fn get_match_by_external(&self, source: MatchSource, external_id: &str) -> Result<Option<Match>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {MATCH_COLUMNS} FROM matches WHERE source=?1 AND external_id=?2");
        Ok(conn
            .query_row(&sql, params![source, external_id], map_match)
            .optional()?)
    }

    /// Matches with `from <= start_time < to`, earliest first
    pub fn list_matches_starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Match>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {MATCH_COLUMNS} FROM matches
             WHERE start_time >= ?1 AND start_time < ?2 ORDER BY start_time, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![from, to], map_match)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Matches that have started within `window_start..=now` and are not yet
    /// in a terminal state.
    pub fn list_live_matches(
        &self,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Match>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {MATCH_COLUMNS} FROM matches
             WHERE start_time > ?1 AND start_time <= ?2
               AND status NOT IN ('Completed', 'Canceled')
             ORDER BY start_time, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![window_start, now], map_match)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Store both odds sides at once.
    pub fn set_match_odds(&self, match_id: i64, home: f64, away: f64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE matches SET home_odds=?1, away_odds=?2 WHERE id=?3",
            params![home, away, match_id],
        )?;
        Ok(())
    }

    /// Write every prediction field in one statement.
    pub fn record_prediction(
        &self,
        match_id: i64,
        home_prob: f64,
        away_prob: f64,
        tier: PredictionTier,
        predicted_winner_id: i64,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE matches SET home_win_prob=?1, away_win_prob=?2,
                    prediction_tier=?3, predicted_winner_id=?4
             WHERE id=?5",
            params![home_prob, away_prob, tier, predicted_winner_id, match_id],
        )?;
        Ok(())
    }

    /// (winner, predicted winner) for every Completed match in scope.
    pub fn completed_outcomes(
        &self,
        scope: AccuracyScope,
    ) -> Result<Vec<(Option<i64>, Option<i64>)>> {
        let conn = self.conn()?;
        let base = "SELECT winner_id, predicted_winner_id FROM matches WHERE status='Completed'";
        let rows = match scope {
            AccuracyScope::Overall => conn
                .prepare(base)?
                .query_map([], map_outcome)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
            AccuracyScope::Tournament(id) => conn
                .prepare(&format!("{base} AND tournament_id=?1"))?
                .query_map(params![id], map_outcome)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
            AccuracyScope::Surface(surface) => conn
                .prepare(&format!("{base} AND surface=?1"))?
                .query_map(params![surface], map_outcome)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
        };
        Ok(rows)
    }

    // ── Accuracy ─────────────────────────────────────────────────────────────

    /// Replace the stored counts for a scope.
    pub fn write_accuracy(&self, snapshot: &AccuracySnapshot) -> Result<()> {
        let (kind, key) = snapshot.scope.storage_key();
        self.transaction(|tx| {
            tx.execute(
                "INSERT INTO accuracy_snapshots (scope_kind, scope_key, correct, incorrect, computed_at)
                 VALUES (?1,?2,?3,?4,?5)
                 ON CONFLICT(scope_kind, scope_key) DO UPDATE SET
                    correct=excluded.correct,
                    incorrect=excluded.incorrect,
                    computed_at=excluded.computed_at",
                params![kind, key, snapshot.correct, snapshot.incorrect, snapshot.computed_at],
            )?;
            Ok(())
        })
    }

    pub fn get_accuracy(&self, scope: AccuracyScope) -> Result<Option<AccuracySnapshot>> {
        let (kind, key) = scope.storage_key();
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT correct, incorrect, computed_at FROM accuracy_snapshots
                 WHERE scope_kind=?1 AND scope_key=?2",
                params![kind, key],
                |r| {
                    Ok(AccuracySnapshot {
                        scope,
                        correct: r.get(0)?,
                        incorrect: r.get(1)?,
                        computed_at: r.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_accuracy(&self) -> Result<Vec<AccuracySnapshot>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT scope_kind, scope_key, correct, incorrect, computed_at
             FROM accuracy_snapshots ORDER BY scope_kind, scope_key",
        )?;
        let rows = stmt
            .query_map([], |r| {
                let kind: String = r.get(0)?;
                let key: String = r.get(1)?;
                Ok((kind, key, r.get(2)?, r.get(3)?, r.get(4)?))
            })?
            .collect::<rusqlite::Result<Vec<(String, String, i64, i64, DateTime<Utc>)>>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(kind, key, correct, incorrect, computed_at)| {
                AccuracyScope::from_storage_key(&kind, &key).map(|scope| AccuracySnapshot {
                    scope,
                    correct,
                    incorrect,
                    computed_at,
                })
            })
            .collect())
    }

    // ── Job runs ─────────────────────────────────────────────────────────────

    /// Source-timezone calendar day of the last successful run of `job`
    pub fn last_job_run(&self, job: &str) -> Result<Option<NaiveDate>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT last_run_date FROM job_runs WHERE job=?1",
                params![job],
                |r| r.get(0),
            )
            .optional()?)
    }

    pub fn record_job_run(&self, job: &str, day: NaiveDate, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO job_runs (job, last_run_date, last_run_at) VALUES (?1,?2,?3)
             ON CONFLICT(job) DO UPDATE SET
                last_run_date=excluded.last_run_date,
                last_run_at=excluded.last_run_at",
            params![job, day, at],
        )?;
        Ok(())
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

pub(crate) const TOURNAMENT_COLUMNS: &str = "id, external_id, name, surface, is_grand_slam,
    city, category, source_url, last_observed";

pub(crate) const PLAYER_COLUMNS: &str = "id, external_id, name, image_url, rank, points,
    height_cm, weight_kg, plays, birth_date, last_observed";

pub(crate) const MATCH_COLUMNS: &str = "id, source, external_id, tournament_id, name,
    start_time, surface, status, home_player_id, away_player_id, score, winner_id,
    home_odds, away_odds, home_win_prob, away_win_prob, prediction_tier,
    predicted_winner_id, last_observed";

pub(crate) fn map_tournament(row: &rusqlite::Row) -> rusqlite::Result<Tournament> {
    Ok(Tournament {
        id: row.get(0)?,
        external_id: row.get(1)?,
        name: row.get(2)?,
        surface: row.get(3)?,
        is_grand_slam: row.get(4)?,
        city: row.get(5)?,
        category: row.get(6)?,
        source_url: row.get(7)?,
        last_observed: row.get(8)?,
    })
}

pub(crate) fn map_player(row: &rusqlite::Row) -> rusqlite::Result<Player> {
    Ok(Player {
        id: row.get(0)?,
        external_id: row.get(1)?,
        name: row.get(2)?,
        image_url: row.get(3)?,
        rank: row.get(4)?,
        points: row.get(5)?,
        height_cm: row.get(6)?,
        weight_kg: row.get(7)?,
        plays: row.get(8)?,
        birth_date: row.get(9)?,
        last_observed: row.get(10)?,
    })
}

pub(crate) fn map_match(row: &rusqlite::Row) -> rusqlite::Result<Match> {
    Ok(Match {
        id: row.get(0)?,
        source: row.get(1)?,
        external_id: row.get(2)?,
        tournament_id: row.get(3)?,
        name: row.get(4)?,
        start_time: row.get(5)?,
        surface: row.get(6)?,
        status: row.get(7)?,
        home_player_id: row.get(8)?,
        away_player_id: row.get(9)?,
        score: row.get(10)?,
        winner_id: row.get(11)?,
        home_odds: row.get(12)?,
        away_odds: row.get(13)?,
        home_win_prob: row.get(14)?,
        away_win_prob: row.get(15)?,
        prediction_tier: row.get(16)?,
        predicted_winner_id: row.get(17)?,
        last_observed: row.get(18)?,
    })
}

fn map_outcome(row: &rusqlite::Row) -> rusqlite::Result<(Option<i64>, Option<i64>)> {
    Ok((row.get(0)?, row.get(1)?))
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tournaments (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id   INTEGER UNIQUE,
    name          TEXT    NOT NULL,
    name_key      TEXT    NOT NULL UNIQUE,
    surface       TEXT    NOT NULL,
    is_grand_slam INTEGER NOT NULL DEFAULT 0,
    city          TEXT,
    category      TEXT,
    source_url    TEXT,
    last_observed TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS players (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id   INTEGER UNIQUE,
    name          TEXT    NOT NULL,
    name_key      TEXT    NOT NULL,
    image_url     TEXT,
    rank          INTEGER,
    points        INTEGER,
    height_cm     INTEGER,
    weight_kg     INTEGER,
    plays         TEXT,
    birth_date    TEXT,
    last_observed TEXT    NOT NULL,
    CHECK ((rank IS NULL) = (points IS NULL))
);

CREATE TABLE IF NOT EXISTS matches (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    source              TEXT    NOT NULL,
    external_id         TEXT,
    tournament_id       INTEGER NOT NULL,
    name                TEXT,
    start_time          TEXT    NOT NULL,
    surface             TEXT    NOT NULL,
    status              TEXT    NOT NULL,
    home_player_id      INTEGER NOT NULL,
    away_player_id      INTEGER NOT NULL,
    score               TEXT,
    winner_id           INTEGER,
    home_odds           REAL,
    away_odds           REAL,
    home_win_prob       REAL,
    away_win_prob       REAL,
    prediction_tier     INTEGER,
    predicted_winner_id INTEGER,
    last_observed       TEXT    NOT NULL,
    UNIQUE (source, external_id),
    UNIQUE (tournament_id, home_player_id, away_player_id, start_time),
    CHECK ((home_win_prob IS NULL) = (away_win_prob IS NULL)),
    CHECK ((home_odds IS NULL) = (away_odds IS NULL)),
    FOREIGN KEY (tournament_id) REFERENCES tournaments(id),
    FOREIGN KEY (home_player_id) REFERENCES players(id),
    FOREIGN KEY (away_player_id) REFERENCES players(id)
);

CREATE TABLE IF NOT EXISTS accuracy_snapshots (
    scope_kind  TEXT    NOT NULL,
    scope_key   TEXT    NOT NULL,
    correct     INTEGER NOT NULL,
    incorrect   INTEGER NOT NULL,
    computed_at TEXT    NOT NULL,
    PRIMARY KEY (scope_kind, scope_key)
);

CREATE TABLE IF NOT EXISTS job_runs (
    job           TEXT PRIMARY KEY,
    last_run_date TEXT NOT NULL,
    last_run_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_players_name_key ON players(name_key);
CREATE INDEX IF NOT EXISTS idx_matches_start ON matches(start_time);
CREATE INDEX IF NOT EXISTS idx_matches_status ON matches(status);
CREATE INDEX IF NOT EXISTS idx_tournaments_observed ON tournaments(last_observed);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn migrations_are_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().unwrap();
        assert!(db.list_tournaments().unwrap().is_empty());
    }

    #[test]
    fn job_run_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.last_job_run("coarse").unwrap(), None);
        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 0, 30, 0).unwrap();
        db.record_job_run("coarse", day, at).unwrap();
        let next = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        db.record_job_run("coarse", next, at).unwrap();
        assert_eq!(db.last_job_run("coarse").unwrap(), Some(next));
    }

    #[test]
    fn rank_without_points_is_rejected_by_schema() {
        let db = Database::open_in_memory().unwrap();
        let res = db.transaction(|tx| {
            tx.execute(
                "INSERT INTO players (name, name_key, rank, points, last_observed)
                 VALUES ('A', 'a', 5, NULL, ?1)",
                params![Utc::now()],
            )?;
            Ok(())
        });
        assert!(res.is_err());
    }
}
