//! Idempotent create-or-update of tournaments, players and matches.
//!
//! Lookup order for every entity: stable external id, then normalized name
//! (or, for matches, the tournament/players/start-time key), then create.
//! Every upsert runs in one transaction and touches `last_observed`.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::db::models::{MatchSource, MatchStatus, OddsPair, Surface};
use crate::db::Database;
use crate::error::PipelineError;

/// Lowercased, trimmed, inner whitespace collapsed.
pub fn name_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Player lookup key: `name_key` with its words sorted, so the scraped
/// "Sinner Jannik" and the provider's "Jannik Sinner" meet.
pub fn player_key(name: &str) -> String {
    let lower = name.to_lowercase();
    let mut words: Vec<&str> = lower.split_whitespace().collect();
    words.sort_unstable();
    words.join(" ")
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TournamentObservation {
    pub external_id: Option<i64>,
    pub name: String,
    pub surface: Option<Surface>,
    pub city: Option<String>,
    pub category: Option<String>,
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerObservation {
    pub external_id: Option<i64>,
    pub name: String,
    pub image_url: Option<String>,
    pub height_cm: Option<i64>,
    pub weight_kg: Option<i64>,
    pub plays: Option<String>,
    pub birth_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankingObservation {
    pub player: PlayerObservation,
    pub rank: i64,
    pub points: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchObservation {
    pub source: MatchSource,
    pub external_id: Option<String>,
    pub tournament_id: i64,
    pub name: Option<String>,
    pub start_time: DateTime<Utc>,
    pub surface: Surface,
    pub status: MatchStatus,
    pub home_player_id: i64,
    pub away_player_id: i64,
    pub score: Option<String>,
    pub winner_id: Option<i64>,
    pub odds: Option<OddsPair>,
}

#[derive(Clone)]
pub struct Reconciler {
    db: Database,
}

impl Reconciler {
    pub fn new(db: Database) -> Self {
        Reconciler { db }
    }

    // ── Tournaments ──────────────────────────────────────────────────────────

    /// A brand-new tournament must come with a surface; an existing one keeps
    /// its stored surface when the observation has none.
    pub fn upsert_tournament(
        &self,
        obs: &TournamentObservation,
        now: DateTime<Utc>,
    ) -> Result<i64, PipelineError> {
        let key = name_key(&obs.name);
        self.db.transaction(|tx| {
            let by_external = match obs.external_id {
                Some(ext) => find_id(tx, "SELECT id, external_id FROM tournaments WHERE external_id=?1", ext)?,
                None => None,
            };
            let existing = match by_external {
                Some(found) => Some(found),
                None => tx
                    .query_row(
                        "SELECT id, external_id FROM tournaments WHERE name_key=?1",
                        params![key],
                        |r| Ok((r.get::<_, i64>(0)?, r.get::<_, Option<i64>>(1)?)),
                    )
                    .optional()?,
            };

            match existing {
                Some((_, Some(stored))) if obs.external_id.is_some_and(|ext| ext != stored) => {
                    Ok(Err(PipelineError::DataConflict(format!(
                        "tournament '{}' already linked to external id {stored}",
                        obs.name
                    ))))
                }
                Some((id, _)) => {
                    tx.execute(
                        "UPDATE tournaments SET
                            name=?1,
                            surface=COALESCE(?2, surface),
                            city=COALESCE(?3, city),
                            category=COALESCE(?4, category),
                            source_url=COALESCE(?5, source_url),
                            external_id=COALESCE(external_id, ?6),
                            last_observed=?7
                         WHERE id=?8",
                        params![
                            obs.name,
                            obs.surface,
                            obs.city,
                            obs.category,
                            obs.source_url,
                            obs.external_id,
                            now,
                            id
                        ],
                    )?;
                    Ok(Ok(id))
                }
                None => {
                    let Some(surface) = obs.surface else {
                        return Ok(Err(PipelineError::MissingSurface(obs.name.clone())));
                    };
                    tx.execute(
                        "INSERT INTO tournaments
                            (external_id, name, name_key, surface, city, category, source_url, last_observed)
                         VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                        params![
                            obs.external_id,
                            obs.name,
                            key,
                            surface,
                            obs.city,
                            obs.category,
                            obs.source_url,
                            now
                        ],
                    )?;
                    let id = tx.last_insert_rowid();
                    info!("New tournament {} ({}) on {}", id, obs.name, surface.as_str());
                    Ok(Ok(id))
                }
            }
        })?
    }

    // ── Players ──────────────────────────────────────────────────────────────

    /// Only non-null observed fields are written; a page that lacks a field
    /// never erases a known value.
    pub fn upsert_player(
        &self,
        obs: &PlayerObservation,
        now: DateTime<Utc>,
    ) -> Result<i64, PipelineError> {
        Ok(self.db.transaction(|tx| upsert_player_tx(tx, obs, now))?)
    }

    /// Replace every player's rank and points with the given snapshot in one
    /// transaction. Players absent from the snapshot end up unranked; their
    /// other fields are untouched. An empty snapshot is refused.
    pub fn refresh_rankings(
        &self,
        entries: &[RankingObservation],
        now: DateTime<Utc>,
    ) -> Result<usize, PipelineError> {
        if entries.is_empty() {
            return Err(PipelineError::EmptySnapshot("ranking"));
        }
        let ranked = self.db.transaction(|tx| {
            let wiped = tx.execute(
                "UPDATE players SET rank=NULL, points=NULL WHERE rank IS NOT NULL",
                [],
            )?;
            debug!("Cleared rank/points of {} players", wiped);
            for entry in entries {
                let id = upsert_player_tx(tx, &entry.player, now)?;
                tx.execute(
                    "UPDATE players SET rank=?1, points=?2 WHERE id=?3",
                    params![entry.rank, entry.points, id],
                )?;
            }
            Ok(entries.len())
        })?;
        info!("Ranking refresh stored {} entries", ranked);
        Ok(ranked)
    }

    // ── Matches ──────────────────────────────────────────────────────────────

    /// Status only moves forward. A Completed match only accepts a late
    /// score or winner; a Canceled one only has its sighting recorded.
    pub fn upsert_match(
        &self,
        obs: &MatchObservation,
        now: DateTime<Utc>,
    ) -> Result<i64, PipelineError> {
        if obs.home_player_id == obs.away_player_id {
            return Err(PipelineError::DataConflict(format!(
                "match {:?} has the same player on both sides",
                obs.external_id
            )));
        }
        let (home_odds, away_odds) = match obs.odds {
            Some(o) => (Some(o.home), Some(o.away)),
            None => (None, None),
        };

        Ok(self.db.transaction(|tx| {
            let by_external = match &obs.external_id {
                Some(ext) => tx
                    .query_row(
                        "SELECT id, status FROM matches WHERE source=?1 AND external_id=?2",
                        params![obs.source, ext],
                        |r| Ok((r.get::<_, i64>(0)?, r.get::<_, MatchStatus>(1)?)),
                    )
                    .optional()?,
                None => None,
            };
            let existing = match by_external {
                Some(found) => Some(found),
                None => tx
                    .query_row(
                        "SELECT id, status FROM matches
                         WHERE tournament_id=?1 AND home_player_id=?2 AND away_player_id=?3
                           AND start_time=?4",
                        params![
                            obs.tournament_id,
                            obs.home_player_id,
                            obs.away_player_id,
                            obs.start_time
                        ],
                        |r| Ok((r.get::<_, i64>(0)?, r.get::<_, MatchStatus>(1)?)),
                    )
                    .optional()?,
            };

            let Some((id, stored)) = existing else {
                tx.execute(
                    "INSERT INTO matches
                        (source, external_id, tournament_id, name, start_time, surface, status,
                         home_player_id, away_player_id, score, winner_id, home_odds, away_odds,
                         last_observed)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
                    params![
                        obs.source,
                        obs.external_id,
                        obs.tournament_id,
                        obs.name,
                        obs.start_time,
                        obs.surface,
                        obs.status,
                        obs.home_player_id,
                        obs.away_player_id,
                        obs.score,
                        obs.winner_id,
                        home_odds,
                        away_odds,
                        now
                    ],
                )?;
                return Ok(tx.last_insert_rowid());
            };

            match stored {
                MatchStatus::Completed => {
                    tx.execute(
                        "UPDATE matches SET
                            score=COALESCE(score, ?1),
                            winner_id=COALESCE(winner_id, ?2),
                            external_id=COALESCE(external_id, ?3),
                            last_observed=?4
                         WHERE id=?5",
                        params![obs.score, obs.winner_id, obs.external_id, now, id],
                    )?;
                }
                MatchStatus::Canceled => {
                    tx.execute(
                        "UPDATE matches SET last_observed=?1 WHERE id=?2",
                        params![now, id],
                    )?;
                }
                _ => {
                    let status = stored.advance(obs.status);
                    if status != obs.status {
                        debug!(
                            "Match {}: ignoring backward status {} (stored {})",
                            id,
                            obs.status.as_str(),
                            stored.as_str()
                        );
                    }
                    tx.execute(
                        "UPDATE matches SET
                            external_id=COALESCE(external_id, ?1),
                            name=COALESCE(?2, name),
                            start_time=?3,
                            surface=?4,
                            status=?5,
                            home_player_id=?6,
                            away_player_id=?7,
                            score=COALESCE(?8, score),
                            winner_id=COALESCE(?9, winner_id),
                            home_odds=COALESCE(?10, home_odds),
                            away_odds=COALESCE(?11, away_odds),
                            last_observed=?12
                         WHERE id=?13",
                        params![
                            obs.external_id,
                            obs.name,
                            obs.start_time,
                            obs.surface,
                            status,
                            obs.home_player_id,
                            obs.away_player_id,
                            obs.score,
                            obs.winner_id,
                            home_odds,
                            away_odds,
                            now,
                            id
                        ],
                    )?;
                }
            }
            Ok(id)
        })?)
    }
}

fn find_id(
    conn: &Connection,
    sql: &str,
    external_id: i64,
) -> rusqlite::Result<Option<(i64, Option<i64>)>> {
    conn.query_row(sql, params![external_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .optional()
}

/// Player lookup and merge inside an open transaction.
///
/// A name match that is already linked to a *different* external id is
/// treated as a different person: a new player is created rather than
/// merging two identities on name alone.
fn upsert_player_tx(
    conn: &Connection,
    obs: &PlayerObservation,
    now: DateTime<Utc>,
) -> anyhow::Result<i64> {
    let key = player_key(&obs.name);

    let by_external = match obs.external_id {
        Some(ext) => find_id(conn, "SELECT id, external_id FROM players WHERE external_id=?1", ext)?,
        None => None,
    };
    let by_name = match by_external {
        Some(_) => None,
        None => conn
            .query_row(
                "SELECT id, external_id FROM players WHERE name_key=?1 ORDER BY id LIMIT 1",
                params![key],
                |r| Ok((r.get::<_, i64>(0)?, r.get::<_, Option<i64>>(1)?)),
            )
            .optional()?,
    };

    let target = match (by_external, by_name) {
        (Some((id, _)), _) => Some(id),
        (None, Some((id, Some(stored)))) if obs.external_id.is_some_and(|ext| ext != stored) => {
            warn!(
                "Player '{}' (external {:?}) shares a name with player {} (external {}); creating a separate player",
                obs.name, obs.external_id, id, stored
            );
            None
        }
        (None, Some((id, _))) => Some(id),
        (None, None) => None,
    };

    match target {
        Some(id) => {
            conn.execute(
                "UPDATE players SET
                    name=?1,
                    name_key=?2,
                    external_id=COALESCE(external_id, ?3),
                    image_url=COALESCE(?4, image_url),
                    height_cm=COALESCE(?5, height_cm),
                    weight_kg=COALESCE(?6, weight_kg),
                    plays=COALESCE(?7, plays),
                    birth_date=COALESCE(?8, birth_date),
                    last_observed=?9
                 WHERE id=?10",
                params![
                    obs.name,
                    key,
                    obs.external_id,
                    obs.image_url,
                    obs.height_cm,
                    obs.weight_kg,
                    obs.plays,
                    obs.birth_date,
                    now,
                    id
                ],
            )?;
            Ok(id)
        }
        None => {
            conn.execute(
                "INSERT INTO players
                    (external_id, name, name_key, image_url, height_cm, weight_kg, plays,
                     birth_date, last_observed)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                params![
                    obs.external_id,
                    obs.name,
                    key,
                    obs.image_url,
                    obs.height_cm,
                    obs.weight_kg,
                    obs.plays,
                    obs.birth_date,
                    now
                ],
            )?;
            let id = conn.last_insert_rowid();
            debug!("New player {} ({})", id, obs.name);
            Ok(id)
        }
    }
}
