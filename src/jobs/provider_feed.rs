use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{Feed, MatchHarvest, TournamentHarvest};
use crate::db::models::{Match, MatchSource, MatchStatus, Surface};
use crate::db::Database;
use crate::error::PipelineError;
use crate::provider::types::image_url;
use crate::provider::{LeagueInfo, ProviderApi, ProviderMatch};
use crate::reconcile::{PlayerObservation, RankingObservation, TournamentObservation};

/// Team rows of this kind are single players.
const SINGLES_TEAM: i64 = 1;

/// Feed backed by the structured tennis provider.
pub struct ProviderFeed {
    db: Database,
    provider: Arc<dyn ProviderApi>,
}

impl ProviderFeed {
    pub fn new(db: Database, provider: Arc<dyn ProviderApi>) -> Self {
        ProviderFeed { db, provider }
    }

    /// Player as referenced by a match. Unknown players (or a reference
    /// without a name) are looked up through the teams endpoint; `None`
    /// means the player could not be identified and the match is skipped.
    async fn player(
        &self,
        team_id: i64,
        name: Option<&str>,
        hash: Option<&str>,
    ) -> Result<Option<PlayerObservation>, PipelineError> {
        if let Some(name) = name {
            if self.db.player_exists_with_external_id(team_id)? {
                return Ok(Some(PlayerObservation {
                    external_id: Some(team_id),
                    name: name.to_string(),
                    image_url: hash.map(image_url),
                    ..Default::default()
                }));
            }
        }

        let Some(team) = self.provider.team(team_id).await? else {
            return Ok(None);
        };
        if team.kind.is_some_and(|k| k != SINGLES_TEAM) {
            debug!("Team {} is not a single player", team_id);
            return Ok(None);
        }
        Ok(Some(PlayerObservation {
            external_id: Some(team.id),
            name: team.name,
            image_url: team.hash_image.as_deref().map(image_url),
            ..Default::default()
        }))
    }

    async fn match_harvest(&self, pm: &ProviderMatch) -> Result<Option<MatchHarvest>, PipelineError> {
        let Some(home) = self
            .player(
                pm.home_team_id,
                pm.home_team_name.as_deref(),
                pm.home_team_hash_image.as_deref(),
            )
            .await?
        else {
            return Ok(None);
        };
        let Some(away) = self
            .player(
                pm.away_team_id,
                pm.away_team_name.as_deref(),
                pm.away_team_hash_image.as_deref(),
            )
            .await?
        else {
            return Ok(None);
        };

        let status = MatchStatus::from_provider(pm.status_type.as_deref().unwrap_or("notstarted"));
        let completed = status == MatchStatus::Completed;
        Ok(Some(MatchHarvest {
            external_id: pm.id.to_string(),
            name: pm.name.clone(),
            start_time: pm.start_time,
            surface: pm.ground_type.as_deref().and_then(Surface::canonicalize),
            status,
            home,
            away,
            score: if completed { pm.set_score() } else { None },
            winner: if completed { pm.winner_side() } else { None },
            odds: None,
        }))
    }

    /// Harvest every usable match of one league, skipping the rest.
    async fn harvest_matches(&self, matches: &[ProviderMatch]) -> Vec<MatchHarvest> {
        let mut out = Vec::new();
        for pm in matches {
            match self.match_harvest(pm).await {
                Ok(Some(h)) => out.push(h),
                Ok(None) => debug!("Match {}: unidentified player, skipped", pm.id),
                Err(e) => warn!("Skipping provider match {}: {}", pm.id, e),
            }
        }
        out
    }
}

fn tournament_observation(league: &LeagueInfo) -> TournamentObservation {
    TournamentObservation {
        external_id: Some(league.league_id),
        name: league
            .competition_name
            .clone()
            .unwrap_or_else(|| format!("League {}", league.league_id)),
        surface: league.surface_type.as_deref().and_then(Surface::canonicalize),
        city: league.city_name.clone(),
        category: league.category.clone(),
        source_url: None,
    }
}

#[async_trait]
impl Feed for ProviderFeed {
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn source(&self) -> MatchSource {
        MatchSource::Provider
    }

    async fn rankings(&self) -> Result<Vec<RankingObservation>, PipelineError> {
        let entries = self.provider.rankings().await?;
        info!("Provider returned {} ranking entries", entries.len());
        Ok(entries
            .into_iter()
            .map(|e| RankingObservation {
                player: PlayerObservation {
                    external_id: Some(e.team_id),
                    name: e.team_name,
                    image_url: e.team_hash_image.as_deref().map(image_url),
                    ..Default::default()
                },
                rank: e.rank,
                points: e.points,
            })
            .collect())
    }

    async fn harvest(
        &self,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<TournamentHarvest>, PipelineError> {
        let today = now.date_naive();
        let dates = [today, today + Duration::days(1)];
        let leagues = self.provider.atp_singles_leagues(&dates).await?;
        info!("{} ATP singles leagues in play", leagues.len());

        // The end date is exclusive on the provider side.
        let last_day = until.date_naive() + Duration::days(1);
        let mut out = Vec::new();
        for league in &leagues {
            let matches = match self
                .provider
                .league_matches(league.league_id, today, last_day)
                .await
            {
                Ok(m) => m,
                Err(e) => {
                    warn!("Skipping league {}: {}", league.league_id, e);
                    continue;
                }
            };
            let in_window: Vec<ProviderMatch> =
                matches.into_iter().filter(|m| m.start_time < until).collect();
            out.push(TournamentHarvest {
                tournament: tournament_observation(league),
                matches: self.harvest_matches(&in_window).await,
            });
        }
        Ok(out)
    }

    async fn refresh(
        &self,
        stored: &[Match],
        _now: DateTime<Utc>,
    ) -> Result<Vec<(Match, MatchHarvest)>, PipelineError> {
        let mut by_tournament: BTreeMap<i64, Vec<&Match>> = BTreeMap::new();
        for m in stored.iter().filter(|m| m.source == MatchSource::Provider) {
            by_tournament.entry(m.tournament_id).or_default().push(m);
        }

        let mut out = Vec::new();
        for (tournament_id, matches) in by_tournament {
            let Some(league_id) = self
                .db
                .get_tournament(tournament_id)?
                .and_then(|t| t.external_id)
            else {
                continue;
            };
            let first = matches.iter().map(|m| m.start_time.date_naive()).min();
            let last = matches.iter().map(|m| m.start_time.date_naive()).max();
            let (Some(from), Some(to)) = (first, last) else {
                continue;
            };

            let fresh: HashMap<String, ProviderMatch> = match self
                .provider
                .league_matches(league_id, from, to + Duration::days(1))
                .await
            {
                Ok(list) => list.into_iter().map(|pm| (pm.id.to_string(), pm)).collect(),
                Err(e) => {
                    warn!("Could not re-poll league {}: {}", league_id, e);
                    continue;
                }
            };

            for m in matches {
                let Some(pm) = m.external_id.as_ref().and_then(|ext| fresh.get(ext)) else {
                    continue;
                };
                match self.match_harvest(pm).await {
                    Ok(Some(h)) => out.push((m.clone(), h)),
                    Ok(None) => {}
                    Err(e) => warn!("Could not re-poll match {}: {}", m.id, e),
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::models::Side;
    use crate::provider::testing::StubProvider;
    use crate::provider::Team;
    use crate::reconcile::tests::at;

    pub(crate) fn league(id: i64, name: &str, surface: &str) -> LeagueInfo {
        serde_json::from_value(serde_json::json!({
            "league_id": id,
            "competition_name": name,
            "city_name": "Paris",
            "surface_type": surface,
            "match_type": "singles",
            "category": "ATP 1000"
        }))
        .unwrap()
    }

    pub(crate) fn provider_match(id: i64, league_id: i64, status: &str, start: DateTime<Utc>) -> ProviderMatch {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "name": "Sinner J. - Shelton B.",
            "league_id": league_id,
            "status_type": status,
            "start_time": start,
            "home_team_id": 11,
            "home_team_name": "Jannik Sinner",
            "away_team_id": 12,
            "away_team_name": "Ben Shelton",
            "home_team_score": {"current": 2, "period_1": 6, "period_2": 7},
            "away_team_score": {"current": 0, "period_1": 4, "period_2": 5}
        }))
        .unwrap()
    }

    pub(crate) fn team(id: i64, name: &str) -> Team {
        serde_json::from_value(serde_json::json!({"id": id, "name": name, "type": 1})).unwrap()
    }

    #[tokio::test]
    async fn unknown_players_are_fetched_through_teams() {
        let mut stub = StubProvider::default();
        stub.leagues = vec![league(900, "Paris", "Hardcourt indoor")];
        stub.matches
            .insert(900, vec![provider_match(5001, 900, "finished", at(13))]);
        stub.teams.insert(11, team(11, "Jannik Sinner"));
        stub.teams.insert(12, team(12, "Ben Shelton"));

        let feed = ProviderFeed::new(Database::open_in_memory().unwrap(), Arc::new(stub));
        let harvest = feed.harvest(at(9), at(9) + Duration::days(2)).await.unwrap();

        assert_eq!(harvest.len(), 1);
        assert_eq!(harvest[0].tournament.external_id, Some(900));
        assert_eq!(harvest[0].tournament.surface, Some(Surface::Hard));
        let m = &harvest[0].matches[0];
        assert_eq!(m.status, MatchStatus::Completed);
        assert_eq!(m.winner, Some(Side::Home));
        assert_eq!(m.score.as_deref(), Some("2:0"));
        assert_eq!(m.home.external_id, Some(11));
    }

    #[tokio::test]
    async fn match_with_unidentifiable_player_is_skipped() {
        let mut stub = StubProvider::default();
        stub.leagues = vec![league(900, "Paris", "hard")];
        stub.matches
            .insert(900, vec![provider_match(5002, 900, "notstarted", at(13))]);
        stub.teams.insert(11, team(11, "Jannik Sinner"));

        let feed = ProviderFeed::new(Database::open_in_memory().unwrap(), Arc::new(stub));
        let harvest = feed.harvest(at(9), at(9) + Duration::days(2)).await.unwrap();
        assert!(harvest[0].matches.is_empty());
    }

    #[tokio::test]
    async fn unreachable_provider_fails_the_feed() {
        let stub = StubProvider {
            fail: true,
            ..Default::default()
        };
        let feed = ProviderFeed::new(Database::open_in_memory().unwrap(), Arc::new(stub));
        assert!(feed.harvest(at(9), at(10)).await.is_err());
        assert!(feed.rankings().await.is_err());
    }
}
