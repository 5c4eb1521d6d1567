use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::{Feed, MatchHarvest, TournamentHarvest};
use crate::db::models::{Match, MatchSource, MatchStatus};
use crate::db::Database;
use crate::error::{FetchError, PipelineError};
use crate::extract::{
    extract_match_detail, extract_match_list, extract_rankings_page, extract_tournament_detail,
    extract_tournament_list, match_detail_url, MatchDetail, PlayerInfo, TournamentLink,
};
use crate::fetch::{DocumentFetcher, Pacer, RetryPolicy};
use crate::reconcile::{PlayerObservation, RankingObservation, TournamentObservation};
use crate::time::source_today;

const TOURNAMENT_LIST_PATH: &str = "/next/?type=atp-single";

fn ranking_page_path(page: u32) -> String {
    format!("/ranking/atp-men/?sort=rank&page={page}")
}

/// Feed backed by the scraped tennis site. Every request goes through the
/// pacer, so a full pass is slow by construction.
pub struct ScrapeFeed {
    db: Database,
    fetcher: Arc<dyn DocumentFetcher>,
    base_url: Url,
    pacer: Pacer,
    retry: RetryPolicy,
    ranking_page_limit: u32,
}

impl ScrapeFeed {
    pub fn new(
        db: Database,
        fetcher: Arc<dyn DocumentFetcher>,
        base_url: Url,
        pacer: Pacer,
        retry: RetryPolicy,
        ranking_page_limit: u32,
    ) -> Self {
        ScrapeFeed {
            db,
            fetcher,
            base_url,
            pacer,
            retry,
            ranking_page_limit,
        }
    }

    fn page_url(&self, path: &str) -> String {
        crate::extract::absolutize(&self.base_url, path).unwrap_or_else(|| {
            format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
        })
    }

    async fn get(&self, url: &str) -> Result<String, FetchError> {
        self.pacer.pause().await;
        self.retry
            .run("document fetch", || self.fetcher.fetch(url), FetchError::is_transient)
            .await
    }

    async fn match_harvest(
        &self,
        id: &str,
        name: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<MatchHarvest, PipelineError> {
        let html = self.get(&match_detail_url(&self.base_url, id)).await?;
        let detail = extract_match_detail(&html, &self.base_url, now)?;
        Ok(harvest_from_detail(id, name, detail, now))
    }

    async fn tournament_harvest(
        &self,
        link: &TournamentLink,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<TournamentHarvest, PipelineError> {
        let html = self.get(&link.url).await?;
        let detail = extract_tournament_detail(&html)?;
        let listing = extract_match_list(&html, &self.base_url)?;
        debug!(
            "{}: {} upcoming, {} results listed",
            detail.name,
            listing.upcoming.len(),
            listing.completed_ids.len()
        );

        let mut matches = Vec::new();
        for link in &listing.upcoming {
            match self.match_harvest(&link.id, Some(link.name.clone()), now).await {
                Ok(h) if h.start_time < until => matches.push(h),
                Ok(h) => debug!("Match {} starts after the window ({})", h.external_id, h.start_time),
                Err(e) => warn!("Skipping match {}: {}", link.id, e),
            }
        }

        // A tournament with nothing scheduled and no result since yesterday
        // is over; its stored matches are settled by the fine sweep.
        let finished = listing.upcoming.is_empty()
            && detail
                .latest_match_date
                .is_some_and(|d| d < source_today(now) - Duration::days(1));
        if finished {
            debug!("{} has finished, not scanning results", detail.name);
        }

        // Results are only worth a request when they settle a stored match.
        for id in listing.completed_ids.iter().filter(|_| !finished) {
            let Some(stored) = self.db.get_match_by_external(MatchSource::Scrape, id)? else {
                continue;
            };
            if stored.status == MatchStatus::Completed {
                continue;
            }
            match self.match_harvest(id, stored.name.clone(), now).await {
                Ok(h) => matches.push(h),
                Err(e) => warn!("Skipping result {}: {}", id, e),
            }
        }

        let surface = detail
            .surface
            .or_else(|| matches.iter().find_map(|m| m.surface));
        Ok(TournamentHarvest {
            tournament: TournamentObservation {
                name: detail.name,
                surface,
                source_url: Some(link.url.clone()),
                ..Default::default()
            },
            matches,
        })
    }
}

fn player_observation(info: PlayerInfo) -> PlayerObservation {
    PlayerObservation {
        external_id: None,
        name: info.name,
        image_url: info.image_url,
        height_cm: info.height_cm,
        weight_kg: info.weight_kg,
        plays: info.plays,
        birth_date: info.birth_date,
    }
}

fn harvest_from_detail(
    id: &str,
    name: Option<String>,
    detail: MatchDetail,
    now: DateTime<Utc>,
) -> MatchHarvest {
    let status = detail.status(now);
    let surface = detail.surface();
    let winner = detail.winner();
    MatchHarvest {
        external_id: id.to_string(),
        name: name.or(detail.title),
        start_time: detail.start_time,
        surface,
        status,
        home: player_observation(detail.home),
        away: player_observation(detail.away),
        score: detail.final_score.map(|s| s.to_string()),
        winner,
        odds: detail.average_odds,
    }
}

#[async_trait]
impl Feed for ScrapeFeed {
    fn name(&self) -> &str {
        "scrape"
    }

    fn source(&self) -> MatchSource {
        MatchSource::Scrape
    }

    /// Walks ranking pages until an empty one. Any failing page aborts the
    /// snapshot: a partial ranking would unrank everyone on the missing pages.
    async fn rankings(&self) -> Result<Vec<RankingObservation>, PipelineError> {
        let mut entries = Vec::new();
        for page in 1..=self.ranking_page_limit {
            let html = self.get(&self.page_url(&ranking_page_path(page))).await?;
            let rows = extract_rankings_page(&html)?;
            if rows.is_empty() {
                debug!("Ranking page {} is empty, stopping", page);
                break;
            }
            entries.extend(rows.into_iter().map(|row| RankingObservation {
                player: PlayerObservation {
                    name: row.name,
                    ..Default::default()
                },
                rank: row.rank,
                points: row.points,
            }));
        }
        info!("Scraped {} ranking entries", entries.len());
        Ok(entries)
    }

    async fn harvest(
        &self,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<TournamentHarvest>, PipelineError> {
        let html = self.get(&self.page_url(TOURNAMENT_LIST_PATH)).await?;
        let links = extract_tournament_list(&html, &self.base_url)?;
        info!("{} main-tour tournaments this week", links.len());

        let mut out = Vec::new();
        for link in &links {
            match self.tournament_harvest(link, now, until).await {
                Ok(t) => out.push(t),
                Err(e) => warn!("Skipping tournament {} ({}): {}", link.name, link.url, e),
            }
        }
        Ok(out)
    }

    async fn refresh(
        &self,
        stored: &[Match],
        now: DateTime<Utc>,
    ) -> Result<Vec<(Match, MatchHarvest)>, PipelineError> {
        let mut out = Vec::new();
        for m in stored.iter().filter(|m| m.source == MatchSource::Scrape) {
            let Some(external) = m.external_id.as_deref() else {
                continue;
            };
            match self.match_harvest(external, m.name.clone(), now).await {
                Ok(h) => out.push((m.clone(), h)),
                Err(e) => warn!("Could not re-poll match {} ({}): {}", m.id, external, e),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::models::{OddsPair, Side, Surface};
    use crate::fetch::testing::FixtureFetcher;
    use crate::reconcile::tests::at;

    pub(crate) const BASE: &str = "https://www.tennisexplorer.com";

    pub(crate) const EMPTY_RANKING: &str = r#"<html><body><table class="result"><tbody>
        <tr class="head"><th>Rank</th><th>Move</th><th>Player name</th><th>Country</th><th>Points</th></tr>
        </tbody></table></body></html>"#;

    /// The tennis site as served on 2025-10-29: one tournament page that
    /// loads, one that does not, and one match detail page.
    pub(crate) fn site() -> FixtureFetcher {
        FixtureFetcher::default()
            .with_page(
                "https://www.tennisexplorer.com/next/?type=atp-single",
                include_str!("../extract/fixtures/tournament_list.html"),
            )
            .with_page(
                "https://www.tennisexplorer.com/paris/2025/atp-men/",
                include_str!("fixtures/tournament_page.html"),
            )
            .with_page(
                "https://www.tennisexplorer.com/match-detail/?id=3099201",
                include_str!("../extract/fixtures/match_detail_upcoming.html"),
            )
            .with_page(
                "https://www.tennisexplorer.com/ranking/atp-men/?sort=rank&page=1",
                include_str!("../extract/fixtures/rankings_page.html"),
            )
            .with_page(
                "https://www.tennisexplorer.com/ranking/atp-men/?sort=rank&page=2",
                EMPTY_RANKING,
            )
    }

    pub(crate) fn feed(db: Database, fetcher: FixtureFetcher) -> ScrapeFeed {
        ScrapeFeed::new(
            db,
            Arc::new(fetcher),
            Url::parse(BASE).unwrap(),
            Pacer::none(),
            RetryPolicy::none(),
            20,
        )
    }

    #[tokio::test]
    async fn rankings_stop_at_first_empty_page() {
        let fetcher = Arc::new(site());
        let feed = ScrapeFeed::new(
            Database::open_in_memory().unwrap(),
            fetcher.clone(),
            Url::parse(BASE).unwrap(),
            Pacer::none(),
            RetryPolicy::none(),
            20,
        );
        let entries = feed.rankings().await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].player.name, "Sinner Jannik");
        assert_eq!((entries[0].rank, entries[0].points), (1, 11500));

        let requested = fetcher.requests.lock().unwrap().clone();
        assert_eq!(requested.len(), 2);
    }

    #[tokio::test]
    async fn failing_ranking_page_fails_the_snapshot() {
        let fetcher = FixtureFetcher::default().with_page(
            "https://www.tennisexplorer.com/ranking/atp-men/?sort=rank&page=1",
            include_str!("../extract/fixtures/rankings_page.html"),
        );
        let feed = feed(Database::open_in_memory().unwrap(), fetcher);
        assert!(feed.rankings().await.is_err());
    }

    #[tokio::test]
    async fn harvest_skips_broken_tournaments_and_matches() {
        let feed = feed(Database::open_in_memory().unwrap(), site());
        let now = at(9);
        let harvest = feed.harvest(now, now + chrono::Duration::days(2)).await.unwrap();

        assert_eq!(harvest.len(), 1);
        let paris = &harvest[0];
        assert_eq!(paris.tournament.name, "Paris Masters");
        assert_eq!(paris.tournament.surface, Some(Surface::Hard));

        // 3099202 has no detail page; 3099150 is not stored, so not fetched.
        assert_eq!(paris.matches.len(), 1);
        let m = &paris.matches[0];
        assert_eq!(m.external_id, "3099201");
        assert_eq!(m.name.as_deref(), Some("Sinner J. - Shelton B."));
        assert_eq!(m.status, MatchStatus::Scheduled);
        assert_eq!(m.home.name, "Sinner Jannik");
        assert_eq!(m.away.height_cm, Some(193));
        assert_eq!(m.odds, Some(OddsPair { home: 1.35, away: 3.27 }));
    }

    #[tokio::test]
    async fn finished_tournament_results_are_not_scanned() {
        use crate::reconcile::tests::{scheduled, seeded};
        use crate::reconcile::MatchObservation;

        let (rec, db, t, a, b) = seeded();
        rec.upsert_match(
            &MatchObservation {
                external_id: Some("3099150".into()),
                ..scheduled(t, a, b)
            },
            at(8),
        )
        .unwrap();

        let page = r#"<html><body><div id="center">
            <h1>Paris Masters 2025 (France)</h1><p>indoors hard</p>
            <h2>Results</h2><table class="result"><tbody>
            <tr><td class="date">20.10.</td><td><a href="/match-detail/?id=3099150">info</a></td></tr>
            </tbody></table></div></body></html>"#;
        let fetcher = Arc::new(
            FixtureFetcher::default().with_page("https://www.tennisexplorer.com/paris/2025/atp-men/", page),
        );
        let feed = ScrapeFeed::new(
            db,
            fetcher.clone(),
            Url::parse(BASE).unwrap(),
            Pacer::none(),
            RetryPolicy::none(),
            20,
        );
        let link = TournamentLink {
            name: "Paris".into(),
            url: "https://www.tennisexplorer.com/paris/2025/atp-men/".into(),
        };
        let harvest = feed
            .tournament_harvest(&link, at(9), at(9) + Duration::days(2))
            .await
            .unwrap();

        assert!(harvest.matches.is_empty());
        assert_eq!(fetcher.requests.lock().unwrap().len(), 1);
    }

    #[test]
    fn completed_detail_carries_winner() {
        let base = Url::parse(BASE).unwrap();
        let detail = extract_match_detail(
            include_str!("../extract/fixtures/match_detail_completed.html"),
            &base,
            at(9),
        )
        .unwrap();
        let h = harvest_from_detail("3099150", None, detail, at(9));
        assert_eq!(h.status, MatchStatus::Completed);
        assert_eq!(h.score.as_deref(), Some("2:1"));
        assert_eq!(h.winner, Some(Side::Home));
        assert_eq!(h.surface, Some(Surface::Hard));
    }
}
