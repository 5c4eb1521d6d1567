use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::credentials::{CallSite, CredentialPool};
use super::types::{LeagueDay, LeagueInfo, OddsMarket, ProviderMatch, RankingEntry, Team};
use super::ProviderApi;
use crate::error::FetchError;
use crate::fetch::RetryPolicy;

/// Fixed page size of every paginated endpoint.
pub const PAGE_SIZE: usize = 50;

/// Upper bound on pages per listing; a provider that keeps returning full
/// pages past this is misbehaving.
const MAX_PAGES: usize = 400;

type Query = Vec<(&'static str, String)>;

/// Client for the PostgREST-style tennis API (`eq.` / `gte.` / `lt.`
/// filters, `offset` pagination, key in the `Authorization` header).
pub struct ProviderClient {
    http: Client,
    base_url: String,
    credentials: CredentialPool,
    retry: RetryPolicy,
}

impl ProviderClient {
    pub fn new(base_url: &str, credentials: CredentialPool, retry: RetryPolicy) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(ProviderClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            retry,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        site: CallSite,
        path: &str,
        query: &Query,
    ) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        self.retry
            .run(
                path,
                || self.get_json_once(site, &url, query),
                FetchError::is_transient,
            )
            .await
    }

    async fn get_json_once<T: DeserializeOwned>(
        &self,
        site: CallSite,
        url: &str,
        query: &Query,
    ) -> Result<T, FetchError> {
        debug!("Provider GET {} {:?}", url, query);
        let resp = self
            .http
            .get(url)
            .query(query)
            .header("Authorization", self.credentials.for_site(site))
            .send()
            .await
            .map_err(|source| FetchError::Network {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let body = resp.text().await.map_err(|source| FetchError::Network {
            url: url.to_string(),
            source,
        })?;
        serde_json::from_str(&body).map_err(|e| FetchError::MalformedBody {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    async fn get_all<T: DeserializeOwned>(
        &self,
        site: CallSite,
        path: &str,
        query: Query,
    ) -> Result<Vec<T>, FetchError> {
        collect_pages(|offset| {
            let mut q = query.clone();
            q.push(("offset", offset.to_string()));
            async move { self.get_json::<Vec<T>>(site, path, &q).await }
        })
        .await
    }
}

/// Request pages at offsets 0, 50, 100, ... until a page comes back short.
pub(crate) async fn collect_pages<T, F, Fut>(mut fetch_page: F) -> Result<Vec<T>, FetchError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<T>, FetchError>>,
{
    let mut all = Vec::new();
    for page in 0..MAX_PAGES {
        let rows = fetch_page(page * PAGE_SIZE).await?;
        let short = rows.len() < PAGE_SIZE;
        all.extend(rows);
        if short {
            return Ok(all);
        }
    }
    warn!("Pagination stopped after {} full pages", MAX_PAGES);
    Ok(all)
}

#[async_trait]
impl ProviderApi for ProviderClient {
    fn name(&self) -> &str {
        "sportdevs"
    }

    async fn atp_singles_leagues(&self, dates: &[NaiveDate]) -> Result<Vec<LeagueInfo>, FetchError> {
        let mut league_ids: Vec<i64> = Vec::new();
        for date in dates {
            let days: Vec<LeagueDay> = self
                .get_json(
                    CallSite::Leagues,
                    "/leagues-by-date",
                    &vec![("date", format!("eq.{date}"))],
                )
                .await?;
            let atp = days
                .into_iter()
                .flat_map(|d| d.leagues)
                .filter(|l| l.class_name.as_deref() == Some("ATP"))
                .map(|l| l.league_id);
            for id in atp {
                if !league_ids.contains(&id) {
                    league_ids.push(id);
                }
            }
        }

        let mut leagues = Vec::new();
        for id in league_ids {
            let info: Vec<LeagueInfo> = self
                .get_json(
                    CallSite::Leagues,
                    "/leagues-info",
                    &vec![("league_id", format!("eq.{id}"))],
                )
                .await?;
            match info.into_iter().next() {
                Some(league) if league.is_singles() => leagues.push(league),
                Some(_) => debug!("League {} is not singles, skipping", id),
                None => warn!("League {} has no info row", id),
            }
        }
        Ok(leagues)
    }

    async fn league_matches(
        &self,
        league_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ProviderMatch>, FetchError> {
        self.get_all(
            CallSite::Matches,
            "/matches",
            vec![
                ("start_time", format!("gte.{from}")),
                ("start_time", format!("lt.{to}")),
                ("league_id", format!("eq.{league_id}")),
            ],
        )
        .await
    }

    async fn rankings(&self) -> Result<Vec<RankingEntry>, FetchError> {
        self.get_all(
            CallSite::Rankings,
            "/rankings",
            vec![("type", "eq.atp".into()), ("class", "eq.now".into())],
        )
        .await
    }

    async fn match_odds(&self, match_id: i64) -> Result<Vec<OddsMarket>, FetchError> {
        self.get_json(
            CallSite::Odds,
            "/odds/match-winner",
            &vec![
                ("match_id", format!("eq.{match_id}")),
                ("is_live", "eq.false".into()),
            ],
        )
        .await
    }

    async fn team(&self, team_id: i64) -> Result<Option<Team>, FetchError> {
        let rows: Vec<Team> = self
            .get_json(
                CallSite::Players,
                "/teams",
                &vec![("id", format!("eq.{team_id}"))],
            )
            .await?;
        Ok(rows.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn pagination_stops_on_short_page() {
        let offsets = Mutex::new(Vec::new());
        let rows = collect_pages(|offset| {
            offsets.lock().unwrap().push(offset);
            let n = if offset < 100 { PAGE_SIZE } else { 7 };
            async move { Ok::<_, FetchError>(vec![0u8; n]) }
        })
        .await
        .unwrap();
        assert_eq!(rows.len(), 2 * PAGE_SIZE + 7);
        assert_eq!(*offsets.lock().unwrap(), vec![0, 50, 100]);
    }

    #[tokio::test]
    async fn empty_first_page_is_empty_result() {
        let rows = collect_pages(|_| async { Ok::<Vec<u8>, FetchError>(Vec::new()) })
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn page_error_propagates() {
        let res = collect_pages(|offset| async move {
            if offset == 0 {
                Ok(vec![1u8; PAGE_SIZE])
            } else {
                Err(FetchError::MalformedBody {
                    url: "u".into(),
                    reason: "bad".into(),
                })
            }
        })
        .await;
        assert!(res.is_err());
    }
}
