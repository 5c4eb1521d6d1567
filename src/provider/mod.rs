pub mod client;
pub mod credentials;
pub mod types;

pub use client::ProviderClient;
pub use credentials::{CallSite, CredentialPool};
pub use types::{LeagueInfo, OddsMarket, ProviderMatch, RankingEntry, Team};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::FetchError;

/// Read access to the structured tennis provider.
#[async_trait]
pub trait ProviderApi: Send + Sync {
    /// ATP singles leagues with play on any of `dates`, deduplicated.
    async fn atp_singles_leagues(&self, dates: &[NaiveDate]) -> Result<Vec<LeagueInfo>, FetchError>;

    /// Matches of one league starting in `[from, to)` (calendar days, UTC).
    async fn league_matches(
        &self,
        league_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ProviderMatch>, FetchError>;

    /// Full current ATP ranking, every page.
    async fn rankings(&self) -> Result<Vec<RankingEntry>, FetchError>;

    /// Pre-match winner odds for one match; empty when none are posted.
    async fn match_odds(&self, match_id: i64) -> Result<Vec<OddsMarket>, FetchError>;

    async fn team(&self, team_id: i64) -> Result<Option<Team>, FetchError>;

    fn name(&self) -> &str;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Canned provider responses; `fail` makes every call error out.
    #[derive(Default)]
    pub struct StubProvider {
        pub leagues: Vec<LeagueInfo>,
        pub matches: HashMap<i64, Vec<ProviderMatch>>,
        pub rankings: Vec<RankingEntry>,
        pub odds: HashMap<i64, Vec<OddsMarket>>,
        pub teams: HashMap<i64, Team>,
        pub fail: bool,
        pub odds_calls: Mutex<Vec<i64>>,
    }

    impl StubProvider {
        fn check(&self) -> Result<(), FetchError> {
            if self.fail {
                Err(FetchError::MalformedBody {
                    url: "stub".into(),
                    reason: "provider down".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ProviderApi for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn atp_singles_leagues(&self, _dates: &[NaiveDate]) -> Result<Vec<LeagueInfo>, FetchError> {
            self.check()?;
            Ok(self.leagues.clone())
        }

        async fn league_matches(
            &self,
            league_id: i64,
            _from: NaiveDate,
            _to: NaiveDate,
        ) -> Result<Vec<ProviderMatch>, FetchError> {
            self.check()?;
            Ok(self.matches.get(&league_id).cloned().unwrap_or_default())
        }

        async fn rankings(&self) -> Result<Vec<RankingEntry>, FetchError> {
            self.check()?;
            Ok(self.rankings.clone())
        }

        async fn match_odds(&self, match_id: i64) -> Result<Vec<OddsMarket>, FetchError> {
            self.check()?;
            if let Ok(mut calls) = self.odds_calls.lock() {
                calls.push(match_id);
            }
            Ok(self.odds.get(&match_id).cloned().unwrap_or_default())
        }

        async fn team(&self, team_id: i64) -> Result<Option<Team>, FetchError> {
            self.check()?;
            Ok(self.teams.get(&team_id).cloned())
        }
    }
}
