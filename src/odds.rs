//! Bookmaker odds for a match, reduced to one canonical pair.
//!
//! Sources return every full-time quote they have; the resolver prefers the
//! configured reference bookmaker and otherwise takes the first quote, since
//! a degraded pair still unlocks the odds-based prediction tiers.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::db::models::{Match, MatchSource, OddsPair};
use crate::db::Database;
use crate::error::PipelineError;
use crate::extract::{extract_match_detail, match_detail_url};
use crate::fetch::{DocumentFetcher, Pacer};
use crate::provider::ProviderApi;

const FULL_TIME: &str = "Full Time";

#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub bookmaker: String,
    pub odds: OddsPair,
}

#[async_trait]
pub trait OddsSource: Send + Sync {
    /// Full-time winner quotes for `m`, in source order. Empty when no lines
    /// are posted yet; that is not an error.
    async fn full_time_quotes(&self, m: &Match) -> Result<Vec<Quote>, PipelineError>;
}

/// Reference bookmaker (case-insensitive) if quoted, else the first quote.
pub fn select_quote(quotes: &[Quote], reference_bookmaker: &str) -> Option<OddsPair> {
    quotes
        .iter()
        .find(|q| q.bookmaker.eq_ignore_ascii_case(reference_bookmaker))
        .or_else(|| quotes.first())
        .map(|q| q.odds)
}

pub struct OddsResolver {
    db: Database,
    reference_bookmaker: String,
    sources: HashMap<&'static str, Arc<dyn OddsSource>>,
}

impl OddsResolver {
    pub fn new(db: Database, reference_bookmaker: &str) -> Self {
        OddsResolver {
            db,
            reference_bookmaker: reference_bookmaker.to_string(),
            sources: HashMap::new(),
        }
    }

    /// Route matches from `source` to `odds`.
    pub fn with_source(mut self, source: MatchSource, odds: Arc<dyn OddsSource>) -> Self {
        self.sources.insert(source.as_str(), odds);
        self
    }

    /// Look up, select and store odds for a stored match.
    pub async fn resolve(&self, match_id: i64) -> Result<Option<OddsPair>, PipelineError> {
        let m = self
            .db
            .get_match(match_id)?
            .ok_or_else(|| PipelineError::DataConflict(format!("match {match_id} not found")))?;
        self.resolve_match(&m).await
    }

    pub async fn resolve_match(&self, m: &Match) -> Result<Option<OddsPair>, PipelineError> {
        let Some(source) = self.sources.get(m.source.as_str()) else {
            debug!("No odds source for {} matches", m.source.as_str());
            return Ok(None);
        };

        let quotes = source.full_time_quotes(m).await?;
        let Some(pair) = select_quote(&quotes, &self.reference_bookmaker) else {
            debug!("Match {}: no odds posted yet", m.id);
            return Ok(None);
        };

        self.db.set_match_odds(m.id, pair.home, pair.away)?;
        info!(
            "Match {}: odds {:.2} / {:.2} ({} quotes)",
            m.id,
            pair.home,
            pair.away,
            quotes.len()
        );
        Ok(Some(pair))
    }
}

/// Odds from the structured provider's match-winner market.
pub struct ProviderOdds {
    provider: Arc<dyn ProviderApi>,
}

impl ProviderOdds {
    pub fn new(provider: Arc<dyn ProviderApi>) -> Self {
        ProviderOdds { provider }
    }
}

#[async_trait]
impl OddsSource for ProviderOdds {
    async fn full_time_quotes(&self, m: &Match) -> Result<Vec<Quote>, PipelineError> {
        let Some(external) = m.external_id.as_deref().and_then(|e| e.parse::<i64>().ok()) else {
            return Ok(Vec::new());
        };
        let markets = self.provider.match_odds(external).await?;
        let full_time = markets
            .into_iter()
            .flat_map(|market| market.periods)
            .find(|period| period.period_type == FULL_TIME);

        Ok(full_time
            .map(|period| {
                period
                    .odds
                    .iter()
                    .filter_map(|o| {
                        Some(Quote {
                            bookmaker: o.bookmaker_name.clone().unwrap_or_default(),
                            odds: o.pair()?,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Odds from the "Average odds" row of a scraped match-detail page.
pub struct ScrapedOdds {
    fetcher: Arc<dyn DocumentFetcher>,
    base_url: Url,
    pacer: Pacer,
}

impl ScrapedOdds {
    pub fn new(fetcher: Arc<dyn DocumentFetcher>, base_url: Url, pacer: Pacer) -> Self {
        ScrapedOdds {
            fetcher,
            base_url,
            pacer,
        }
    }
}

#[async_trait]
impl OddsSource for ScrapedOdds {
    async fn full_time_quotes(&self, m: &Match) -> Result<Vec<Quote>, PipelineError> {
        let Some(external) = m.external_id.as_deref() else {
            return Ok(Vec::new());
        };
        self.pacer.pause().await;
        let html = self
            .fetcher
            .fetch(&match_detail_url(&self.base_url, external))
            .await?;
        let detail = extract_match_detail(&html, &self.base_url, Utc::now())?;
        Ok(detail
            .average_odds
            .map(|odds| Quote {
                bookmaker: "average".into(),
                odds,
            })
            .into_iter()
            .collect())
    }
}
