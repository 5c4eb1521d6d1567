use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::FeatureVector;
use crate::db::models::PredictionTier;
use crate::error::{FetchError, PipelineError};
use crate::fetch::RetryPolicy;

/// Raw scoring-service response.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct WinProbabilities {
    pub player1_win_probability: f64,
    pub player2_win_probability: f64,
}

impl WinProbabilities {
    /// Rescale to a pair summing to exactly 1.0. Rejects non-finite or
    /// negative values and a zero total.
    pub fn normalized(self) -> Result<(f64, f64), PipelineError> {
        let (p1, p2) = (self.player1_win_probability, self.player2_win_probability);
        let total = p1 + p2;
        if !p1.is_finite() || !p2.is_finite() || p1 < 0.0 || p2 < 0.0 || total <= 0.0 {
            return Err(PipelineError::InvalidProbabilities(p1, p2));
        }
        let home = p1 / total;
        Ok((home, 1.0 - home))
    }
}

/// The opaque model: feature vector in, two win probabilities out.
#[async_trait]
pub trait ScoringService: Send + Sync {
    async fn score(&self, features: &FeatureVector) -> Result<WinProbabilities, FetchError>;
}

fn endpoint(tier: PredictionTier) -> &'static str {
    match tier {
        PredictionTier::Full => "/predict",
        PredictionTier::OddsOnly => "/predict/odds-only",
        PredictionTier::RankOnly => "/predict/rank-only",
    }
}

pub struct HttpScoringClient {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpScoringClient {
    pub fn new(base_url: &str, retry: RetryPolicy) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(HttpScoringClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    async fn post_once(&self, url: &str, features: &FeatureVector) -> Result<WinProbabilities, FetchError> {
        let resp = self
            .http
            .post(url)
            .json(features)
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
}

#[async_trait]
impl ScoringService for HttpScoringClient {
    async fn score(&self, features: &FeatureVector) -> Result<WinProbabilities, FetchError> {
        let url = format!("{}{}", self.base_url, endpoint(features.tier()));
        debug!("Scoring via {}: {:?}", url, features);
        self.retry
            .run("scoring", || self.post_once(&url, features), FetchError::is_transient)
            .await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn probs(p1: f64, p2: f64) -> WinProbabilities {
        WinProbabilities {
            player1_win_probability: p1,
            player2_win_probability: p2,
        }
    }

    #[test]
    fn normalizes_to_unit_sum() {
        let (home, away) = probs(0.7, 0.4).normalized().unwrap();
        assert_relative_eq!(home + away, 1.0, epsilon = 1e-12);
        assert_relative_eq!(home, 0.7 / 1.1, epsilon = 1e-12);
    }

    #[test]
    fn rejects_unusable_pairs() {
        assert!(probs(f64::NAN, 0.5).normalized().is_err());
        assert!(probs(0.0, 0.0).normalized().is_err());
        assert!(probs(-0.2, 1.2).normalized().is_err());
    }

    #[test]
    fn endpoints_per_tier() {
        assert_eq!(endpoint(PredictionTier::Full), "/predict");
        assert_eq!(endpoint(PredictionTier::OddsOnly), "/predict/odds-only");
        assert_eq!(endpoint(PredictionTier::RankOnly), "/predict/rank-only");
    }

    #[test]
    fn response_shape() {
        let p: WinProbabilities = serde_json::from_str(
            r#"{"player1_win_probability": 0.61, "player2_win_probability": 0.39, "model": "xgb"}"#,
        )
        .unwrap();
        assert_relative_eq!(p.player1_win_probability, 0.61);
    }
}
