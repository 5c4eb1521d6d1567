use anyhow::Context;
use chrono::{Duration, NaiveDate, NaiveTime};
use clap::{Parser, Subcommand, ValueEnum};
use std::time::Duration as StdDuration;
use url::Url;

use crate::fetch::RetryPolicy;
use crate::jobs::PipelineSettings;

/// Tennis match ingestion pipeline
#[derive(Parser, Debug, Clone)]
#[command(name = "matchpoint-pipeline", version, about)]
pub struct Config {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "matchpoint.db", global = true)]
    pub database_path: String,

    /// Read-only API listen address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8080", global = true)]
    pub api_addr: String,

    /// Base URL of the scraped results site
    #[arg(
        long,
        env = "SCRAPE_BASE_URL",
        default_value = "https://www.tennisexplorer.com",
        global = true
    )]
    pub scrape_base_url: String,

    /// Disable the HTML scraping feed
    #[arg(long, env = "SCRAPE_DISABLED", default_value = "false", global = true)]
    pub scrape_disabled: bool,

    /// Base URL of the structured tennis provider
    #[arg(
        long,
        env = "PROVIDER_BASE_URL",
        default_value = "https://tennis.sportdevs.com",
        global = true
    )]
    pub provider_base_url: String,

    /// Comma-separated provider API keys (leagues/matches/rankings, odds,
    /// players). The provider feed is off when unset.
    #[arg(long, env = "PROVIDER_KEYS", value_delimiter = ',', global = true)]
    pub provider_keys: Vec<String>,

    /// Scoring service base URL
    #[arg(long, env = "SCORING_URL", default_value = "http://localhost:8000", global = true)]
    pub scoring_url: String,

    /// Bookmaker whose odds are used for features
    #[arg(long, env = "REFERENCE_BOOKMAKER", default_value = "Bet365", global = true)]
    pub reference_bookmaker: String,

    /// Minimum pause between scraped page requests (ms)
    #[arg(long, env = "PACING_MIN_MS", default_value = "3000", global = true)]
    pub pacing_min_ms: u64,

    /// Maximum pause between scraped page requests (ms)
    #[arg(long, env = "PACING_MAX_MS", default_value = "7000", global = true)]
    pub pacing_max_ms: u64,

    /// Attempts per outbound request
    #[arg(long, env = "RETRY_ATTEMPTS", default_value = "3", global = true)]
    pub retry_attempts: u32,

    /// Delay between request attempts (ms)
    #[arg(long, env = "RETRY_DELAY_MS", default_value = "2000", global = true)]
    pub retry_delay_ms: u64,

    /// Attempts for a whole coarse sweep
    #[arg(long, env = "COARSE_RETRY_ATTEMPTS", default_value = "3", global = true)]
    pub coarse_retry_attempts: u32,

    /// Delay between coarse sweep attempts (s)
    #[arg(long, env = "COARSE_RETRY_DELAY_SECS", default_value = "600", global = true)]
    pub coarse_retry_delay_secs: u64,

    /// Daily coarse sweep time, source-local HH:MM
    #[arg(long, env = "COARSE_AT", default_value = "00:30", global = true)]
    pub coarse_at: String,

    /// Fine sweep interval (minutes)
    #[arg(long, env = "FINE_INTERVAL_MINS", default_value = "60", global = true)]
    pub fine_interval_mins: u64,

    /// Days of upcoming matches the coarse sweep ingests
    #[arg(long, env = "MATCH_LOOKAHEAD_DAYS", default_value = "2", global = true)]
    pub match_lookahead_days: i64,

    /// Odds are requested for matches starting within this many hours
    #[arg(long, env = "ODDS_LOOKAHEAD_HOURS", default_value = "48", global = true)]
    pub odds_lookahead_hours: i64,

    /// Span around now the fine sweep re-polls (hours)
    #[arg(long, env = "LIVE_WINDOW_HOURS", default_value = "10", global = true)]
    pub live_window_hours: i64,

    /// Ranking pages to walk at most
    #[arg(long, env = "RANKING_PAGE_LIMIT", default_value = "20", global = true)]
    pub ranking_page_limit: u32,

    /// Tournaments seen within this many hours get their own accuracy row
    #[arg(long, env = "RECENT_WINDOW_HOURS", default_value = "24", global = true)]
    pub recent_window_hours: i64,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the scheduler and the read-only API (default)
    Serve,
    /// Run one sweep now and exit
    Sweep {
        #[arg(value_enum)]
        kind: SweepKind,
    },
    /// Re-run odds, predictions and accuracy for matches in a date range
    Backfill {
        /// First day, inclusive (YYYY-MM-DD)
        #[arg(long)]
        from: NaiveDate,
        /// Last day, inclusive (YYYY-MM-DD)
        #[arg(long)]
        to: NaiveDate,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepKind {
    Coarse,
    Fine,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pacing_min_ms > self.pacing_max_ms {
            anyhow::bail!("pacing_min_ms must not exceed pacing_max_ms");
        }
        if self.retry_attempts == 0 || self.coarse_retry_attempts == 0 {
            anyhow::bail!("retry attempts must be at least 1");
        }
        if self.match_lookahead_days <= 0 || self.odds_lookahead_hours <= 0 {
            anyhow::bail!("look-ahead windows must be positive");
        }
        if self.live_window_hours <= 0 || self.recent_window_hours <= 0 {
            anyhow::bail!("live and recent windows must be positive");
        }
        if self.fine_interval_mins == 0 {
            anyhow::bail!("fine_interval_mins must be positive");
        }
        if self.ranking_page_limit == 0 {
            anyhow::bail!("ranking_page_limit must be at least 1");
        }
        self.coarse_time()?;
        if self.provider_keys.iter().any(|k| k.trim().is_empty()) {
            anyhow::bail!("PROVIDER_KEYS contains an empty entry");
        }
        if self.scrape_disabled && self.provider_keys.is_empty() {
            anyhow::bail!("No feed configured: enable scraping or set PROVIDER_KEYS");
        }
        if !self.scrape_disabled {
            self.scrape_url()?;
        }
        Url::parse(&self.scoring_url).context("Invalid SCORING_URL")?;
        Ok(())
    }

    pub fn coarse_time(&self) -> anyhow::Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.coarse_at, "%H:%M")
            .with_context(|| format!("COARSE_AT must be HH:MM, got {:?}", self.coarse_at))
    }

    pub fn scrape_url(&self) -> anyhow::Result<Url> {
        Url::parse(&self.scrape_base_url).context("Invalid SCRAPE_BASE_URL")
    }

    pub fn request_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            StdDuration::from_millis(self.retry_delay_ms),
        )
    }

    pub fn pacing(&self) -> (StdDuration, StdDuration) {
        (
            StdDuration::from_millis(self.pacing_min_ms),
            StdDuration::from_millis(self.pacing_max_ms),
        )
    }

    pub fn fine_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.fine_interval_mins * 60)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            match_lookahead: Duration::days(self.match_lookahead_days),
            odds_lookahead: Duration::hours(self.odds_lookahead_hours),
            live_window: Duration::hours(self.live_window_hours),
            recent_window: Duration::hours(self.recent_window_hours),
            coarse_retry: RetryPolicy::new(
                self.coarse_retry_attempts,
                StdDuration::from_secs(self.coarse_retry_delay_secs),
            ),
        }
    }
}
