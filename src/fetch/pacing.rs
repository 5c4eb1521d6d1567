use rand::Rng;
use std::time::Duration;
use tracing::debug;

/// Randomized pause between consecutive requests to the scraped source.
/// Hammering it at a fixed cadence gets the fetcher blocked.
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    min: Duration,
    max: Duration,
}

impl Pacer {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Pacer { min, max }
        } else {
            Pacer { min: max, max: min }
        }
    }

    /// No pacing at all.
    #[cfg(test)]
    pub fn none() -> Self {
        Pacer::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn next_delay(&self) -> Duration {
        if self.max.is_zero() || self.min == self.max {
            return self.min;
        }
        let ms = rand::thread_rng().gen_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(ms as u64)
    }

    pub async fn pause(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            debug!("Pacing: sleeping {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }
}
