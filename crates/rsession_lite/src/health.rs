use futures::Stream;
use rand::Rng;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::HealthError;
use crate::lifecycle::{bounded, paced};

/// One health reading of a peer.
#[derive(Clone, PartialEq, prost::Message)]
pub struct HealthSample {
    #[prost(bool, tag = "1")]
    pub healthy: bool,
    /// Milliseconds since the Unix epoch.
    #[prost(uint64, tag = "2")]
    pub timestamp: u64,
}

impl HealthSample {
    pub fn now(healthy: bool) -> Self {
        Self {
            healthy,
            timestamp: now_millis(),
        }
    }
}

/// Milliseconds since the Unix epoch, 0 if the clock is before it.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Produces finite, paced sequences of random health samples.
#[derive(Debug, Clone, Copy)]
pub struct HealthMonitor {
    probability_unhealthy: f64,
    interval: Duration,
    limit: usize,
}

impl HealthMonitor {
    pub const DEFAULT_UNHEALTHY_PROBABILITY: f64 = 0.2;
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_LIMIT: usize = 100;

    pub fn new(probability_unhealthy: f64, interval: Duration, limit: usize) -> Result<Self, HealthError> {
        if !(0.0..=1.0).contains(&probability_unhealthy) {
            return Err(HealthError::InvalidProbability(probability_unhealthy));
        }
        Ok(Self {
            probability_unhealthy,
            interval,
            limit,
        })
    }

    pub fn probability_unhealthy(&self) -> f64 {
        self.probability_unhealthy
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// A fresh sequence: one independent draw per interval, `limit` at most.
    pub fn sample(self) -> impl Stream<Item = HealthSample> + Send + 'static {
        let p = self.probability_unhealthy;
        let draws = futures::stream::repeat_with(move || HealthSample::now(!rand::rng().random_bool(p)));
        paced(bounded(draws, self.limit), self.interval)
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self {
            probability_unhealthy: Self::DEFAULT_UNHEALTHY_PROBABILITY,
            interval: Self::DEFAULT_INTERVAL,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

/// Shorthand for `HealthMonitor::new(..)?.sample()`.
pub fn sample(
    probability_unhealthy: f64,
    interval: Duration,
    limit: usize,
) -> Result<impl Stream<Item = HealthSample> + Send + 'static, HealthError> {
    Ok(HealthMonitor::new(probability_unhealthy, interval, limit)?.sample())
}
