//! Bounded readiness polling of an HTTP endpoint.

use crate::failures::FailureLog;
use soloist_core::{Error, PollConfig, ProbeResult};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Repeatedly probes a URL until it answers 200, the budget runs out, or the
/// scenario has already failed.
#[derive(Debug, Clone)]
pub struct HealthPoller {
    interval: Duration,
    budget: Duration,
    request_timeout: Duration,
}

impl Default for HealthPoller {
    fn default() -> Self {
        Self::from_config(&PollConfig::default())
    }
}

impl HealthPoller {
    pub fn from_config(config: &PollConfig) -> Self {
        Self {
            interval: config.interval(),
            budget: config.budget(),
            request_timeout: config.request_timeout(),
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// How long [`poll`](Self::poll) keeps trying before giving up.
    pub fn time_budget(&self) -> Duration {
        self.budget
    }

    /// Issues one GET against `url`.
    ///
    /// Every probe builds its own client with idle pooling disabled, so a
    /// connection kept alive from an earlier probe can never answer for a
    /// daemon that has since gone away. Environment proxies are ignored: the
    /// probe must reach the daemon's interception, not a forward proxy.
    pub async fn probe(&self, url: &str) -> ProbeResult {
        let client = match reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .no_proxy()
            .timeout(self.request_timeout)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                return ProbeResult::Unreachable {
                    reason: e.to_string(),
                };
            }
        };

        match client.get(url).send().await {
            Ok(response) => ProbeResult::from_status(response.status().as_u16()),
            Err(e) => ProbeResult::Unreachable {
                reason: e.to_string(),
            },
        }
    }

    /// Polls `url` until it answers 200.
    ///
    /// Returns `false` and records an error in `failures` if the budget is
    /// exhausted or if `failures` already holds an error after a miss.
    /// Transport errors are logged and count as a miss.
    pub async fn poll(&self, url: &str, failures: &FailureLog) -> bool {
        let start = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.probe(url).await {
                ProbeResult::Ready => {
                    info!(url, attempts, "Endpoint is ready");
                    return true;
                }
                ProbeResult::NotReady { status } => {
                    debug!(url, status, attempts, "Endpoint not ready");
                }
                ProbeResult::Unreachable { reason } => {
                    warn!(url, %reason, attempts, "Probe failed");
                }
            }

            if failures.has_failed() {
                failures.record(Error::AbandonedAfterFailure {
                    url: url.to_string(),
                });
                return false;
            }

            tokio::time::sleep(self.interval).await;

            if start.elapsed() > self.budget {
                failures.record(Error::ReadinessTimeout {
                    url: url.to_string(),
                    budget_ms: self.budget.as_millis() as u64,
                });
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_poll_config() {
        let poller = HealthPoller::default();
        assert_eq!(poller.interval, Duration::from_secs(1));
        assert_eq!(poller.budget, Duration::from_secs(30));
        assert_eq!(poller.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn builder_overrides() {
        let poller = HealthPoller::default()
            .interval(Duration::from_millis(10))
            .budget(Duration::from_millis(100))
            .request_timeout(Duration::from_millis(50));
        assert_eq!(poller.interval, Duration::from_millis(10));
        assert_eq!(poller.budget, Duration::from_millis(100));
        assert_eq!(poller.request_timeout, Duration::from_millis(50));
    }

    #[tokio::test]
    async fn probe_of_closed_port_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = HealthPoller::default()
            .probe(&format!("http://{addr}/"))
            .await;
        assert!(matches!(result, ProbeResult::Unreachable { .. }));
    }

    #[tokio::test]
    async fn poll_gives_up_when_already_failed() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let failures = FailureLog::new();
        failures.record(Error::NotRunning);

        let started = Instant::now();
        let ready = HealthPoller::default()
            .poll(&format!("http://{addr}/"), &failures)
            .await;

        assert!(!ready);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(failures.any(|e| matches!(e, Error::AbandonedAfterFailure { .. })));
    }
}
