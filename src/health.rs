//! Bounded health polling for dependent services
//!
//! Repeatedly probes an HTTP endpoint until it answers with a successful
//! status or the deadline elapses. Between attempts an optional liveness
//! probe re-checks that the monitored target still exists; a target that
//! died is a terminal failure immediately, not after the full timeout.

use crate::logpolicy::PROBE_USER_AGENT;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default deadline for a service to become healthy.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default pause between probe attempts.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Per-request timeout; a hung endpoint must not stall the polling loop.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Terminal outcome of a polling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    /// A probe returned a successful status before the deadline.
    Healthy,
    /// The deadline elapsed without a healthy observation.
    Timeout,
    /// The target exited before becoming healthy.
    TargetExited,
}

impl HealthOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthOutcome::Healthy)
    }
}

impl fmt::Display for HealthOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthOutcome::Healthy => write!(f, "healthy"),
            HealthOutcome::Timeout => write!(f, "timed out before becoming healthy"),
            HealthOutcome::TargetExited => write!(f, "target exited before becoming healthy"),
        }
    }
}

type LivenessProbe = Box<dyn Fn() -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync>;

pub struct HealthPoller {
    url: String,
    interval: Duration,
    timeout: Duration,
    liveness: Option<LivenessProbe>,
    client: reqwest::Client,
}

impl HealthPoller {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(format!(
                "{PROBE_USER_AGENT}/{}",
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .expect("reqwest client with static settings");

        Self {
            url: url.into(),
            interval: DEFAULT_INTERVAL,
            timeout,
            liveness: None,
            client,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Re-verify between attempts that the target is still alive. Returning
    /// false terminates polling with [`HealthOutcome::TargetExited`].
    pub fn with_liveness<F, Fut>(mut self, probe: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.liveness = Some(Box::new(move || Box::pin(probe())));
        self
    }

    /// Poll until healthy, the deadline elapses, or the target exits.
    pub async fn wait_healthy(&self) -> HealthOutcome {
        let deadline = Instant::now() + self.timeout;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            if self.probe_once().await {
                debug!(url = %self.url, attempts, "Health check passed");
                return HealthOutcome::Healthy;
            }

            if let Some(liveness) = &self.liveness {
                if !liveness().await {
                    debug!(url = %self.url, attempts, "Target exited during health polling");
                    return HealthOutcome::TargetExited;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(url = %self.url, attempts, "Health check deadline elapsed");
                return HealthOutcome::Timeout;
            }

            // Never sleep past the deadline.
            let pause = self.interval.min(deadline - now);
            tokio::time::sleep(pause).await;
        }
    }

    async fn probe_once(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %self.url, error = %e, "Health probe failed");
                false
            }
        }
    }
}
