//! Liveness Probe
//!
//! Decides whether the API looks reachable so the connection manager can
//! reconnect a dropped transport or drop a dead one:
//! - headless: periodic HTTP `HEAD` against the API base URL
//! - browser-like: online / offline signals pushed by the host

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use url::Url;

use crate::config::{ClientSettings, Environment, ExecutionContext};

/// Probe errors
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Invalid probe endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Failed to create HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl From<url::ParseError> for ProbeError {
    fn from(err: url::ParseError) -> Self {
        ProbeError::InvalidEndpoint(err.to_string())
    }
}

pub type ProbeResult<T> = Result<T, ProbeError>;

/// Outcome of one reachability check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    /// API answered normally
    Reachable,
    /// API answered, but not with a success status
    Degraded,
    /// No answer, or a server error
    Unreachable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub endpoint: String,
    pub status: ProbeStatus,
    /// Latency in milliseconds
    pub latency_ms: Option<u64>,
    /// Check timestamp (RFC3339)
    pub checked_at: String,
    pub error: Option<String>,
}

impl ProbeReport {
    pub fn is_reachable(&self) -> bool {
        self.status != ProbeStatus::Unreachable
    }
}

/// Something that can tell whether the API is reachable
#[async_trait]
pub trait Reachability: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// HTTP reachability check against the API base URL
pub struct HttpReachability {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpReachability {
    pub fn new(endpoint: Url, timeout: Duration) -> ProbeResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    pub fn parse(endpoint: &str, timeout: Duration) -> ProbeResult<Self> {
        Self::new(Url::parse(endpoint)?, timeout)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Run one check
    pub async fn check(&self) -> ProbeReport {
        let start = Instant::now();
        let mut report = ProbeReport {
            endpoint: self.endpoint.to_string(),
            status: ProbeStatus::Unreachable,
            latency_ms: None,
            checked_at: chrono::Utc::now().to_rfc3339(),
            error: None,
        };

        match self.client.head(self.endpoint.clone()).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_server_error() {
                    report.error = Some(format!("Server error: {}", status));
                } else {
                    report.latency_ms = Some(start.elapsed().as_millis() as u64);
                    // 405: the endpoint exists but does not take HEAD
                    report.status = if status.is_success() || status.as_u16() == 405 {
                        ProbeStatus::Reachable
                    } else {
                        ProbeStatus::Degraded
                    };
                }
            }
            Err(e) => report.error = Some(e.to_string()),
        }

        debug!(
            "Probe {}: {:?} ({:?}ms)",
            report.endpoint, report.status, report.latency_ms
        );
        report
    }
}

#[async_trait]
impl Reachability for HttpReachability {
    async fn is_reachable(&self) -> bool {
        self.check().await.is_reachable()
    }
}

/// Reachability answer set by hand
#[derive(Debug)]
pub struct StaticReachability {
    reachable: AtomicBool,
}

impl StaticReachability {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
        }
    }

    pub fn set(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl Reachability for StaticReachability {
    async fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// Online / offline signal fed by the host environment
#[derive(Debug, Clone)]
pub struct NetworkSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkSignal {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Report a connectivity change; every call notifies subscribers
    pub fn set_online(&self, online: bool) {
        self.tx.send_replace(online);
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for NetworkSignal {
    fn default() -> Self {
        Self::new(true)
    }
}

/// How liveness is detected
#[derive(Clone)]
pub enum ProbeStrategy {
    /// Ask `check` every `interval`
    Poll {
        check: Arc<dyn Reachability>,
        interval: Duration,
    },
    /// Follow the host's online / offline signal
    Signal(NetworkSignal),
    Disabled,
}

impl ProbeStrategy {
    /// Strategy implied by the execution context; no probe in the test environment
    pub fn for_settings(settings: &ClientSettings) -> ProbeResult<Self> {
        if settings.environment == Environment::Test {
            return Ok(Self::Disabled);
        }
        match settings.context {
            ExecutionContext::Headless => {
                let endpoint = Url::parse(&settings.url)?;
                let check = HttpReachability::new(endpoint, settings.probe_timeout())?;
                Ok(Self::Poll {
                    check: Arc::new(check),
                    interval: settings.probe_interval(),
                })
            }
            ExecutionContext::Browser => Ok(Self::Signal(NetworkSignal::default())),
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }

    /// Start probing; `on_probe` receives each reachability observation
    pub fn spawn<F, Fut>(self, mut on_probe: F) -> Option<JoinHandle<()>>
    where
        F: FnMut(bool) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        match self {
            Self::Disabled => None,
            Self::Poll { check, interval: period } => Some(tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // First tick completes immediately
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let reachable = check.is_reachable().await;
                    on_probe(reachable).await;
                }
            })),
            Self::Signal(signal) => {
                let mut rx = signal.subscribe();
                Some(tokio::spawn(async move {
                    while rx.changed().await.is_ok() {
                        let online = *rx.borrow_and_update();
                        on_probe(online).await;
                    }
                    warn!("Network signal dropped, liveness probe stopped");
                }))
            }
        }
    }
}

impl std::fmt::Debug for ProbeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Poll { interval, .. } => f.debug_struct("Poll").field("interval", interval).finish(),
            Self::Signal(signal) => f.debug_tuple("Signal").field(&signal.is_online()).finish(),
            Self::Disabled => f.write_str("Disabled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_strategy_for_settings() {
        let mut settings = ClientSettings::default();
        assert!(matches!(
            ProbeStrategy::for_settings(&settings).unwrap(),
            ProbeStrategy::Poll { interval, .. } if interval == Duration::from_secs(3)
        ));

        settings.context = ExecutionContext::Browser;
        assert!(matches!(ProbeStrategy::for_settings(&settings).unwrap(), ProbeStrategy::Signal(_)));

        settings.environment = Environment::Test;
        assert!(ProbeStrategy::for_settings(&settings).unwrap().is_disabled());
    }

    #[tokio::test]
    async fn test_signal_forwards_changes() {
        let signal = NetworkSignal::new(true);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let handle = ProbeStrategy::Signal(signal.clone())
            .spawn(move |online| {
                let sink = Arc::clone(&sink);
                async move { sink.lock().push(online) }
            })
            .unwrap();

        signal.set_online(false);
        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.set_online(true);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*seen.lock(), vec![false, true]);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_skips_first_tick() {
        let check = Arc::new(StaticReachability::new(false));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let handle = ProbeStrategy::Poll {
            check: check.clone(),
            interval: Duration::from_secs(3),
        }
        .spawn(move |reachable| {
            let sink = Arc::clone(&sink);
            async move { sink.lock().push(reachable) }
        })
        .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(seen.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(3)).await;
        check.set(true);
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(*seen.lock(), vec![false, true]);
        handle.abort();
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let probe = HttpReachability::parse("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let report = probe.check().await;

        assert_eq!(report.status, ProbeStatus::Unreachable);
        assert!(report.error.is_some());
        assert!(!probe.is_reachable().await);
    }
}
