//! One-for-one supervision of engine components
//!
//! Each component runs in its own task. When that task panics the
//! supervisor re-creates the component from its factory, with fresh state,
//! after an exponential backoff. Siblings are never touched.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, interval_at};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::SupervisorConfig;

/// Largest backoff exponent (64 × base)
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Shortest period a component timer runs at
pub const MIN_TICK_PERIOD: Duration = Duration::from_millis(1);

/// Delay before restart number `restarts + 1`
pub fn backoff_delay(base: Duration, restarts: u32) -> Duration {
    base.saturating_mul(2u32.pow(restarts.min(MAX_BACKOFF_EXPONENT)))
}

/// Periodic timer for a supervised component
///
/// The first tick fires one period from now. A zero period runs at
/// [`MIN_TICK_PERIOD`] instead of panicking the component on every restart.
pub(crate) fn tick_interval(period: Duration) -> Interval {
    let period = period.max(MIN_TICK_PERIOD);
    interval_at(Instant::now() + period, period)
}

pub struct Supervisor {
    config: SupervisorConfig,
    shutdown_tx: broadcast::Sender<()>,
    restarts: Arc<DashMap<String, u32>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self {
            config,
            shutdown_tx,
            restarts: Arc::new(DashMap::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start a component under supervision
    ///
    /// The factory is called once immediately, so anything it sets up
    /// synchronously (bus subscriptions, mailbox) is live when this returns.
    /// It is called again with a fresh shutdown receiver after every crash.
    pub fn supervise<F, Fut>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(broadcast::Receiver<()>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let first = factory(self.shutdown_tx.subscribe());
        let shutdown_tx = self.shutdown_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let restarts = Arc::clone(&self.restarts);
        let config = self.config.clone();
        let span = info_span!("supervisor", component = %name);

        let task = tokio::spawn(
            async move {
                let mut current = tokio::spawn(first);
                let mut count = 0u32;

                loop {
                    let result = tokio::select! {
                        _ = shutdown_rx.recv() => {
                            let _ = current.await;
                            break;
                        }
                        result = &mut current => result,
                    };

                    match result {
                        Ok(()) => {
                            debug!("Component exited");
                            break;
                        }
                        Err(e) if e.is_panic() => {
                            if count >= config.max_restarts {
                                error!(restarts = count, "Component crashed too often, abandoning");
                                break;
                            }
                            let delay = backoff_delay(config.backoff_base, count);
                            count += 1;
                            restarts.insert(name.clone(), count);
                            error!(
                                restarts = count,
                                backoff_ms = delay.as_millis() as u64,
                                "Component crashed, restarting with fresh state"
                            );

                            tokio::select! {
                                _ = shutdown_rx.recv() => break,
                                _ = tokio::time::sleep(delay) => {}
                            }
                            current = tokio::spawn(factory(shutdown_tx.subscribe()));
                            info!(restarts = count, "Component restarted");
                        }
                        Err(e) => {
                            warn!(error = %e, "Component task cancelled");
                            break;
                        }
                    }
                }
            }
            .instrument(span),
        );

        self.tasks.lock().push(task);
    }

    /// Restarts per component name
    pub fn restart_counts(&self) -> BTreeMap<String, u32> {
        self.restarts
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Signal shutdown and wait for every supervised component
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("supervised", &self.tasks.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::sync::mpsc;

    use super::*;

    #[test]
    fn test_backoff_is_capped() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(800));
        assert_eq!(backoff_delay(base, 6), Duration::from_millis(6400));
        assert_eq!(backoff_delay(base, 40), Duration::from_millis(6400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_ticks_at_floor() {
        let start = Instant::now();
        let mut ticker = tick_interval(Duration::ZERO);
        assert_eq!(ticker.period(), MIN_TICK_PERIOD);
        ticker.tick().await;
        ticker.tick().await;
        assert_eq!(start.elapsed(), MIN_TICK_PERIOD * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_component_restarts_fresh() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let supervisor = Supervisor::new(
            SupervisorConfig {
                max_restarts: 5,
                backoff_base: Duration::from_millis(10),
            },
            shutdown_tx,
        );
        let starts = Arc::new(AtomicU32::new(0));
        let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();

        let counter = starts.clone();
        supervisor.supervise("flaky", move |mut shutdown_rx| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let ready_tx = ready_tx.clone();
            async move {
                let _ = ready_tx.send(n);
                if n < 2 {
                    panic!("boom");
                }
                let _ = shutdown_rx.recv().await;
            }
        });

        assert_eq!(ready_rx.recv().await, Some(0));
        assert_eq!(ready_rx.recv().await, Some(1));
        assert_eq!(ready_rx.recv().await, Some(2));
        assert_eq!(supervisor.restart_counts().get("flaky"), Some(&2));

        supervisor.shutdown().await;
        assert_eq!(starts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_component_abandoned_after_max_restarts() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let supervisor = Supervisor::new(
            SupervisorConfig {
                max_restarts: 2,
                backoff_base: Duration::from_millis(1),
            },
            shutdown_tx,
        );
        let starts = Arc::new(AtomicU32::new(0));
        let counter = starts.clone();
        supervisor.supervise("doomed", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { panic!("always") }
        });

        // The supervising task ends by itself once restarts run out
        supervisor.shutdown().await;
        assert!(starts.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_sibling_unaffected_by_crash() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let supervisor = Supervisor::new(SupervisorConfig::default(), shutdown_tx);
        let (tx, mut rx) = mpsc::unbounded_channel();

        supervisor.supervise("crasher", |_| async { panic!("crash") });
        let steady_tx = tx.clone();
        supervisor.supervise("steady", move |mut shutdown_rx| {
            let steady_tx = steady_tx.clone();
            async move {
                let _ = steady_tx.send("up");
                let _ = shutdown_rx.recv().await;
                let _ = steady_tx.send("down");
            }
        });

        assert_eq!(rx.recv().await, Some("up"));
        supervisor.shutdown().await;
        assert_eq!(rx.recv().await, Some("down"));
        assert!(!supervisor.restart_counts().contains_key("steady"));
    }
}
