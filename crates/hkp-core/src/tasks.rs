//! Background task supervision.
//!
//! Every task shares one [`CancellationToken`]. Periodic tasks wait a full
//! period before their first tick, never interrupt a tick in progress, and
//! are respawned after a failure or panic at most `max_restarts` times.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    task::{JoinHandle, JoinSet},
    time::{interval_at, timeout, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;

#[derive(Default)]
pub struct BackgroundTasks {
    cancel: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Run `tick` every `period` until cancelled.
    ///
    /// A tick that returns `Err` (or panics) ends the current run; the
    /// supervisor starts a fresh one until `max_restarts` is used up.
    pub fn spawn_periodic<F, Fut>(
        &mut self,
        name: &'static str,
        period: Duration,
        max_restarts: u32,
        tick: F,
    ) where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let tick = Arc::new(tick);
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut restarts = 0u32;
            loop {
                // A JoinSet aborts the run if the supervisor itself is aborted.
                let mut run = JoinSet::new();
                run.spawn({
                    let tick = tick.clone();
                    let cancel = cancel.clone();
                    async move { run_periodic(period, &*tick, &cancel).await }
                });

                let failure = match run.join_next().await {
                    Some(Ok(Ok(()))) | None => break,
                    Some(Ok(Err(e))) => e.to_string(),
                    Some(Err(e)) if e.is_panic() => "task panicked".to_string(),
                    Some(Err(_)) => break,
                };

                if cancel.is_cancelled() {
                    break;
                }
                if restarts >= max_restarts {
                    error!(task = name, restarts, "background task failed, giving up: {failure}");
                    break;
                }
                restarts += 1;
                warn!(task = name, restarts, max_restarts, "background task failed, restarting: {failure}");
            }
            debug!(task = name, "background task stopped");
        });

        info!(task = name, period_secs = period.as_secs_f64(), "background task started");
        self.handles.push((name, handle));
    }

    /// Run `fut` once; it is dropped if cancellation lands first.
    pub fn spawn_once<Fut>(&mut self, name: &'static str, fut: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => debug!(task = name, "cancelled before completion"),
                _ = fut => {}
            }
        });
        self.handles.push((name, handle));
    }

    /// Cancel everything and wait up to `grace` for tasks to finish.
    /// Stragglers are aborted. Returns `true` if all finished in time.
    pub async fn shutdown(&mut self, grace: Duration) -> bool {
        self.cancel.cancel();
        let mut handles = std::mem::take(&mut self.handles);

        let joined = timeout(grace, async {
            for (name, h) in handles.iter_mut() {
                if let Err(e) = h.await {
                    if !e.is_cancelled() {
                        warn!(task = *name, "background task ended abnormally: {e}");
                    }
                }
            }
        })
        .await;

        if joined.is_ok() {
            return true;
        }

        for (name, h) in &handles {
            if !h.is_finished() {
                warn!(task = *name, "background task did not stop in time, aborting");
                h.abort();
            }
        }
        false
    }
}

async fn run_periodic<F, Fut>(period: Duration, tick: &F, cancel: &CancellationToken) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => tick().await?,
        }
    }
}
