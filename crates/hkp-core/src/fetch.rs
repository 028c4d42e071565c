use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::warn;

use crate::{config::Config, sentence::Category, sentence::Sentence, Result};

/// Port for the remote sentence API.
///
/// Implementations perform exactly one attempt and report network-level
/// failures as `Error::TransientFetch` and undecodable payloads as
/// `Error::MalformedResponse`. Retrying is the caller's business.
#[async_trait]
pub trait SentenceSource: Send + Sync {
    async fn fetch(&self, category: Option<Category>) -> Result<Sentence>;
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_attempts: cfg.fetch_max_attempts.max(1),
            delay: cfg.fetch_retry_delay,
        }
    }
}

/// Fetch one sentence, retrying transient failures with a fixed backoff.
pub async fn fetch_with_retry(
    source: &dyn SentenceSource,
    category: Option<Category>,
    policy: RetryPolicy,
) -> Result<Sentence> {
    let max = policy.max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match source.fetch(category).await {
            Ok(s) => return Ok(s),
            Err(e) if e.is_retryable() && attempt < max => {
                warn!(attempt, max, "sentence fetch failed, retrying: {e}");
                attempt += 1;
                sleep(policy.delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::errors::Error;

    /// Replays scripted results, then falls back to fresh sentences.
    #[derive(Default)]
    pub(crate) struct ScriptedSource {
        script: Mutex<VecDeque<Result<Sentence>>>,
        next_id: AtomicU64,
        calls: AtomicUsize,
        fail_category: Option<Category>,
    }

    impl ScriptedSource {
        pub(crate) fn new(script: Vec<Result<Sentence>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                next_id: AtomicU64::new(1000),
                ..Default::default()
            }
        }

        pub(crate) fn failing_for(category: Category) -> Self {
            Self {
                next_id: AtomicU64::new(1000),
                fail_category: Some(category),
                ..Default::default()
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SentenceSource for ScriptedSource {
        async fn fetch(&self, category: Option<Category>) -> Result<Sentence> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(next) = self.script.lock().unwrap().pop_front() {
                return next;
            }
            if category.is_some() && category == self.fail_category {
                return Err(Error::TransientFetch("connection refused".to_string()));
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(crate::sentence::sample(
                id,
                category.unwrap_or(Category::Other),
            ))
        }
    }
}
