//! Request orchestration and component lifecycle.
//!
//! [`HitokotoService`] owns one instance of each stateful component and is
//! handed to the dispatch layer explicitly. Locks are never held across a
//! remote fetch.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    access::AccessPolicy,
    cache::{CacheStats, SentenceCache, TypeBucketCache, WarmupReport},
    config::Config,
    domain::Caller,
    favorites::{DeleteOutcome, FavoritePage, FavoriteRecord, FavoriteSettings, FavoriteStore},
    fetch::{fetch_with_retry, RetryPolicy, SentenceSource},
    persist::JsonFileStore,
    rate_limit::RateLimiter,
    sentence::{Category, Sentence},
    tasks::BackgroundTasks,
    Result,
};

#[derive(Clone, Debug)]
pub struct Served {
    pub sentence: Sentence,
    pub from_cache: bool,
}

#[derive(Clone, Debug)]
pub struct ServiceStats {
    pub cache: CacheStats,
    pub cached_sentences: usize,
    pub rate_windows: usize,
}

pub struct HitokotoService {
    cfg: Arc<Config>,
    source: Arc<dyn SentenceSource>,
    access: AccessPolicy,
    retry: RetryPolicy,
    cache: Arc<SentenceCache>,
    cache_store: JsonFileStore,
    limiter: Arc<Mutex<RateLimiter>>,
    favorites: Arc<Mutex<FavoriteStore>>,
    tasks: Mutex<BackgroundTasks>,
}

impl HitokotoService {
    pub fn new(cfg: Arc<Config>, source: Arc<dyn SentenceSource>) -> Self {
        let favorites = FavoriteStore::new(
            FavoriteSettings::from_config(&cfg),
            JsonFileStore::new(cfg.favorites_file()),
        );
        Self {
            access: AccessPolicy::from_config(&cfg),
            retry: RetryPolicy::from_config(&cfg),
            cache: Arc::new(SentenceCache::new(TypeBucketCache::from_config(&cfg))),
            cache_store: JsonFileStore::new(cfg.cache_file()),
            limiter: Arc::new(Mutex::new(RateLimiter::new())),
            favorites: Arc::new(Mutex::new(favorites)),
            tasks: Mutex::new(BackgroundTasks::new()),
            source,
            cfg,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Restore persisted state and start background tasks.
    pub async fn start(&self) -> Result<()> {
        if self.cfg.cache_enabled {
            self.cache.load(&self.cache_store).await;
        }
        self.favorites.lock().await.load();

        let mut tasks = self.tasks.lock().await;

        if self.cfg.cache_enabled {
            let cache = self.cache.clone();
            tasks.spawn_periodic("cache-cleanup", self.cfg.cache_cleanup_interval, 0, move || {
                let cache = cache.clone();
                async move {
                    let removed = cache.cleanup().await;
                    if removed > 0 {
                        info!(removed, "expired sentences swept from cache");
                    }
                    Ok(())
                }
            });

            if self.cfg.warmup_enabled {
                let cache = self.cache.clone();
                let source = self.source.clone();
                let categories = self.cfg.warmup_categories.clone();
                let retry = self.retry;
                tasks.spawn_once("cache-warmup", async move {
                    match cache.warmup(&*source, &categories, retry).await {
                        Ok(report) => info!(
                            loaded = report.loaded.values().sum::<usize>(),
                            failed = report.failed.len(),
                            "cache warmup finished"
                        ),
                        Err(e) => warn!("cache warmup skipped: {e}"),
                    }
                });
            }
        }

        // A failed write leaves the store dirty for the next tick; it must not
        // end the run, or expired staging entries would stop being purged.
        let favorites = self.favorites.clone();
        tasks.spawn_periodic(
            "favorites-autosave",
            self.cfg.autosave_interval,
            self.cfg.autosave_max_restarts,
            move || {
                let favorites = favorites.clone();
                async move {
                    let mut store = favorites.lock().await;
                    let (staged, pending) = store.purge_expired();
                    if staged + pending > 0 {
                        debug!(staged, pending, "expired staging entries dropped");
                    }
                    if let Err(e) = store.autosave() {
                        warn!("favorites autosave failed, retrying next tick: {e}");
                    }
                    Ok(())
                }
            },
        );

        let limiter = self.limiter.clone();
        let retention = self.cfg.rate_retention;
        tasks.spawn_periodic("rate-purge", self.cfg.rate_purge_interval, 0, move || {
            let limiter = limiter.clone();
            async move {
                limiter.lock().await.purge_stale(retention);
                Ok(())
            }
        });

        info!(tasks = tasks.len(), "hitokoto service started");
        Ok(())
    }

    /// Serve one sentence: access, cooldown, cache, then remote fetch.
    pub async fn serve(&self, caller: &Caller, category: Option<Category>) -> Result<Served> {
        self.access.ensure_allowed(caller)?;

        let cooldown = if caller.group.is_some() {
            self.cfg.group_cooldown
        } else {
            self.cfg.private_cooldown
        };
        self.limiter.lock().await.admit(&caller.scope(), cooldown)?;

        let category = category.or(self.cfg.default_category);

        let cached = if self.cfg.cache_enabled {
            self.cache.get_random(category).await
        } else {
            None
        };

        let served = match cached {
            Some(sentence) => Served {
                sentence,
                from_cache: true,
            },
            None => {
                let sentence = fetch_with_retry(&*self.source, category, self.retry).await?;
                if self.cfg.cache_enabled {
                    self.cache.put(sentence.clone(), category).await;
                }
                Served {
                    sentence,
                    from_cache: false,
                }
            }
        };

        debug!(
            user = %caller.user,
            id = served.sentence.id,
            from_cache = served.from_cache,
            "sentence served"
        );
        self.favorites
            .lock()
            .await
            .set_last_fetched(&caller.user, served.sentence.clone());
        Ok(served)
    }

    pub async fn add_favorite(&self, caller: &Caller) -> Result<FavoriteRecord> {
        self.access.ensure_allowed(caller)?;
        self.favorites.lock().await.add_favorite(&caller.user)
    }

    pub async fn list_favorites(&self, caller: &Caller, page: usize) -> Result<FavoritePage> {
        self.access.ensure_allowed(caller)?;
        self.favorites.lock().await.list_favorites(&caller.user, page)
    }

    pub async fn view_favorite(&self, caller: &Caller, index: usize) -> Result<FavoriteRecord> {
        self.access.ensure_allowed(caller)?;
        self.favorites.lock().await.view_favorite(&caller.user, index)
    }

    pub async fn request_delete(&self, caller: &Caller, index: usize) -> Result<DeleteOutcome> {
        self.access.ensure_allowed(caller)?;
        self.favorites.lock().await.request_delete(&caller.user, index)
    }

    /// Run a warmup now, outside the background task. A no-op when the cache
    /// is disabled.
    pub async fn warmup(&self, categories: &[Category]) -> Result<WarmupReport> {
        if !self.cfg.cache_enabled {
            return Ok(WarmupReport::default());
        }
        self.cache
            .warmup(&*self.source, categories, self.retry)
            .await
    }

    pub async fn stats(&self) -> ServiceStats {
        let (cache, cached_sentences) = self.cache.stats().await;
        ServiceStats {
            cache,
            cached_sentences,
            rate_windows: self.limiter.lock().await.len(),
        }
    }

    /// Stop background tasks, then flush favorites and the cache snapshot.
    ///
    /// Both writes are attempted; the first failure is returned.
    pub async fn shutdown(&self) -> Result<()> {
        let clean = self
            .tasks
            .lock()
            .await
            .shutdown(self.cfg.shutdown_grace)
            .await;
        if !clean {
            warn!("some background tasks were aborted");
        }

        let favorites = self.favorites.lock().await.flush();
        if let Err(e) = &favorites {
            error!("final favorites flush failed: {e}");
        }

        let cache = if self.cfg.cache_enabled {
            self.cache.save(&self.cache_store).await
        } else {
            Ok(())
        };
        if let Err(e) = &cache {
            error!("cache snapshot failed: {e}");
        }

        info!("hitokoto service stopped");
        favorites.and(cache)
    }
}
