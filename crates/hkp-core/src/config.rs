use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, sentence::Category, Result};

/// Typed configuration for the hitokoto runtime.
///
/// Values are taken as already validated; zeros are clamped where they would
/// break an invariant (capacity, page size).
#[derive(Clone, Debug)]
pub struct Config {
    // Remote API
    pub api_url: String,
    pub default_category: Option<Category>,
    pub fetch_timeout: Duration,
    pub fetch_max_attempts: u32,
    pub fetch_retry_delay: Duration,

    // Sentence cache
    pub cache_enabled: bool,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    pub cache_cleanup_interval: Duration,
    pub warmup_enabled: bool,
    pub warmup_categories: Vec<Category>,

    // Cooldowns
    pub private_cooldown: Duration,
    pub group_cooldown: Duration,
    pub rate_purge_interval: Duration,
    pub rate_retention: Duration,

    // Favorites
    pub favorites_page_size: usize,
    pub favorite_timeout: Duration,
    pub max_favorites_per_user: usize,
    pub delete_confirm_timeout: Duration,
    pub autosave_interval: Duration,
    pub autosave_max_restarts: u32,

    // Access lists (`platform:id`)
    pub use_whitelist: bool,
    pub user_list: Vec<String>,
    pub group_list: Vec<String>,

    // Lifecycle
    pub data_dir: PathBuf,
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "https://v1.hitokoto.cn".to_string(),
            default_category: None,
            fetch_timeout: Duration::from_secs(10),
            fetch_max_attempts: 3,
            fetch_retry_delay: Duration::from_secs(1),
            cache_enabled: true,
            cache_capacity: 100,
            cache_ttl: Duration::from_secs(3600),
            cache_cleanup_interval: Duration::from_secs(1800),
            warmup_enabled: false,
            warmup_categories: Category::ALL.to_vec(),
            private_cooldown: Duration::from_secs(3),
            group_cooldown: Duration::from_secs(3),
            rate_purge_interval: Duration::from_secs(150),
            rate_retention: Duration::from_secs(250),
            favorites_page_size: 10,
            favorite_timeout: Duration::from_secs(30),
            max_favorites_per_user: 100,
            delete_confirm_timeout: Duration::from_secs(60),
            autosave_interval: Duration::from_secs(300),
            autosave_max_restarts: 3,
            use_whitelist: false,
            user_list: Vec::new(),
            group_list: Vec::new(),
            data_dir: PathBuf::from("./data"),
            shutdown_grace: Duration::from_millis(5000),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let d = Config::default();

        let api_url = env_str("HITOKOTO_API_URL")
            .and_then(non_empty)
            .unwrap_or(d.api_url);
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "HITOKOTO_API_URL must be an http(s) URL, got {api_url}"
            )));
        }

        let default_category = env_str("HITOKOTO_DEFAULT_TYPE")
            .and_then(non_empty)
            .and_then(|s| Category::parse_arg(&s));

        let warmup_categories = parse_csv_categories(env_str("HITOKOTO_WARMUP_TYPES"))
            .unwrap_or(d.warmup_categories);

        Ok(Self {
            api_url,
            default_category,
            fetch_timeout: env_secs("HITOKOTO_FETCH_TIMEOUT").unwrap_or(d.fetch_timeout),
            fetch_max_attempts: env_u32("HITOKOTO_FETCH_MAX_ATTEMPTS")
                .unwrap_or(d.fetch_max_attempts)
                .max(1),
            fetch_retry_delay: env_millis("HITOKOTO_FETCH_RETRY_DELAY_MS")
                .unwrap_or(d.fetch_retry_delay),

            cache_enabled: env_bool("HITOKOTO_CACHE_ENABLED").unwrap_or(d.cache_enabled),
            cache_capacity: env_usize("HITOKOTO_CACHE_SIZE")
                .unwrap_or(d.cache_capacity)
                .max(1),
            cache_ttl: env_secs("HITOKOTO_CACHE_TTL").unwrap_or(d.cache_ttl),
            cache_cleanup_interval: env_secs("HITOKOTO_CACHE_CLEANUP_INTERVAL")
                .unwrap_or(d.cache_cleanup_interval),
            warmup_enabled: env_bool("HITOKOTO_CACHE_WARMUP").unwrap_or(d.warmup_enabled),
            warmup_categories,

            private_cooldown: env_secs("HITOKOTO_CD").unwrap_or(d.private_cooldown),
            group_cooldown: env_secs("HITOKOTO_GROUP_CD").unwrap_or(d.group_cooldown),
            rate_purge_interval: env_secs("HITOKOTO_COOLDOWN_CLEANUP_INTERVAL")
                .unwrap_or(d.rate_purge_interval),
            rate_retention: env_secs("HITOKOTO_USER_RETENTION_TIME").unwrap_or(d.rate_retention),

            favorites_page_size: env_usize("HITOKOTO_FAVORITE_LIST_LIMIT")
                .unwrap_or(d.favorites_page_size)
                .max(1),
            favorite_timeout: env_secs("HITOKOTO_FAVORITE_TIMEOUT").unwrap_or(d.favorite_timeout),
            max_favorites_per_user: env_usize("HITOKOTO_MAX_FAVORITES")
                .unwrap_or(d.max_favorites_per_user),
            delete_confirm_timeout: env_secs("HITOKOTO_DELETE_CONFIRM_TIMEOUT")
                .unwrap_or(d.delete_confirm_timeout),
            autosave_interval: env_secs("HITOKOTO_AUTOSAVE_INTERVAL")
                .unwrap_or(d.autosave_interval),
            autosave_max_restarts: env_u32("HITOKOTO_AUTOSAVE_MAX_RESTARTS")
                .unwrap_or(d.autosave_max_restarts),

            use_whitelist: env_bool("HITOKOTO_USE_WHITELIST").unwrap_or(d.use_whitelist),
            user_list: parse_csv(env_str("HITOKOTO_USER_LIST")),
            group_list: parse_csv(env_str("HITOKOTO_GROUP_LIST")),

            data_dir: env_path("HITOKOTO_DATA_DIR").unwrap_or(d.data_dir),
            shutdown_grace: env_millis("HITOKOTO_SHUTDOWN_GRACE_MS").unwrap_or(d.shutdown_grace),
        })
    }

    pub fn favorites_file(&self) -> PathBuf {
        self.data_dir.join("favorites.json")
    }

    pub fn cache_file(&self) -> PathBuf {
        self.data_dir.join("cache.json")
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_u64(key).map(Duration::from_secs)
}

fn env_millis(key: &str) -> Option<Duration> {
    env_u64(key).map(Duration::from_millis)
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn parse_csv(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn parse_csv_categories(v: Option<String>) -> Option<Vec<Category>> {
    let out = parse_csv(v)
        .iter()
        .filter_map(|s| Category::from_code(s))
        .collect::<Vec<_>>();
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
