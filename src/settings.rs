use serde::Serialize;

use crate::{
    collection_pool::DEFAULT_MAX_CACHED_READERS,
    config_db::ConfigDb,
    error::{Error, Result},
    queue::QueueLimits,
};

/// Tunables of the task manager, read from the `settings` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerSettings {
    pub readonly_workers: usize,
    pub processing_workers: usize,
    pub search_queue: QueueLimits,
    pub info_queue: QueueLimits,
    pub status_queue: QueueLimits,
    pub processing_queue: QueueLimits,
    pub indexing_queue: QueueLimits,
    pub max_cached_readers: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            readonly_workers: 4,
            processing_workers: 4,
            search_queue: QueueLimits::new(1000, 800),
            info_queue: QueueLimits::new(100, 80),
            status_queue: QueueLimits::new(100, 80),
            processing_queue: QueueLimits::new(1000, 500),
            indexing_queue: QueueLimits::new(1000, 500),
            max_cached_readers: DEFAULT_MAX_CACHED_READERS,
        }
    }
}

/// Every recognised settings key.
pub const KEYS: &[&str] = &[
    "readonly_workers",
    "processing_workers",
    "search_queue_max",
    "search_queue_throttle",
    "info_queue_max",
    "info_queue_throttle",
    "status_queue_max",
    "status_queue_throttle",
    "processing_queue_max",
    "processing_queue_throttle",
    "indexing_queue_max",
    "indexing_queue_throttle",
    "max_cached_readers",
];

fn parse_count(key: &str, value: &str) -> Result<usize> {
    value.trim().parse::<usize>().map_err(|_| {
        Error::Config(format!("setting {key:?} must be a non-negative integer, got {value:?}"))
    })
}

impl ServerSettings {
    /// Read settings, falling back to defaults for missing keys.
    pub fn load(db: &ConfigDb) -> Result<Self> {
        let defaults = Self::default();
        let count = |key: &str, default: usize| -> Result<usize> {
            match db.get_setting(key)? {
                Some(value) => parse_count(key, &value),
                None => Ok(default),
            }
        };
        let limits = |prefix: &str, default: QueueLimits| -> Result<QueueLimits> {
            let max_depth = count(&format!("{prefix}_max"), default.max_depth)?;
            let throttle_at =
                count(&format!("{prefix}_throttle"), default.throttle_at)?;
            if throttle_at >= max_depth {
                return Err(Error::Config(format!(
                    "{prefix} throttle threshold {throttle_at} must be below its max depth {max_depth}"
                )));
            }
            Ok(QueueLimits::new(max_depth, throttle_at))
        };

        let settings = Self {
            readonly_workers: count("readonly_workers", defaults.readonly_workers)?,
            processing_workers: count(
                "processing_workers",
                defaults.processing_workers,
            )?,
            search_queue: limits("search_queue", defaults.search_queue)?,
            info_queue: limits("info_queue", defaults.info_queue)?,
            status_queue: limits("status_queue", defaults.status_queue)?,
            processing_queue: limits(
                "processing_queue",
                defaults.processing_queue,
            )?,
            indexing_queue: limits("indexing_queue", defaults.indexing_queue)?,
            max_cached_readers: count(
                "max_cached_readers",
                defaults.max_cached_readers,
            )?,
        };
        if settings.readonly_workers == 0 || settings.processing_workers == 0 {
            return Err(Error::Config("worker counts must be at least 1".into()));
        }
        Ok(settings)
    }

    /// Check a single key/value pair before it is stored.
    pub fn validate(key: &str, value: &str) -> Result<()> {
        if !KEYS.contains(&key) {
            return Err(Error::Config(format!(
                "unknown setting {key:?}; known settings: {}",
                KEYS.join(", ")
            )));
        }
        parse_count(key, value).map(|_| ())
    }
}
