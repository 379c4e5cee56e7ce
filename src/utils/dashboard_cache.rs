use moka::future::Cache;
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const DEFAULT_TTL_SECS: u64 = 60;

static DASHBOARD_CACHE: OnceCell<DashboardCache> = OnceCell::new();

/// Summaries tagged with the generation they were computed in. Invalidation
/// bumps the generation, so a summary computed across a write is never served.
pub struct DashboardCache {
    entries: Cache<String, (u64, Value)>,
    generation: AtomicU64,
}

impl DashboardCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(1_000)
                .time_to_live(Duration::from_secs(ttl_secs.max(1)))
                .build(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let (generation, summary) = self.entries.get(key).await?;
        (generation == self.generation()).then_some(summary)
    }

    /// Stores `summary` unless the cache was invalidated after `generation` was read.
    pub async fn put(&self, key: String, summary: Value, generation: u64) {
        if generation == self.generation() {
            self.entries.insert(key, (generation, summary)).await;
        }
    }

    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.invalidate_all();
    }
}

/// Sets the TTL; only the first call before any lookup takes effect.
pub fn init(ttl_secs: u64) {
    let _ = DASHBOARD_CACHE.set(DashboardCache::new(ttl_secs));
}

fn cache() -> &'static DashboardCache {
    DASHBOARD_CACHE.get_or_init(|| DashboardCache::new(DEFAULT_TTL_SECS))
}

pub fn key(period: &str, site: Option<&str>) -> String {
    format!("{}|{}", period, site.unwrap_or("*").to_lowercase())
}

/// Read before computing a summary and hand back to [`put`].
pub fn generation() -> u64 {
    cache().generation()
}

pub async fn get(key: &str) -> Option<Value> {
    cache().get(key).await
}

pub async fn put(key: String, summary: Value, generation: u64) {
    cache().put(key, summary, generation).await;
}

/// Drops every cached summary; called after writes that change dashboard figures.
pub fn invalidate() {
    cache().invalidate();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_ignore_site_case() {
        assert_eq!(key("2025-01", Some("Site A")), key("2025-01", Some("site a")));
        assert_eq!(key("2025-01", None), "2025-01|*");
    }

    #[actix_web::test]
    async fn stores_and_invalidates() {
        let cache = DashboardCache::new(60);
        let k = key("1999-12", None);
        cache.put(k.clone(), json!({"employees": 3}), cache.generation()).await;
        assert_eq!(cache.get(&k).await, Some(json!({"employees": 3})));
        cache.invalidate();
        assert_eq!(cache.get(&k).await, None);
    }

    #[actix_web::test]
    async fn summary_computed_across_a_write_is_dropped() {
        let cache = DashboardCache::new(60);
        let k = key("1999-11", None);
        let before = cache.generation();
        cache.invalidate();
        cache.put(k.clone(), json!({"employees": 1}), before).await;
        assert_eq!(cache.get(&k).await, None);

        cache.put(k.clone(), json!({"employees": 2}), cache.generation()).await;
        assert_eq!(cache.get(&k).await, Some(json!({"employees": 2})));
    }
}
