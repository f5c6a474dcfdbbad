use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use std::sync::Arc;

/// TTL memo cache. Entries expire lazily on read and are overwritten in
/// place on write; nothing is evicted proactively.
#[derive(Debug, Clone)]
pub struct Cache<T> {
    data: Arc<Mutex<HashMap<String, (T, Instant)>>>,
    ttl: Duration,
}

impl<T: Clone> Cache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            data: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<T> {
        let data = self.data.lock().await;
        if let Some((value, timestamp)) = data.get(key) {
            if timestamp.elapsed() < self.ttl {
                return Some(value.clone());
            }
        }
        None
    }

    pub async fn set(&self, key: String, value: T) {
        let mut data = self.data.lock().await;
        data.insert(key, (value, Instant::now()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expires_after_ttl() {
        let cache: Cache<f64> = Cache::new(Duration::from_secs(30));
        cache.set("oracle:WETH".to_string(), 1800.0).await;
        assert_eq!(cache.get("oracle:WETH").await, Some(1800.0));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.get("oracle:WETH").await, None);
    }

    #[tokio::test]
    async fn overwrites_existing_key() {
        let cache: Cache<f64> = Cache::new(Duration::from_secs(30));
        cache.set("pool:0xabc".to_string(), 2.0).await;
        cache.set("pool:0xabc".to_string(), 3.0).await;
        assert_eq!(cache.get("pool:0xabc").await, Some(3.0));
    }
}
