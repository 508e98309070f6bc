use std::time::Duration;

use tokio::time::Instant;

/// Single-slot TTL cache.
///
/// Uses tokio's clock so paused-time tests can expire entries without
/// sleeping.
pub struct TtlCache<T: Clone> {
    entry: Option<(T, Instant)>,
    ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { entry: None, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached value, if it has not expired.
    pub fn get(&self) -> Option<T> {
        self.remaining().and(self.entry.as_ref().map(|(v, _)| v.clone()))
    }

    pub fn set(&mut self, value: T) {
        self.entry = Some((value, Instant::now()));
    }

    /// Time left before the current entry expires; `None` when empty or stale.
    pub fn remaining(&self) -> Option<Duration> {
        let (_, stored_at) = self.entry.as_ref()?;
        self.ttl.checked_sub(stored_at.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_cache_returns_none() {
        let cache = TtlCache::<u64>::new(Duration::from_secs(5));
        assert!(cache.get().is_none());
        assert!(cache.remaining().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn value_is_served_until_ttl_elapses() {
        let mut cache = TtlCache::new(Duration::from_secs(300));
        cache.set("digest".to_string());

        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(cache.get().as_deref(), Some("digest"));
        assert_eq!(cache.remaining(), Some(Duration::from_secs(180)));

        tokio::time::advance(Duration::from_secs(181)).await;
        assert!(cache.get().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn set_restarts_the_clock() {
        let mut cache = TtlCache::new(Duration::from_secs(10));
        cache.set(1_u64);
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.set(2_u64);
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get(), Some(2));
    }
}
