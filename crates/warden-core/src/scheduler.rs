use crate::cache::{Snapshot, UserCache};
use crate::lock::DistributedLock;
use crate::model::AllowListUser;
use crate::source::{self, LoadOptions};
use futures::FutureExt;
use sha2::{Digest, Sha256};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the source loader should be given on each tick.
pub struct LoaderConfig {
    pub file_path: Option<String>,
    pub dir_glob: Option<String>,
    pub remote_url: Option<String>,
    pub remote_auth: Option<String>,
    pub options: LoadOptions,
}

/// Outcome of one tick, surfaced to the caller for logging/metrics.
#[derive(Debug, PartialEq, Eq)]
pub enum TickOutcome {
    SkippedLockHeld,
    Unchanged,
    Swapped { count: usize },
    LoadFailed,
}

/// Periodic background task that reloads, diffs, and atomically swaps
/// the `UserCache` (spec.md §4.3).
pub struct RefreshScheduler {
    cache: Arc<UserCache>,
    lock: Arc<dyn DistributedLock>,
    lock_name: String,
    lock_ttl: Duration,
    loader: LoaderConfig,
    last_digest: Mutex<Option<String>>,
    kv_write_through: Option<redis::Client>,
    stopped: AtomicBool,
}

impl RefreshScheduler {
    pub fn new(
        cache: Arc<UserCache>,
        lock: Arc<dyn DistributedLock>,
        lock_name: impl Into<String>,
        lock_ttl: Duration,
        loader: LoaderConfig,
        kv_write_through: Option<redis::Client>,
    ) -> Self {
        RefreshScheduler {
            cache,
            lock,
            lock_name: lock_name.into(),
            lock_ttl,
            loader,
            last_digest: Mutex::new(None),
            kv_write_through,
            stopped: AtomicBool::new(false),
        }
    }

    /// One synchronous initial load, run before the HTTP listener
    /// accepts traffic. If it fails, the cache starts empty and the
    /// service still serves not-found responses — this is by design
    /// for `ONLY_LOCAL` bootstrapping where a file might not yet exist
    /// (spec.md §4.3).
    pub async fn initial_load(&self) {
        match self.tick().await {
            TickOutcome::LoadFailed => {
                tracing::warn!("initial load failed; starting with an empty cache");
            }
            outcome => {
                tracing::info!(?outcome, "initial load completed");
            }
        }
    }

    /// Runs the scheduler loop until `stop()` is called. A panic
    /// inside a tick is caught, logged, and does not terminate the
    /// loop (spec.md §4.3).
    pub async fn run(self: Arc<Self>, interval: Duration) {
        self.run_with_callback(interval, |_| {}).await
    }

    /// Same loop as `run`, but invokes `on_tick` with each tick's
    /// outcome — lets a caller (e.g. a metrics recorder) observe ticks
    /// without pulling its dependencies into this crate.
    pub async fn run_with_callback<F>(self: Arc<Self>, interval: Duration, mut on_tick: F)
    where
        F: FnMut(&TickOutcome) + Send,
    {
        let interval = interval.max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if self.stopped.load(Ordering::Relaxed) {
                break;
            }

            let this = Arc::clone(&self);
            let result = AssertUnwindSafe(async move { this.tick().await })
                .catch_unwind()
                .await;

            match result {
                Ok(outcome) => {
                    tracing::debug!(?outcome, "refresh tick completed");
                    on_tick(&outcome);
                }
                Err(_) => tracing::error!("refresh tick panicked; scheduler continues"),
            }
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    /// Runs exactly one tick of the six-step sequence described in
    /// spec.md §4.3.
    pub async fn tick(&self) -> TickOutcome {
        // Step 1: non-blocking try-acquire.
        let token = match self.lock.try_acquire(&self.lock_name, self.lock_ttl).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::debug!(lock = %self.lock_name, "refresh lock held elsewhere, skipping tick");
                return TickOutcome::SkippedLockHeld;
            }
            Err(err) => {
                tracing::warn!(error = %err, "lock backend unreachable, proceeding without coordination");
                String::new()
            }
        };

        let outcome = self.tick_with_lock_held().await;

        if !token.is_empty() {
            if let Err(err) = self.lock.release(&self.lock_name, &token).await {
                tracing::warn!(error = %err, "failed to release refresh lock");
            }
        }

        outcome
    }

    async fn tick_with_lock_held(&self) -> TickOutcome {
        // Step 2: load.
        let entries = match source::load(
            self.loader.file_path.as_deref(),
            self.loader.dir_glob.as_deref(),
            self.loader.remote_url.as_deref(),
            self.loader.remote_auth.as_deref(),
            &self.loader.options,
        )
        .await
        {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(error = %err, "refresh load failed, keeping previous snapshot");
                return TickOutcome::LoadFailed;
            }
        };

        // Step 3: digest and compare.
        let digest = digest_of(&entries);
        {
            let mut last = self.last_digest.lock().expect("digest mutex poisoned");
            if last.as_deref() == Some(digest.as_str()) {
                return TickOutcome::Unchanged;
            }
            *last = Some(digest);
        }

        // Step 4: build and swap.
        let count = entries.len();
        self.cache.swap(Snapshot::build(entries.clone()));

        // Step 5: write-through (non-fatal on failure).
        if let Some(client) = &self.kv_write_through {
            if let Err(err) = write_through(client, &entries).await {
                tracing::warn!(error = %err, "write-through to shared store failed, swap stands");
            }
        }

        TickOutcome::Swapped { count }
    }
}

/// Stable hash of the sorted user-id list, used to detect an unchanged
/// load and skip a redundant swap (spec.md §4.3 step 3).
fn digest_of(entries: &[AllowListUser]) -> String {
    let mut ids: Vec<&str> = entries
        .iter()
        .filter_map(|e| e.user_id.as_deref())
        .collect();
    ids.sort_unstable();

    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update(id.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

async fn write_through(client: &redis::Client, entries: &[AllowListUser]) -> anyhow::Result<()> {
    use redis::AsyncCommands;
    let payload = serde_json::to_string(entries)?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    let _: () = conn.set("warden:users:snapshot", payload).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LocalMutexLock;
    use std::collections::BTreeMap;

    fn loader_with_file(path: &str) -> LoaderConfig {
        LoaderConfig {
            file_path: Some(path.to_string()),
            dir_glob: None,
            remote_url: None,
            remote_auth: None,
            options: LoadOptions {
                mode: source::Mode::OnlyLocal,
                ..LoadOptions::default()
            },
        }
    }

    #[tokio::test]
    async fn tick_swaps_on_first_successful_load() {
        let mut path = std::env::temp_dir();
        path.push(format!("warden-sched-test-{}.json", std::process::id()));
        std::fs::write(&path, r#"[{"phone":"138","mail":"a@x.com"}]"#).unwrap();

        let scheduler = RefreshScheduler::new(
            Arc::new(UserCache::new()),
            Arc::new(LocalMutexLock::new()),
            "refresh",
            Duration::from_secs(5),
            loader_with_file(path.to_str().unwrap()),
            None,
        );

        let outcome = scheduler.tick().await;
        assert_eq!(outcome, TickOutcome::Swapped { count: 1 });
        assert_eq!(scheduler.cache.size(), 1);

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn second_tick_with_unchanged_data_is_a_no_op() {
        let mut path = std::env::temp_dir();
        path.push(format!("warden-sched-test2-{}.json", std::process::id()));
        std::fs::write(&path, r#"[{"phone":"138","mail":"a@x.com","user_id":"u1"}]"#).unwrap();

        let scheduler = RefreshScheduler::new(
            Arc::new(UserCache::new()),
            Arc::new(LocalMutexLock::new()),
            "refresh",
            Duration::from_secs(5),
            loader_with_file(path.to_str().unwrap()),
            None,
        );

        assert_eq!(scheduler.tick().await, TickOutcome::Swapped { count: 1 });
        assert_eq!(scheduler.tick().await, TickOutcome::Unchanged);

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn tick_skips_when_lock_held_elsewhere() {
        let lock = Arc::new(LocalMutexLock::new());
        let held_token = lock
            .try_acquire("refresh", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        let scheduler = RefreshScheduler::new(
            Arc::new(UserCache::new()),
            lock.clone(),
            "refresh",
            Duration::from_secs(5),
            loader_with_file("/nonexistent/rules.json"),
            None,
        );

        assert_eq!(scheduler.tick().await, TickOutcome::SkippedLockHeld);
        lock.release("refresh", &held_token).await.unwrap();
    }

    #[test]
    fn digest_ignores_order() {
        fn user(id: &str) -> AllowListUser {
            AllowListUser {
                phone: None,
                mail: None,
                user_id: Some(id.to_string()),
                extra: BTreeMap::new(),
            }
        }
        let a = digest_of(&[user("u1"), user("u2")]);
        let b = digest_of(&[user("u2"), user("u1")]);
        assert_eq!(a, b);
    }
}
