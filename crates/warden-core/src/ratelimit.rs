use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy)]
struct Visitor {
    count: u32,
    last_seen: Instant,
}

/// Per-IP fixed-window rate limiter with bounded memory, a whitelist,
/// and a periodic sweeper (spec.md §4.4).
pub struct RateLimiter {
    visitors: RwLock<HashMap<String, Visitor>>,
    whitelist: RwLock<std::collections::HashSet<String>>,
    rate: u32,
    window: Duration,
    max_visitors: usize,
    max_whitelist: usize,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    pub fn new(rate: u32, window: Duration, max_visitors: usize, max_whitelist: usize) -> Arc<Self> {
        let (stop_tx, stop_rx) = watch::channel(false);
        Arc::new(RateLimiter {
            visitors: RwLock::new(HashMap::new()),
            whitelist: RwLock::new(std::collections::HashSet::new()),
            rate,
            window,
            max_visitors,
            max_whitelist,
            stop_tx,
            stop_rx,
            sweeper: Mutex::new(None),
        })
    }

    /// Adds `ip` to the whitelist. Fails (returns `false`) when the
    /// whitelist is already at `max_whitelist` (spec.md §4.4: "inserts
    /// beyond cap fail and are reported to the caller").
    pub fn whitelist(&self, ip: &str) -> bool {
        let mut whitelist = self.whitelist.write().expect("whitelist lock poisoned");
        if whitelist.contains(ip) {
            return true;
        }
        if whitelist.len() >= self.max_whitelist {
            return false;
        }
        whitelist.insert(ip.to_string());
        true
    }

    fn is_whitelisted(&self, ip: &str) -> bool {
        self.whitelist.read().expect("whitelist lock poisoned").contains(ip)
    }

    /// `allow(ip) -> bool` (spec.md §4.4). Whitelisted IPs always pass.
    /// Otherwise a fixed-window counter: first request in a window is
    /// allowed, the window resets once `now - last_seen > window`, and
    /// once `count >= rate` within the window the request is denied.
    pub fn allow(&self, ip: &str) -> bool {
        if self.is_whitelisted(ip) {
            return true;
        }

        let now = Instant::now();
        let mut visitors = self.visitors.write().expect("visitors lock poisoned");

        match visitors.get_mut(ip) {
            None => {
                self.evict_if_over_bound(&mut visitors);
                visitors.insert(
                    ip.to_string(),
                    Visitor {
                        count: 1,
                        last_seen: now,
                    },
                );
                true
            }
            Some(visitor) => {
                if now.duration_since(visitor.last_seen) > self.window {
                    visitor.count = 1;
                    visitor.last_seen = now;
                    true
                } else if visitor.count >= self.rate {
                    false
                } else {
                    visitor.count += 1;
                    true
                }
            }
        }
    }

    /// Evicts oldest-`last_seen` entries until the map is under
    /// `max_visitors`, called just before an insert would exceed it
    /// (spec.md §4.4, §8 invariant 5: size never exceeds `max_visitors`
    /// immediately after any `allow` call).
    fn evict_if_over_bound(&self, visitors: &mut HashMap<String, Visitor>) {
        if visitors.len() < self.max_visitors {
            return;
        }
        let overflow = visitors.len() - self.max_visitors + 1;
        let mut by_age: Vec<(String, Instant)> =
            visitors.iter().map(|(k, v)| (k.clone(), v.last_seen)).collect();
        by_age.sort_by_key(|(_, last_seen)| *last_seen);
        for (key, _) in by_age.into_iter().take(overflow) {
            visitors.remove(&key);
        }
    }

    /// Removes entries older than `window`. Runs on the sweeper task;
    /// coexists with `allow` via the same write lock.
    fn sweep(&self) {
        let cutoff = Instant::now();
        let mut visitors = self.visitors.write().expect("visitors lock poisoned");
        visitors.retain(|_, v| cutoff.duration_since(v.last_seen) <= self.window);
    }

    pub fn visitor_count(&self) -> usize {
        self.visitors.read().expect("visitors lock poisoned").len()
    }

    /// Spawns the periodic sweeper task, running every `cleanup_interval`
    /// until `stop()` is called.
    pub fn spawn_sweeper(self: &Arc<Self>, cleanup_interval: Duration) {
        let limiter = Arc::clone(self);
        let mut stop_rx = self.stop_rx.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => limiter.sweep(),
                    _ = stop_rx.changed() => break,
                }
            }
        });
        *self.sweeper.lock().expect("sweeper mutex poisoned") = Some(handle);
    }

    /// Idempotent shutdown: signals the sweeper to exit and waits for
    /// it to actually do so (spec.md §4.4).
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let handle = self.sweeper.lock().expect("sweeper mutex poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
