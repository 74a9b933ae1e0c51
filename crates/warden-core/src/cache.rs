use crate::model::AllowListUser;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

/// The field a lookup is keyed on (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    Phone,
    Mail,
    UserId,
}

/// Immutable-after-publish generation of the cache (spec.md §3). The
/// three indexes share each record by `Arc` rather than cloning it
/// three times per entry.
#[derive(Debug, Default)]
pub struct Snapshot {
    by_phone: HashMap<String, Arc<AllowListUser>>,
    by_mail: HashMap<String, Arc<AllowListUser>>,
    by_user_id: HashMap<String, Arc<AllowListUser>>,
    len: usize,
}

impl Snapshot {
    /// Builds a snapshot from a normalized, already-deduplicated entry
    /// slice. If two entries still share a phone (the loader is
    /// responsible for dedup, not the cache — spec.md §4.2), the
    /// later entry in the slice wins, matching "exactly-one-key-per-field
    /// indexing".
    pub fn build(entries: Vec<AllowListUser>) -> Self {
        let mut by_phone = HashMap::new();
        let mut by_mail = HashMap::new();
        let mut by_user_id = HashMap::new();
        let len = entries.len();

        for user in entries {
            let shared = Arc::new(user);
            if let Some(phone) = shared.phone.as_deref().filter(|p| !p.is_empty()) {
                by_phone.insert(phone.to_string(), shared.clone());
            }
            if let Some(mail) = shared.mail.as_deref().filter(|m| !m.is_empty()) {
                by_mail.insert(mail.to_string(), shared.clone());
            }
            if let Some(user_id) = shared.user_id.as_deref().filter(|u| !u.is_empty()) {
                by_user_id.insert(user_id.to_string(), shared.clone());
            }
        }

        Snapshot {
            by_phone,
            by_mail,
            by_user_id,
            len,
        }
    }

    pub fn get(&self, kind: LookupKind, key: &str) -> Option<Arc<AllowListUser>> {
        match kind {
            LookupKind::Phone => self.by_phone.get(key).cloned(),
            LookupKind::Mail => self.by_mail.get(&key.to_lowercase()).cloned(),
            LookupKind::UserId => self.by_user_id.get(key).cloned(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Concurrent, wait-free-read user cache (spec.md §4.2). Readers take a
/// local `Arc<Snapshot>` reference once per call via `ArcSwap::load`;
/// a reader in flight during a swap keeps observing the snapshot it
/// loaded, never a blend of old and new.
pub struct UserCache {
    current: ArcSwap<Snapshot>,
}

impl Default for UserCache {
    fn default() -> Self {
        Self::new()
    }
}

impl UserCache {
    pub fn new() -> Self {
        UserCache {
            current: ArcSwap::from_pointee(Snapshot::default()),
        }
    }

    pub fn lookup(&self, kind: LookupKind, key: &str) -> Option<Arc<AllowListUser>> {
        self.current.load().get(kind, key)
    }

    /// Atomically replaces the current snapshot. Exclusive mutation is
    /// restricted to the refresh scheduler by convention; readers never
    /// call this.
    pub fn swap(&self, snapshot: Snapshot) {
        self.current.store(Arc::new(snapshot));
    }

    pub fn size(&self) -> usize {
        self.current.load().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn user(phone: &str, mail: &str, user_id: &str) -> AllowListUser {
        AllowListUser {
            phone: Some(phone.to_string()),
            mail: Some(mail.to_string()),
            user_id: Some(user_id.to_string()),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn lookup_by_each_kind() {
        let snap = Snapshot::build(vec![user("138", "a@x.com", "u1")]);
        assert!(snap.get(LookupKind::Phone, "138").is_some());
        assert!(snap.get(LookupKind::Mail, "a@x.com").is_some());
        assert!(snap.get(LookupKind::UserId, "u1").is_some());
    }

    #[test]
    fn mail_lookup_is_case_insensitive() {
        let snap = Snapshot::build(vec![user("138", "a@x.com", "u1")]);
        assert!(snap.get(LookupKind::Mail, "A@X.COM").is_some());
    }

    #[test]
    fn miss_returns_none() {
        let snap = Snapshot::build(vec![user("138", "a@x.com", "u1")]);
        assert!(snap.get(LookupKind::Phone, "999").is_none());
    }

    #[test]
    fn later_entry_wins_on_shared_key() {
        let snap = Snapshot::build(vec![user("138", "a@x.com", "u1"), user("138", "b@x.com", "u2")]);
        let hit = snap.get(LookupKind::Phone, "138").unwrap();
        assert_eq!(hit.mail.as_deref(), Some("b@x.com"));
    }

    #[test]
    fn swap_replaces_visible_snapshot_atomically() {
        let cache = UserCache::new();
        assert_eq!(cache.size(), 0);
        cache.swap(Snapshot::build(vec![user("138", "a@x.com", "u1")]));
        assert_eq!(cache.size(), 1);
        assert!(cache.lookup(LookupKind::Phone, "138").is_some());
        cache.swap(Snapshot::build(vec![user("139", "b@x.com", "u2")]));
        assert_eq!(cache.size(), 1);
        assert!(cache.lookup(LookupKind::Phone, "138").is_none());
        assert!(cache.lookup(LookupKind::Phone, "139").is_some());
    }
}
