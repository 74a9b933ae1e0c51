use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// One allowlist record (spec.md §3). `extra` preserves any metadata
/// fields verbatim — they round-trip through serialization untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllowListUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl AllowListUser {
    /// The dedup key used only when merging multiple sources (spec.md
    /// §3): trimmed phone if non-empty, else lowercased trimmed mail.
    /// `None` when neither is present — such entries are dropped on
    /// merge but kept on fallback.
    pub fn dedup_key(&self) -> Option<String> {
        if let Some(phone) = self.phone.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            return Some(phone.to_string());
        }
        self.mail
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|m| m.to_lowercase())
    }

    /// Whether the entry satisfies the post-normalize invariant: at
    /// least one of phone/mail/user_id is non-empty.
    pub fn has_identifier(&self) -> bool {
        self.phone.as_deref().is_some_and(|s| !s.is_empty())
            || self.mail.as_deref().is_some_and(|s| !s.is_empty())
            || self.user_id.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Normalizes one entry in place: trims phone, lowercases+trims mail,
/// derives `user_id` deterministically when absent. Idempotent —
/// `normalize(normalize(x)) == normalize(x)` (spec.md §8 invariant 4).
pub fn normalize(mut user: AllowListUser) -> AllowListUser {
    user.phone = user
        .phone
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());
    user.mail = user
        .mail
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty());
    user.user_id = user
        .user_id
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty());

    if user.user_id.is_none() {
        if let Some(derived) = derive_user_id(user.phone.as_deref(), user.mail.as_deref()) {
            user.user_id = Some(derived);
        }
    }
    user
}

/// Deterministic `user_id` derivation for entries that arrive without
/// one: `hex(sha256("phone|mail"))`, truncated to 16 bytes (32 hex
/// chars). Content-stable rather than a randomly-assigned UUID, so the
/// same `(phone, mail)` pair always yields the same id across refreshes
/// (spec.md §9 open question — see DESIGN.md for the rationale).
fn derive_user_id(phone: Option<&str>, mail: Option<&str>) -> Option<String> {
    if phone.is_none() && mail.is_none() {
        return None;
    }
    let mut hasher = Sha256::new();
    hasher.update(phone.unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(mail.unwrap_or("").as_bytes());
    let digest = hasher.finalize();
    Some(hex::encode(&digest[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(phone: Option<&str>, mail: Option<&str>, user_id: Option<&str>) -> AllowListUser {
        AllowListUser {
            phone: phone.map(String::from),
            mail: mail.map(String::from),
            user_id: user_id.map(String::from),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn normalize_lowercases_and_trims_mail() {
        let u = normalize(user(None, Some("  A@Example.COM  "), None));
        assert_eq!(u.mail.as_deref(), Some("a@example.com"));
    }

    #[test]
    fn normalize_trims_phone() {
        let u = normalize(user(Some("  138  "), None, None));
        assert_eq!(u.phone.as_deref(), Some("138"));
    }

    #[test]
    fn normalize_derives_stable_user_id() {
        let a = normalize(user(Some("138"), Some("a@x.com"), None));
        let b = normalize(user(Some("138"), Some("A@X.com "), None));
        assert!(a.user_id.is_some());
        assert_eq!(a.user_id, b.user_id);
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize(user(Some(" 138 "), Some("A@X.COM"), None));
        let twice = normalize(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_preserves_explicit_user_id() {
        let u = normalize(user(Some("138"), Some("a@x.com"), Some("u1")));
        assert_eq!(u.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn dedup_key_prefers_phone() {
        let u = user(Some(" 138 "), Some("a@x.com"), None);
        assert_eq!(u.dedup_key().as_deref(), Some("138"));
    }

    #[test]
    fn dedup_key_falls_back_to_lowercased_mail() {
        let u = user(None, Some(" A@X.COM "), None);
        assert_eq!(u.dedup_key().as_deref(), Some("a@x.com"));
    }

    #[test]
    fn dedup_key_is_none_without_phone_or_mail() {
        let u = user(None, None, Some("u1"));
        assert_eq!(u.dedup_key(), None);
    }
}
