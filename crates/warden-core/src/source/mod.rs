pub mod file;
pub mod remote;

use crate::error::{Error, Result};
use crate::model::{normalize, AllowListUser};
use std::collections::HashMap;
use std::time::Duration;

/// The closed mode set (spec.md §9): selects source order and
/// merge-vs-fallback strategy. Parsing accepts case-insensitive string
/// forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    OnlyLocal,
    OnlyRemote,
    RemoteFirst,
    LocalFirst,
    RemoteFirstAllowRemoteFailed,
    LocalFirstAllowRemoteFailed,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::RemoteFirst
    }
}

impl std::str::FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ONLY_LOCAL" => Ok(Mode::OnlyLocal),
            "ONLY_REMOTE" => Ok(Mode::OnlyRemote),
            "REMOTE_FIRST" | "DEFAULT" => Ok(Mode::RemoteFirst),
            "LOCAL_FIRST" => Ok(Mode::LocalFirst),
            "REMOTE_FIRST_ALLOW_REMOTE_FAILED" => Ok(Mode::RemoteFirstAllowRemoteFailed),
            "LOCAL_FIRST_ALLOW_REMOTE_FAILED" => Ok(Mode::LocalFirstAllowRemoteFailed),
            other => Err(Error::Input(format!("unknown mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Fallback,
    Merge,
}

impl Mode {
    fn strategy(self) -> Strategy {
        match self {
            Mode::OnlyLocal | Mode::OnlyRemote => Strategy::Fallback,
            _ => Strategy::Merge,
        }
    }

    fn allow_remote_failed(self) -> bool {
        matches!(
            self,
            Mode::RemoteFirstAllowRemoteFailed | Mode::LocalFirstAllowRemoteFailed
        )
    }
}

/// A tagged source record (spec.md §3). Ordered ascending by priority
/// within a mode; priority ties break by input order.
#[derive(Debug, Clone)]
pub enum SourceKind {
    File { path: String },
    Dir { glob: String },
    Remote { url: String, auth: Option<String> },
}

#[derive(Debug, Clone)]
pub struct Source {
    pub kind: SourceKind,
    pub priority: i64,
}

/// Per-run knobs (spec.md §3).
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub mode: Mode,
    pub max_file_size: u64,
    pub allow_empty_file: bool,
    pub allow_empty_data: bool,
    pub http_timeout: Duration,
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub tls_verify: bool,
    pub rsa_private_key_pem: Option<String>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            mode: Mode::default(),
            max_file_size: 10 * 1024 * 1024,
            allow_empty_file: true,
            allow_empty_data: false,
            http_timeout: Duration::from_secs(5),
            retry_count: 2,
            retry_delay: Duration::from_millis(250),
            tls_verify: true,
            rsa_private_key_pem: None,
        }
    }
}

/// One fetched-but-not-yet-merged contribution from a single source.
struct Contribution {
    priority: i64,
    entries: Vec<AllowListUser>,
    failed: bool,
}

/// Loads and normalizes entries from `file_path`/`dir_glob`/`remote_url`
/// according to `options.mode` (spec.md §4.1). Never returns
/// partially-normalized output.
pub async fn load(
    file_path: Option<&str>,
    dir_glob: Option<&str>,
    remote_url: Option<&str>,
    remote_auth: Option<&str>,
    options: &LoadOptions,
) -> Result<Vec<AllowListUser>> {
    let order = build_source_order(file_path, dir_glob, remote_url, remote_auth, options.mode);

    match options.mode.strategy() {
        Strategy::Fallback => load_fallback(&order, options).await,
        Strategy::Merge => load_merge(&order, options).await,
    }
}

fn build_source_order(
    file_path: Option<&str>,
    dir_glob: Option<&str>,
    remote_url: Option<&str>,
    remote_auth: Option<&str>,
    mode: Mode,
) -> Vec<Source> {
    let mut sources = Vec::new();
    let mut priority = 0i64;

    let mut push_dir = |sources: &mut Vec<Source>, priority: &mut i64| {
        if let Some(glob) = dir_glob {
            sources.push(Source {
                kind: SourceKind::Dir {
                    glob: glob.to_string(),
                },
                priority: *priority,
            });
            *priority += 1;
        }
    };
    let mut push_file = |sources: &mut Vec<Source>, priority: &mut i64| {
        if let Some(path) = file_path {
            sources.push(Source {
                kind: SourceKind::File {
                    path: path.to_string(),
                },
                priority: *priority,
            });
            *priority += 1;
        }
    };
    let mut push_remote = |sources: &mut Vec<Source>, priority: &mut i64| {
        if let Some(url) = remote_url {
            sources.push(Source {
                kind: SourceKind::Remote {
                    url: url.to_string(),
                    auth: remote_auth.map(String::from),
                },
                priority: *priority,
            });
            *priority += 1;
        }
    };

    match mode {
        Mode::OnlyLocal => {
            push_dir(&mut sources, &mut priority);
            push_file(&mut sources, &mut priority);
        }
        Mode::OnlyRemote => {
            push_remote(&mut sources, &mut priority);
        }
        Mode::RemoteFirst | Mode::RemoteFirstAllowRemoteFailed => {
            push_remote(&mut sources, &mut priority);
            push_dir(&mut sources, &mut priority);
            push_file(&mut sources, &mut priority);
        }
        Mode::LocalFirst | Mode::LocalFirstAllowRemoteFailed => {
            push_dir(&mut sources, &mut priority);
            push_file(&mut sources, &mut priority);
            push_remote(&mut sources, &mut priority);
        }
    }

    sources
}

async fn fetch_source(source: &Source, options: &LoadOptions) -> Result<Vec<AllowListUser>> {
    match &source.kind {
        SourceKind::File { path } => file::load_file(path, options),
        SourceKind::Dir { glob } => file::load_dir(glob, options),
        SourceKind::Remote { url, auth } => {
            remote::load_remote(url, auth.as_deref(), options).await
        }
    }
}

async fn load_fallback(order: &[Source], options: &LoadOptions) -> Result<Vec<AllowListUser>> {
    let mut last_err: Option<Error> = None;
    for source in order {
        match fetch_source(source, options).await {
            Ok(entries) => {
                let normalized: Vec<_> = entries.into_iter().map(normalize).collect();
                return Ok(normalized);
            }
            Err(err) => {
                tracing::warn!(error = %err, "fallback source failed, trying next");
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| Error::Load("no sources configured".into())))
}

async fn load_merge(order: &[Source], options: &LoadOptions) -> Result<Vec<AllowListUser>> {
    let mut contributions = Vec::new();

    for source in order {
        let is_remote = matches!(source.kind, SourceKind::Remote { .. });
        match fetch_source(source, options).await {
            Ok(entries) => contributions.push(Contribution {
                priority: source.priority,
                entries: entries.into_iter().map(normalize).collect(),
                failed: false,
            }),
            Err(err) => {
                if is_remote && options.mode.allow_remote_failed() {
                    tracing::warn!(error = %err, "remote source failed, skipping (allowed)");
                    contributions.push(Contribution {
                        priority: source.priority,
                        entries: Vec::new(),
                        failed: true,
                    });
                } else if is_remote {
                    return Err(err);
                } else {
                    // File/dir parse errors are skipped with a logged
                    // warning in Merge mode, treated as an empty source.
                    tracing::warn!(error = %err, "source failed in merge mode, treated as empty");
                    contributions.push(Contribution {
                        priority: source.priority,
                        entries: Vec::new(),
                        failed: true,
                    });
                }
            }
        }
    }

    let merged = merge(contributions);

    if merged.is_empty() && !options.allow_empty_data {
        return Err(Error::Load(
            "no source yielded any entry and AllowEmptyData is not set".into(),
        ));
    }

    Ok(merged.into_iter().map(normalize).collect())
}

/// Merges contributions: for each dedup key, the winning entry is from
/// the lowest-priority-number (highest-priority) source (spec.md §4.1).
/// Entries without a dedup key are dropped.
fn merge(contributions: Vec<Contribution>) -> Vec<AllowListUser> {
    let mut winners: HashMap<String, (i64, AllowListUser)> = HashMap::new();

    for contribution in contributions {
        for entry in contribution.entries {
            let Some(key) = entry.dedup_key() else {
                continue;
            };
            match winners.get(&key) {
                Some((existing_priority, _)) if *existing_priority <= contribution.priority => {}
                _ => {
                    winners.insert(key, (contribution.priority, entry));
                }
            }
        }
    }

    winners.into_values().map(|(_, entry)| entry).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn user(phone: &str, mail: &str) -> AllowListUser {
        AllowListUser {
            phone: Some(phone.to_string()),
            mail: Some(mail.to_string()),
            user_id: None,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn merge_prefers_highest_priority_source() {
        let contributions = vec![
            Contribution {
                priority: 0,
                entries: vec![user("1", "r@x")],
                failed: false,
            },
            Contribution {
                priority: 1,
                entries: vec![user("1", "f@x")],
                failed: false,
            },
        ];
        let merged = merge(contributions);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].mail.as_deref(), Some("r@x"));
    }

    #[test]
    fn merge_drops_entries_without_dedup_key() {
        let no_key = AllowListUser {
            phone: None,
            mail: None,
            user_id: Some("u1".into()),
            extra: BTreeMap::new(),
        };
        let contributions = vec![Contribution {
            priority: 0,
            entries: vec![no_key],
            failed: false,
        }];
        assert!(merge(contributions).is_empty());
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("remote_first".parse::<Mode>().unwrap(), Mode::RemoteFirst);
        assert_eq!("ONLY_LOCAL".parse::<Mode>().unwrap(), Mode::OnlyLocal);
        assert!("bogus".parse::<Mode>().is_err());
    }

    #[test]
    fn source_order_remote_first() {
        let order = build_source_order(
            Some("f.json"),
            Some("*.json"),
            Some("http://x"),
            None,
            Mode::RemoteFirst,
        );
        assert!(matches!(order[0].kind, SourceKind::Remote { .. }));
        assert!(matches!(order[1].kind, SourceKind::Dir { .. }));
        assert!(matches!(order[2].kind, SourceKind::File { .. }));
    }

    #[test]
    fn source_order_local_first() {
        let order = build_source_order(
            Some("f.json"),
            Some("*.json"),
            Some("http://x"),
            None,
            Mode::LocalFirst,
        );
        assert!(matches!(order[0].kind, SourceKind::Dir { .. }));
        assert!(matches!(order[1].kind, SourceKind::File { .. }));
        assert!(matches!(order[2].kind, SourceKind::Remote { .. }));
    }

    /// A Merge-mode source that legitimately loads zero entries (an
    /// empty glob match, no parse failure) must still trip the
    /// empty-data guard when `allow_empty_data` is unset — "no source
    /// yielded any entry" doesn't require every source to have failed.
    #[tokio::test]
    async fn merge_mode_errors_on_legitimately_empty_result() {
        let options = LoadOptions {
            mode: Mode::LocalFirst,
            allow_empty_data: false,
            ..LoadOptions::default()
        };
        let result = load(
            None,
            Some("/nonexistent-warden-test-dir-xyz/*.json"),
            None,
            None,
            &options,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn merge_mode_allows_empty_result_when_opted_in() {
        let options = LoadOptions {
            mode: Mode::LocalFirst,
            allow_empty_data: true,
            ..LoadOptions::default()
        };
        let result = load(
            None,
            Some("/nonexistent-warden-test-dir-xyz/*.json"),
            None,
            None,
            &options,
        )
        .await;
        assert_eq!(result.unwrap(), Vec::new());
    }
}
