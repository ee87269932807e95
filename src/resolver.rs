//! Module Resolver + Cache (component C): resolves a version constraint
//! against a repository's tag list, with a TTL cache in front of both the
//! tag-list fetch and the resolved-version computation.
//!
//! Two independently-keyed cache spaces, `versions:<repo>` and
//! `resolved:<repo>:<constraint>`. The constraint grammar here — exact tags,
//! bare `latest`, `~`/`^` shorthand, and space-separated range conjunctions —
//! isn't quite covered by `semver::VersionReq`, so it's hand-parsed into a
//! small `Constraint` enum and matched against `semver::Version` directly.

use crate::error::{Result, SyncError};
use semver::Version;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// A parsed version constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Exact(String),
    Latest,
    Tilde { major: u64, minor: u64, patch: Option<u64> },
    Caret { major: u64, minor: u64, patch: u64 },
    Range(Vec<Comparator>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparator {
    pub op: Op,
    pub version: Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Ge,
    Gt,
    Le,
    Lt,
}

/// Parses a tag string (e.g. `"v1.2.3"`) into a `semver::Version`, tolerating
/// the leading `v` every tag in this grammar carries.
pub fn parse_tag(tag: &str) -> Option<Version> {
    Version::parse(tag.strip_prefix('v').unwrap_or(tag)).ok()
}

fn parse_partial(s: &str) -> Option<(u64, u64, Option<u64>)> {
    let s = s.strip_prefix('v').unwrap_or(s);
    let parts: Vec<&str> = s.split('.').collect();
    match parts.as_slice() {
        [maj, min] => Some((maj.parse().ok()?, min.parse().ok()?, None)),
        [maj, min, patch] => Some((maj.parse().ok()?, min.parse().ok()?, Some(patch.parse().ok()?))),
        _ => None,
    }
}

/// Parses one constraint string in the grammar above.
pub fn parse_constraint(raw: &str) -> Result<Constraint> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(SyncError::Validation("empty version constraint".into()));
    }
    if raw == "latest" {
        return Ok(Constraint::Latest);
    }
    if let Some(rest) = raw.strip_prefix('~') {
        let (major, minor, patch) = parse_partial(rest)
            .ok_or_else(|| SyncError::Validation(format!("malformed_constraint: {raw}")))?;
        return Ok(Constraint::Tilde { major, minor, patch });
    }
    if let Some(rest) = raw.strip_prefix('^') {
        let (major, minor, patch) = parse_partial(rest)
            .ok_or_else(|| SyncError::Validation(format!("malformed_constraint: {raw}")))?;
        return Ok(Constraint::Caret { major, minor, patch: patch.unwrap_or(0) });
    }
    if raw.starts_with('>') || raw.starts_with('<') {
        let comparators = raw
            .split_whitespace()
            .map(parse_comparator)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| SyncError::Validation(format!("malformed_constraint: {raw}")))?;
        if comparators.is_empty() {
            return Err(SyncError::Validation(format!("malformed_constraint: {raw}")));
        }
        return Ok(Constraint::Range(comparators));
    }
    // exact: must look like vX.Y.Z (with optional pre-release/build)
    if parse_tag(raw).is_some() {
        return Ok(Constraint::Exact(raw.to_string()));
    }
    Err(SyncError::Validation(format!("malformed_constraint: {raw}")))
}

fn parse_comparator(tok: &str) -> Option<Comparator> {
    let (op, rest) = if let Some(r) = tok.strip_prefix(">=") {
        (Op::Ge, r)
    } else if let Some(r) = tok.strip_prefix("<=") {
        (Op::Le, r)
    } else if let Some(r) = tok.strip_prefix('>') {
        (Op::Gt, r)
    } else if let Some(r) = tok.strip_prefix('<') {
        (Op::Lt, r)
    } else {
        return None;
    };
    let version = parse_tag(rest)?;
    Some(Comparator { op, version })
}

/// Resolves `constraint` against `tags` (raw tag strings such as `"v1.2.3"`),
/// returning the chosen tag string.
pub fn resolve_against_tags(
    tags: &[String],
    constraint: &Constraint,
    allow_prerelease: bool,
) -> Result<String> {
    if tags.is_empty() {
        return Err(SyncError::Validation("no_versions_available".into()));
    }

    let mut parsed: Vec<(String, Version)> = tags
        .iter()
        .filter_map(|t| parse_tag(t).map(|v| (t.clone(), v)))
        .collect();
    parsed.sort_by(|a, b| a.1.cmp(&b.1));

    if let Constraint::Exact(want) = constraint {
        let want_version = parse_tag(want)
            .ok_or_else(|| SyncError::Validation(format!("malformed_constraint: {want}")))?;
        return parsed
            .iter()
            .find(|(_, v)| *v == want_version)
            .map(|(t, _)| t.clone())
            .ok_or_else(|| SyncError::Validation("no_version_matches".into()));
    }

    let candidates: Vec<&(String, Version)> = parsed
        .iter()
        .filter(|(_, v)| allow_prerelease || v.pre.is_empty())
        .filter(|(_, v)| matches_constraint(v, constraint))
        .collect();

    candidates
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1))
        .map(|(t, _)| t.clone())
        .ok_or_else(|| SyncError::Validation("no_version_matches".into()))
}

fn matches_constraint(v: &Version, constraint: &Constraint) -> bool {
    match constraint {
        Constraint::Exact(_) => unreachable!("handled separately"),
        Constraint::Latest => true,
        Constraint::Tilde { major, minor, patch } => {
            v.major == *major
                && v.minor == *minor
                && patch.map(|p| v.patch >= p).unwrap_or(true)
        }
        Constraint::Caret { major, minor, patch } => {
            v.major == *major
                && (v.minor, v.patch) >= (*minor, *patch)
        }
        Constraint::Range(comparators) => comparators.iter().all(|c| match c.op {
            Op::Ge => v >= &c.version,
            Op::Gt => v > &c.version,
            Op::Le => v <= &c.version,
            Op::Lt => v < &c.version,
        }),
    }
}

/// A TTL cache entry.
struct Entry {
    value: String,
    inserted_at: Instant,
}

/// The resolver's cache: two independently-keyed spaces as described in the
/// spec, implemented as one map with prefixed keys since both spaces share
/// the same TTL/eviction behavior.
pub struct Cache {
    ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
}

impl Cache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn versions_key(repo_ref: &str) -> String {
        format!("versions:{repo_ref}")
    }

    fn resolved_key(repo_ref: &str, constraint: &str) -> String {
        format!("resolved:{repo_ref}:{constraint}")
    }

    async fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(e) if e.inserted_at.elapsed() < self.ttl => Some(e.value.clone()),
            _ => None,
        }
    }

    async fn put(&self, key: String, value: String) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub async fn get_versions(&self, repo_ref: &str) -> Option<Vec<String>> {
        self.get(&Self::versions_key(repo_ref))
            .await
            .map(|joined| joined.split(',').filter(|s| !s.is_empty()).map(String::from).collect())
    }

    pub async fn put_versions(&self, repo_ref: &str, tags: &[String]) {
        self.put(Self::versions_key(repo_ref), tags.join(",")).await;
    }

    pub async fn get_resolved(&self, repo_ref: &str, constraint: &str) -> Option<String> {
        self.get(&Self::resolved_key(repo_ref, constraint)).await
    }

    pub async fn put_resolved(&self, repo_ref: &str, constraint: &str, resolved: &str) {
        self.put(Self::resolved_key(repo_ref, constraint), resolved.to_string())
            .await;
    }

    /// Wipes every cached entry, in both spaces.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

/// The resolver: a thin coordinator that consults the cache before asking
/// a tag-lister (the host API, injected by the caller as a closure/future to
/// keep this module decoupled from `octocrab`) for a repo's tags.
///
/// Concurrent misses for the same key may both fetch — tolerated rather than
/// paying for single-flight coordination.
pub struct Resolver {
    cache: Cache,
}

impl Resolver {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::new(ttl),
        }
    }

    pub async fn clear(&self) {
        self.cache.clear().await;
    }

    /// Resolves `constraint_str` against `repo_ref`'s tags. `fetch_tags` is
    /// called only on a cache miss for the `versions:` key.
    pub async fn resolve<F, Fut>(
        &self,
        repo_ref: &str,
        constraint_str: &str,
        allow_prerelease: bool,
        fetch_tags: F,
    ) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<String>>>,
    {
        if let Some(resolved) = self.cache.get_resolved(repo_ref, constraint_str).await {
            return Ok(resolved);
        }

        let tags = match self.cache.get_versions(repo_ref).await {
            Some(tags) => tags,
            None => {
                let tags = fetch_tags().await?;
                self.cache.put_versions(repo_ref, &tags).await;
                tags
            }
        };

        let constraint = parse_constraint(constraint_str)?;
        let resolved = resolve_against_tags(&tags, &constraint, allow_prerelease)?;
        self.cache
            .put_resolved(repo_ref, constraint_str, &resolved)
            .await;
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_version_resolve() {
        let t = tags(&["v1.0.0", "v1.1.0", "v1.2.3", "v2.0.0"]);
        let c = parse_constraint("v1.2.3").unwrap();
        assert_eq!(resolve_against_tags(&t, &c, false).unwrap(), "v1.2.3");

        let c = parse_constraint("v1.2.4").unwrap();
        let err = resolve_against_tags(&t, &c, false).unwrap_err();
        assert!(matches!(err, SyncError::Validation(ref m) if m == "no_version_matches"));
    }

    #[test]
    fn semver_range_resolve() {
        let t = tags(&[
            "v1.0.0", "v1.0.1", "v1.1.0", "v1.2.0", "v1.2.3", "v1.2.4", "v1.3.0", "v2.0.0",
        ]);

        let c = parse_constraint("~1.2.0").unwrap();
        assert_eq!(resolve_against_tags(&t, &c, false).unwrap(), "v1.2.4");

        let c = parse_constraint("^1.2.0").unwrap();
        assert_eq!(resolve_against_tags(&t, &c, false).unwrap(), "v1.3.0");

        let c = parse_constraint(">=1.2.0 <2.0.0").unwrap();
        assert_eq!(resolve_against_tags(&t, &c, false).unwrap(), "v1.3.0");
    }

    #[test]
    fn latest_excludes_prerelease_by_default() {
        let t = tags(&["v1.0.0", "v1.1.0-rc.1", "v1.0.9"]);
        let c = Constraint::Latest;
        assert_eq!(resolve_against_tags(&t, &c, false).unwrap(), "v1.0.9");
        assert_eq!(resolve_against_tags(&t, &c, true).unwrap(), "v1.1.0-rc.1");
    }

    #[test]
    fn no_tags_is_distinct_error_from_no_match() {
        let err = resolve_against_tags(&[], &Constraint::Latest, false).unwrap_err();
        assert!(matches!(err, SyncError::Validation(ref m) if m == "no_versions_available"));
    }

    #[test]
    fn resolve_is_monotone_under_new_higher_tag() {
        let before = tags(&["v1.0.0", "v1.1.0"]);
        let after = tags(&["v1.0.0", "v1.1.0", "v1.2.0"]);
        let c = Constraint::Latest;
        let r1 = parse_tag(&resolve_against_tags(&before, &c, false).unwrap()).unwrap();
        let r2 = parse_tag(&resolve_against_tags(&after, &c, false).unwrap()).unwrap();
        assert!(r2 >= r1);
    }

    #[tokio::test]
    async fn cache_serves_versions_without_refetch() {
        let cache = Cache::new(Duration::from_secs(60));
        cache.put_versions("acme/toolkit", &tags(&["v1.0.0"])).await;
        let fetched = cache.get_versions("acme/toolkit").await;
        assert_eq!(fetched, Some(vec!["v1.0.0".to_string()]));
    }

    #[tokio::test]
    async fn cache_entries_expire() {
        let cache = Cache::new(Duration::from_millis(10));
        cache.put_resolved("acme/toolkit", "latest", "v1.0.0").await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get_resolved("acme/toolkit", "latest").await, None);
    }

    #[tokio::test]
    async fn resolver_resolves_through_fetch_then_serves_from_cache() {
        let resolver = Resolver::new(Duration::from_secs(60));
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let fetch = || async {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(tags(&["v1.0.0", "v1.1.0"]))
        };
        let r1 = resolver
            .resolve("acme/toolkit", "latest", false, fetch)
            .await
            .unwrap();
        assert_eq!(r1, "v1.1.0");

        let r2 = resolver
            .resolve("acme/toolkit", "latest", false, || async { unreachable!() })
            .await
            .unwrap();
        assert_eq!(r2, "v1.1.0");
    }
}
