//! The Transform Chain: an ordered list of content transforms applied to a
//! single file's bytes before it is staged on a target.
//!
//! Two transforms are defined: a repo-name rewrite and a `{{VAR}}`/`${VAR}`
//! template expansion. Both are pure functions of `(bytes, TransformContext)`
//! and are safe to run in any order the caller chooses, though the default
//! chain runs the repo-name rewrite first so that template variables can
//! themselves reference the (already-rewritten) target repo name.

use std::collections::HashMap;

/// First 8 KiB is the sniff window used to decide whether a file is binary.
const BINARY_SNIFF_WINDOW: usize = 8 * 1024;

/// Per-file metadata threaded through every transform.
#[derive(Debug, Clone)]
pub struct TransformContext {
    pub source_repo: String,
    pub target_repo: String,
    pub file_path: String,
    pub variables: HashMap<String, String>,
}

/// A single transform step. Kept as a plain enum rather than a trait object
/// since the chain's membership is fixed to two kinds; a `dyn Transform`
/// would buy flexibility nothing here needs.
#[derive(Debug, Clone)]
pub enum Transform {
    RepoName,
    Template,
}

impl Transform {
    fn apply(&self, bytes: &[u8], ctx: &TransformContext) -> Result<Vec<u8>, TransformError> {
        match self {
            Transform::RepoName => Ok(rewrite_repo_name(bytes, ctx)),
            Transform::Template => Ok(expand_template(bytes, ctx)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct TransformError(String);

/// An ordered chain of transforms, built from a target's (or group's)
/// `TransformSpec`.
#[derive(Debug, Clone, Default)]
pub struct TransformChain {
    steps: Vec<Transform>,
}

impl TransformChain {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Builds the chain from a `TransformSpec`: repo-name rewrite first (if
    /// enabled), then template expansion (always run — it's a no-op on
    /// content with no recognized delimiters).
    pub fn from_spec(rewrite_repo_name: bool) -> Self {
        let mut chain = Self::new();
        if rewrite_repo_name {
            chain.steps.push(Transform::RepoName);
        }
        chain.steps.push(Transform::Template);
        chain
    }

    pub fn push(&mut self, step: Transform) -> &mut Self {
        self.steps.push(step);
        self
    }

    /// Runs every step in order. Binary content bypasses the chain entirely
    /// (the caller is expected to check `is_binary` first and skip calling
    /// this at all, but `run` also re-checks so the invariant holds even if
    /// a caller forgets).
    pub fn run(&self, bytes: &[u8], ctx: &TransformContext) -> Result<Vec<u8>, TransformError> {
        if is_binary(bytes) {
            return Ok(bytes.to_vec());
        }
        let mut current = bytes.to_vec();
        for step in &self.steps {
            current = step.apply(&current, ctx)?;
        }
        Ok(current)
    }
}

/// Detects binary content by the presence of a NUL byte in the first 8 KiB,
/// the same heuristic git itself uses for `core.autocrlf`/diff binary
/// detection.
pub fn is_binary(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(BINARY_SNIFF_WINDOW)];
    window.contains(&0)
}

/// Rewrites every occurrence of `source_repo` with `target_repo`, plus the
/// bare repo name (the part after the last `/`) where it appears as its own
/// word. Idempotent: if `target_repo` (or its bare name) is already present,
/// re-running produces no further change, because the only thing being
/// searched for is `source_repo`/its bare name, never `target_repo`.
fn rewrite_repo_name(bytes: &[u8], ctx: &TransformContext) -> Vec<u8> {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return bytes.to_vec();
    };

    let source_full = &ctx.source_repo;
    let target_full = &ctx.target_repo;
    let mut out = text.replace(source_full.as_str(), target_full.as_str());

    let source_bare = bare_name(source_full);
    let target_bare = bare_name(target_full);
    if source_bare != target_bare {
        out = replace_word(&out, source_bare, target_bare);
    }

    out.into_bytes()
}

fn bare_name(repo: &str) -> &str {
    repo.rsplit('/').next().unwrap_or(repo)
}

/// Replaces `needle` with `replacement` only where `needle` appears bounded
/// by non-identifier characters (or string edges) on both sides, so that
/// e.g. "widget" inside "widgets-lib" is left alone.
fn replace_word(haystack: &str, needle: &str, replacement: &str) -> String {
    if needle.is_empty() {
        return haystack.to_string();
    }
    let is_ident = |c: char| c.is_alphanumeric() || c == '_' || c == '-';
    let mut out = String::with_capacity(haystack.len());
    let bytes = haystack.as_bytes();
    let needle_len = needle.len();
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(needle) {
            let before_ok = i == 0
                || !is_ident(haystack[..i].chars().next_back().unwrap_or(' '));
            let after_idx = i + needle_len;
            let after_ok = after_idx >= haystack.len()
                || !is_ident(haystack[after_idx..].chars().next().unwrap_or(' '));
            if before_ok && after_ok {
                out.push_str(replacement);
                i = after_idx;
                continue;
            }
        }
        // advance by one char, not one byte, to stay on UTF-8 boundaries
        let ch = haystack[i..].chars().next().unwrap_or(bytes[i] as char);
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// Expands `{{NAME}}` and `${NAME}` in the same pass. Undefined variables
/// are left untouched, as are unbalanced/partial tokens (`{{FOO` with no
/// closing `}}`, or `${FOO` with no closing `}`).
fn expand_template(bytes: &[u8], ctx: &TransformContext) -> Vec<u8> {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return bytes.to_vec();
    };

    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '{' && chars.get(i + 1) == Some(&'{') {
            if let Some((name, end)) = scan_delimited(&chars, i + 2, '}', '}') {
                out.push_str(&resolve_variable(&name, ctx, "{{", "}}"));
                i = end;
                continue;
            }
        } else if chars[i] == '$' && chars.get(i + 1) == Some(&'{') {
            if let Some((name, end)) = scan_delimited(&chars, i + 2, '}', '\0') {
                out.push_str(&resolve_variable(&name, ctx, "${", "}"));
                i = end;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out.into_bytes()
}

/// Scans forward from `start` for an identifier followed by either `close`
/// immediately (single-delimiter case, `closer2 == '\0'`) or `close` twice
/// in a row (double-delimiter case, `${{...}}`-style). Returns the variable
/// name and the index just past the closing delimiter(s), or `None` if the
/// token never closes (left as literal text) or contains anything other
/// than identifier characters.
fn scan_delimited(
    chars: &[char],
    start: usize,
    close: char,
    close2: char,
) -> Option<(String, usize)> {
    let double = close2 != '\0';
    let mut j = start;
    let mut name = String::new();
    while j < chars.len() {
        let c = chars[j];
        if c == close {
            if double {
                if chars.get(j + 1) == Some(&close2) {
                    if name.is_empty() {
                        return None;
                    }
                    return Some((name, j + 2));
                }
                return None;
            }
            if name.is_empty() {
                return None;
            }
            return Some((name, j + 1));
        }
        if c.is_alphanumeric() || c == '_' {
            name.push(c);
            j += 1;
        } else {
            return None;
        }
    }
    None
}

fn resolve_variable(name: &str, ctx: &TransformContext, open: &str, close: &str) -> String {
    match ctx.variables.get(name) {
        Some(v) => v.clone(),
        // undefined: leave the original token form untouched, in whichever
        // syntax it was written (`{{NAME}}` or `${NAME}`)
        None => format!("{open}{name}{close}"),
    }
}
