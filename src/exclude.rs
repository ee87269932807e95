//! Gitignore-style exclude-pattern matching for directory mappings.
//!
//! Implements a glob-to-regex conversion covering full gitignore path
//! semantics: `*` within a path segment, `**` across segments, a trailing
//! `/` restricting the match to directories, and an absent leading `/`
//! meaning "matches at any depth" (anchored only when the pattern itself
//! starts with `/`).

use regex::Regex;

/// One compiled exclude pattern.
#[derive(Debug, Clone)]
pub struct ExcludePattern {
    source: String,
    dir_only: bool,
    regex: Regex,
}

impl ExcludePattern {
    pub fn compile(pattern: &str) -> Result<Self, String> {
        let dir_only = pattern.ends_with('/');
        let anchored = pattern.starts_with('/');
        let body = pattern.trim_start_matches('/').trim_end_matches('/');

        let regex_src = glob_to_regex(body, anchored);
        let regex = Regex::new(&regex_src)
            .map_err(|e| format!("invalid exclude pattern '{pattern}': {e}"))?;

        Ok(Self {
            source: pattern.to_string(),
            dir_only,
            regex,
        })
    }

    /// `rel_path` is `/`-separated and relative to the mapping's source
    /// root. `is_dir` distinguishes a directory entry (needed for trailing
    /// `/` patterns); for files being matched individually, pass `false`.
    pub fn matches(&self, rel_path: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            // a dir-only pattern can still exclude files *beneath* that
            // directory; the caller is expected to have already excluded
            // the directory itself and thus its descendants, but as a
            // defensive fallback also match path prefixes.
            return self.matches_as_ancestor(rel_path);
        }
        self.regex.is_match(rel_path)
    }

    fn matches_as_ancestor(&self, rel_path: &str) -> bool {
        rel_path
            .split('/')
            .scan(String::new(), |acc, seg| {
                if !acc.is_empty() {
                    acc.push('/');
                }
                acc.push_str(seg);
                Some(acc.clone())
            })
            .any(|prefix| self.regex.is_match(&prefix))
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Converts a gitignore-style glob body into an anchored regex source.
/// `anchored` means the pattern must match from the start of the relative
/// path; otherwise it may match starting at any path-segment boundary.
fn glob_to_regex(body: &str, anchored: bool) -> String {
    let mut out = String::from("^");
    if !anchored {
        out.push_str("(?:.*/)?");
    }

    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // consume an optional following '/'
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        out.push_str("(?:.*/)?");
                    } else {
                        out.push_str(".*");
                    }
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            '.' => out.push_str(r"\."),
            '+' | '(' | ')' | '|' | '^' | '$' | '{' | '}' | '[' | ']' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            other => out.push(other),
        }
    }
    out.push('$');
    out
}

/// A set of compiled exclude patterns for one directory mapping.
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    patterns: Vec<ExcludePattern>,
}

impl ExcludeSet {
    pub fn compile(patterns: &[String]) -> Result<Self, String> {
        let patterns = patterns
            .iter()
            .map(|p| ExcludePattern::compile(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_excluded(&self, rel_path: &str, is_dir: bool) -> bool {
        self.patterns.iter().any(|p| p.matches(rel_path, is_dir))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
