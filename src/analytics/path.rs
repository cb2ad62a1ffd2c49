//! Request path classification.
//!
//! A path is recorded only when it survives, in order: admin-route exclusion,
//! visitor role exclusion, configured glob patterns and the static-asset
//! heuristic. Truncation to [`MAX_PATH_LEN`] happens last so exclusion
//! patterns always see the full path.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::constants::{IMAGE_EXTENSIONS, MAX_PATH_LEN, ROLE_ANONYMOUS, ROLE_AUTHENTICATED};

/// `/foo/bar/` -> `/foo/bar`, `` -> `/`, `//` -> `/`.
pub fn normalize_path(raw: &str) -> String {
    let trimmed = raw.trim_matches('/');
    let mut out = String::with_capacity(trimmed.len() + 1);
    out.push('/');
    out.push_str(trimmed);
    out
}

/// Clamp to [`MAX_PATH_LEN`] bytes without splitting a UTF-8 sequence.
pub fn truncate_path(path: &str) -> &str {
    if path.len() <= MAX_PATH_LEN {
        return path;
    }
    let mut end = MAX_PATH_LEN;
    while !path.is_char_boundary(end) {
        end -= 1;
    }
    &path[..end]
}

/// Matches `/admin`, `/admin/...` and language-prefixed `/{xx}/admin/...`
/// where the prefix is two or three lowercase ASCII letters.
pub fn is_admin_path(path: &str) -> bool {
    if is_under(path, "/admin") {
        return true;
    }
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    match rest.split_once('/') {
        Some((lang, tail))
            if (2..=3).contains(&lang.len()) && lang.bytes().all(|b| b.is_ascii_lowercase()) =>
        {
            tail == "admin" || tail.starts_with("admin/")
        }
        _ => false,
    }
}

fn is_under(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// One line of the excluded-paths setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    /// `<front>`: the site root.
    Front,
    /// Case-sensitive glob; `*` matches any run of characters including `/`.
    Glob(String),
}

impl PathPattern {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if line == "<front>" {
            return Some(Self::Front);
        }
        Some(Self::Glob(line.to_string()))
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Front => path == "/",
            Self::Glob(pattern) => glob_match(pattern.as_bytes(), path.as_bytes()),
        }
    }
}

/// Newline-delimited patterns; blank lines are ignored.
pub fn parse_patterns(text: &str) -> Vec<PathPattern> {
    text.lines().filter_map(PathPattern::parse).collect()
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0usize, 0usize);
    // 最近一次 `*` 的位置，以及它当前吞掉的文本位置
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star, mark)) = backtrack {
            p = star + 1;
            t = mark + 1;
            backtrack = Some((star, mark + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|b| *b == b'*')
}

/// Which trailing file extensions mark a request as a static asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetPolicy {
    /// Any `.<alphanumeric>` suffix.
    #[default]
    AnyExtension,
    /// Only well-known image extensions.
    ImagesOnly,
    Off,
}

impl AssetPolicy {
    pub fn excludes(self, path: &str) -> bool {
        let Some(ext) = trailing_extension(path) else {
            return false;
        };
        match self {
            Self::AnyExtension => true,
            Self::ImagesOnly => IMAGE_EXTENSIONS
                .iter()
                .any(|image| image.eq_ignore_ascii_case(ext)),
            Self::Off => false,
        }
    }
}

fn trailing_extension(path: &str) -> Option<&str> {
    let (_, ext) = path.rsplit_once('.')?;
    if !ext.is_empty() && ext.bytes().all(|b| b.is_ascii_alphanumeric()) {
        Some(ext)
    } else {
        None
    }
}

/// Roles of whoever made the request. Anonymous visitors carry the implicit
/// `anonymous` role, signed-in visitors carry `authenticated` plus their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visitor {
    roles: BTreeSet<String>,
}

impl Visitor {
    pub fn anonymous() -> Self {
        Self {
            roles: BTreeSet::from([ROLE_ANONYMOUS.to_string()]),
        }
    }

    pub fn authenticated<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set: BTreeSet<String> = roles
            .into_iter()
            .map(Into::into)
            .filter(|role| !role.is_empty() && role != ROLE_ANONYMOUS)
            .collect();
        set.insert(ROLE_AUTHENTICATED.to_string());
        Self { roles: set }
    }

    pub fn is_anonymous(&self) -> bool {
        !self.roles.contains(ROLE_AUTHENTICATED)
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AdminRoute,
    ExcludedRole,
    ExcludedPath,
    Asset,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AdminRoute => "admin_route",
            Self::ExcludedRole => "excluded_role",
            Self::ExcludedPath => "excluded_path",
            Self::Asset => "asset",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Eligible; carries the normalized, truncated path to record.
    Record(String),
    Skip(SkipReason),
}

impl Verdict {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Record(_))
    }
}

/// Compiled form of the exclusion settings, shared read-only by every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionRules {
    pub exclude_admin_paths: bool,
    pub excluded_roles: BTreeSet<String>,
    pub patterns: Vec<PathPattern>,
    pub asset_policy: AssetPolicy,
}

impl ExclusionRules {
    /// Callers must only invoke this for successful (200) responses.
    pub fn classify(&self, raw_path: &str, visitor: &Visitor) -> Verdict {
        let path = normalize_path(raw_path);

        if self.exclude_admin_paths && is_admin_path(&path) {
            return Verdict::Skip(SkipReason::AdminRoute);
        }
        if !self.excluded_roles.is_disjoint(visitor.roles()) {
            return Verdict::Skip(SkipReason::ExcludedRole);
        }
        if self.matches_pattern(&path) {
            return Verdict::Skip(SkipReason::ExcludedPath);
        }
        if self.asset_policy.excludes(&path) {
            return Verdict::Skip(SkipReason::Asset);
        }

        Verdict::Record(truncate_path(&path).to_string())
    }

    /// Path-only rules (admin, patterns, assets); used to find already-stored
    /// paths that current settings would no longer record.
    pub fn is_path_excluded(&self, path: &str) -> bool {
        (self.exclude_admin_paths && is_admin_path(path))
            || self.matches_pattern(path)
            || self.asset_policy.excludes(path)
    }

    fn matches_pattern(&self, path: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(path))
    }
}
