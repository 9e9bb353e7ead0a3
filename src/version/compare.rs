//! Version ordering for release identifiers
//!
//! Release identifiers in the wild are not semver: the wrapped tool tags
//! date-like releases (`2023.11.16`), the host app uses `v3.3.1`, and
//! pre-release suffixes show up as extra tokens. Comparison is therefore
//! done over integer tuples rather than through `semver`.

use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareResult {
    /// Local is behind remote
    Older,
    Equal,
    /// Local is ahead of remote
    Newer,
}

impl From<Ordering> for CompareResult {
    fn from(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Less => CompareResult::Older,
            Ordering::Equal => CompareResult::Equal,
            Ordering::Greater => CompareResult::Newer,
        }
    }
}

/// Split a version identifier into numeric segments.
///
/// A leading `v`/`V` is stripped, `.`, `-` and `_` all act as separators and
/// any token that is not a plain integer counts as `0`. Integers too large
/// for a `u64` saturate instead of wrapping to zero.
///
/// Examples:
/// - "v2.0" -> [2, 0]
/// - "2023.11.16" -> [2023, 11, 16]
/// - "1.0.0-beta" -> [1, 0, 0, 0]
/// - "" -> [0]
pub fn version_segments(version: &str) -> Vec<u64> {
    let trimmed = version.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    trimmed
        .split(['.', '-', '_'])
        .map(segment_value)
        .collect()
}

fn segment_value(token: &str) -> u64 {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return 0;
    }
    token.parse::<u64>().unwrap_or(u64::MAX)
}

/// Compare a local version identifier against a remote one.
///
/// The shorter segment list is padded with zeros, so an empty identifier
/// compares like `0`.
pub fn compare_versions(local: &str, remote: &str) -> CompareResult {
    let mut local_parts = version_segments(local);
    let mut remote_parts = version_segments(remote);

    let len = local_parts.len().max(remote_parts.len());
    local_parts.resize(len, 0);
    remote_parts.resize(len, 0);

    local_parts.cmp(&remote_parts).into()
}
