use std::cmp::Ordering;

use semver::Version;

/// Order two release versions, or `None` if either is not a version.
///
/// A leading `v` is ignored and short forms such as `2` or `2.1` are read as
/// `2.0.0` and `2.1.0`. Pre-release and build suffixes are kept.
#[must_use]
pub fn compare_versions(left: &str, right: &str) -> Option<Ordering> {
    Some(parse_release(left)?.cmp(&parse_release(right)?))
}

/// Whether `latest` is strictly newer than `current`.
///
/// Versions that cannot be parsed count as newer whenever the strings differ.
#[must_use]
pub fn is_newer_version(latest: &str, current: &str) -> bool {
    compare_versions(latest, current).map_or_else(
        || trim_v(latest) != trim_v(current),
        Ordering::is_gt,
    )
}

/// Whether `candidate` is strictly older than `installed`.
///
/// Never guesses: unparseable input is not a downgrade.
#[must_use]
pub fn is_older_version(candidate: &str, installed: &str) -> bool {
    compare_versions(candidate, installed).is_some_and(Ordering::is_lt)
}

fn trim_v(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

fn parse_release(version: &str) -> Option<Version> {
    let version = trim_v(version.trim());
    if let Ok(parsed) = Version::parse(version) {
        return Some(parsed);
    }

    let split = version.find(['-', '+']).unwrap_or(version.len());
    let (numbers, suffix) = version.split_at(split);
    let components = numbers
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    let (major, minor) = match components.as_slice() {
        [major] => (*major, 0),
        [major, minor] => (*major, *minor),
        _ => return None,
    };

    Version::parse(&format!("{major}.{minor}.0{suffix}")).ok()
}
