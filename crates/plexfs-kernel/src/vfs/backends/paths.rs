//! Namespace path helpers shared by the backends.

/// Non-empty path segments. `//a///b/` yields `a`, `b`.
pub(crate) fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Split a path into its parent path and final segment.
pub(crate) fn split_parent(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    let (parent, name) = trimmed.rsplit_once('/').unwrap_or(("", trimmed));
    (!name.is_empty()).then_some((parent, name))
}

/// Whether link `target`, read relative to directory `base`, stays at or
/// below the namespace root.
///
/// `base` is walked with the same rules as `target`, so `.` segments in
/// it add no depth.
pub(crate) fn stays_within(base: &str, target: &str) -> bool {
    let start = if target.starts_with('/') { "" } else { base };
    let mut depth = 0usize;
    for seg in segments(start).chain(segments(target)) {
        match seg {
            "." => {}
            ".." => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            _ => depth += 1,
        }
    }
    true
}
