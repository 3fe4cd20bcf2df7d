//! Dotted-path utilities shared by the store, cache and evaluator.
//!
//! A path segment may carry an expression sentinel (a leading `.`, written
//! `user..greeting` in dotted form) and the last segment of a storage path may
//! carry a variant qualifier suffix (`greeting:lang=es`). Relatedness checks
//! always compare qualifier-stripped base paths.

/// Split a dotted path into segments, folding the expression sentinel into
/// the segment it precedes: `"user..greeting"` -> `["user", ".greeting"]`.
pub(crate) fn split(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut sentinel = false;
    for part in path.split('.') {
        if part.is_empty() {
            sentinel = true;
            continue;
        }
        if sentinel {
            out.push(format!(".{part}"));
            sentinel = false;
        } else {
            out.push(part.to_string());
        }
    }
    out
}

/// Join a prefix and a relative path, treating an empty prefix as the root.
pub(crate) fn join(prefix: &str, rel: &str) -> String {
    if prefix.is_empty() {
        rel.to_string()
    } else if rel.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}.{rel}")
    }
}

/// Strip the variant qualifier suffix, if any. Only the last segment of a
/// storage path can be qualified, so cutting at the first `:` is enough.
pub(crate) fn base_of(path: &str) -> &str {
    match path.find(':') {
        Some(idx) => &path[..idx],
        None => path,
    }
}

/// Whether two storage paths refer to the same subtree, comparing
/// qualifier-stripped base paths: equal, ancestor, or descendant.
pub(crate) fn related(a: &str, b: &str) -> bool {
    let a = base_of(a);
    let b = base_of(b);
    if a == b {
        return true;
    }
    if a.len() > b.len() {
        a.starts_with(b) && a.as_bytes()[b.len()] == b'.'
    } else {
        b.starts_with(a) && b.as_bytes()[a.len()] == b'.'
    }
}
