//! Shared validation predicates for names, topics and subjects.

/// Validation predicate: a single subject token, `[A-Za-z0-9_]+`.
pub(crate) fn is_subject_token(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validation predicate: dot-separated subject tokens with no empty token.
///
/// Wildcards (`*`, `>`) are rejected; only concrete subjects pass.
pub(crate) fn is_concrete_subject(s: &str) -> bool {
    !s.is_empty() && s.split('.').all(is_subject_token)
}

/// Validation predicate: identifier usable as a stream or consumer name.
pub(crate) fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Returns true when `subject` is captured by `filter`.
///
/// `*` matches exactly one token and `>` matches one or more trailing tokens.
pub fn subject_matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(f), Some(s)) if f == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
