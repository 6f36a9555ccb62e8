//! Small text helpers shared by the recorder and the trace store.

use sha2::{Digest, Sha256};

/// Truncate `s` to at most `max_chars` characters, respecting UTF-8 boundaries.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Trim, lower-case and collapse internal whitespace.
///
/// Returns `None` when nothing is left.
pub fn normalize_phrase(s: &str) -> Option<String> {
    let joined = s
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

/// Normalise a query list: each phrase normalised, blanks dropped, then
/// de-duplicated and sorted so order does not matter.
pub fn normalize_queries<S: AsRef<str>>(queries: &[S]) -> Vec<String> {
    let mut normalized: Vec<String> = queries
        .iter()
        .filter_map(|q| normalize_phrase(q.as_ref()))
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

/// SHA-256 over already-normalised queries plus geo/industry context.
pub fn session_fingerprint(
    queries: &[String],
    industry: Option<&str>,
    location: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    for q in queries {
        hasher.update(q.as_bytes());
        hasher.update([0x1e]);
    }
    hasher.update([0x1f]);
    hasher.update(industry.and_then(normalize_phrase).unwrap_or_default().as_bytes());
    hasher.update([0x1f]);
    hasher.update(location.and_then(normalize_phrase).unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_shorter_than_limit() {
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_truncate_exact_limit() {
        assert_eq!(truncate_chars("abcd", 4), "abcd");
    }

    #[test]
    fn test_truncate_multibyte() {
        // "–" is three bytes; slicing by bytes would panic
        let s = "Acme – Plumbing";
        assert_eq!(truncate_chars(s, 6), "Acme –");
    }

    #[test]
    fn test_normalize_phrase() {
        assert_eq!(
            normalize_phrase("  Plumbers   IN Springfield "),
            Some("plumbers in springfield".to_string())
        );
        assert_eq!(normalize_phrase("   "), None);
    }

    #[test]
    fn test_normalize_queries_order_and_dupes() {
        let a = normalize_queries(&["Plumbers Springfield", "  emergency plumber", ""]);
        let b = normalize_queries(&["emergency   PLUMBER", "plumbers springfield", "plumbers springfield"]);
        assert_eq!(a, b);
        assert_eq!(a, vec!["emergency plumber", "plumbers springfield"]);
    }

    #[test]
    fn test_fingerprint_depends_on_context() {
        let q = normalize_queries(&["plumbers"]);
        let base = session_fingerprint(&q, Some("Plumbing"), Some("Springfield, IL"));
        assert_eq!(base, session_fingerprint(&q, Some("plumbing "), Some("springfield,  il")));
        assert_ne!(base, session_fingerprint(&q, Some("plumbing"), None));
        assert_ne!(base, session_fingerprint(&q, None, Some("springfield, il")));
        assert_eq!(base.len(), 64);
    }
}
