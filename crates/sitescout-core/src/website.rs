//! Website normalisation for the directory's unique key.
//!
//! `https://www.AcmePlumbing.com/contact?ref=x` and `acmeplumbing.com` are the
//! same business, so both normalise to the bare lower-cased host.

use url::Url;

/// Normalise a URL or bare domain to its host without `www.`.
///
/// Returns `None` when no plausible host can be extracted.
pub fn normalize_website(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let parsed = Url::parse(&candidate).ok()?;
    let host = parsed.host_str()?.trim_end_matches('.').to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    if host.is_empty() || !host.contains('.') {
        return None;
    }
    Some(host)
}

/// Whether two URLs/domains normalise to the same host.
pub fn hosts_match(a: &str, b: &str) -> bool {
    match (normalize_website(a), normalize_website(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}
