//! Privacy helpers for HTTP metadata.
//!
//! Credentials travel in request headers and come back in cookies; nothing
//! in this module ever returns them to a caller or writes them to a log.

use std::collections::BTreeMap;

/// Header names (lowercase) that are stripped from caller-facing responses.
pub const SENSITIVE_HEADERS: [&str; 3] = ["authorization", "set-cookie", "cookie"];

/// Case-insensitive check against [`SENSITIVE_HEADERS`].
pub fn is_sensitive_header(name: &str) -> bool {
    SENSITIVE_HEADERS.iter().any(|sensitive| name.eq_ignore_ascii_case(sensitive))
}

/// Drop every sensitive header, keeping the rest with their original casing.
pub fn filter_sensitive_headers<I, K, V>(headers: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut kept = BTreeMap::new();
    let mut dropped = 0usize;
    for (name, value) in headers {
        let name = name.into();
        if is_sensitive_header(&name) {
            dropped += 1;
            continue;
        }
        kept.insert(name, value.into());
    }

    #[cfg(feature = "observability")]
    if dropped > 0 {
        tracing::trace!(dropped, "removed sensitive response headers");
    }
    #[cfg(not(feature = "observability"))]
    let _ = dropped;

    kept
}

/// Mask a secret for logging, keeping only a short prefix.
///
/// Secrets of eight characters or fewer are fully masked.
pub fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}
