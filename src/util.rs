//! Internal helpers shared across the crate: secret masking, token
//! estimation, and stable request hashing.

use std::hash::{Hash, Hasher};

/// Masks an API key as `PREFIX****SUFFIX` (first four and last four
/// characters). Keys too short to split safely are fully masked.
pub fn mask_api_key(key: &str) -> String {
    if key.len() <= 8 {
        return "****".to_string();
    }
    format!("{}****{}", &key[..4], &key[key.len() - 4..])
}

/// Replaces occurrences of the configured API key, plus anything that looks
/// like a bearer key (`sk-...`), in free-form text. Applied to error details
/// and any URL embedded in them before they leave the transport.
pub fn mask_secrets(text: &str, api_key: Option<&str>) -> String {
    let mut out = match api_key {
        Some(key) if !key.is_empty() => text.replace(key, &mask_api_key(key)),
        _ => text.to_string(),
    };

    // Scan for key-shaped tokens the caller did not tell us about, e.g. a key
    // echoed back by a provider inside a URL query string.
    let mut masked = String::with_capacity(out.len());
    let bytes = out.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if out[i..].starts_with("sk-") {
            let start = i;
            let mut end = i + 3;
            while end < bytes.len()
                && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'-' || bytes[end] == b'_')
            {
                end += 1;
            }
            if end - start >= 12 {
                masked.push_str(&mask_api_key(&out[start..end]));
            } else {
                masked.push_str(&out[start..end]);
            }
            i = end;
        } else {
            let ch = out[i..].chars().next().unwrap_or('\u{FFFD}');
            masked.push(ch);
            i += ch.len_utf8();
        }
    }
    out = masked;
    out
}

/// Rough token count for cost and metrics purposes. Four characters per
/// token tracks the OpenAI tokenizers closely enough for estimates; callers
/// needing exact counts should use the provider's usage numbers.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// In-process stable hash of an already-serialized request body, used for
/// cache keys. Stability across processes is not required.
pub fn stable_hash(bytes: &[u8]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}
