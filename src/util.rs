//! Shared utility functions used across the codebase.

use sha1::{Digest, Sha1};

/// Parse a flag value.
///
/// Recognises `1`, `true`, `yes`, `y`, `on` (case-insensitive) as `true`;
/// everything else maps to `false`.
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// Lowercase hex sha1 of `data`, used as the on-chain content hash.
pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// URI-encode each `/`-separated segment of a file key.
///
/// Separators survive, so `docs/a b.txt` becomes `docs/a%20b.txt`.
/// Encoding is applied once; an already encoded key is encoded again.
pub fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Pointer record sequence: current time in milliseconds.
pub fn sequence_now() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}
