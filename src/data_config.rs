//! The key comparison / formatting capability the mini allocator's
//! traversal engine relies on for its range predicate.
use std::cmp::Ordering;

pub trait DataConfig: Send + Sync {
    /// A total order over keys. The mini allocator never interprets key
    /// bytes itself; it only ever compares through this function.
    fn key_compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Copies `src` into `dst`. `dst` is always at least `src.len()`
    /// bytes.
    fn key_copy(&self, dst: &mut [u8], src: &[u8]) {
        dst[..src.len()].copy_from_slice(src);
    }

    /// Renders `key` for diagnostics (log lines, panic messages).
    fn key_to_string(&self, key: &[u8]) -> String;
}

/// Reference [`DataConfig`] that orders keys lexicographically by their
/// raw bytes, the natural Rust equivalent of a C `memcmp`-based
/// comparator. Most callers that do not have a domain-specific key
/// encoding can use this directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesDataConfig;

impl DataConfig for BytesDataConfig {
    fn key_compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn key_to_string(&self, key: &[u8]) -> String {
        match std::str::from_utf8(key) {
            Ok(s) => s.to_string(),
            Err(_) => key
                .iter()
                .map(|byte| format!("{:02x}", byte))
                .collect::<String>(),
        }
    }
}
