//! Fixed-capacity map keys and path normalization.
//!
//! Probe strings arrive as NUL-terminated buffers of a declared size. Keys keep
//! that shape: a `FixedKey<N>` is always exactly `N` bytes, zero-padded after
//! its content. Two keys are equal iff their content bytes are equal.
//!
//! Compiled-file paths are collapsed to their parent directory before counting
//! (`/srv/app/vendor/a.php` and `/srv/app/vendor/b.php` share one key), which
//! keeps the cardinality of the compiled-files map bounded.

use phpscope_common::{MAX_CLASS_LEN, MAX_METHOD_LEN, MAX_STR_LEN};
use std::borrow::Cow;
use std::fmt;

/// Key for compiled-file counters (path or directory prefix)
pub type PathKey = FixedKey<MAX_STR_LEN>;

/// Key for exception counters (class name)
pub type ClassKey = FixedKey<MAX_CLASS_LEN>;

/// Request method label (`GET`, `POST`, ...)
pub type MethodKey = FixedKey<MAX_METHOD_LEN>;

/// Byte string of at most `N` bytes, stored inline and zero-padded
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedKey<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> FixedKey<N> {
    /// Build a key from raw bytes.
    ///
    /// Content ends at the first NUL or after `N` bytes, whichever comes
    /// first; anything beyond is discarded.
    #[must_use]
    pub fn from_bytes(raw: &[u8]) -> Self {
        let mut bytes = [0u8; N];
        let content = &raw[..content_len(raw, N)];
        bytes[..content.len()].copy_from_slice(content);
        Self { bytes }
    }

    /// Declared capacity in bytes
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Content bytes (up to the first NUL)
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len()]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        content_len(&self.bytes, N)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        N == 0 || self.bytes[0] == 0
    }

    /// Content as text, replacing invalid UTF-8
    #[must_use]
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    /// Cut the key at its last `/` (see [`truncate_to_parent`])
    pub fn truncate_to_parent(&mut self) -> Option<usize> {
        truncate_to_parent(&mut self.bytes, N)
    }
}

impl<const N: usize> Default for FixedKey<N> {
    fn default() -> Self {
        Self { bytes: [0u8; N] }
    }
}

impl<const N: usize> fmt::Debug for FixedKey<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedKey<{N}>({:?})", self.to_string_lossy())
    }
}

impl<const N: usize> fmt::Display for FixedKey<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

/// Length of the content in `buf`, bounded by `max_len` and the buffer size
fn content_len(buf: &[u8], max_len: usize) -> usize {
    let bound = max_len.min(buf.len());
    buf[..bound].iter().position(|&b| b == 0).unwrap_or(bound)
}

/// Strip a path down to its parent-directory prefix, in place.
///
/// Scans the content (the bytes before the first NUL, at most `max_len`)
/// backward for the last `/`. Every byte after that separator up to `max_len`
/// is overwritten with NUL; the separator itself is kept. Returns the index of
/// the separator, or `None` when there is none, in which case the buffer is
/// left untouched.
///
/// The scan starts at the first NUL rather than at `max_len`, so bytes left
/// behind a terminator are never taken for path content: `"/a/b\0/zz"` cuts
/// at index 2, not 5. Probe buffers are zero padded, so both readings agree
/// on every string the probes produce.
pub fn truncate_to_parent(buf: &mut [u8], max_len: usize) -> Option<usize> {
    let bound = max_len.min(buf.len());
    let end = content_len(buf, bound);
    let cut = buf[..end].iter().rposition(|&b| b == b'/')?;
    buf[cut + 1..bound].fill(0);
    Some(cut)
}

/// How compiled-file paths are turned into counter keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyNormalizer {
    /// Count by parent directory (`/usr/lib/php/foo.php` → `/usr/lib/php/`)
    #[default]
    Directory,
    /// Count by the full path; higher cardinality, more eviction churn
    FullPath,
}

impl KeyNormalizer {
    #[must_use]
    pub fn normalize(self, raw: &[u8]) -> PathKey {
        let mut key = PathKey::from_bytes(raw);
        if self == Self::Directory {
            key.truncate_to_parent();
        }
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_php_path() {
        let mut key = PathKey::from_bytes(b"/usr/lib/php/foo.php");
        let cut = key.truncate_to_parent();

        assert_eq!(cut, Some(12));
        assert_eq!(key.as_bytes(), b"/usr/lib/php/");
    }

    #[test]
    fn test_truncate_without_separator_is_untouched() {
        let mut buf = *b"index.php\0\0\0";
        let before = buf;

        assert_eq!(truncate_to_parent(&mut buf, 12), None);
        assert_eq!(buf, before);
    }

    #[test]
    fn test_truncate_empty_buffer() {
        let mut buf = [0u8; 16];
        assert_eq!(truncate_to_parent(&mut buf, 16), None);

        let mut nothing: [u8; 0] = [];
        assert_eq!(truncate_to_parent(&mut nothing, 256), None);
    }

    #[test]
    fn test_truncate_respects_max_len() {
        // The only separator lies beyond max_len
        let mut buf = *b"abcdef/x";
        assert_eq!(truncate_to_parent(&mut buf, 4), None);
        assert_eq!(&buf, b"abcdef/x");

        // max_len larger than the buffer is clamped
        let mut buf = *b"a/bc";
        assert_eq!(truncate_to_parent(&mut buf, 256), Some(1));
        assert_eq!(&buf, b"a/\0\0");
    }

    #[test]
    fn test_truncate_trailing_slash() {
        let mut key = PathKey::from_bytes(b"/var/www/");
        assert_eq!(key.truncate_to_parent(), Some(8));
        assert_eq!(key.as_bytes(), b"/var/www/");
    }

    #[test]
    fn test_truncate_ignores_bytes_after_terminator() {
        let mut buf = *b"/a/b\0/zz";
        assert_eq!(truncate_to_parent(&mut buf, 8), Some(2));
        assert_eq!(&buf, b"/a/\0\0\0\0\0");
    }

    #[test]
    fn test_from_bytes_truncates_to_capacity() {
        let key = FixedKey::<4>::from_bytes(b"Exception");
        assert_eq!(key.as_bytes(), b"Exce");
        assert_eq!(key.len(), 4);
        assert_eq!(key.capacity(), 4);
    }

    #[test]
    fn test_from_bytes_stops_at_nul() {
        let a = ClassKey::from_bytes(b"RuntimeException\0garbage");
        let b = ClassKey::from_bytes(b"RuntimeException");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "RuntimeException");
    }

    #[test]
    fn test_empty_key() {
        let key = ClassKey::from_bytes(b"");
        assert!(key.is_empty());
        assert_eq!(key, ClassKey::default());
    }

    #[test]
    fn test_lossy_display_of_invalid_utf8() {
        let key = PathKey::from_bytes(&[b'/', 0xff, b'/']);
        assert_eq!(key.to_string(), "/\u{fffd}/");
    }

    #[test]
    fn test_normalizer_granularity() {
        let raw = b"/srv/app/vendor/autoload.php";
        assert_eq!(KeyNormalizer::Directory.normalize(raw).as_bytes(), b"/srv/app/vendor/");
        assert_eq!(KeyNormalizer::FullPath.normalize(raw).as_bytes(), raw);
    }
}
