//! SHA-256 digests of object content.
//!
//! The scan service identifies samples by SHA-256. Hashing the fetched
//! bytes locally lets the scanner notice when the service reports a
//! different hash than the content it was sent.

use sha2::{Digest, Sha256};

/// Computes the lowercase hex SHA-256 digest of `data`.
///
/// # Examples
///
/// ```rust
/// use bucketguard::core::hasher::sha256_hex;
///
/// assert_eq!(
///     sha256_hex(b"abc"),
///     "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
/// );
/// ```
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Returns `true` if two hex digests are equal, ignoring case.
pub fn digests_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
