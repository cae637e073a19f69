//! Hashing utilities.

use sha2::{Digest, Sha256};
use subtle_encoding::hex;

/// Compute the SHA256 hash of the given string and return its lowercase
/// hexadecimal representation.
pub fn sha256<S: AsRef<str>>(s: S) -> String {
    let digest = Sha256::digest(s.as_ref().as_bytes());
    // Hex encoding only ever produces ASCII.
    hex::encode(digest).into_iter().map(char::from).collect()
}
