use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of the page text, used as the change fingerprint.
pub fn compute_digest(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}
