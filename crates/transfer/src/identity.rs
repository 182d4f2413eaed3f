use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::TransferError;
use crate::types::Identity;

/// Derives an [`Identity`] from a canonical source path.
///
/// Implementations must be deterministic: independent senders of the same
/// file only meet at the same writer if they compute the same identity.
pub trait IdentityHasher: Send + Sync {
    fn identify(&self, canonical_path: &str) -> Identity;
}

/// SHA-256 of the path string, hex-encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Identity;

impl IdentityHasher for Sha256Identity {
    fn identify(&self, canonical_path: &str) -> Identity {
        Identity::new(checksum_bytes(canonical_path.as_bytes()))
    }
}

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
pub fn calculate_file_checksum(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
