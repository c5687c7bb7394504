use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const READ_BUF_BYTES: usize = 8192;

/// SHA-256 of the whole file, lower-case hex.
pub fn compute_file_hash(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; READ_BUF_BYTES];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex_encode_lower(&hasher.finalize()))
}

/// Compare the current content hash of `path` with `expected` (case-insensitive).
pub fn verify_integrity(path: &Path, expected: &str) -> io::Result<bool> {
    let current = compute_file_hash(path)?;
    let matches = current.eq_ignore_ascii_case(expected);
    if !matches {
        log::warn!(
            "Integrity check failed for {}: expected {}..., got {}...",
            path.display(),
            short_hash(expected),
            short_hash(&current)
        );
    }
    Ok(matches)
}

pub fn hex_encode_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len().saturating_mul(2));
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// First 16 hex chars, for log lines.
#[must_use]
pub fn short_hash(hash: &str) -> &str {
    hash.get(..16).unwrap_or(hash)
}
