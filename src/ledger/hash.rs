// src/ledger/hash.rs

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use blake3::Hasher;

use crate::fs::FileSystem;
use crate::ledger::nanos_since_epoch;

/// Compute the blake3 hash of a single file.
pub fn compute_file_hash(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file = fs
        .open_read(path)
        .with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Modification time (ns) and content hash of a file.
pub fn fingerprint(fs: &dyn FileSystem, path: &Path) -> Result<(u64, String)> {
    let modified = fs.modified(path)?;
    let hash = compute_file_hash(fs, path)?;
    Ok((nanos_since_epoch(modified), hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn identical_content_hashes_identically() {
        let fs = MockFileSystem::new();
        fs.add_file("a.txt", "same");
        fs.add_file("b.txt", "same");
        fs.add_file("c.txt", "different");

        let a = compute_file_hash(&fs, Path::new("a.txt")).unwrap();
        let b = compute_file_hash(&fs, Path::new("b.txt")).unwrap();
        let c = compute_file_hash(&fs, Path::new("c.txt")).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn fingerprint_tracks_modification_time() {
        let fs = MockFileSystem::new();
        fs.add_file("a.txt", "x");
        let (first, _) = fingerprint(&fs, Path::new("a.txt")).unwrap();
        fs.add_file("a.txt", "x");
        let (second, _) = fingerprint(&fs, Path::new("a.txt")).unwrap();
        assert!(second > first);
    }
}
