//! Signature generation using BLAKE3

use super::{ChunkHash, FileSignature, CHUNK_SIZE};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Buffer size for whole-file hashing
const HASH_BUF_SIZE: usize = 64 * 1024;

/// Hash a byte slice, hex encoded
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(blake3::hash(data).as_bytes())
}

/// Stream a file through BLAKE3 without chunking
///
/// This is the cheap pre-check: one sequential read, one hasher, no per-chunk
/// bookkeeping.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::from_read(path, e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; HASH_BUF_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(|e| Error::from_read(path, e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize().as_bytes()))
}

/// Generate the signature of `root/relative` in a single streaming pass
///
/// The full-content hash and every chunk hash are computed from the same read,
/// so the file is never read twice.
pub fn generate_signature(root: &Path, relative: &str) -> Result<FileSignature> {
    let path = root.join(relative);
    let mut file = File::open(&path).map_err(|e| Error::from_read(&path, e))?;
    let metadata = file.metadata().map_err(|e| Error::from_read(&path, e))?;

    let mut chunk_hashes = Vec::new();
    let mut file_hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut offset = 0u64;

    loop {
        let filled = read_full(&mut file, &mut buffer).map_err(|e| Error::from_read(&path, e))?;
        if filled == 0 {
            break;
        }

        let chunk = &buffer[..filled];
        file_hasher.update(chunk);
        chunk_hashes.push(ChunkHash {
            index: chunk_hashes.len(),
            offset,
            size: filled,
            hash: hash_bytes(chunk),
        });
        offset += filled as u64;

        if filled < CHUNK_SIZE {
            break;
        }
    }

    Ok(FileSignature {
        path: relative.to_string(),
        total_size: offset,
        full_hash: hex::encode(file_hasher.finalize().as_bytes()),
        chunk_size: CHUNK_SIZE,
        chunk_hashes,
        modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
        created_at: Utc::now(),
    })
}

/// Compute only the chunk hashes of a file, using `chunk_size` boundaries
pub(crate) fn chunk_hashes_of(path: &Path, chunk_size: usize) -> Result<Vec<String>> {
    let mut file = File::open(path).map_err(|e| Error::from_read(path, e))?;
    let mut buffer = vec![0u8; chunk_size];
    let mut hashes = Vec::new();

    loop {
        let filled = read_full(&mut file, &mut buffer).map_err(|e| Error::from_read(path, e))?;
        if filled == 0 {
            break;
        }
        hashes.push(hash_bytes(&buffer[..filled]));
        if filled < chunk_size {
            break;
        }
    }

    Ok(hashes)
}

/// Generate a signature from a byte slice
pub fn generate_signature_from_bytes(path: &str, data: &[u8], chunk_size: usize) -> FileSignature {
    let chunk_hashes = data
        .chunks(chunk_size)
        .enumerate()
        .map(|(i, chunk)| ChunkHash {
            index: i,
            offset: (i * chunk_size) as u64,
            size: chunk.len(),
            hash: hash_bytes(chunk),
        })
        .collect();

    FileSignature {
        path: path.to_string(),
        total_size: data.len() as u64,
        full_hash: hash_bytes(data),
        chunk_size,
        chunk_hashes,
        modified_at: None,
        created_at: Utc::now(),
    }
}

/// Fill `buf` as far as the reader allows; short only at end of file
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_generate_signature_tiles_file() {
        let tmp = TempDir::new().unwrap();
        let data: Vec<u8> = (0..(CHUNK_SIZE * 2 + 100)).map(|i| (i % 251) as u8).collect();
        fs::write(tmp.path().join("big.bin"), &data).unwrap();

        let sig = generate_signature(tmp.path(), "big.bin").unwrap();
        assert_eq!(sig.total_size, data.len() as u64);
        assert_eq!(sig.chunk_count(), 3);
        assert_eq!(sig.chunk_hashes[2].size, 100);
        assert!(sig.is_well_formed());
        assert_eq!(sig.full_hash, hash_bytes(&data));
    }

    #[test]
    fn test_file_and_bytes_signatures_agree() {
        let tmp = TempDir::new().unwrap();
        let data = vec![42u8; CHUNK_SIZE + 17];
        fs::write(tmp.path().join("x.bin"), &data).unwrap();

        let from_file = generate_signature(tmp.path(), "x.bin").unwrap();
        let from_bytes = generate_signature_from_bytes("x.bin", &data, CHUNK_SIZE);
        assert_eq!(from_file.full_hash, from_bytes.full_hash);
        assert_eq!(from_file.chunk_hashes, from_bytes.chunk_hashes);
    }

    #[test]
    fn test_empty_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("empty"), b"").unwrap();
        let sig = generate_signature(tmp.path(), "empty").unwrap();
        assert_eq!(sig.total_size, 0);
        assert!(sig.chunk_hashes.is_empty());
        assert!(sig.is_well_formed());
    }

    #[test]
    fn test_vanished_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = generate_signature(tmp.path(), "gone.html").unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_hash_file_matches_full_hash() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), b"hello world").unwrap();
        assert_eq!(
            hash_file(&tmp.path().join("a.txt")).unwrap(),
            hash_bytes(b"hello world")
        );
    }
}
