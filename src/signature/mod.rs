//! File signatures and the per-project signature cache

pub mod generate;
pub mod store;

pub use generate::{generate_signature, generate_signature_from_bytes, hash_bytes, hash_file};
pub use store::SignatureStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Chunk size used to segment files for delta comparison (64KB)
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Fingerprint of a file's content at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSignature {
    /// Path relative to the project root
    pub path: String,

    /// Total file size
    pub total_size: u64,

    /// BLAKE3 hash of the whole content (hex)
    pub full_hash: String,

    /// Chunk size used for `chunk_hashes`
    pub chunk_size: usize,

    /// Per-chunk hashes, tiling `[0, total_size)`
    pub chunk_hashes: Vec<ChunkHash>,

    /// Last modification time of the file when signed
    pub modified_at: Option<DateTime<Utc>>,

    /// When the signature was computed
    pub created_at: DateTime<Utc>,
}

impl FileSignature {
    /// Get the number of chunks
    pub fn chunk_count(&self) -> usize {
        self.chunk_hashes.len()
    }

    /// Check that the chunk list exactly covers the file with no gaps or overlaps
    pub fn is_well_formed(&self) -> bool {
        let mut expected = 0u64;
        for (i, chunk) in self.chunk_hashes.iter().enumerate() {
            if chunk.index != i || chunk.offset != expected || chunk.size == 0 {
                return false;
            }
            if chunk.size > self.chunk_size {
                return false;
            }
            expected += chunk.size as u64;
        }
        expected == self.total_size
    }
}

/// Hash of one chunk of a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkHash {
    /// Chunk index (0-based)
    pub index: usize,

    /// Offset in the file
    pub offset: u64,

    /// Actual length of this chunk (may be less than chunk_size for the last one)
    pub size: usize,

    /// BLAKE3 hash of the chunk (hex)
    pub hash: String,
}

/// All known signatures of one project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureCache {
    /// Owning project
    pub project_id: String,

    /// Signatures keyed by relative path
    pub signatures: BTreeMap<String, FileSignature>,

    /// Last time an entry was added or removed
    pub updated_at: DateTime<Utc>,
}

impl SignatureCache {
    /// Create an empty cache for a project
    pub fn new(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            signatures: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn get(&self, path: &str) -> Option<&FileSignature> {
        self.signatures.get(path)
    }

    /// Insert or replace a signature
    pub fn upsert(&mut self, signature: FileSignature) {
        self.signatures.insert(signature.path.clone(), signature);
        self.updated_at = Utc::now();
    }

    /// Remove a signature, returning whether it existed
    pub fn remove(&mut self, path: &str) -> bool {
        let removed = self.signatures.remove(path).is_some();
        if removed {
            self.updated_at = Utc::now();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_upsert_and_remove() {
        let mut cache = SignatureCache::new("p1");
        cache.upsert(generate_signature_from_bytes("a.txt", b"hello", CHUNK_SIZE));
        cache.upsert(generate_signature_from_bytes("a.txt", b"hello again", CHUNK_SIZE));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a.txt").unwrap().total_size, 11);

        assert!(cache.remove("a.txt"));
        assert!(!cache.remove("a.txt"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_well_formed_detects_gap() {
        let mut sig = generate_signature_from_bytes("b.bin", &[7u8; 100], 32);
        assert!(sig.is_well_formed());

        sig.chunk_hashes[1].offset += 1;
        assert!(!sig.is_well_formed());
    }
}
