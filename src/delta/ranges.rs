//! Coalesce changed chunks into byte ranges
//!
//! A modified file is sent as a handful of ranged writes instead of one write
//! per chunk. Neighbouring changed chunks are merged, and the final range is
//! clipped to the file size since the last chunk is usually short.

use super::{DeltaStatus, FileDelta};
use serde::{Deserialize, Serialize};

/// A contiguous byte range `[offset, offset + length)` of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Exclusive end offset
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Byte ranges to send for a delta
///
/// Returns `None` when the whole file must be sent (new, small, or a modified
/// file without chunk indices), and an empty list when nothing is sent.
pub fn changed_ranges(delta: &FileDelta, chunk_size: usize) -> Option<Vec<ByteRange>> {
    match delta.status {
        DeltaStatus::Unchanged | DeltaStatus::Deleted => Some(Vec::new()),
        DeltaStatus::New | DeltaStatus::SmallFile => None,
        DeltaStatus::Modified if delta.changed_chunks.is_empty() => None,
        DeltaStatus::Modified => Some(coalesce_chunks(
            &delta.changed_chunks,
            chunk_size as u64,
            delta.total_size,
        )),
    }
}

/// Merge chunk indices into ranges, clipping to `total_size`
pub fn coalesce_chunks(indices: &[usize], chunk_size: u64, total_size: u64) -> Vec<ByteRange> {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut ranges: Vec<ByteRange> = Vec::new();

    for index in sorted {
        let offset = index as u64 * chunk_size;
        if offset >= total_size {
            continue;
        }
        let length = chunk_size.min(total_size - offset);

        if let Some(last) = ranges.last_mut() {
            if last.end() == offset {
                last.length += length;
                continue;
            }
        }
        ranges.push(ByteRange::new(offset, length));
    }

    ranges
}

/// Total bytes covered by a list of ranges
pub fn ranges_len(ranges: &[ByteRange]) -> u64 {
    ranges.iter().map(|r| r.length).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalesce_adjacent() {
        let ranges = coalesce_chunks(&[0, 1, 2, 5, 7, 8], 10, 100);
        assert_eq!(
            ranges,
            vec![
                ByteRange::new(0, 30),
                ByteRange::new(50, 10),
                ByteRange::new(70, 20),
            ]
        );
    }

    #[test]
    fn test_coalesce_clips_last_chunk() {
        let ranges = coalesce_chunks(&[3, 4], 10, 45);
        assert_eq!(ranges, vec![ByteRange::new(30, 15)]);
        assert_eq!(ranges_len(&ranges), 15);
    }

    #[test]
    fn test_coalesce_unsorted_with_duplicates() {
        let ranges = coalesce_chunks(&[2, 0, 2, 1], 4, 100);
        assert_eq!(ranges, vec![ByteRange::new(0, 12)]);
    }

    #[test]
    fn test_changed_ranges_by_status() {
        let new = FileDelta::new("a", DeltaStatus::New, 10, 10, vec![]);
        assert_eq!(changed_ranges(&new, 4), None);

        let same = FileDelta::new("b", DeltaStatus::Unchanged, 10, 0, vec![]);
        assert_eq!(changed_ranges(&same, 4), Some(vec![]));

        let modified = FileDelta::new("c", DeltaStatus::Modified, 10, 2, vec![2]);
        assert_eq!(changed_ranges(&modified, 4), Some(vec![ByteRange::new(8, 2)]));
    }
}
