//! Payload partitioning and per-chunk content digests.

use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Default chunk size: 512 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024;

/// One slice of a serialized backup payload. Chunk numbers are 1-based and
/// unique within an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub number: u32,
    pub data: Vec<u8>,
}

/// Fixed chunk arithmetic for one upload, computed before any chunk is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub total_chunks: u32,
    pub chunk_size: u32,
    pub total_size: u64,
}

impl ChunkPlan {
    /// `total_chunks == ceil(total_size / chunk_size)`, with a floor of one
    /// chunk so an empty payload still produces a completable upload.
    pub fn new(total_size: u64, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1) as u64;
        let total_chunks = (total_size.div_ceil(chunk_size)).max(1) as u32;
        Self {
            total_chunks,
            chunk_size: chunk_size as u32,
            total_size,
        }
    }
}

/// Split a payload into `ceil(len / chunk_size)` chunks. The last chunk may
/// be shorter; all others are exactly `chunk_size` bytes. Concatenating the
/// chunks in number order reconstructs the payload.
pub fn split_payload(payload: &[u8], chunk_size: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    if payload.is_empty() {
        return vec![Chunk {
            number: 1,
            data: Vec::new(),
        }];
    }
    payload
        .chunks(chunk_size)
        .enumerate()
        .map(|(i, data)| Chunk {
            number: i as u32 + 1,
            data: data.to_vec(),
        })
        .collect()
}

/// SHA-256 hex digest of one chunk's bytes. The store recomputes this and
/// rejects mismatches.
pub fn chunk_digest(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(64);
    for b in digest {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_matches_ceil_division() {
        let plan = ChunkPlan::new(1_300_000, DEFAULT_CHUNK_SIZE);
        assert_eq!(plan.total_chunks, 3);
        assert_eq!(plan.chunk_size, 524_288);
        assert_eq!(plan.total_size, 1_300_000);

        assert_eq!(ChunkPlan::new(524_288, DEFAULT_CHUNK_SIZE).total_chunks, 1);
        assert_eq!(ChunkPlan::new(524_289, DEFAULT_CHUNK_SIZE).total_chunks, 2);
        assert_eq!(ChunkPlan::new(0, DEFAULT_CHUNK_SIZE).total_chunks, 1);
    }

    #[test]
    fn split_reference_payload() {
        let payload = vec![0xABu8; 1_300_000];
        let chunks = split_payload(&payload, DEFAULT_CHUNK_SIZE);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].number, 1);
        assert_eq!(chunks[0].data.len(), 524_288);
        assert_eq!(chunks[1].data.len(), 524_288);
        assert_eq!(chunks[2].number, 3);
        assert_eq!(chunks[2].data.len(), 1_300_000 - 2 * 524_288);
        let rebuilt: usize = chunks.iter().map(|c| c.data.len()).sum();
        assert_eq!(rebuilt, 1_300_000);
    }

    #[test]
    fn split_round_trips() {
        for size in [0usize, 1, 7, 64, 65, 128, 1000] {
            let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let chunks = split_payload(&payload, 64);
            let expected = if size == 0 { 1 } else { size.div_ceil(64) };
            assert_eq!(chunks.len(), expected, "size {size}");

            let mut rebuilt = Vec::new();
            for (i, c) in chunks.iter().enumerate() {
                assert_eq!(c.number as usize, i + 1);
                rebuilt.extend_from_slice(&c.data);
            }
            assert_eq!(rebuilt, payload, "size {size}");
        }
    }

    #[test]
    fn digest_is_stable_and_tamper_evident() {
        let data = b"panorama bytes".to_vec();
        let d1 = chunk_digest(&data);
        assert_eq!(d1.len(), 64);
        assert_eq!(d1, chunk_digest(&data));

        let mut corrupted = data.clone();
        corrupted[0] ^= 0x01;
        assert_ne!(d1, chunk_digest(&corrupted));
    }
}
