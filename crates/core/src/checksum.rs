#![forbid(unsafe_code)]

use crc32fast::Hasher;

pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// CRC32 of `A ++ B` given `crc32(A)`, `crc32(B)` and the length of `B`.
pub fn crc32_combine(crc1: u32, crc2: u32, len2: u64) -> u32 {
    let mut first = Hasher::new_with_initial_len(crc1, 0);
    let second = Hasher::new_with_initial_len(crc2, len2);
    first.combine(&second);
    first.finalize()
}

/// Checksum metadata of one persisted chunk; the payload itself is not needed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkChecksum {
    pub index: u64,
    pub crc32: u32,
    pub size: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CombinedChecksum {
    pub crc32: u32,
    pub bytesize: u64,
}

/// Folds chunk CRC32 values into the CRC32 of the whole trace.
///
/// Chunks are combined in ascending index order. Every chunk but the last
/// contributes exactly `chunk_size` bytes; the last contributes its stored size.
pub fn combine_chunks(chunks: &[ChunkChecksum], chunk_size: u64) -> CombinedChecksum {
    let mut ordered: Vec<&ChunkChecksum> = chunks.iter().collect();
    ordered.sort_by_key(|chunk| chunk.index);
    let last_index = ordered.last().map(|chunk| chunk.index);

    ordered.into_iter().fold(
        CombinedChecksum {
            crc32: 0,
            bytesize: 0,
        },
        |acc, chunk| {
            let len = if Some(chunk.index) == last_index {
                chunk.size
            } else {
                chunk_size
            };
            CombinedChecksum {
                crc32: crc32_combine(acc.crc32, chunk.crc32, len),
                bytesize: acc.bytesize + len,
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunked(data: &[u8], chunk_size: usize) -> Vec<ChunkChecksum> {
        data.chunks(chunk_size)
            .enumerate()
            .map(|(index, chunk)| ChunkChecksum {
                index: index as u64,
                crc32: crc32(chunk),
                size: chunk.len() as u64,
            })
            .collect()
    }

    #[test]
    fn combine_matches_crc_of_concatenation() {
        let a = b"section_start:1:build\r\x1b[0K";
        let b = b"make all\n";
        let mut joined = a.to_vec();
        joined.extend_from_slice(b);
        assert_eq!(
            crc32_combine(crc32(a), crc32(b), b.len() as u64),
            crc32(&joined)
        );
    }

    #[test]
    fn combining_into_empty_is_identity() {
        let crc = crc32(b"hello");
        assert_eq!(crc32_combine(0, crc, 5), crc);
    }

    #[test]
    fn combined_chunks_equal_whole_trace_crc() {
        let data: Vec<u8> = (0..2560u32).map(|i| (i % 251) as u8).collect();
        let mut chunks = chunked(&data, 1024);
        chunks.reverse();

        let combined = combine_chunks(&chunks, 1024);
        assert_eq!(combined.crc32, crc32(&data));
        assert_eq!(combined.bytesize, 2560);
    }

    #[test]
    fn combination_is_order_and_length_sensitive() {
        let data: Vec<u8> = (0..2560u32).map(|i| (i * 7 % 256) as u8).collect();
        let chunks = chunked(&data, 1024);
        let canonical = combine_chunks(&chunks, 1024).crc32;

        let swapped = [chunks[1], chunks[0], chunks[2]]
            .iter()
            .fold(0, |acc, chunk| crc32_combine(acc, chunk.crc32, chunk.size));
        assert_ne!(swapped, canonical);

        let wrong_length = chunks
            .iter()
            .fold(0, |acc, chunk| crc32_combine(acc, chunk.crc32, 1024));
        assert_ne!(wrong_length, canonical);

        let summed = chunks
            .iter()
            .fold(0u32, |acc, chunk| acc.wrapping_add(chunk.crc32));
        assert_ne!(summed, canonical);
    }
}
