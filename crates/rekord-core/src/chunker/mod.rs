use std::io::Read;

use fastcdc::v2020::{FastCDC, StreamCDC};

use crate::error::{RekordError, Result};

/// Content-defined chunking parameters.
///
/// The defaults follow the repository format: boundaries are stable under
/// insertion, so editing the middle of a file re-chunks only the region
/// around the edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub min_size: u32,
    pub avg_size: u32,
    pub max_size: u32,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_size: 512 * 1024,
            avg_size: 1024 * 1024,
            max_size: 8 * 1024 * 1024,
        }
    }
}

/// Chunk a byte slice using FastCDC content-defined chunking.
/// Returns a vector of `(offset, length)` pairs covering the slice.
pub fn chunk_data(data: &[u8], config: &ChunkerConfig) -> Vec<(usize, usize)> {
    let chunker = FastCDC::new(data, config.min_size, config.avg_size, config.max_size);
    chunker.map(|chunk| (chunk.offset, chunk.length)).collect()
}

/// A chunk produced by the streaming chunker, carrying its own bytes.
pub struct FileChunk {
    pub offset: u64,
    pub data: Vec<u8>,
}

/// Streaming FastCDC chunker over any reader. Yields chunks in file order
/// without buffering the whole file.
pub fn chunk_stream<R: Read>(
    reader: R,
    config: &ChunkerConfig,
) -> impl Iterator<Item = Result<FileChunk>> {
    StreamCDC::new(reader, config.min_size, config.avg_size, config.max_size).map(|result| {
        result
            .map(|chunk| FileChunk {
                offset: chunk.offset,
                data: chunk.data,
            })
            .map_err(|e| RekordError::Other(format!("chunking failed: {e}")))
    })
}
