use std::io::Read;

use crate::error::{RekordError, Result};

const TAG_NONE: u8 = 0x00;
const TAG_ZSTD: u8 = 0x02;

const ZSTD_LEVEL: i32 = 3;

/// Maximum decompressed output size (32 MiB = 4x max chunk size).
/// Prevents decompression bombs from consuming unbounded memory.
const MAX_DECOMPRESS_SIZE: u64 = 32 * 1024 * 1024;

/// Compress an object payload and prepend the 1-byte codec tag.
///
/// Payloads that grow under compression are stored with the `none` tag
/// instead, so incompressible chunks pay one byte of overhead.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    use std::cell::RefCell;
    thread_local! {
        static ZSTD_CX: RefCell<Option<zstd::bulk::Compressor<'static>>> =
            const { RefCell::new(None) };
    }

    let compressed = ZSTD_CX.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            let cx = zstd::bulk::Compressor::new(ZSTD_LEVEL)
                .map_err(|e| RekordError::Other(format!("zstd init: {e}")))?;
            *slot = Some(cx);
        }
        let cx = slot.as_mut().unwrap();
        cx.compress(data)
            .map_err(|e| RekordError::Other(format!("zstd compress: {e}")))
    })?;

    if compressed.len() >= data.len() {
        let mut out = Vec::with_capacity(1 + data.len());
        out.push(TAG_NONE);
        out.extend_from_slice(data);
        return Ok(out);
    }

    let mut out = Vec::with_capacity(1 + compressed.len());
    out.push(TAG_ZSTD);
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Decompress a payload by reading the 1-byte tag prefix and dispatching.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Err(RekordError::Decompression("empty payload".into()));
    }
    let tag = data[0];
    let payload = &data[1..];
    match tag {
        TAG_NONE => Ok(payload.to_vec()),
        TAG_ZSTD => {
            let mut decoder = zstd::stream::Decoder::new(std::io::Cursor::new(payload))
                .map_err(|e| RekordError::Decompression(format!("zstd init: {e}")))?;
            let mut output = Vec::new();
            decoder
                .by_ref()
                .take(MAX_DECOMPRESS_SIZE + 1)
                .read_to_end(&mut output)
                .map_err(|e| RekordError::Decompression(format!("zstd: {e}")))?;
            if output.len() as u64 > MAX_DECOMPRESS_SIZE {
                return Err(RekordError::Decompression(format!(
                    "zstd: decompressed size exceeds limit of {MAX_DECOMPRESS_SIZE} bytes"
                )));
            }
            Ok(output)
        }
        _ => Err(RekordError::UnknownCompressionTag(tag)),
    }
}
