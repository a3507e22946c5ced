// SPDX-License-Identifier: MIT

//! Deflate-family compression for opaque event payloads (§4.1).
//!
//! Targets >= 5x on typical JSON payloads at the default compression level;
//! decoding accepts any level the encoder used, since zlib streams are
//! self-describing.

use crate::error::CodecError;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

pub fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| CodecError::Compress(e.to_string()))?;
    encoder.finish().map_err(|e| CodecError::Compress(e.to_string()))
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Decompress(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let original = br#"{"hello":"world","n":42}"#.repeat(64);
        let compressed = compress(&original).unwrap();
        let restored = decompress(&compressed).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn achieves_meaningful_ratio_on_repetitive_payload() {
        let original = serde_json::to_vec(&serde_json::json!({
            "tool": "Read",
            "args": { "path": "/repo/src/main.rs" },
            "result": "fn main() {}\n".repeat(200),
        }))
        .unwrap();
        let compressed = compress(&original).unwrap();
        assert!(compressed.len() * 5 < original.len());
    }

    #[test]
    fn rejects_garbage() {
        assert!(decompress(b"not a zlib stream").is_err());
    }
}
