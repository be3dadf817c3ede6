//! Entropy coder binding (§4.4a expansion).
//!
//! The rest of the pipeline only ever produces already-typed, already
//! delta/dictionary-coded bytes; this is the one stage allowed to spend
//! CPU hunting for leftover redundancy across column boundaries.

use std::io::{Read, Write};

use crate::error::EncodeError;

/// Binding point for the general-purpose backend compressor (§4.4a). A
/// trait rather than a direct call so the container writer/reader never
/// hard-codes a specific compression library.
pub trait EntropyCodec: Send + Sync {
    fn compress(&self, level: u8, input: &[u8]) -> Vec<u8>;
    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, EncodeError>;
}

/// Brotli binding (§4.4a "Entropy coder binding (expansion)"). `level` is
/// Brotli's quality knob, 0-11, exposed to callers via `--level`.
pub struct BrotliCodec;

impl EntropyCodec for BrotliCodec {
    fn compress(&self, level: u8, input: &[u8]) -> Vec<u8> {
        let quality = level.min(11) as u32;
        let lgwin = 22u32;
        let mut out = Vec::new();
        {
            let mut writer = brotli::CompressorWriter::new(&mut out, 4096, quality, lgwin);
            writer
                .write_all(input)
                .expect("writing to an in-memory buffer cannot fail");
        }
        out
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::new();
        let mut reader = brotli::Decompressor::new(input, 4096);
        reader
            .read_to_end(&mut out)
            .map_err(|e| EncodeError::Entropy(e.to_string()))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brotli_round_trips() {
        let codec = BrotliCodec;
        let input = b"the quick brown fox jumps over the lazy dog ".repeat(50);
        let compressed = codec.compress(9, &input);
        assert!(compressed.len() < input.len());
        let decompressed = codec.decompress(&compressed).unwrap();
        assert_eq!(decompressed, input);
    }

    #[test]
    fn empty_input_round_trips() {
        let codec = BrotliCodec;
        let compressed = codec.compress(5, &[]);
        let decompressed = codec.decompress(&compressed).unwrap();
        assert!(decompressed.is_empty());
    }
}
