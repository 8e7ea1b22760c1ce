//! Per-batch compression with the optional algorithm-id prefix byte.
//!
//! 按批次压缩，并可选地附加算法 ID 前缀字节。

use crate::error::{ProxyError, Result};
use crate::protocol::version;
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use std::io::{self, Read, Write};

/// Upper bound on an inflated batch. Larger batches are rejected as invalid.
pub const MAX_DECOMPRESSED_LEN: usize = 12 * 1024 * 1024;

/// The algorithms a batch can be compressed with.
///
/// 批次可使用的压缩算法。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionAlgorithm {
    None,
    /// Raw DEFLATE without the zlib wrapper.
    Zlib,
    Snappy,
}

impl CompressionAlgorithm {
    pub fn id(self) -> u8 {
        match self {
            CompressionAlgorithm::None => 0xFF,
            CompressionAlgorithm::Zlib => 0x00,
            CompressionAlgorithm::Snappy => 0x01,
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0xFF => Ok(CompressionAlgorithm::None),
            0x00 => Ok(CompressionAlgorithm::Zlib),
            0x01 => Ok(CompressionAlgorithm::Snappy),
            other => Err(ProxyError::UnsupportedCompression(other)),
        }
    }

    fn compress(self, payload: &[u8]) -> Result<Vec<u8>> {
        match self {
            CompressionAlgorithm::None => Ok(payload.to_vec()),
            CompressionAlgorithm::Zlib => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(payload)?;
                Ok(encoder.finish()?)
            }
            CompressionAlgorithm::Snappy => snap::raw::Encoder::new()
                .compress_vec(payload)
                .map_err(|e| ProxyError::Io(io::Error::from(e))),
        }
    }

    fn decompress(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            CompressionAlgorithm::None => Ok(data.to_vec()),
            CompressionAlgorithm::Zlib => {
                let mut out = Vec::new();
                DeflateDecoder::new(data)
                    .take(MAX_DECOMPRESSED_LEN as u64 + 1)
                    .read_to_end(&mut out)?;
                if out.len() > MAX_DECOMPRESSED_LEN {
                    return Err(ProxyError::InvalidMessage);
                }
                Ok(out)
            }
            CompressionAlgorithm::Snappy => {
                let len = snap::raw::decompress_len(data)
                    .map_err(|e| ProxyError::Io(io::Error::from(e)))?;
                if len > MAX_DECOMPRESSED_LEN {
                    return Err(ProxyError::InvalidMessage);
                }
                snap::raw::Decoder::new()
                    .decompress_vec(data)
                    .map_err(|e| ProxyError::Io(io::Error::from(e)))
            }
        }
    }
}

/// Applies the negotiated algorithm to outgoing batches and reverses it on
/// incoming ones.
///
/// With the prefix byte, batches at or below the threshold are sent as
/// [`CompressionAlgorithm::None`]. Legacy framing cannot name an algorithm, so
/// there every batch goes through the negotiated one.
///
/// 对发出的批次应用协商好的算法，并对接收的批次进行逆操作。
///
/// 使用前缀字节时，不超过阈值的批次按 [`CompressionAlgorithm::None`] 发送。
/// 旧版帧格式无法标明算法，因此每个批次都会经过协商好的算法。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionFramer {
    algorithm: CompressionAlgorithm,
    prefixed: bool,
}

impl CompressionFramer {
    pub fn new(algorithm: CompressionAlgorithm, prefixed: bool) -> Self {
        Self {
            algorithm,
            prefixed,
        }
    }

    /// A framer using the wire layout of `protocol_version`.
    pub fn for_protocol(algorithm: CompressionAlgorithm, protocol_version: u32) -> Self {
        Self::new(algorithm, version::compression_prefixed(protocol_version))
    }

    pub fn algorithm(&self) -> CompressionAlgorithm {
        self.algorithm
    }

    pub fn is_prefixed(&self) -> bool {
        self.prefixed
    }

    /// Which algorithm a payload of `len` bytes is sent with.
    pub fn select(&self, len: usize, threshold: usize) -> CompressionAlgorithm {
        if !self.prefixed || len > threshold {
            self.algorithm
        } else {
            CompressionAlgorithm::None
        }
    }

    pub fn encode(&self, payload: &[u8], threshold: usize) -> Result<Vec<u8>> {
        let algorithm = self.select(payload.len(), threshold);
        let body = algorithm.compress(payload)?;
        if !self.prefixed {
            return Ok(body);
        }

        let mut framed = Vec::with_capacity(body.len() + 1);
        framed.push(algorithm.id());
        framed.extend_from_slice(&body);
        Ok(framed)
    }

    pub fn decode(&self, framed: &[u8]) -> Result<Vec<u8>> {
        if !self.prefixed {
            return self.algorithm.decompress(framed);
        }
        let (&id, body) = framed.split_first().ok_or(ProxyError::InvalidMessage)?;
        CompressionAlgorithm::from_id(id)?.decompress(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_payload_is_marked_uncompressed() {
        let framer = CompressionFramer::new(CompressionAlgorithm::Zlib, true);
        let framed = framer.encode(b"tiny", 4).unwrap();
        assert_eq!(framed[0], CompressionAlgorithm::None.id());
        assert_eq!(&framed[1..], b"tiny");
        assert_eq!(framer.decode(&framed).unwrap(), b"tiny");
    }

    #[test]
    fn large_payload_uses_the_negotiated_algorithm() {
        let payload = vec![7u8; 4096];
        for algorithm in [CompressionAlgorithm::Zlib, CompressionAlgorithm::Snappy] {
            let framer = CompressionFramer::new(algorithm, true);
            let framed = framer.encode(&payload, 256).unwrap();
            assert_eq!(framed[0], algorithm.id());
            assert!(framed.len() < payload.len());
            assert_eq!(framer.decode(&framed).unwrap(), payload);
        }
    }

    #[test]
    fn unknown_prefix_is_unsupported() {
        let framer = CompressionFramer::new(CompressionAlgorithm::Zlib, true);
        assert!(matches!(
            framer.decode(&[0x42, 1, 2, 3]),
            Err(ProxyError::UnsupportedCompression(0x42))
        ));
    }

    #[test]
    fn legacy_framing_always_compresses() {
        let framer = CompressionFramer::for_protocol(
            CompressionAlgorithm::Zlib,
            version::COMPRESSION_PREFIX_SINCE - 1,
        );
        assert!(!framer.is_prefixed());
        assert_eq!(framer.select(1, 256), CompressionAlgorithm::Zlib);
        let framed = framer.encode(b"x", 256).unwrap();
        assert_eq!(framer.decode(&framed).unwrap(), b"x");
    }
}
