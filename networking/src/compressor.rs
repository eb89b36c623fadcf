//! Bounded snappy compression for `ssz_snappy` gossip payloads.
//!
//! The decoded-size cap is enforced from the snappy header alone, so a
//! hostile peer cannot make us spend CPU or memory proportional to the
//! claimed decompressed size.

use libp2p::gossipsub::{DataTransform, Message, RawMessage, TopicHash};
use snap::raw::{Decoder, Encoder, decompress_len};

use crate::errors::{MalformedMessageError, MalformedReason};

/// Worst-case snappy framing overhead for an input of `len` bytes.
pub const fn max_compressed_len(len: usize) -> usize {
    32 + len + len / 6
}

/// Largest decompressed payload the transport accepts. Matches the
/// block cap, the largest message carried on any topic.
pub const MAX_GOSSIP_PAYLOAD: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Compressor {
    /// Cap on the decompressed payload size.
    max_uncompressed_len: usize,
    /// Cap on the wire payload size, derived from the above.
    max_compressed_len: usize,
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(MAX_GOSSIP_PAYLOAD)
    }
}

impl Compressor {
    pub fn new(max_uncompressed_len: usize) -> Self {
        Self {
            max_uncompressed_len,
            max_compressed_len: max_compressed_len(max_uncompressed_len),
        }
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
        let mut encoder = Encoder::new();
        encoder.compress_vec(data).map_err(Into::into)
    }

    /// Decompress `data`, refusing oversize input before doing any
    /// decompression work.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, MalformedMessageError> {
        if data.len() > self.max_compressed_len {
            return Err(MalformedMessageError::new(
                MalformedReason::OversizeCompressed {
                    len: data.len(),
                    max: self.max_compressed_len,
                },
                data,
            ));
        }

        let len = decompress_len(data).map_err(|err| {
            MalformedMessageError::new(MalformedReason::Decompression(err.to_string()), data)
        })?;
        if len > self.max_uncompressed_len {
            return Err(MalformedMessageError::new(
                MalformedReason::OversizeDecoded {
                    len,
                    max: self.max_uncompressed_len,
                },
                data,
            ));
        }

        let mut decoder = Decoder::new();
        decoder.decompress_vec(data).map_err(|err| {
            MalformedMessageError::new(MalformedReason::Decompression(err.to_string()), data)
        })
    }
}

impl DataTransform for Compressor {
    fn inbound_transform(&self, raw_message: RawMessage) -> Result<Message, std::io::Error> {
        let data = self
            .decompress(&raw_message.data)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;

        Ok(Message {
            topic: raw_message.topic,
            data,
            sequence_number: raw_message.sequence_number,
            source: raw_message.source,
        })
    }

    fn outbound_transform(
        &self,
        _topic: &TopicHash,
        data: Vec<u8>,
    ) -> Result<Vec<u8>, std::io::Error> {
        if data.len() > self.max_uncompressed_len {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "outbound payload exceeds the uncompressed size cap",
            ));
        }

        self.compress(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_small_payload() {
        let compressor = Compressor::new(1024);
        let data = b"slashing evidence".to_vec();

        let compressed = compressor.compress(&data).unwrap();
        assert_eq!(compressor.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn rejects_oversize_decoded_length_from_header() {
        let compressor = Compressor::new(64);

        // A valid compression of 65 zero bytes; the cap is read off the
        // snappy header before decompressing.
        let compressed = Compressor::new(1024).compress(&[0u8; 65]).unwrap();
        let err = compressor.decompress(&compressed).unwrap_err();
        assert!(matches!(
            err.reason,
            MalformedReason::OversizeDecoded { len: 65, max: 64 }
        ));
    }

    #[test]
    fn rejects_oversize_compressed_input() {
        let compressor = Compressor::new(16);
        let oversized = vec![0u8; max_compressed_len(16) + 1];

        let err = compressor.decompress(&oversized).unwrap_err();
        assert!(matches!(
            err.reason,
            MalformedReason::OversizeCompressed { .. }
        ));
    }

    #[test]
    fn rejects_garbage_input() {
        let compressor = Compressor::new(1024);
        let err = compressor.decompress(&[0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err.reason, MalformedReason::Decompression(_)));
    }
}
