//! Per-topic SSZ codec with a per-message-type size cap.
//!
//! Compression is handled by the transport transform
//! (`crate::compressor`); this codec sees decompressed payloads and is
//! the second line of defense on size. Encoding a structurally valid
//! domain object never fails.

use ssz::{Decode, Encode};

use crate::errors::{MalformedMessageError, MalformedReason};

#[derive(Debug, Clone, Copy)]
pub struct SszSnappyCodec {
    /// Cap on the decoded (uncompressed) payload for this topic's
    /// message type.
    max_message_size: usize,
}

impl SszSnappyCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    pub fn encode<T: Encode>(&self, message: &T) -> Vec<u8> {
        message.as_ssz_bytes()
    }

    pub fn decode<T: Decode>(&self, bytes: &[u8]) -> Result<T, MalformedMessageError> {
        if bytes.len() > self.max_message_size {
            return Err(MalformedMessageError::new(
                MalformedReason::OversizeDecoded {
                    len: bytes.len(),
                    max: self.max_message_size,
                },
                bytes,
            ));
        }

        T::from_ssz_bytes(bytes).map_err(|err| {
            MalformedMessageError::new(MalformedReason::InvalidSsz(format!("{err:?}")), bytes)
        })
    }
}
