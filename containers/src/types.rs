//! Chain-time primitives and fixed-size byte types shared by the
//! gossiped containers.

use ssz::{Decode, DecodeError, Encode};

/// A slot number. Slots are the smallest unit of chain time.
pub type Slot = u64;

/// An epoch number. Epochs group a fixed number of slots and are the
/// granularity at which fork transitions are scheduled.
pub type Epoch = u64;

/// Index of a validator in the registry.
pub type ValidatorIndex = u64;

/// A 32-byte hash tree root.
pub type Root = [u8; 32];

/// A 4-byte fork version from the fork schedule.
pub type ForkVersion = [u8; 4];

/// Number of bytes in a BLS signature.
pub const SIGNATURE_LENGTH: usize = 96;

/// An opaque 96-byte signature.
///
/// The signature scheme itself is out of scope here; callers hand these
/// to an external verifier. Only the fixed-length wire shape matters to
/// this crate.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; SIGNATURE_LENGTH]);

impl Signature {
    pub fn empty() -> Self {
        Self([0; SIGNATURE_LENGTH])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature(0x{})", hex::encode(self.0))
    }
}

impl Encode for Signature {
    fn is_ssz_fixed_len() -> bool {
        true
    }

    fn ssz_fixed_len() -> usize {
        SIGNATURE_LENGTH
    }

    fn ssz_bytes_len(&self) -> usize {
        SIGNATURE_LENGTH
    }

    fn ssz_append(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.0);
    }
}

impl Decode for Signature {
    fn is_ssz_fixed_len() -> bool {
        true
    }

    fn ssz_fixed_len() -> usize {
        SIGNATURE_LENGTH
    }

    fn from_ssz_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != SIGNATURE_LENGTH {
            return Err(DecodeError::InvalidByteLength {
                len: bytes.len(),
                expected: SIGNATURE_LENGTH,
            });
        }

        let mut out = [0; SIGNATURE_LENGTH];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }
}
