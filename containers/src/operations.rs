//! Slashing and exit operations gossiped on their own topics.

use ssz_derive::{Decode, Encode};

use crate::attestation::IndexedAttestation;
use crate::block::SignedBeaconBlockHeader;
use crate::types::{Epoch, Signature, ValidatorIndex};

/// Evidence that a proposer signed two conflicting block headers for
/// the same slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct ProposerSlashing {
    pub signed_header_1: SignedBeaconBlockHeader,
    pub signed_header_2: SignedBeaconBlockHeader,
}

/// Evidence of two conflicting attestations from an overlapping
/// validator set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct AttesterSlashing {
    pub attestation_1: IndexedAttestation,
    pub attestation_2: IndexedAttestation,
}

/// A validator's request to exit the active set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct VoluntaryExit {
    /// Earliest epoch at which the exit may be processed.
    pub epoch: Epoch,
    pub validator_index: ValidatorIndex,
}

/// The signed form gossiped on the voluntary exit topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct SignedVoluntaryExit {
    pub message: VoluntaryExit,
    pub signature: Signature,
}
