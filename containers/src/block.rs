//! Beacon block containers.

use ssz_derive::{Decode, Encode};

use crate::attestation::Attestation;
use crate::operations::{AttesterSlashing, ProposerSlashing, SignedVoluntaryExit};
use crate::types::{Root, Signature, Slot, ValidatorIndex};

/// The fixed-size summary of a block, signed by its proposer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Encode, Decode)]
pub struct BeaconBlockHeader {
    pub slot: Slot,
    pub proposer_index: ValidatorIndex,
    pub parent_root: Root,
    pub state_root: Root,
    pub body_root: Root,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Encode, Decode)]
pub struct SignedBeaconBlockHeader {
    pub message: BeaconBlockHeader,
    pub signature: Signature,
}

/// Operations included in a block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct BeaconBlockBody {
    pub randao_reveal: Signature,
    pub graffiti: Root,
    pub proposer_slashings: Vec<ProposerSlashing>,
    pub attester_slashings: Vec<AttesterSlashing>,
    pub attestations: Vec<Attestation>,
    pub voluntary_exits: Vec<SignedVoluntaryExit>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct BeaconBlock {
    pub slot: Slot,
    pub proposer_index: ValidatorIndex,
    pub parent_root: Root,
    pub state_root: Root,
    pub body: BeaconBlockBody,
}

/// The signed form gossiped on the block topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct SignedBeaconBlock {
    pub message: BeaconBlock,
    pub signature: Signature,
}
