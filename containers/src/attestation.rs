//! Attestation containers and their aggregated forms.

use ssz_derive::{Decode, Encode};

use crate::types::{Epoch, Root, Signature, Slot, ValidatorIndex};

/// An epoch boundary reference used as attestation source/target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Encode, Decode)]
pub struct Checkpoint {
    pub epoch: Epoch,
    pub root: Root,
}

/// The vote carried by every attestation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Encode, Decode)]
pub struct AttestationData {
    pub slot: Slot,
    pub index: u64,
    pub beacon_block_root: Root,
    pub source: Checkpoint,
    pub target: Checkpoint,
}

/// An attestation as gossiped on the attestation topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct Attestation {
    pub aggregation_bits: Vec<u8>,
    pub data: AttestationData,
    pub signature: Signature,
}

/// An attestation with its participants expanded to validator indices,
/// as carried inside attester slashings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct IndexedAttestation {
    pub attesting_indices: Vec<ValidatorIndex>,
    pub data: AttestationData,
    pub signature: Signature,
}

/// An aggregated attestation with the aggregator's selection proof.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct AggregateAndProof {
    pub aggregator_index: ValidatorIndex,
    pub aggregate: Attestation,
    pub selection_proof: Signature,
}

/// The signed form gossiped on the aggregate topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct SignedAggregateAndProof {
    pub message: AggregateAndProof,
    pub signature: Signature,
}
