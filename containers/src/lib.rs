pub mod attestation;
pub mod block;
pub mod operations;
pub mod types;

pub use attestation::{
    AggregateAndProof, Attestation, AttestationData, Checkpoint, IndexedAttestation,
    SignedAggregateAndProof,
};
pub use block::{
    BeaconBlock, BeaconBlockBody, BeaconBlockHeader, SignedBeaconBlock, SignedBeaconBlockHeader,
};
pub use operations::{AttesterSlashing, ProposerSlashing, SignedVoluntaryExit, VoluntaryExit};
pub use types::{Epoch, ForkVersion, Root, Signature, Slot, ValidatorIndex};
pub use ssz;
