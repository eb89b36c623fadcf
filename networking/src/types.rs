//! Messages exchanged with the consensus-logic side of the node.

use containers::{
    Attestation, AttesterSlashing, ProposerSlashing, SignedAggregateAndProof, SignedBeaconBlock,
    SignedVoluntaryExit,
};
use libp2p_identity::PeerId;

/// A decoded-and-accepted gossip message handed off to consensus
/// logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainMessage {
    Block(SignedBeaconBlock),
    AggregateAndProof(SignedAggregateAndProof),
    Attestation(Attestation),
    VoluntaryExit(SignedVoluntaryExit),
    ProposerSlashing(ProposerSlashing),
    AttesterSlashing(AttesterSlashing),
}

impl std::fmt::Display for ChainMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainMessage::Block(block) => {
                write!(f, "Block(slot={})", block.message.slot)
            }
            ChainMessage::AggregateAndProof(aggregate) => {
                write!(
                    f,
                    "AggregateAndProof(slot={})",
                    aggregate.message.aggregate.data.slot
                )
            }
            ChainMessage::Attestation(attestation) => {
                write!(f, "Attestation(slot={})", attestation.data.slot)
            }
            ChainMessage::VoluntaryExit(exit) => {
                write!(f, "VoluntaryExit(validator={})", exit.message.validator_index)
            }
            ChainMessage::ProposerSlashing(slashing) => {
                write!(
                    f,
                    "ProposerSlashing(slot={})",
                    slashing.signed_header_1.message.slot
                )
            }
            ChainMessage::AttesterSlashing(slashing) => {
                write!(
                    f,
                    "AttesterSlashing(slot={})",
                    slashing.attestation_1.data.slot
                )
            }
        }
    }
}

/// Requests from internal logic to the gossip layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundGossipRequest {
    PublishBlock(SignedBeaconBlock),
    PublishAggregateAndProof(SignedAggregateAndProof),
    PublishAttestation(Attestation),
    PublishVoluntaryExit(SignedVoluntaryExit),
    PublishProposerSlashing(ProposerSlashing),
    PublishAttesterSlashing(AttesterSlashing),
}

/// A decoded message together with its originating peer, delivered to
/// the consensus side on ACCEPT.
#[derive(Debug, Clone)]
pub struct AcceptedMessage {
    pub message: ChainMessage,
    pub source: Option<PeerId>,
}

/// Dial-state of a known peer, tracked by the network service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}
