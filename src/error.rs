use crate::agreement::{Amount, StateRef, Status};
use crate::utils::SecureHash;

/// Construction-time invariants of an [`crate::agreement::AgreementRecord`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("The value should be positive")]
    NonPositiveValue,
    #[error("The {0} and {1} cannot be the same entity")]
    SameEntity(&'static str, &'static str),
    #[error("Draft is missing the {0}")]
    MissingField(&'static str),
    #[error("Could not parse amount '{0}', expected e.g. '20 USD'")]
    InvalidAmount(String),
}

/// One variant per rule of the transition table. Validation stops at the first failure.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{command} expects {expected} consumed record(s), found {found}")]
    WrongInputCount {
        command: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("The {side} should have status {expected}, found {found:?}")]
    StatusMismatch {
        side: &'static str,
        expected: &'static str,
        found: Status,
    },
    #[error("Signer set must be exactly {expected:?}, found {found:?}")]
    WrongSignerSet {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("The output value {output} should be equal to the input value {input}")]
    ValueMismatch { input: Amount, output: Amount },
    #[error("The {0} should be the same entity on both records")]
    PartyFieldChanged(&'static str),
    #[error("The command should name the intermediary {intermediary}, found {claimed}")]
    BustPartyNotIntermediary {
        claimed: String,
        intermediary: String,
    },
    #[error("The intermediary needs to be bust")]
    IntermediaryNotBust,
    #[error("Unrecognised command (tag {tag})")]
    UnrecognisedCommand { tag: u32 },
    #[error(transparent)]
    InvalidRecord(#[from] RecordError),
    #[error("Malformed proposal: {0}")]
    Malformed(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AttestationError {
    #[error("Disclosed view does not resolve to the agreed root commitment")]
    DisclosureProofInvalid,
    #[error("Oracle signature requested over invalid proposal: {0}")]
    AttestationRejected(String),
    #[error("Failed to access the bust fact store: {0}")]
    AttestationStoreError(String),
}

impl From<sled::Error> for AttestationError {
    fn from(value: sled::Error) -> Self {
        AttestationError::AttestationStoreError(value.to_string())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("No route to peer {0}")]
    UnknownPeer(String),
    #[error("Session with {0} was closed before a reply arrived")]
    Disconnected(String),
    #[error("Could not encode or decode a message: {0}")]
    Codec(String),
}

/// Failures reported by the ledger collaborator on submission.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    #[error("Proposal failed contract validation: {0}")]
    Rejected(#[from] ValidationError),
    #[error("Missing signature from required signer {0}")]
    MissingSignature(String),
    #[error("Signature from {0} who is not a required signer")]
    UnexpectedSignature(String),
    #[error("Invalid signature from {0}")]
    InvalidSignature(String),
    #[error("Input {0} is not known to the ledger")]
    UnknownInput(StateRef),
    #[error("Input {0} does not match the recorded state")]
    InputMismatch(StateRef),
    #[error("Input {0} has already been consumed")]
    DoubleSpend(StateRef),
    #[error("Transaction {0} is already on the ledger")]
    AlreadyCommitted(SecureHash),
    #[error("Ledger storage failure: {0}")]
    Store(String),
}

impl From<sled::Error> for CommitError {
    fn from(value: sled::Error) -> Self {
        CommitError::Store(value.to_string())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0} is not entitled to start this transition")]
    NotARequiredSigner(String),
    #[error("The oracle does not identify {0} as bust")]
    OracleDisagreement(String),
    #[error(transparent)]
    Attestation(#[from] AttestationError),
    #[error("{peer} rejected the proposal: {reason}")]
    PeerRejected { peer: String, reason: String },
    #[error("{peer} is unreachable")]
    PeerUnreachable {
        peer: String,
        #[source]
        source: TransportError,
    },
    #[error(transparent)]
    Commit(#[from] CommitError),
    #[error("Coordination was cancelled before submission")]
    Cancelled,
}

/// Why a responder refused to countersign a proposal.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResponderError {
    #[error("Session is tagged with a different proposal")]
    ProposalMismatch,
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("{0} is not a required signer")]
    NotARequiredSigner(String),
    #[error("Proposal is not signed by the requester {0}")]
    RequesterNotSigned(String),
    #[error("Invalid signature from {0}")]
    InvalidSignature(String),
    #[error("Only partyA may be asked to accept a new agreement")]
    NotPartyA,
    #[error("The intermediary needs to be the one initiating")]
    NotFromIntermediary,
    #[error("Missing attestation from the oracle {0}")]
    MissingAttestation(String),
    #[error("Input {0} is not a live record")]
    InputNotLive(StateRef),
    #[error(transparent)]
    Ledger(#[from] CommitError),
    #[error("Not approved: {0}")]
    NotApproved(String),
    #[error("{0} is not an oracle")]
    NotAnOracle(String),
    #[error("Unexpected {0} request")]
    UnexpectedRequest(&'static str),
}

/// Errors surfaced by the API facade.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Coordination(#[from] CoordinationError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Attestation(#[from] AttestationError),
    #[error(transparent)]
    Ledger(#[from] CommitError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Party {0} is not on the network map")]
    UnknownParty(String),
    #[error("State {0} is not known or already consumed")]
    UnknownState(StateRef),
    #[error("This node does not host a bust party oracle")]
    NotAnOracle,
    #[error("Unexpected reply from {0}")]
    UnexpectedReply(String),
    #[error("Node storage failure: {0}")]
    Storage(String),
}

impl From<sled::Error> for ServiceError {
    fn from(value: sled::Error) -> Self {
        ServiceError::Storage(value.to_string())
    }
}
