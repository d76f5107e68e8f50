//! Peer-to-peer message schema
//!
//! Every request opens a session; the reply must carry the same session id and proposal id or it
//! is discarded by the coordinator.
use crate::disclosure::{InclusionProof, PartialView};
use crate::error::TransportError;
use crate::identity::{Party, TransactionSignature};
use crate::oracle::{Attestation, BustFact};
use crate::utils::{self, SecureHash};

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum Message {
    /// Point query against the oracle's fact table.
    #[n(0)]
    QueryIsBust {
        #[n(0)]
        party: Party,
    },
    #[n(1)]
    IsBust {
        #[n(0)]
        is_bust: bool,
    },
    /// List every row of the oracle's fact table.
    #[n(2)]
    QueryAllBust,
    #[n(3)]
    BustFacts {
        #[n(0)]
        facts: Vec<BustFact>,
    },
    #[n(4)]
    RequestAttestation {
        #[n(0)]
        view: PartialView,
        #[n(1)]
        proof: InclusionProof,
        #[n(2)]
        root: SecureHash,
    },
    #[n(5)]
    Attested {
        #[n(0)]
        attestation: Attestation,
    },
    /// The full signed proposal, CBOR-encoded.
    #[n(6)]
    RequestSignature {
        #[cbor(n(0), with = "minicbor::bytes")]
        proposal: Vec<u8>,
    },
    #[n(7)]
    Countersigned {
        #[n(0)]
        signature: TransactionSignature,
    },
    #[n(8)]
    Rejected {
        #[n(0)]
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Envelope {
    #[n(0)]
    pub session_id: String,
    #[n(1)]
    pub proposal_id: Option<SecureHash>,
    #[n(2)]
    pub sender: Party,
    #[n(3)]
    pub body: Message,
}

impl Message {
    pub fn name(&self) -> &'static str {
        match self {
            Message::QueryIsBust { .. } => "QueryIsBust",
            Message::IsBust { .. } => "IsBust",
            Message::QueryAllBust => "QueryAllBust",
            Message::BustFacts { .. } => "BustFacts",
            Message::RequestAttestation { .. } => "RequestAttestation",
            Message::Attested { .. } => "Attested",
            Message::RequestSignature { .. } => "RequestSignature",
            Message::Countersigned { .. } => "Countersigned",
            Message::Rejected { .. } => "Rejected",
        }
    }
}

impl Envelope {
    /// Open a new session.
    pub fn request(
        sender: Party,
        proposal_id: Option<SecureHash>,
        body: Message,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            session_id: utils::new_uuid_to_bech32("session")?,
            proposal_id,
            sender,
            body,
        })
    }

    /// Answer on the session `self` opened.
    pub fn reply(&self, sender: Party, body: Message) -> Self {
        Self {
            session_id: self.session_id.clone(),
            proposal_id: self.proposal_id,
            sender,
            body,
        }
    }

    pub fn answers(&self, request: &Envelope) -> bool {
        self.session_id == request.session_id && self.proposal_id == request.proposal_id
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TransportError> {
        minicbor::to_vec(self).map_err(|e| TransportError::Codec(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransportError> {
        minicbor::decode(bytes).map_err(|e| TransportError::Codec(e.to_string()))
    }
}
