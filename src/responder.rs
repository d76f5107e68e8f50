//! Responder side of every session a node can be asked to join
//!
//! A counterparty never countersigns blindly: the proposal is decoded from the exact bytes the
//! initiator signed, re-validated, and checked against the node's own view of the ledger and its
//! approval policy before a signature leaves the node. Nodes hosting an oracle also answer bust
//! queries and attestation requests here.
use crate::contract;
use crate::error::ResponderError;
use crate::identity::{NodeIdentity, TransactionSignature};
use crate::ledger::Ledger;
use crate::messages::{Envelope, Message};
use crate::network::MessageHandler;
use crate::oracle::OracleService;
use crate::proposal::{Command, SignedProposal, TransitionProposal};
use std::sync::Arc;

/// Local, externally supplied criteria a responder applies after the contract rules pass.
pub trait ApprovalPolicy: Send + Sync {
    /// Refuse with [`ResponderError::NotApproved`] when the node's own criteria are not met.
    fn approve(&self, proposal: &TransitionProposal) -> Result<(), ResponderError>;
}

/// Countersign anything the contract accepts.
pub struct AcceptAll;

impl ApprovalPolicy for AcceptAll {
    fn approve(&self, _: &TransitionProposal) -> Result<(), ResponderError> {
        Ok(())
    }
}

pub struct Responder {
    identity: Arc<NodeIdentity>,
    ledger: Arc<dyn Ledger>,
    oracle: Option<Arc<OracleService>>,
    policy: Arc<dyn ApprovalPolicy>,
}

impl Responder {
    pub fn new(
        identity: Arc<NodeIdentity>,
        ledger: Arc<dyn Ledger>,
        oracle: Option<Arc<OracleService>>,
        policy: Arc<dyn ApprovalPolicy>,
    ) -> Self {
        Self {
            identity,
            ledger,
            oracle,
            policy,
        }
    }

    /// Check a signature request from `request.sender` and sign its root if every check passes.
    pub fn countersign(
        &self,
        request: &Envelope,
        bytes: &[u8],
    ) -> Result<TransactionSignature, ResponderError> {
        let signed = SignedProposal::from_bytes(bytes)?;
        let root = signed.id();
        if request.proposal_id != Some(root) {
            return Err(ResponderError::ProposalMismatch);
        }

        let proposal = signed.proposal()?;
        contract::validate(&proposal)?;

        let me = &self.identity.party;
        let requester = &request.sender;
        if !proposal.claimed_signers.contains(me) {
            return Err(ResponderError::NotARequiredSigner(me.name.clone()));
        }
        if !proposal.claimed_signers.contains(requester) || !signed.is_signed_by(requester) {
            return Err(ResponderError::RequesterNotSigned(requester.name.clone()));
        }
        if let Err(key) = signed.verify_signatures() {
            return Err(ResponderError::InvalidSignature(key.address()));
        }

        match &proposal.command {
            Command::Create => {
                if proposal.produced.party_a() != me {
                    return Err(ResponderError::NotPartyA);
                }
                if proposal.produced.intermediary() != requester {
                    return Err(ResponderError::NotFromIntermediary);
                }
            }
            Command::GoToDirect { .. } => {
                // validate has already required the single input
                if let Some(input) = &proposal.consumed {
                    let oracle = input.state.oracle();
                    if !signed.is_signed_by(oracle) {
                        return Err(ResponderError::MissingAttestation(oracle.name.clone()));
                    }
                }
            }
            Command::Finalise => {}
        }

        if let Some(input) = &proposal.consumed {
            match self.ledger.resolve(&input.reference)? {
                Some(live) if live == *input => {}
                _ => return Err(ResponderError::InputNotLive(input.reference)),
            }
        }

        self.policy.approve(&proposal)?;

        tracing::info!(
            proposal = %root,
            command = proposal.command.name(),
            requester = %requester,
            "countersigning"
        );
        Ok(self.identity.sign(&root))
    }

    fn answer_oracle(&self, oracle: &OracleService, body: Message) -> Message {
        match body {
            Message::QueryIsBust { party } => match oracle.is_bust(&party) {
                Ok(is_bust) => Message::IsBust { is_bust },
                Err(e) => Message::Rejected {
                    reason: e.to_string(),
                },
            },
            Message::QueryAllBust => match oracle.bust_facts() {
                Ok(facts) => Message::BustFacts { facts },
                Err(e) => Message::Rejected {
                    reason: e.to_string(),
                },
            },
            Message::RequestAttestation { view, proof, root } => {
                match oracle.attest(&view, &proof, &root) {
                    Ok(attestation) => Message::Attested { attestation },
                    Err(e) => Message::Rejected {
                        reason: e.to_string(),
                    },
                }
            }
            other => Message::Rejected {
                reason: ResponderError::UnexpectedRequest(other.name()).to_string(),
            },
        }
    }
}

impl MessageHandler for Responder {
    fn handle(&self, request: Envelope) -> Envelope {
        let body = match &request.body {
            Message::RequestSignature { proposal } => match self.countersign(&request, proposal) {
                Ok(signature) => Message::Countersigned { signature },
                Err(e) => {
                    tracing::warn!(
                        session = %request.session_id,
                        requester = %request.sender,
                        error = %e,
                        "refusing to countersign"
                    );
                    Message::Rejected {
                        reason: e.to_string(),
                    }
                }
            },
            Message::QueryIsBust { .. }
            | Message::QueryAllBust
            | Message::RequestAttestation { .. } => match &self.oracle {
                Some(oracle) => self.answer_oracle(oracle, request.body.clone()),
                None => Message::Rejected {
                    reason: ResponderError::NotAnOracle(self.identity.party.name.clone())
                        .to_string(),
                },
            },
            other => Message::Rejected {
                reason: ResponderError::UnexpectedRequest(other.name()).to_string(),
            },
        };

        request.reply(self.identity.party.clone(), body)
    }
}
