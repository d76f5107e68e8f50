//! Signature collection for a single transition proposal
//!
//! The coordinator walks an explicit sequence of steps. Every network exchange is a blocking
//! request/response on its own session; the reply must be tagged with the same session and
//! proposal. Collected signatures live only in this value, so an abort or a cancellation before
//! submission leaves no trace anywhere.
use crate::agreement::AgreementRecord;
use crate::contract;
use crate::disclosure::{self, InclusionProof, PartialView};
use crate::error::{AttestationError, CoordinationError, TransportError, ValidationError};
use crate::identity::{NodeIdentity, Party, TransactionSignature};
use crate::ledger::{CommitReceipt, Ledger};
use crate::messages::{Envelope, Message};
use crate::network::Network;
use crate::oracle::Attestation;
use crate::proposal::{Command, SignedProposal, TransitionProposal};
use crate::utils::SecureHash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationStep {
    Building,
    Verifying,
    Signing,
    QueryingOracle,
    GatheringOracleSig,
    GatheringSigs,
    Finalising,
    Done,
    Aborted,
}

/// Shared flag an initiator can raise to abandon a coordination before submission.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct SignatureCollectionCoordinator<'a> {
    identity: &'a NodeIdentity,
    network: &'a dyn Network,
    ledger: &'a dyn Ledger,
    cancellation: CancellationToken,
    step: CoordinationStep,
    proposal_id: Option<SecureHash>,
}

impl<'a> SignatureCollectionCoordinator<'a> {
    pub fn new(
        identity: &'a NodeIdentity,
        network: &'a dyn Network,
        ledger: &'a dyn Ledger,
    ) -> Self {
        Self {
            identity,
            network,
            ledger,
            cancellation: CancellationToken::new(),
            step: CoordinationStep::Building,
            proposal_id: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn step(&self) -> CoordinationStep {
        self.step
    }

    /// Authorise `proposal` with every required signer and submit it to the ledger.
    pub fn run(
        &mut self,
        proposal: TransitionProposal,
    ) -> Result<CommitReceipt, CoordinationError> {
        match self.drive(proposal) {
            Ok(receipt) => {
                self.transition(CoordinationStep::Done);
                Ok(receipt)
            }
            Err(e) => {
                tracing::warn!(
                    proposal = ?self.proposal_id,
                    failed_at = ?self.step,
                    error = %e,
                    "coordination aborted"
                );
                self.transition(CoordinationStep::Aborted);
                Err(e)
            }
        }
    }

    fn drive(&mut self, proposal: TransitionProposal) -> Result<CommitReceipt, CoordinationError> {
        self.transition(CoordinationStep::Verifying);
        contract::validate(&proposal)?;
        self.check_initiator(&proposal)?;

        let mut signed = SignedProposal::new(proposal.to_wire()?);
        let root = signed.id();
        self.proposal_id = Some(root);

        self.checkpoint()?;
        self.transition(CoordinationStep::Signing);
        signed = signed.with_signature(self.identity.sign(&root));

        if let Command::GoToDirect { party, .. } = &proposal.command {
            let oracle = consumed_record(&proposal)?.oracle();

            self.checkpoint()?;
            self.transition(CoordinationStep::QueryingOracle);
            if !self.query_is_bust(oracle, party)? {
                return Err(CoordinationError::OracleDisagreement(party.name.clone()));
            }

            self.checkpoint()?;
            self.transition(CoordinationStep::GatheringOracleSig);
            let (view, proof) = disclosure::disclose(&signed.wire, oracle);
            let attestation = self.request_attestation(oracle, view, proof, root)?;
            attestation.verify(oracle, &root)?;
            signed = signed.with_signature(attestation.signature);
        }

        self.transition(CoordinationStep::GatheringSigs);
        let remaining: Vec<Party> = signed
            .missing_signers(&proposal.claimed_signers)
            .into_iter()
            .cloned()
            .collect();

        for peer in &remaining {
            self.checkpoint()?;
            let signature = self.request_signature(peer, &signed)?;
            if signature.by != peer.owning_key || signature.verify(&root).is_err() {
                return Err(CoordinationError::PeerRejected {
                    peer: peer.name.clone(),
                    reason: "countersignature does not verify".into(),
                });
            }
            signed = signed.with_signature(signature);
        }

        // last point at which the initiator can walk away
        self.checkpoint()?;
        self.transition(CoordinationStep::Finalising);
        Ok(self.ledger.submit(&signed)?)
    }

    // Create is started by the intermediary, GoToDirect by partyA or partyB, Finalise by any
    // required signer.
    fn check_initiator(&self, proposal: &TransitionProposal) -> Result<(), CoordinationError> {
        let me = &self.identity.party;
        let entitled = match &proposal.command {
            Command::Create => proposal.produced.intermediary() == me,
            Command::GoToDirect { .. } => {
                let input = consumed_record(proposal)?;
                input.party_a() == me || input.party_b() == me
            }
            Command::Finalise => proposal.claimed_signers.contains(me),
        };

        if !entitled {
            return Err(CoordinationError::NotARequiredSigner(me.name.clone()));
        }
        Ok(())
    }

    fn checkpoint(&self) -> Result<(), CoordinationError> {
        if self.cancellation.is_cancelled() {
            return Err(CoordinationError::Cancelled);
        }
        Ok(())
    }

    fn transition(&mut self, next: CoordinationStep) {
        tracing::info!(proposal = ?self.proposal_id, from = ?self.step, to = ?next, "coordination");
        self.step = next;
    }

    fn exchange(&self, peer: &Party, body: Message) -> Result<Message, CoordinationError> {
        let unreachable_peer = |source: TransportError| CoordinationError::PeerUnreachable {
            peer: peer.name.clone(),
            source,
        };

        let request = Envelope::request(self.identity.party.clone(), self.proposal_id, body)
            .map_err(|e| unreachable_peer(TransportError::Codec(e.to_string())))?;
        let reply = self
            .network
            .send_and_receive(peer, request.clone())
            .map_err(unreachable_peer)?;

        if !reply.answers(&request) || reply.sender != *peer {
            return Err(CoordinationError::PeerRejected {
                peer: peer.name.clone(),
                reason: "reply does not belong to this session".into(),
            });
        }
        Ok(reply.body)
    }

    fn query_is_bust(&self, oracle: &Party, party: &Party) -> Result<bool, CoordinationError> {
        let reply = self.exchange(
            oracle,
            Message::QueryIsBust {
                party: party.clone(),
            },
        )?;
        match reply {
            Message::IsBust { is_bust } => Ok(is_bust),
            other => Err(unexpected(oracle, other)),
        }
    }

    fn request_attestation(
        &self,
        oracle: &Party,
        view: PartialView,
        proof: InclusionProof,
        root: SecureHash,
    ) -> Result<Attestation, CoordinationError> {
        let reply = self.exchange(oracle, Message::RequestAttestation { view, proof, root })?;
        match reply {
            Message::Attested { attestation } => Ok(attestation),
            Message::Rejected { reason } => {
                Err(AttestationError::AttestationRejected(reason).into())
            }
            other => Err(unexpected(oracle, other)),
        }
    }

    fn request_signature(
        &self,
        peer: &Party,
        signed: &SignedProposal,
    ) -> Result<TransactionSignature, CoordinationError> {
        let reply = self.exchange(
            peer,
            Message::RequestSignature {
                proposal: signed.to_bytes()?,
            },
        )?;
        match reply {
            Message::Countersigned { signature } => Ok(signature),
            other => Err(unexpected(peer, other)),
        }
    }
}

fn consumed_record(proposal: &TransitionProposal) -> Result<&AgreementRecord, CoordinationError> {
    proposal
        .consumed
        .as_ref()
        .map(|input| &input.state)
        .ok_or_else(|| {
            CoordinationError::Validation(ValidationError::WrongInputCount {
                command: proposal.command.name(),
                expected: 1,
                found: 0,
            })
        })
}

fn unexpected(peer: &Party, reply: Message) -> CoordinationError {
    let reason = match reply {
        Message::Rejected { reason } => reason,
        other => format!("unexpected {} reply", other.name()),
    };
    CoordinationError::PeerRejected {
        peer: peer.name.clone(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::{Amount, Currency, Status};
    use crate::ledger::SledLedger;
    use sled::open;
    use tempfile::tempdir;

    enum Forgery {
        Session,
        Proposal,
    }

    // countersigns honestly but answers on the wrong session or proposal
    struct ForgingNetwork {
        peer: NodeIdentity,
        forgery: Forgery,
    }

    impl Network for ForgingNetwork {
        fn send_and_receive(
            &self,
            _: &Party,
            request: Envelope,
        ) -> Result<Envelope, TransportError> {
            let root = request.proposal_id.unwrap_or(SecureHash::ZERO);
            let signature = self.peer.sign(&root);
            let mut reply =
                request.reply(self.peer.party.clone(), Message::Countersigned { signature });
            match self.forgery {
                Forgery::Session => reply.session_id = "session1forged".into(),
                Forgery::Proposal => {
                    reply.proposal_id = Some(SecureHash::of(b"another proposal"));
                }
            }
            Ok(reply)
        }
    }

    fn forged_reply_aborts(forgery: Forgery, name: &str) -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let db = open(temp_dir.path().join(name))?;
        let ledger = SledLedger::open(&db)?;

        let broker = NodeIdentity::generate("O=Broker,L=Zurich,C=CH");
        let network = ForgingNetwork {
            peer: NodeIdentity::generate("O=PartyA,L=London,C=GB"),
            forgery,
        };
        let output = AgreementRecord::new(
            broker.party.clone(),
            network.peer.party.clone(),
            NodeIdentity::generate("O=PartyB,L=New York,C=US").party,
            NodeIdentity::generate("O=Oracle,L=Paris,C=FR").party,
            Status::Intermediate,
            Amount::new(10, Currency::GBP),
        )?;
        let signers = contract::required_signers(None, &output, &Command::Create)?;
        let proposal = TransitionProposal::new(None, output, Command::Create, signers);

        let mut coordinator = SignatureCollectionCoordinator::new(&broker, &network, &*ledger);
        assert_eq!(coordinator.step(), CoordinationStep::Building);

        let result = coordinator.run(proposal);
        assert_eq!(
            result,
            Err(CoordinationError::PeerRejected {
                peer: network.peer.party.name.clone(),
                reason: "reply does not belong to this session".into(),
            })
        );
        assert_eq!(coordinator.step(), CoordinationStep::Aborted);
        assert!(ledger.unconsumed()?.is_empty());
        Ok(())
    }

    #[test]
    fn reply_on_another_session_aborts() -> anyhow::Result<()> {
        forged_reply_aborts(Forgery::Session, "test_forged_session.db")
    }

    #[test]
    fn reply_for_another_proposal_aborts() -> anyhow::Result<()> {
        forged_reply_aborts(Forgery::Proposal, "test_forged_proposal.db")
    }
}
