//! Countersigning checks run by a counterparty before any signature leaves its node
//!
//! Every test hands a crafted `RequestSignature` envelope to a node's responder and inspects the
//! reply. The responders share one reference ledger opened under a temp dir.

use anyhow::Context;
use direct_agreement::agreement::{AgreementRecord, Amount, Currency, StateAndRef, StateRef, Status};
use direct_agreement::contract::required_signers;
use direct_agreement::error::{ResponderError, ValidationError};
use direct_agreement::identity::NodeIdentity;
use direct_agreement::ledger::{Ledger, SledLedger};
use direct_agreement::messages::{Envelope, Message};
use direct_agreement::network::MessageHandler;
use direct_agreement::proposal::{Command, SignedProposal, TransitionProposal};
use direct_agreement::responder::{AcceptAll, Responder};
use direct_agreement::utils::SecureHash;
use sled::open;
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

struct Fixture {
    broker: Arc<NodeIdentity>,
    a: Arc<NodeIdentity>,
    b: Arc<NodeIdentity>,
    oracle: Arc<NodeIdentity>,
    ledger: Arc<SledLedger>,
    _dir: TempDir,
}

fn fixture(name: &str) -> anyhow::Result<Fixture> {
    let temp_dir = tempdir()?;
    let db = open(temp_dir.path().join(name))?;

    Ok(Fixture {
        broker: Arc::new(NodeIdentity::generate("O=Broker,L=Zurich,C=CH")),
        a: Arc::new(NodeIdentity::generate("O=PartyA,L=London,C=GB")),
        b: Arc::new(NodeIdentity::generate("O=PartyB,L=New York,C=US")),
        oracle: Arc::new(NodeIdentity::generate("O=Oracle,L=Paris,C=FR")),
        ledger: SledLedger::open(&db)?,
        _dir: temp_dir,
    })
}

fn responder(f: &Fixture, node: &Arc<NodeIdentity>) -> Responder {
    Responder::new(node.clone(), f.ledger.clone(), None, Arc::new(AcceptAll))
}

fn record(f: &Fixture, status: Status) -> anyhow::Result<AgreementRecord> {
    Ok(AgreementRecord::new(
        f.broker.party.clone(),
        f.a.party.clone(),
        f.b.party.clone(),
        f.oracle.party.clone(),
        status,
        Amount::new(10, Currency::GBP),
    )?)
}

fn sign(
    proposal: &TransitionProposal,
    signers: &[&NodeIdentity],
) -> anyhow::Result<SignedProposal> {
    let mut signed = SignedProposal::new(proposal.to_wire()?);
    let root = signed.id();
    for signer in signers {
        signed = signed.with_signature(signer.sign(&root));
    }
    Ok(signed)
}

fn request(sender: &NodeIdentity, signed: &SignedProposal) -> anyhow::Result<Envelope> {
    Envelope::request(
        sender.party.clone(),
        Some(signed.id()),
        Message::RequestSignature {
            proposal: signed.to_bytes()?,
        },
    )
}

fn rejected(reason: ResponderError) -> Message {
    Message::Rejected {
        reason: reason.to_string(),
    }
}

fn create(f: &Fixture) -> anyhow::Result<TransitionProposal> {
    let output = record(f, Status::Intermediate)?;
    let signers = required_signers(None, &output, &Command::Create)?;
    Ok(TransitionProposal::new(None, output, Command::Create, signers))
}

// put a created agreement on the ledger and return it
fn committed_agreement(f: &Fixture) -> anyhow::Result<StateAndRef> {
    let receipt = f.ledger.submit(&sign(&create(f)?, &[&f.broker, &f.a])?)?;
    f.ledger
        .resolve(&receipt.output)?
        .context("created state is not live")
}

fn finalise(input: StateAndRef) -> anyhow::Result<TransitionProposal> {
    let output = input.state.with_status(Status::Completed);
    let signers = required_signers(Some(&input.state), &output, &Command::Finalise)?;
    Ok(TransitionProposal::new(Some(input), output, Command::Finalise, signers))
}

fn go_to_direct(f: &Fixture, input: StateAndRef, is_bust: bool) -> TransitionProposal {
    let output = input.state.with_status(Status::Direct);
    TransitionProposal::new(
        Some(input),
        output,
        Command::GoToDirect {
            party: f.broker.party.clone(),
            is_bust,
        },
        [f.a.party.clone(), f.b.party.clone(), f.oracle.party.clone()],
    )
}

#[test]
fn countersigns_a_sound_request() -> anyhow::Result<()> {
    let f = fixture("test_countersigns.db")?;
    let signed = sign(&finalise(committed_agreement(&f)?)?, &[&f.a])?;

    let request = request(&f.a, &signed)?;
    let reply = responder(&f, &f.broker).handle(request.clone());

    assert!(reply.answers(&request));
    assert_eq!(reply.sender, f.broker.party);
    let signature = match reply.body {
        Message::Countersigned { signature } => signature,
        other => anyhow::bail!("expected a countersignature, got {other:?}"),
    };
    assert_eq!(signature.by, f.broker.party.owning_key);
    assert!(signature.verify(&signed.id()).is_ok());
    Ok(())
}

#[test]
fn refuses_a_session_tagged_with_another_proposal() -> anyhow::Result<()> {
    let f = fixture("test_other_proposal.db")?;
    let signed = sign(&finalise(committed_agreement(&f)?)?, &[&f.a])?;

    let mut request = request(&f.a, &signed)?;
    request.proposal_id = Some(SecureHash::of(b"another proposal"));

    let reply = responder(&f, &f.broker).handle(request);
    assert_eq!(reply.body, rejected(ResponderError::ProposalMismatch));
    Ok(())
}

#[test]
fn refuses_an_invalid_transition() -> anyhow::Result<()> {
    let f = fixture("test_invalid_transition.db")?;
    let proposal = go_to_direct(&f, committed_agreement(&f)?, false);
    let signed = sign(&proposal, &[&f.a, &f.oracle])?;

    let reply = responder(&f, &f.b).handle(request(&f.a, &signed)?);
    assert_eq!(
        reply.body,
        rejected(ResponderError::Invalid(ValidationError::IntermediaryNotBust))
    );
    Ok(())
}

#[test]
fn refuses_when_not_a_required_signer() -> anyhow::Result<()> {
    let f = fixture("test_not_required.db")?;
    // finalising an Intermediate agreement is between partyA and the intermediary
    let signed = sign(&finalise(committed_agreement(&f)?)?, &[&f.a])?;

    let reply = responder(&f, &f.b).handle(request(&f.a, &signed)?);
    assert_eq!(
        reply.body,
        rejected(ResponderError::NotARequiredSigner(f.b.party.name.clone()))
    );
    Ok(())
}

#[test]
fn refuses_when_the_requester_has_not_signed() -> anyhow::Result<()> {
    let f = fixture("test_requester_unsigned.db")?;
    let proposal = finalise(committed_agreement(&f)?)?;

    let unsigned = sign(&proposal, &[])?;
    let reply = responder(&f, &f.broker).handle(request(&f.a, &unsigned)?);
    assert_eq!(
        reply.body,
        rejected(ResponderError::RequesterNotSigned(f.a.party.name.clone()))
    );

    // signed by A but requested by someone outside the signer set
    let signed = sign(&proposal, &[&f.a])?;
    let reply = responder(&f, &f.broker).handle(request(&f.b, &signed)?);
    assert_eq!(
        reply.body,
        rejected(ResponderError::RequesterNotSigned(f.b.party.name.clone()))
    );
    Ok(())
}

#[test]
fn refuses_a_signature_over_another_root() -> anyhow::Result<()> {
    let f = fixture("test_bad_signature.db")?;
    let signed = sign(&finalise(committed_agreement(&f)?)?, &[&f.a])?
        .with_signature(f.b.sign(&SecureHash::of(b"something else")));

    let reply = responder(&f, &f.broker).handle(request(&f.a, &signed)?);
    assert_eq!(
        reply.body,
        rejected(ResponderError::InvalidSignature(f.b.party.owning_key.address()))
    );
    Ok(())
}

#[test]
fn create_is_accepted_only_by_party_a_from_the_intermediary() -> anyhow::Result<()> {
    let f = fixture("test_create_checks.db")?;
    let proposal = create(&f)?;

    // partyA signs first and asks the intermediary
    let signed = sign(&proposal, &[&f.a])?;
    let reply = responder(&f, &f.broker).handle(request(&f.a, &signed)?);
    assert_eq!(reply.body, rejected(ResponderError::NotPartyA));

    // a request to partyA that does not come from the intermediary
    let reply = responder(&f, &f.a).handle(request(&f.a, &signed)?);
    assert_eq!(reply.body, rejected(ResponderError::NotFromIntermediary));

    // the normal direction
    let signed = sign(&proposal, &[&f.broker])?;
    let reply = responder(&f, &f.a).handle(request(&f.broker, &signed)?);
    assert!(matches!(reply.body, Message::Countersigned { .. }));
    Ok(())
}

#[test]
fn go_to_direct_needs_the_oracle_signature() -> anyhow::Result<()> {
    let f = fixture("test_needs_attestation.db")?;
    let proposal = go_to_direct(&f, committed_agreement(&f)?, true);

    let signed = sign(&proposal, &[&f.a])?;
    let reply = responder(&f, &f.b).handle(request(&f.a, &signed)?);
    assert_eq!(
        reply.body,
        rejected(ResponderError::MissingAttestation(f.oracle.party.name.clone()))
    );

    let attested = sign(&proposal, &[&f.a, &f.oracle])?;
    let reply = responder(&f, &f.b).handle(request(&f.a, &attested)?);
    assert!(matches!(reply.body, Message::Countersigned { .. }));
    Ok(())
}

#[test]
fn refuses_inputs_that_are_no_longer_live() -> anyhow::Result<()> {
    let f = fixture("test_input_not_live.db")?;
    let live = committed_agreement(&f)?;

    // spend the agreement, then ask for a second, different finalise of it
    f.ledger
        .submit(&sign(&finalise(live.clone())?, &[&f.a, &f.broker])?)?;
    let signed = sign(&finalise(live.clone())?, &[&f.a])?;

    let reply = responder(&f, &f.broker).handle(request(&f.a, &signed)?);
    assert_eq!(reply.body, rejected(ResponderError::InputNotLive(live.reference)));

    // and a reference the ledger has never seen
    let unknown = StateAndRef {
        state: live.state,
        reference: StateRef {
            tx_id: SecureHash::of(b"never committed"),
            index: 0,
        },
    };
    let signed = sign(&finalise(unknown.clone())?, &[&f.a])?;
    let reply = responder(&f, &f.broker).handle(request(&f.a, &signed)?);
    assert_eq!(reply.body, rejected(ResponderError::InputNotLive(unknown.reference)));
    Ok(())
}

#[test]
fn plain_nodes_refuse_oracle_and_unexpected_requests() -> anyhow::Result<()> {
    let f = fixture("test_plain_node.db")?;
    let node = responder(&f, &f.a);

    let query = Envelope::request(f.b.party.clone(), None, Message::QueryAllBust)?;
    assert_eq!(
        node.handle(query).body,
        rejected(ResponderError::NotAnOracle(f.a.party.name.clone()))
    );

    let stray = Envelope::request(f.b.party.clone(), None, Message::IsBust { is_bust: true })?;
    assert_eq!(
        node.handle(stray).body,
        rejected(ResponderError::UnexpectedRequest("IsBust"))
    );
    Ok(())
}
