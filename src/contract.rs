//! State transition rules for agreements
//!
//! Pure and deterministic: the validator looks only at the proposal it is given. It is run by the
//! initiator before anything leaves the node, again by every responder before countersigning, and
//! once more by the ledger on submission.
use crate::agreement::{AgreementRecord, Status};
use crate::error::ValidationError;
use crate::identity::Party;
use crate::proposal::{Command, TransitionProposal};
use std::collections::BTreeSet;

pub struct StateTransitionValidator;

impl StateTransitionValidator {
    /// Validate a proposal, returning the first rule it breaks.
    pub fn validate(proposal: &TransitionProposal) -> Result<(), ValidationError> {
        let input = proposal.consumed.as_ref().map(|s| &s.state);
        let output = &proposal.produced;

        match &proposal.command {
            Command::Create => {
                require_no_input("Create", input)?;
                require_status("output", output.status(), Status::Intermediate, "Intermediate")?;
                check_record(output)?;
            }

            Command::GoToDirect { party, is_bust } => {
                let input = require_single_input("GoToDirect", input)?;
                require_status("input", input.status(), Status::Intermediate, "Intermediate")?;
                if party != input.intermediary() {
                    return Err(ValidationError::BustPartyNotIntermediary {
                        claimed: party.name.clone(),
                        intermediary: input.intermediary().name.clone(),
                    });
                }
                if !is_bust {
                    return Err(ValidationError::IntermediaryNotBust);
                }
                require_status("output", output.status(), Status::Direct, "Direct")?;
                require_carried_over(input, output)?;
            }

            Command::Finalise => {
                let input = require_single_input("Finalise", input)?;
                if !matches!(input.status(), Status::Intermediate | Status::Direct) {
                    return Err(ValidationError::StatusMismatch {
                        side: "input",
                        expected: "Intermediate or Direct",
                        found: input.status(),
                    });
                }
                require_status("output", output.status(), Status::Completed, "Completed")?;
                require_carried_over(input, output)?;
            }
        }

        let expected = required_signers(input, output, &proposal.command)?;
        require_exact_signers(&expected, &proposal.claimed_signers)
    }
}

/// The exact signer set a command needs, derived from the records it touches.
pub fn required_signers(
    input: Option<&AgreementRecord>,
    output: &AgreementRecord,
    command: &Command,
) -> Result<BTreeSet<Party>, ValidationError> {
    let signers = match command {
        Command::Create => vec![output.intermediary(), output.party_a()],
        Command::GoToDirect { .. } => {
            let input = require_single_input("GoToDirect", input)?;
            vec![input.party_a(), input.party_b(), input.oracle()]
        }
        Command::Finalise => {
            let input = require_single_input("Finalise", input)?;
            match input.status() {
                Status::Intermediate => vec![input.party_a(), input.intermediary()],
                Status::Direct => vec![input.party_a(), input.party_b()],
                found @ Status::Completed => {
                    return Err(ValidationError::StatusMismatch {
                        side: "input",
                        expected: "Intermediate or Direct",
                        found,
                    });
                }
            }
        }
    };

    Ok(signers.into_iter().cloned().collect())
}

/// Shorthand for [`StateTransitionValidator::validate`].
pub fn validate(proposal: &TransitionProposal) -> Result<(), ValidationError> {
    StateTransitionValidator::validate(proposal)
}

fn require_no_input(
    command: &'static str,
    input: Option<&AgreementRecord>,
) -> Result<(), ValidationError> {
    match input {
        None => Ok(()),
        Some(_) => Err(ValidationError::WrongInputCount {
            command,
            expected: 0,
            found: 1,
        }),
    }
}

fn require_single_input<'a>(
    command: &'static str,
    input: Option<&'a AgreementRecord>,
) -> Result<&'a AgreementRecord, ValidationError> {
    input.ok_or(ValidationError::WrongInputCount {
        command,
        expected: 1,
        found: 0,
    })
}

fn require_status(
    side: &'static str,
    found: Status,
    expected: Status,
    expected_name: &'static str,
) -> Result<(), ValidationError> {
    if found != expected {
        return Err(ValidationError::StatusMismatch {
            side,
            expected: expected_name,
            found,
        });
    }
    Ok(())
}

// re-run the constructor invariants
fn check_record(record: &AgreementRecord) -> Result<(), ValidationError> {
    AgreementRecord::new(
        record.intermediary().clone(),
        record.party_a().clone(),
        record.party_b().clone(),
        record.oracle().clone(),
        record.status(),
        record.value(),
    )?;
    Ok(())
}

fn require_carried_over(
    input: &AgreementRecord,
    output: &AgreementRecord,
) -> Result<(), ValidationError> {
    if input.value() != output.value() {
        return Err(ValidationError::ValueMismatch {
            input: input.value(),
            output: output.value(),
        });
    }
    if input.intermediary() != output.intermediary() {
        return Err(ValidationError::PartyFieldChanged("intermediary"));
    }
    if input.party_a() != output.party_a() {
        return Err(ValidationError::PartyFieldChanged("partyA"));
    }
    if input.party_b() != output.party_b() {
        return Err(ValidationError::PartyFieldChanged("partyB"));
    }
    if input.oracle() != output.oracle() {
        return Err(ValidationError::PartyFieldChanged("oracle"));
    }
    Ok(())
}

// exact set equality: catches both missing and surplus signers
fn require_exact_signers(
    expected: &BTreeSet<Party>,
    found: &BTreeSet<Party>,
) -> Result<(), ValidationError> {
    if expected.len() != found.len() || !expected.iter().all(|p| found.contains(p)) {
        return Err(ValidationError::WrongSignerSet {
            expected: expected.iter().map(|p| p.name.clone()).collect(),
            found: found.iter().map(|p| p.name.clone()).collect(),
        });
    }
    Ok(())
}
