//! Reference ledger: orders fully signed proposals and enforces single use of records
//!
//! The core treats the ledger as an external collaborator behind [`Ledger`]. [`SledLedger`] is
//! the implementation used by nodes and tests: one sled transaction over the `states`, `consumed`
//! and `transactions` trees, so two proposals consuming the same record can never both commit.
use crate::agreement::{AgreementRecord, StateAndRef, StateRef, TimeStamp};
use crate::contract;
use crate::error::CommitError;
use crate::identity::Party;
use crate::proposal::SignedProposal;
use crate::utils::SecureHash;
use chrono::Utc;
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::collections::BTreeSet;
use std::sync::Arc;

const STATES_TREE: &str = "states";
const CONSUMED_TREE: &str = "consumed";
const TRANSACTIONS_TREE: &str = "transactions";

/// Proof that a proposal was ordered and committed.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct CommitReceipt {
    #[n(0)]
    pub tx_id: SecureHash,
    #[n(1)]
    pub output: StateRef,
    #[n(2)]
    pub committed_at: TimeStamp<Utc>,
}

pub trait Ledger: Send + Sync {
    /// Atomically commit a fully authorised proposal.
    fn submit(&self, proposal: &SignedProposal) -> Result<CommitReceipt, CommitError>;

    /// Look up an unconsumed record.
    fn resolve(&self, reference: &StateRef) -> Result<Option<StateAndRef>, CommitError>;

    fn unconsumed(&self) -> Result<Vec<StateAndRef>, CommitError>;
}

pub struct SledLedger {
    states: sled::Tree,
    consumed: sled::Tree,
    transactions: sled::Tree,
}

fn state_key(reference: &StateRef) -> Vec<u8> {
    let mut key = reference.tx_id.as_bytes().to_vec();
    key.extend_from_slice(&reference.index.to_be_bytes());
    key
}

fn decode_record(bytes: &[u8]) -> Result<AgreementRecord, CommitError> {
    minicbor::decode(bytes).map_err(|e| CommitError::Store(e.to_string()))
}

impl SledLedger {
    pub fn open(db: &sled::Db) -> Result<Arc<Self>, CommitError> {
        Ok(Arc::new(Self {
            states: db.open_tree(STATES_TREE)?,
            consumed: db.open_tree(CONSUMED_TREE)?,
            transactions: db.open_tree(TRANSACTIONS_TREE)?,
        }))
    }

    // every required signer signed, nobody else did, and every signature is over the root
    fn check_signatures(
        proposal: &SignedProposal,
        required: &BTreeSet<Party>,
    ) -> Result<(), CommitError> {
        let root = proposal.id();

        for signature in &proposal.signatures {
            let Some(signer) = required.iter().find(|p| p.owning_key == signature.by) else {
                return Err(CommitError::UnexpectedSignature(signature.by.address()));
            };
            if signature.verify(&root).is_err() {
                return Err(CommitError::InvalidSignature(signer.name.clone()));
            }
        }

        if let Some(missing) = proposal.missing_signers(required).first() {
            return Err(CommitError::MissingSignature(missing.name.clone()));
        }

        Ok(())
    }

    /// The fully signed proposal that produced `tx_id`.
    pub fn transaction(&self, tx_id: &SecureHash) -> Result<Option<SignedProposal>, CommitError> {
        match self.transactions.get(tx_id.as_bytes())? {
            Some(bytes) => Ok(Some(SignedProposal::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn is_consumed(&self, reference: &StateRef) -> Result<bool, CommitError> {
        Ok(self.consumed.contains_key(state_key(reference))?)
    }
}

impl Ledger for SledLedger {
    fn submit(&self, signed: &SignedProposal) -> Result<CommitReceipt, CommitError> {
        let proposal = signed.proposal()?;
        contract::validate(&proposal)?;
        Self::check_signatures(signed, &proposal.claimed_signers)?;

        let tx_id = signed.id();
        let output = StateRef { tx_id, index: 0 };
        let output_bytes =
            minicbor::to_vec(&proposal.produced).map_err(|e| CommitError::Store(e.to_string()))?;
        let tx_bytes = signed.to_bytes()?;
        let input = proposal.consumed.as_ref();

        let result: Result<(), TransactionError<CommitError>> =
            (&self.states, &self.consumed, &self.transactions).transaction(
                |(states, consumed, transactions)| {
                    if transactions.get(tx_id.as_bytes())?.is_some() {
                        return Err(ConflictableTransactionError::Abort(
                            CommitError::AlreadyCommitted(tx_id),
                        ));
                    }

                    if let Some(input) = input {
                        let key = state_key(&input.reference);
                        if consumed.get(&key)?.is_some() {
                            return Err(ConflictableTransactionError::Abort(
                                CommitError::DoubleSpend(input.reference),
                            ));
                        }
                        let Some(recorded) = states.get(&key)? else {
                            return Err(ConflictableTransactionError::Abort(
                                CommitError::UnknownInput(input.reference),
                            ));
                        };
                        let recorded =
                            decode_record(&recorded).map_err(ConflictableTransactionError::Abort)?;
                        if recorded != input.state {
                            return Err(ConflictableTransactionError::Abort(
                                CommitError::InputMismatch(input.reference),
                            ));
                        }
                        consumed.insert(key, tx_id.as_bytes().to_vec())?;
                    }

                    states.insert(state_key(&output), output_bytes.clone())?;
                    transactions.insert(tx_id.as_bytes().to_vec(), tx_bytes.clone())?;
                    Ok(())
                },
            );

        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(e)) => {
                tracing::warn!(tx = %tx_id, error = %e, "ledger refused proposal");
                return Err(e);
            }
            Err(TransactionError::Storage(e)) => return Err(e.into()),
        }

        tracing::info!(
            tx = %tx_id,
            command = proposal.command.name(),
            status = ?proposal.produced.status(),
            "committed"
        );

        Ok(CommitReceipt {
            tx_id,
            output,
            committed_at: TimeStamp::new(),
        })
    }

    fn resolve(&self, reference: &StateRef) -> Result<Option<StateAndRef>, CommitError> {
        let key = state_key(reference);
        if self.consumed.contains_key(&key)? {
            return Ok(None);
        }
        match self.states.get(&key)? {
            Some(bytes) => Ok(Some(StateAndRef {
                state: decode_record(&bytes)?,
                reference: *reference,
            })),
            None => Ok(None),
        }
    }

    fn unconsumed(&self) -> Result<Vec<StateAndRef>, CommitError> {
        let mut found = vec![];
        for entry in self.states.iter() {
            let (key, bytes) = entry?;
            if self.consumed.contains_key(&key)? {
                continue;
            }
            let reference = parse_state_key(&key)?;
            found.push(StateAndRef {
                state: decode_record(&bytes)?,
                reference,
            });
        }
        Ok(found)
    }
}

fn parse_state_key(key: &[u8]) -> Result<StateRef, CommitError> {
    if key.len() != 36 {
        return Err(CommitError::Store(format!("bad state key length {}", key.len())));
    }
    let mut tx_id = [0u8; 32];
    tx_id.copy_from_slice(&key[..32]);
    let mut index = [0u8; 4];
    index.copy_from_slice(&key[32..]);

    Ok(StateRef {
        tx_id: SecureHash::from_bytes(tx_id),
        index: u32::from_be_bytes(index),
    })
}
