//! Bust party oracle: fact table, point queries and attestations over partial views
use crate::agreement::TimeStamp;
use crate::disclosure::{self, InclusionProof, PartialView};
use crate::error::AttestationError;
use crate::identity::{NodeIdentity, Party, TransactionSignature};
use crate::proposal::Command;
use crate::utils::SecureHash;
use chrono::Utc;
use std::sync::Arc;

const BUST_TREE: &str = "is_bust";

/// One row of the oracle's fact table. Unique per party, last write wins.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct BustFact {
    #[n(0)]
    pub party: String,
    #[n(1)]
    pub is_bust: bool,
    #[n(2)]
    pub updated_at: TimeStamp<Utc>,
}

/// The oracle's signature over a proposal root, plus who gave it and when.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Attestation {
    #[n(0)]
    pub oracle: Party,
    #[n(1)]
    pub root: SecureHash,
    #[n(2)]
    pub signature: TransactionSignature,
    #[n(3)]
    pub signed_at: TimeStamp<Utc>,
}

/// sled-backed table of bust facts keyed by party name.
#[derive(Clone)]
pub struct BustFactStore {
    tree: sled::Tree,
}

/// Progress of a single attestation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationState {
    Idle,
    AwaitingDisclosure,
    Verifying,
    Signed,
    Rejected,
}

/// Drives one request through `Idle -> AwaitingDisclosure -> Verifying -> Signed | Rejected`.
/// Nothing survives the session except what is already in the fact table.
pub struct AttestationSession<'a> {
    oracle: &'a OracleService,
    state: AttestationState,
}

pub struct OracleService {
    identity: Arc<NodeIdentity>,
    store: BustFactStore,
}

impl BustFactStore {
    pub fn open(db: &sled::Db) -> Result<Self, AttestationError> {
        let tree = db.open_tree(BUST_TREE)?;
        tracing::debug!(tree = BUST_TREE, "opened bust fact table");
        Ok(Self { tree })
    }

    /// Upsert the bust status of `party`. A single sled insert, so concurrent readers see either
    /// the old row or the new one.
    pub fn set_bust(&self, party: &str, is_bust: bool) -> Result<BustFact, AttestationError> {
        let fact = BustFact {
            party: party.to_string(),
            is_bust,
            updated_at: TimeStamp::new(),
        };
        let bytes = minicbor::to_vec(&fact)
            .map_err(|e| AttestationError::AttestationStoreError(e.to_string()))?;

        match self.tree.insert(party.as_bytes(), bytes)? {
            Some(_) => tracing::info!(party, is_bust, "party updated in {BUST_TREE} table"),
            None => tracing::info!(party, is_bust, "party added to {BUST_TREE} table"),
        }

        Ok(fact)
    }

    pub fn get(&self, party: &str) -> Result<Option<BustFact>, AttestationError> {
        match self.tree.get(party.as_bytes())? {
            Some(bytes) => decode_fact(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Unknown parties are not bust.
    pub fn is_bust(&self, party: &str) -> Result<bool, AttestationError> {
        let is_bust = self.get(party)?.map(|f| f.is_bust).unwrap_or(false);
        tracing::debug!(party, is_bust, "party read from {BUST_TREE} table");
        Ok(is_bust)
    }

    pub fn all(&self) -> Result<Vec<BustFact>, AttestationError> {
        self.tree
            .iter()
            .map(|entry| {
                let (_, bytes) = entry?;
                decode_fact(&bytes)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

fn decode_fact(bytes: &[u8]) -> Result<BustFact, AttestationError> {
    minicbor::decode(bytes).map_err(|e| AttestationError::AttestationStoreError(e.to_string()))
}

impl OracleService {
    pub fn new(identity: Arc<NodeIdentity>, store: BustFactStore) -> Self {
        Self { identity, store }
    }

    pub fn party(&self) -> &Party {
        &self.identity.party
    }

    pub fn is_bust(&self, party: &Party) -> Result<bool, AttestationError> {
        self.store.is_bust(&party.name)
    }

    /// Administrative write. Only reachable on the node that owns the store.
    pub fn set_bust(&self, party: &Party, is_bust: bool) -> Result<BustFact, AttestationError> {
        self.store.set_bust(&party.name, is_bust)
    }

    pub fn bust_facts(&self) -> Result<Vec<BustFact>, AttestationError> {
        self.store.all()
    }

    /// Verify the disclosure and, if every disclosed command is a sound `GoToDirect` claim that
    /// lists this oracle as a signer, sign the root.
    pub fn attest(
        &self,
        view: &PartialView,
        proof: &InclusionProof,
        root: &SecureHash,
    ) -> Result<Attestation, AttestationError> {
        let mut session = AttestationSession::new(self);
        session.open();
        session.receive(view, proof, root)
    }

    fn check_claims(&self, view: &PartialView) -> Result<(), AttestationError> {
        let commands = view.commands()?;

        for component in &commands {
            let Command::GoToDirect { party, is_bust } = &component.command else {
                return Err(AttestationError::AttestationRejected(format!(
                    "disclosed command {} is not a bust claim",
                    component.command.name()
                )));
            };
            if !component.signers.contains(self.party()) {
                return Err(AttestationError::AttestationRejected(
                    "oracle is not listed as a required signer".into(),
                ));
            }
            let actual = self.is_bust(party)?;
            if actual != *is_bust {
                return Err(AttestationError::AttestationRejected(format!(
                    "claim that {party} is_bust={is_bust} contradicts the fact table"
                )));
            }
        }

        Ok(())
    }
}

impl<'a> AttestationSession<'a> {
    pub fn new(oracle: &'a OracleService) -> Self {
        Self {
            oracle,
            state: AttestationState::Idle,
        }
    }

    pub fn state(&self) -> AttestationState {
        self.state
    }

    pub fn open(&mut self) {
        self.transition(AttestationState::AwaitingDisclosure);
    }

    /// Consume the disclosed view. Only valid while awaiting disclosure.
    pub fn receive(
        &mut self,
        view: &PartialView,
        proof: &InclusionProof,
        root: &SecureHash,
    ) -> Result<Attestation, AttestationError> {
        if self.state != AttestationState::AwaitingDisclosure {
            return Err(AttestationError::AttestationRejected(format!(
                "session is {:?}, not awaiting a disclosure",
                self.state
            )));
        }
        self.transition(AttestationState::Verifying);

        let outcome = if !disclosure::verify_inclusion(view, proof, root) {
            Err(AttestationError::DisclosureProofInvalid)
        } else {
            self.oracle.check_claims(view)
        };

        match outcome {
            Ok(()) => {
                self.transition(AttestationState::Signed);
                Ok(Attestation {
                    oracle: self.oracle.party().clone(),
                    root: *root,
                    signature: self.oracle.identity.sign(root),
                    signed_at: TimeStamp::new(),
                })
            }
            Err(e) => {
                tracing::warn!(root = %root, error = %e, "attestation refused");
                self.transition(AttestationState::Rejected);
                Err(e)
            }
        }
    }

    fn transition(&mut self, next: AttestationState) {
        tracing::debug!(from = ?self.state, to = ?next, "attestation session");
        self.state = next;
    }
}

impl Attestation {
    /// Check that `expected_oracle` signed `root`.
    pub fn verify(
        &self,
        expected_oracle: &Party,
        root: &SecureHash,
    ) -> Result<(), AttestationError> {
        if self.oracle != *expected_oracle || self.signature.by != expected_oracle.owning_key {
            return Err(AttestationError::AttestationRejected(format!(
                "attestation signed by {} instead of {}",
                self.oracle, expected_oracle
            )));
        }
        if self.root != *root || self.signature.verify(root).is_err() {
            return Err(AttestationError::AttestationRejected(
                "attestation does not sign this proposal".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_party_defaults_to_not_bust() -> anyhow::Result<()> {
        let db = sled::Config::new().temporary(true).open()?;
        let store = BustFactStore::open(&db)?;

        assert!(!store.is_bust("O=Nobody,L=Nowhere,C=XX")?);
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn session_refuses_a_second_disclosure() -> anyhow::Result<()> {
        let db = sled::Config::new().temporary(true).open()?;
        let oracle = OracleService::new(
            Arc::new(NodeIdentity::generate("O=Oracle,L=Paris,C=FR")),
            BustFactStore::open(&db)?,
        );

        let mut session = AttestationSession::new(&oracle);
        assert_eq!(session.state(), AttestationState::Idle);
        session.open();

        let err = session
            .receive(&PartialView::default(), &InclusionProof::default(), &SecureHash::ZERO)
            .unwrap_err();
        assert_eq!(err, AttestationError::DisclosureProofInvalid);
        assert_eq!(session.state(), AttestationState::Rejected);

        let err = session
            .receive(&PartialView::default(), &InclusionProof::default(), &SecureHash::ZERO)
            .unwrap_err();
        assert!(matches!(err, AttestationError::AttestationRejected(_)));
        Ok(())
    }
}
