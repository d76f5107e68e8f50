//! Transition proposals, their component encoding and signatures
//!
//! A proposal is kept in two shapes. [`TransitionProposal`] is the typed view the validator works
//! on. [`WireProposal`] is the ordered list of CBOR-encoded components plus the privacy salt; it is
//! what travels between parties and what the Merkle commitment is computed over, so every party
//! signs exactly the bytes the others see.
use crate::agreement::{AgreementRecord, StateAndRef};
use crate::disclosure;
use crate::error::ValidationError;
use crate::identity::{Party, PublicKey, TransactionSignature};
use crate::utils::SecureHash;
use rand::RngCore;
use std::collections::BTreeSet;

const TAG_CREATE: u32 = 0;
const TAG_GO_TO_DIRECT: u32 = 1;
const TAG_FINALISE: u32 = 2;

/// The closed set of transitions an agreement supports.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    Create,
    /// Claim, to be confirmed by the oracle, that `party` is (or is not) bust.
    GoToDirect { party: Party, is_bust: bool },
    Finalise,
}

/// The command together with the parties claimed to authorise it.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct CommandComponent {
    #[n(0)]
    pub command: Command,
    #[n(1)]
    pub signers: BTreeSet<Party>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, minicbor::Encode, minicbor::Decode)]
pub enum ComponentGroup {
    #[n(0)]
    Input,
    #[n(1)]
    Output,
    #[n(2)]
    Command,
}

/// One leaf of the proposal's Merkle tree.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Component {
    #[n(0)]
    pub group: ComponentGroup,
    #[cbor(n(1), with = "minicbor::bytes")]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionProposal {
    salt: SecureHash,
    pub consumed: Option<StateAndRef>,
    pub produced: AgreementRecord,
    pub command: Command,
    pub claimed_signers: BTreeSet<Party>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct WireProposal {
    #[n(0)]
    pub salt: SecureHash,
    #[n(1)]
    pub components: Vec<Component>,
}

/// A proposal plus the signatures collected for it so far.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct SignedProposal {
    #[n(0)]
    pub wire: WireProposal,
    #[n(1)]
    pub signatures: Vec<TransactionSignature>,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Create => "Create",
            Command::GoToDirect { .. } => "GoToDirect",
            Command::Finalise => "Finalise",
        }
    }
}

impl CommandComponent {
    /// Decode a command leaf. Unknown command tags surface as
    /// [`ValidationError::UnrecognisedCommand`] rather than a generic decode failure.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ValidationError> {
        minicbor::decode(bytes).map_err(|e| {
            if e.is_unknown_variant() {
                ValidationError::UnrecognisedCommand {
                    tag: unknown_command_tag(bytes).unwrap_or(u32::MAX),
                }
            } else {
                ValidationError::Malformed(format!("command component: {e}"))
            }
        })
    }
}

// Re-read the tag of a command leaf, used only for error reporting.
fn unknown_command_tag(bytes: &[u8]) -> Option<u32> {
    let mut d = minicbor::Decoder::new(bytes);
    d.array().ok()?;
    d.array().ok()?;
    d.u32().ok()
}

impl TransitionProposal {
    /// Build a proposal with a fresh random privacy salt.
    pub fn new(
        consumed: Option<StateAndRef>,
        produced: AgreementRecord,
        command: Command,
        claimed_signers: impl IntoIterator<Item = Party>,
    ) -> Self {
        let mut salt = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);

        Self {
            salt: SecureHash::from_bytes(salt),
            consumed,
            produced,
            command,
            claimed_signers: claimed_signers.into_iter().collect(),
        }
    }

    /// Encode into the fixed component order `[input?, output, command]`.
    pub fn to_wire(&self) -> Result<WireProposal, ValidationError> {
        let mut components = Vec::with_capacity(3);

        if let Some(input) = &self.consumed {
            components.push(Component {
                group: ComponentGroup::Input,
                bytes: encode(input)?,
            });
        }
        components.push(Component {
            group: ComponentGroup::Output,
            bytes: encode(&self.produced)?,
        });
        components.push(Component {
            group: ComponentGroup::Command,
            bytes: encode(&CommandComponent {
                command: self.command.clone(),
                signers: self.claimed_signers.clone(),
            })?,
        });

        Ok(WireProposal {
            salt: self.salt,
            components,
        })
    }

    /// The root commitment. Doubles as the transaction id on the ledger.
    pub fn id(&self) -> Result<SecureHash, ValidationError> {
        Ok(self.to_wire()?.root())
    }
}

impl WireProposal {
    pub fn root(&self) -> SecureHash {
        let leaves: Vec<SecureHash> = self
            .components
            .iter()
            .enumerate()
            .map(|(position, component)| {
                disclosure::leaf_hash(&self.nonce(position as u32), component)
            })
            .collect();

        disclosure::merkle_root(&leaves)
    }

    /// Per-component nonce. Revealed only alongside the component it salts.
    pub fn nonce(&self, position: u32) -> SecureHash {
        SecureHash::of_parts(&[self.salt.as_bytes(), &position.to_be_bytes()])
    }

    /// Decode back into the typed view, enforcing the component layout.
    pub fn decode(&self) -> Result<TransitionProposal, ValidationError> {
        let mut consumed = None;
        let mut produced = None;
        let mut command = None;

        for component in &self.components {
            match component.group {
                ComponentGroup::Input => {
                    if consumed.is_some() || produced.is_some() || command.is_some() {
                        return Err(ValidationError::Malformed(
                            "at most one input, placed before the output".into(),
                        ));
                    }
                    consumed = Some(decode::<StateAndRef>(&component.bytes, "input")?);
                }
                ComponentGroup::Output => {
                    if produced.is_some() || command.is_some() {
                        return Err(ValidationError::Malformed(
                            "exactly one output, placed before the command".into(),
                        ));
                    }
                    produced = Some(decode::<AgreementRecord>(&component.bytes, "output")?);
                }
                ComponentGroup::Command => {
                    if command.is_some() {
                        return Err(ValidationError::Malformed("exactly one command".into()));
                    }
                    command = Some(CommandComponent::from_bytes(&component.bytes)?);
                }
            }
        }

        let produced =
            produced.ok_or_else(|| ValidationError::Malformed("missing output".into()))?;
        let command = command.ok_or_else(|| ValidationError::Malformed("missing command".into()))?;

        Ok(TransitionProposal {
            salt: self.salt,
            consumed,
            produced,
            command: command.command,
            claimed_signers: command.signers,
        })
    }
}

impl SignedProposal {
    pub fn new(wire: WireProposal) -> Self {
        Self {
            wire,
            signatures: vec![],
        }
    }

    pub fn id(&self) -> SecureHash {
        self.wire.root()
    }

    pub fn proposal(&self) -> Result<TransitionProposal, ValidationError> {
        self.wire.decode()
    }

    /// Append a signature, replacing any earlier one from the same key.
    pub fn with_signature(mut self, signature: TransactionSignature) -> Self {
        self.signatures.retain(|s| s.by != signature.by);
        self.signatures.push(signature);
        self
    }

    pub fn is_signed_by(&self, party: &Party) -> bool {
        self.signatures.iter().any(|s| s.by == party.owning_key)
    }

    /// Check every attached signature against the root. Returns the first offending key.
    pub fn verify_signatures(&self) -> Result<(), PublicKey> {
        let root = self.id();
        for signature in &self.signatures {
            if signature.verify(&root).is_err() {
                return Err(signature.by);
            }
        }
        Ok(())
    }

    /// Required signers that have not signed yet.
    pub fn missing_signers<'a>(&self, required: &'a BTreeSet<Party>) -> Vec<&'a Party> {
        required.iter().filter(|p| !self.is_signed_by(p)).collect()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ValidationError> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ValidationError> {
        decode(bytes, "signed proposal")
    }
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, ValidationError> {
    minicbor::to_vec(value).map_err(|e| ValidationError::Malformed(e.to_string()))
}

fn decode<'b, T: minicbor::Decode<'b, ()>>(
    bytes: &'b [u8],
    what: &str,
) -> Result<T, ValidationError> {
    minicbor::decode(bytes).map_err(|e| ValidationError::Malformed(format!("{what}: {e}")))
}

impl<C> minicbor::Encode<C> for Command {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        match self {
            Command::Create => e.array(1)?.u32(TAG_CREATE)?.ok(),
            Command::GoToDirect { party, is_bust } => e
                .array(3)?
                .u32(TAG_GO_TO_DIRECT)?
                .encode_with(party, ctx)?
                .bool(*is_bust)?
                .ok(),
            Command::Finalise => e.array(1)?.u32(TAG_FINALISE)?.ok(),
        }
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Command {
    fn decode(d: &mut minicbor::Decoder<'b>, ctx: &mut C) -> Result<Self, minicbor::decode::Error> {
        let len = d.array()?;
        let tag = d.u32()?;

        let (command, expected_len) = match tag {
            TAG_CREATE => (Command::Create, 1),
            TAG_GO_TO_DIRECT => {
                let party = d.decode_with(ctx)?;
                let is_bust = d.bool()?;
                (Command::GoToDirect { party, is_bust }, 3)
            }
            TAG_FINALISE => (Command::Finalise, 1),
            other => return Err(minicbor::decode::Error::unknown_variant(other.into())),
        };

        if len.is_some_and(|n| n != expected_len) {
            return Err(minicbor::decode::Error::message("unexpected command arity"));
        }

        Ok(command)
    }
}
