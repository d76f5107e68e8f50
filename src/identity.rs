//! Party identities and the ed25519 keys that back them
use crate::utils::SecureHash;
use bech32::Bech32m;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

// human readable prefix used when rendering keys as addresses
const KEY_HRP: &str = "party";

/// Raw bytes of an ed25519 verifying key.
///
/// Kept as bytes so it can be ordered and hashed inside signer sets; it is parsed into a
/// [`VerifyingKey`] only when a signature is checked.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey([u8; 32]);

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SignatureBytes([u8; 64]);

/// A named participant, identified by its legal name and owning key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, minicbor::Encode, minicbor::Decode)]
pub struct Party {
    #[n(0)]
    pub name: String, // e.g. "O=PartyA,L=London,C=GB"
    #[n(1)]
    pub owning_key: PublicKey,
}

/// A signature by `by` over the 32 bytes of a proposal's root commitment.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct TransactionSignature {
    #[n(0)]
    pub by: PublicKey,
    #[n(1)]
    pub bytes: SignatureBytes,
}

pub struct KeyPair {
    signing: SigningKey,
}

/// The local identity of a node: its public party and the private key behind it.
pub struct NodeIdentity {
    pub party: Party,
    keys: KeyPair,
}

impl PublicKey {
    /// bech32m rendering, e.g. `party1...`
    pub fn address(&self) -> String {
        match bech32::Hrp::parse(KEY_HRP) {
            Ok(hrp) => {
                bech32::encode::<Bech32m>(hrp, &self.0).unwrap_or_else(|_| hex::encode(self.0))
            }
            Err(_) => hex::encode(self.0),
        }
    }

    pub fn verify(
        &self,
        message: &[u8],
        signature: &SignatureBytes,
    ) -> Result<(), ed25519_dalek::SignatureError> {
        let key = VerifyingKey::from_bytes(&self.0)?;
        let signature = ed25519_dalek::Signature::from_bytes(&signature.0);
        key.verify(message, &signature)
    }
}

impl Party {
    pub fn new(name: impl Into<String>, owning_key: PublicKey) -> Self {
        Self {
            name: name.into(),
            owning_key,
        }
    }
}

impl TransactionSignature {
    /// Check the signature against a proposal root.
    pub fn verify(&self, root: &SecureHash) -> Result<(), ed25519_dalek::SignatureError> {
        self.by.verify(root.as_bytes(), &self.bytes)
    }
}

impl KeyPair {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing.verifying_key().to_bytes())
    }

    pub fn sign(&self, root: &SecureHash) -> TransactionSignature {
        let signature = self.signing.sign(root.as_bytes());
        TransactionSignature {
            by: self.public_key(),
            bytes: SignatureBytes(signature.to_bytes()),
        }
    }
}

impl NodeIdentity {
    /// Generate a fresh key pair for `name`.
    pub fn generate(name: impl Into<String>) -> Self {
        let keys = KeyPair::generate();
        let party = Party::new(name, keys.public_key());
        Self { party, keys }
    }

    pub fn sign(&self, root: &SecureHash) -> TransactionSignature {
        self.keys.sign(root)
    }
}

impl std::fmt::Display for Party {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.address())
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", &hex::encode(self.0)[..12])
    }
}

impl std::fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SignatureBytes({})", &hex::encode(self.0)[..12])
    }
}

impl<C> minicbor::Encode<C> for PublicKey {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for PublicKey {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let bytes: [u8; 32] = d
            .bytes()?
            .try_into()
            .map_err(|_| minicbor::decode::Error::message("expected a 32 byte public key"))?;

        Ok(PublicKey(bytes))
    }
}

impl<C> minicbor::Encode<C> for SignatureBytes {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for SignatureBytes {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let bytes: [u8; 64] = d
            .bytes()?
            .try_into()
            .map_err(|_| minicbor::decode::Error::message("expected a 64 byte signature"))?;

        Ok(SignatureBytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_verifies_over_root() {
        let identity = NodeIdentity::generate("O=PartyA,L=London,C=GB");
        let root = SecureHash::of(b"proposal");

        let signature = identity.sign(&root);

        assert_eq!(signature.by, identity.party.owning_key);
        assert!(signature.verify(&root).is_ok());
        assert!(signature.verify(&SecureHash::of(b"other")).is_err());
    }

    #[test]
    fn address_uses_party_prefix() {
        let key = KeyPair::generate().public_key();
        assert!(key.address().starts_with("party1"));
    }

    #[test]
    fn party_encoding() {
        let original = NodeIdentity::generate("O=Oracle,L=Paris,C=FR").party;

        let encoding = minicbor::to_vec(&original).unwrap();
        let decode: Party = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }
}
