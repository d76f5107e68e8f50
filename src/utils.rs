//! Utility functions for hashing and identifiers

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// A sha256 digest. Used for Merkle nodes, component nonces and transaction ids.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SecureHash([u8; 32]);

impl SecureHash {
    pub const ZERO: SecureHash = SecureHash([0u8; 32]);

    /// Hash arbitrary bytes.
    pub fn of(data: &[u8]) -> Self {
        let mut out = [0u8; 32];
        hex::decode_to_slice(sha256::digest(data), &mut out)
            .expect("sha256 digest is always 64 hex characters");
        Self(out)
    }

    /// Hash the concatenation of several byte slices.
    pub fn of_parts(parts: &[&[u8]]) -> Self {
        let buf: Vec<u8> = parts.iter().flat_map(|p| p.iter().copied()).collect();
        Self::of(&buf)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn parse(hex_str: &str) -> anyhow::Result<Self> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(hex_str, &mut out)?;
        Ok(Self(out))
    }
}

impl std::fmt::Display for SecureHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for SecureHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecureHash({})", &self.to_hex()[..12])
    }
}

impl<C> minicbor::Encode<C> for SecureHash {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for SecureHash {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let bytes: [u8; 32] = d
            .bytes()?
            .try_into()
            .map_err(|_| minicbor::decode::Error::message("expected a 32 byte hash"))?;

        Ok(SecureHash(bytes))
    }
}
