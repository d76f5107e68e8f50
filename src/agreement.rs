//! Core agreement record and value types
use super::error::RecordError;
use crate::identity::Party;
use crate::utils::SecureHash;
use chrono::{DateTime, TimeZone, Utc};
use std::str::FromStr;

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, Ord, PartialEq, PartialOrd, Hash,
)]
pub enum Currency {
    #[n(0)]
    USD,
    #[n(1)]
    GBP,
    #[n(2)]
    EUR,
    #[n(3)]
    CHF,
    #[n(4)]
    JPY,
}

/// A monetary amount in minor-less whole units. Use integers for currency.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Amount {
    #[n(0)]
    pub quantity: u64,
    #[n(1)]
    pub currency: Currency,
}

/// Lifecycle of an agreement. Linear, no reverse transitions.
#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, Ord, PartialEq, PartialOrd, Hash,
)]
pub enum Status {
    #[n(0)]
    Intermediate,
    #[n(1)]
    Direct,
    #[n(2)]
    Completed,
}

/// One immutable version of the agreement.
///
/// Only constructible through [`AgreementDraft::finalise`] or [`AgreementRecord::new`], both of
/// which enforce the record invariants. Decoding re-checks them as well.
#[derive(minicbor::Encode, Debug, Clone, Eq, PartialEq, Hash)]
pub struct AgreementRecord {
    #[n(0)]
    intermediary: Party,
    #[n(1)]
    party_a: Party,
    #[n(2)]
    party_b: Party,
    #[n(3)]
    oracle: Party,
    #[n(4)]
    status: Status,
    #[n(5)]
    value: Amount,
}

// Mirrors AgreementRecord field for field so decoding can re-run the invariants.
#[derive(minicbor::Decode)]
struct RawAgreementRecord {
    #[n(0)]
    intermediary: Party,
    #[n(1)]
    party_a: Party,
    #[n(2)]
    party_b: Party,
    #[n(3)]
    oracle: Party,
    #[n(4)]
    status: Status,
    #[n(5)]
    value: Amount,
}

// used for constructing drafts
#[derive(Debug, Default)]
pub struct AgreementDraft {
    intermediary: Option<Party>,
    party_a: Option<Party>,
    party_b: Option<Party>,
    oracle: Option<Party>,
    value: Option<Amount>,
}

/// Points at the output of a committed proposal. The tx id is that proposal's root commitment.
#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct StateRef {
    #[n(0)]
    pub tx_id: SecureHash,
    #[n(1)]
    pub index: u32,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateAndRef {
    #[n(0)]
    pub state: AgreementRecord,
    #[n(1)]
    pub reference: StateRef,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl Amount {
    pub fn new(quantity: u64, currency: Currency) -> Self {
        Self { quantity, currency }
    }
}

impl AgreementRecord {
    /// Build a record, checking that the value is positive and that intermediary, partyA and
    /// partyB are pairwise distinct.
    pub fn new(
        intermediary: Party,
        party_a: Party,
        party_b: Party,
        oracle: Party,
        status: Status,
        value: Amount,
    ) -> Result<Self, RecordError> {
        if value.quantity == 0 {
            return Err(RecordError::NonPositiveValue);
        }
        if intermediary == party_a {
            return Err(RecordError::SameEntity("intermediary", "partyA"));
        }
        if party_a == party_b {
            return Err(RecordError::SameEntity("partyA", "partyB"));
        }
        if party_b == intermediary {
            return Err(RecordError::SameEntity("partyB", "intermediary"));
        }

        Ok(Self {
            intermediary,
            party_a,
            party_b,
            oracle,
            status,
            value,
        })
    }

    pub fn intermediary(&self) -> &Party {
        &self.intermediary
    }
    pub fn party_a(&self) -> &Party {
        &self.party_a
    }
    pub fn party_b(&self) -> &Party {
        &self.party_b
    }
    pub fn oracle(&self) -> &Party {
        &self.oracle
    }
    pub fn status(&self) -> Status {
        self.status
    }
    pub fn value(&self) -> Amount {
        self.value
    }

    /// The same agreement moved to `status`. Parties and value are carried over untouched.
    pub fn with_status(&self, status: Status) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    /// Parties who hold a copy of the agreement.
    pub fn participants(&self) -> [&Party; 3] {
        [&self.party_a, &self.party_b, &self.intermediary]
    }

    pub fn is_participant(&self, party: &Party) -> bool {
        self.participants().contains(&party)
    }
}

impl AgreementDraft {
    /// Construct a new builder object, this becomes the basis for a draft
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_intermediary(mut self, party: Party) -> Self {
        self.intermediary = Some(party);
        self
    }
    pub fn set_party_a(mut self, party: Party) -> Self {
        self.party_a = Some(party);
        self
    }
    pub fn set_party_b(mut self, party: Party) -> Self {
        self.party_b = Some(party);
        self
    }
    pub fn set_oracle(mut self, party: Party) -> Self {
        self.oracle = Some(party);
        self
    }
    pub fn set_value(mut self, value: Amount) -> Self {
        self.value = Some(value);
        self
    }
    // Checks fields and returns a fresh Intermediate record
    pub fn finalise(self) -> Result<AgreementRecord, RecordError> {
        AgreementRecord::new(
            self.intermediary.ok_or(RecordError::MissingField("intermediary"))?,
            self.party_a.ok_or(RecordError::MissingField("partyA"))?,
            self.party_b.ok_or(RecordError::MissingField("partyB"))?,
            self.oracle.ok_or(RecordError::MissingField("oracle"))?,
            Status::Intermediate,
            self.value.ok_or(RecordError::MissingField("value"))?,
        )
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl FromStr for Currency {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USD" => Ok(Currency::USD),
            "GBP" => Ok(Currency::GBP),
            "EUR" => Ok(Currency::EUR),
            "CHF" => Ok(Currency::CHF),
            "JPY" => Ok(Currency::JPY),
            other => Err(RecordError::InvalidAmount(other.to_string())),
        }
    }
}

impl FromStr for Amount {
    type Err = RecordError;

    // "20 USD"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RecordError::InvalidAmount(s.to_string());
        let (quantity, currency) = s.trim().split_once(' ').ok_or_else(invalid)?;
        let quantity = quantity.trim().parse::<u64>().map_err(|_| invalid())?;
        let currency = currency.trim().parse::<Currency>().map_err(|_| invalid())?;

        Ok(Amount { quantity, currency })
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {:?}", self.quantity, self.currency)
    }
}

impl std::fmt::Display for StateRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.tx_id, self.index)
    }
}

impl<'b, C> minicbor::Decode<'b, C> for AgreementRecord {
    fn decode(d: &mut minicbor::Decoder<'b>, ctx: &mut C) -> Result<Self, minicbor::decode::Error> {
        let raw: RawAgreementRecord = d.decode_with(ctx)?;

        AgreementRecord::new(
            raw.intermediary,
            raw.party_a,
            raw.party_b,
            raw.oracle,
            raw.status,
            raw.value,
        )
        .map_err(|e| minicbor::decode::Error::message(e.to_string()))
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}
impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}
