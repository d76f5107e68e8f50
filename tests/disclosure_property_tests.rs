//! Property-based tests for selective disclosure
//!
//! A disclosed view must always verify against the root it was cut from, and any tampering with
//! the view, the proof or the root must make verification fail.

use direct_agreement::agreement::{AgreementRecord, Amount, Currency, StateAndRef, StateRef, Status};
use direct_agreement::disclosure::{disclose, disclose_with, verify_inclusion};
use direct_agreement::identity::{NodeIdentity, Party};
use direct_agreement::proposal::{Command, ComponentGroup, TransitionProposal, WireProposal};
use direct_agreement::utils::SecureHash;
use proptest::prelude::*;

struct Cast {
    broker: Party,
    a: Party,
    b: Party,
    oracle: Party,
}

fn cast() -> Cast {
    Cast {
        broker: NodeIdentity::generate("O=Broker,L=Zurich,C=CH").party,
        a: NodeIdentity::generate("O=PartyA,L=London,C=GB").party,
        b: NodeIdentity::generate("O=PartyB,L=New York,C=US").party,
        oracle: NodeIdentity::generate("O=Oracle,L=Paris,C=FR").party,
    }
}

fn go_to_direct_wire(c: &Cast, value: Amount) -> WireProposal {
    let record = |status| {
        AgreementRecord::new(
            c.broker.clone(),
            c.a.clone(),
            c.b.clone(),
            c.oracle.clone(),
            status,
            value,
        )
        .unwrap()
    };

    TransitionProposal::new(
        Some(StateAndRef {
            state: record(Status::Intermediate),
            reference: StateRef {
                tx_id: SecureHash::of(b"create"),
                index: 0,
            },
        }),
        record(Status::Direct),
        Command::GoToDirect {
            party: c.broker.clone(),
            is_bust: true,
        },
        [c.a.clone(), c.b.clone(), c.oracle.clone()],
    )
    .to_wire()
    .unwrap()
}

// PROPERTY TEST STRATEGIES

/// Strategy to generate random Currency values
fn currency_strategy() -> impl Strategy<Value = Currency> {
    (0u8..=4).prop_map(|i| match i {
        0 => Currency::USD,
        1 => Currency::GBP,
        2 => Currency::EUR,
        3 => Currency::CHF,
        _ => Currency::JPY,
    })
}

fn amount_strategy() -> impl Strategy<Value = Amount> {
    (1u64..10_000_000, currency_strategy()).prop_map(|(q, c)| Amount::new(q, c))
}

// PROPERTY TESTS

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Disclosing to the oracle and verifying against the same root always succeeds
    #[test]
    fn disclosed_view_verifies(value in amount_strategy()) {
        let c = cast();
        let wire = go_to_direct_wire(&c, value);

        let (view, proof) = disclose(&wire, &c.oracle);

        prop_assert_eq!(view.components.len(), 1);
        prop_assert_eq!(view.components[0].component.group, ComponentGroup::Command);
        prop_assert!(verify_inclusion(&view, &proof, &wire.root()));
    }

    /// Flipping any bit of the disclosed component breaks the proof
    #[test]
    fn mutated_component_fails(
        value in amount_strategy(),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let c = cast();
        let wire = go_to_direct_wire(&c, value);
        let (mut view, proof) = disclose(&wire, &c.oracle);

        let bytes = &mut view.components[0].component.bytes;
        let i = index.index(bytes.len());
        bytes[i] ^= 1 << bit;

        prop_assert!(!verify_inclusion(&view, &proof, &wire.root()));
    }

    /// Verifying against any other root fails
    #[test]
    fn mismatched_root_fails(value in amount_strategy(), other in any::<[u8; 32]>()) {
        let c = cast();
        let wire = go_to_direct_wire(&c, value);
        let (view, proof) = disclose(&wire, &c.oracle);

        let other = SecureHash::from_bytes(other);
        prop_assume!(other != wire.root());
        prop_assert!(!verify_inclusion(&view, &proof, &other));
    }

    /// Tampering with the nonce, the position or a sibling hash fails
    #[test]
    fn tampered_proof_fails(value in amount_strategy(), which in 0u8..3) {
        let c = cast();
        let wire = go_to_direct_wire(&c, value);
        let (mut view, mut proof) = disclose(&wire, &c.oracle);

        match which {
            0 => view.components[0].nonce = SecureHash::of(b"guessed nonce"),
            1 => {
                view.components[0].position = 0;
                proof.paths[0].position = 0;
            }
            _ => proof.paths[0].siblings[0] = SecureHash::of(b"forged sibling"),
        }

        prop_assert!(!verify_inclusion(&view, &proof, &wire.root()));
    }
}

// DISCLOSURE SCOPE TESTS
#[cfg(test)]
mod scope_tests {
    use super::*;

    #[test]
    fn parties_not_attesting_see_nothing() {
        let c = cast();
        let wire = go_to_direct_wire(&c, Amount::new(10, Currency::GBP));

        // the broker is not a signer of the command at all
        let (view, proof) = disclose(&wire, &c.broker);
        assert!(view.components.is_empty());
        assert!(!verify_inclusion(&view, &proof, &wire.root()));
    }

    #[test]
    fn oracle_view_hides_the_value() {
        let c = cast();
        let wire = go_to_direct_wire(&c, Amount::new(4242, Currency::CHF));
        let (view, _) = disclose(&wire, &c.oracle);

        let value_bytes = minicbor::to_vec(Amount::new(4242, Currency::CHF)).unwrap();
        let disclosed = &view.components[0].component.bytes;
        assert!(
            !disclosed
                .windows(value_bytes.len())
                .any(|w| w == value_bytes.as_slice())
        );
    }

    #[test]
    fn full_disclosure_verifies() {
        let c = cast();
        let wire = go_to_direct_wire(&c, Amount::new(10, Currency::GBP));

        let (view, proof) = disclose_with(&wire, |_| true);
        assert_eq!(view.components.len(), 3);
        assert!(verify_inclusion(&view, &proof, &wire.root()));

        // dropping a path while keeping its component is caught
        let mut short = proof.clone();
        short.paths.pop();
        assert!(!verify_inclusion(&view, &short, &wire.root()));
    }

    #[test]
    fn components_out_of_order_fail() {
        let c = cast();
        let wire = go_to_direct_wire(&c, Amount::new(10, Currency::GBP));

        let (mut view, mut proof) = disclose_with(&wire, |_| true);
        view.components.swap(0, 1);
        proof.paths.swap(0, 1);
        assert!(!verify_inclusion(&view, &proof, &wire.root()));
    }
}
