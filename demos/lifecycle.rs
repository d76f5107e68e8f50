//! Walks one agreement through its whole life on an in-memory network.
//!
//! Run with `RUST_LOG=debug cargo run --example lifecycle` to see every step of the signing flow.

use anyhow::Context;
use direct_agreement::agreement::{Amount, Currency};
use direct_agreement::config::NodeConfig;
use direct_agreement::ledger::{CommitReceipt, Ledger, SledLedger};
use direct_agreement::network::InMemoryNetwork;
use direct_agreement::service::AgreementService;
use tracing_subscriber::EnvFilter;

const BROKER: &str = "O=Broker,L=Zurich,C=CH";
const PARTY_A: &str = "O=PartyA,L=London,C=GB";
const PARTY_B: &str = "O=PartyB,L=New York,C=US";
const ORACLE: &str = "O=Oracle,L=Paris,C=FR";

fn report(step: &str, ledger: &SledLedger, receipt: &CommitReceipt) -> anyhow::Result<()> {
    let state = ledger
        .resolve(&receipt.output)?
        .context("committed output is not live")?;
    println!(
        "{step:<12} tx {} -> {:?} {} ({})",
        receipt.tx_id,
        state.state.status(),
        state.state.value(),
        receipt.output
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let notary = NodeConfig::new("O=Notary,L=Zurich,C=CH")
        .temporary()
        .with_cache_capacity(16 * 1024 * 1024)
        .open_db()?;
    let ledger = SledLedger::open(&notary)?;
    let network = InMemoryNetwork::new();

    let start = |config: NodeConfig| AgreementService::start(&config, &network, ledger.clone());
    let broker = start(NodeConfig::new(BROKER))?;
    let a = start(NodeConfig::new(PARTY_A))?;
    let b = start(NodeConfig::new(PARTY_B))?;
    let oracle = start(NodeConfig::new(ORACLE).as_oracle())?;

    println!("network map seen by {}:", a.whoami().name);
    for peer in a.peers() {
        println!("  {peer}");
    }

    let created = broker
        .propose_create(Amount::new(10, Currency::GBP), PARTY_A, PARTY_B, ORACLE)
        .context("Agreement Failed on Create: ")?;
    report("create", &ledger, &created)?;

    let fact = oracle.set_bust_status(BROKER, true)?;
    println!("oracle marks {} bust={}", fact.party, fact.is_bust);
    for fact in b.query_bust_status(ORACLE)? {
        println!("  {} bust={}", fact.party, fact.is_bust);
    }

    let direct = a
        .propose_go_to_direct(created.output)
        .context("Agreement Failed on GoToDirect: ")?;
    report("go direct", &ledger, &direct)?;

    let completed = b
        .propose_finalise(direct.output)
        .context("Agreement Failed on Finalise: ")?;
    report("finalise", &ledger, &completed)?;

    println!("{} sessions exchanged", network.sessions().len());
    Ok(())
}
