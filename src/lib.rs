//! Tri-party agreements between an intermediary and two parties, collapsing to a direct
//! agreement once an oracle attests that the intermediary is bust.

pub mod agreement;
pub mod config;
pub mod contract;
pub mod coordinator;
pub mod disclosure;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod messages;
pub mod network;
pub mod oracle;
pub mod proposal;
pub mod responder;
pub mod service;
pub mod utils;
