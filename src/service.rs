//! Service layer API for agreement workflow operations
use crate::agreement::{AgreementDraft, Amount, StateAndRef, StateRef, Status};
use crate::config::NodeConfig;
use crate::contract;
use crate::coordinator::{CancellationToken, SignatureCollectionCoordinator};
use crate::error::{CoordinationError, ServiceError};
use crate::identity::{NodeIdentity, Party};
use crate::ledger::{CommitReceipt, Ledger};
use crate::messages::{Envelope, Message};
use crate::network::{IdentityService, InMemoryNetwork, Network};
use crate::oracle::{BustFact, BustFactStore, OracleService};
use crate::proposal::{Command, TransitionProposal};
use crate::responder::{AcceptAll, ApprovalPolicy, Responder};
use std::sync::Arc;

pub struct AgreementService {
    identity: Arc<NodeIdentity>,
    network: Arc<dyn Network>,
    identities: Arc<dyn IdentityService>,
    ledger: Arc<dyn Ledger>,
    oracle: Option<Arc<OracleService>>,
}

impl AgreementService {
    pub fn new(
        identity: NodeIdentity,
        network: Arc<dyn Network>,
        identities: Arc<dyn IdentityService>,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        Self {
            identity: Arc::new(identity),
            network,
            identities,
            ledger,
            oracle: None,
        }
    }

    /// Host the bust fact table in `instance`.
    pub fn with_oracle(mut self, instance: &sled::Db) -> Result<Self, ServiceError> {
        let store = BustFactStore::open(instance)?;
        self.oracle = Some(Arc::new(OracleService::new(self.identity.clone(), store)));
        Ok(self)
    }

    /// Open the node's database, generate its identity and put it on `network`, countersigning
    /// anything the contract accepts.
    pub fn start(
        config: &NodeConfig,
        network: &Arc<InMemoryNetwork>,
        ledger: Arc<dyn Ledger>,
    ) -> Result<Self, ServiceError> {
        Self::start_with_policy(config, network, ledger, Arc::new(AcceptAll))
    }

    pub fn start_with_policy(
        config: &NodeConfig,
        network: &Arc<InMemoryNetwork>,
        ledger: Arc<dyn Ledger>,
        policy: Arc<dyn ApprovalPolicy>,
    ) -> Result<Self, ServiceError> {
        let mut service = Self::new(
            NodeIdentity::generate(config.legal_name.clone()),
            network.clone(),
            network.clone(),
            ledger,
        );
        if config.hosts_oracle {
            let instance = config.open_db()?;
            service = service.with_oracle(&instance)?;
        }

        network.register(service.whoami().clone(), Arc::new(service.responder(policy)));
        tracing::info!(node = %config.legal_name, oracle = config.hosts_oracle, "node started");
        Ok(service)
    }

    /// The handler that answers sessions opened towards this node.
    pub fn responder(&self, policy: Arc<dyn ApprovalPolicy>) -> Responder {
        Responder::new(
            self.identity.clone(),
            self.ledger.clone(),
            self.oracle.clone(),
            policy,
        )
    }

    fn resolve(&self, name: &str) -> Result<Party, ServiceError> {
        self.identities
            .resolve_party(name)
            .ok_or_else(|| ServiceError::UnknownParty(name.to_string()))
    }

    fn live_state(&self, reference: &StateRef) -> Result<StateAndRef, ServiceError> {
        self.ledger
            .resolve(reference)?
            .ok_or(ServiceError::UnknownState(*reference))
    }

    /// Intermediary starts a new agreement between `party_a` and `party_b`.
    pub fn propose_create(
        &self,
        value: Amount,
        party_a: &str,
        party_b: &str,
        oracle: &str,
    ) -> Result<CommitReceipt, ServiceError> {
        let record = AgreementDraft::new()
            .set_intermediary(self.identity.party.clone())
            .set_party_a(self.resolve(party_a)?)
            .set_party_b(self.resolve(party_b)?)
            .set_oracle(self.resolve(oracle)?)
            .set_value(value)
            .finalise()?;

        let command = Command::Create;
        let signers =
            contract::required_signers(None, &record, &command).map_err(CoordinationError::from)?;

        self.propose(
            TransitionProposal::new(None, record, command, signers),
            CancellationToken::new(),
        )
    }

    /// Claim the intermediary of `input` is bust and collapse to a direct agreement.
    pub fn propose_go_to_direct(&self, input: StateRef) -> Result<CommitReceipt, ServiceError> {
        let input = self.live_state(&input)?;
        let produced = input.state.with_status(Status::Direct);
        let command = Command::GoToDirect {
            party: input.state.intermediary().clone(),
            is_bust: true,
        };
        let signers = contract::required_signers(Some(&input.state), &produced, &command)
            .map_err(CoordinationError::from)?;

        self.propose(
            TransitionProposal::new(Some(input), produced, command, signers),
            CancellationToken::new(),
        )
    }

    pub fn propose_finalise(&self, input: StateRef) -> Result<CommitReceipt, ServiceError> {
        let input = self.live_state(&input)?;
        let produced = input.state.with_status(Status::Completed);
        let command = Command::Finalise;
        let signers = contract::required_signers(Some(&input.state), &produced, &command)
            .map_err(CoordinationError::from)?;

        self.propose(
            TransitionProposal::new(Some(input), produced, command, signers),
            CancellationToken::new(),
        )
    }

    /// Drive an already built proposal through signature collection.
    pub fn propose(
        &self,
        proposal: TransitionProposal,
        cancellation: CancellationToken,
    ) -> Result<CommitReceipt, ServiceError> {
        let receipt = SignatureCollectionCoordinator::new(
            &self.identity,
            self.network.as_ref(),
            self.ledger.as_ref(),
        )
        .with_cancellation(cancellation)
        .run(proposal)?;

        Ok(receipt)
    }

    /// Every bust fact held by `oracle`.
    pub fn query_bust_status(&self, oracle: &str) -> Result<Vec<BustFact>, ServiceError> {
        if let Some(local) = self.local_oracle(oracle) {
            return Ok(local.bust_facts()?);
        }
        let oracle = self.resolve(oracle)?;
        match self.ask(&oracle, Message::QueryAllBust)? {
            Message::BustFacts { facts } => Ok(facts),
            _ => Err(ServiceError::UnexpectedReply(oracle.name)),
        }
    }

    pub fn is_bust(&self, oracle: &str, party: &str) -> Result<bool, ServiceError> {
        let party = self.resolve(party)?;
        if let Some(local) = self.local_oracle(oracle) {
            return Ok(local.is_bust(&party)?);
        }
        let oracle = self.resolve(oracle)?;
        match self.ask(&oracle, Message::QueryIsBust { party })? {
            Message::IsBust { is_bust } => Ok(is_bust),
            _ => Err(ServiceError::UnexpectedReply(oracle.name)),
        }
    }

    /// Administrative write, only available on the node hosting the oracle.
    pub fn set_bust_status(&self, party: &str, is_bust: bool) -> Result<BustFact, ServiceError> {
        let oracle = self.oracle.as_ref().ok_or(ServiceError::NotAnOracle)?;
        let party = self.resolve(party)?;
        Ok(oracle.set_bust(&party, is_bust)?)
    }

    pub fn whoami(&self) -> &Party {
        &self.identity.party
    }

    /// Everyone else on the network map.
    pub fn peers(&self) -> Vec<Party> {
        self.identities
            .peers()
            .into_iter()
            .filter(|p| p != self.whoami())
            .collect()
    }

    /// Live agreements this node is a participant of.
    pub fn agreements(&self) -> Result<Vec<StateAndRef>, ServiceError> {
        Ok(self
            .ledger
            .unconsumed()?
            .into_iter()
            .filter(|s| s.state.is_participant(self.whoami()))
            .collect())
    }

    fn local_oracle(&self, name: &str) -> Option<&Arc<OracleService>> {
        self.oracle.as_ref().filter(|o| o.party().name == name)
    }

    fn ask(&self, peer: &Party, body: Message) -> Result<Message, ServiceError> {
        let request = Envelope::request(self.whoami().clone(), None, body)
            .map_err(|e| ServiceError::UnexpectedReply(e.to_string()))?;
        let reply = self.network.send_and_receive(peer, request.clone())?;
        if !reply.answers(&request) {
            return Err(ServiceError::UnexpectedReply(peer.name.clone()));
        }
        Ok(reply.body)
    }
}
