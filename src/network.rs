//! Transport and network map collaborators
//!
//! [`InMemoryNetwork`] stands in for a real messaging layer: each request is encoded to bytes and
//! handed to the peer's handler on its own thread, and the caller blocks on a channel until the
//! reply arrives. Nodes never share state through it beyond the bytes they exchange.
use crate::error::TransportError;
use crate::identity::Party;
use crate::messages::Envelope;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread;

/// Blocking request/response exchange with a single peer.
pub trait Network: Send + Sync {
    fn send_and_receive(&self, peer: &Party, request: Envelope) -> Result<Envelope, TransportError>;
}

/// Resolves legal names to identities.
pub trait IdentityService: Send + Sync {
    fn resolve_party(&self, name: &str) -> Option<Party>;
    fn peers(&self) -> Vec<Party>;
}

/// Anything that answers incoming sessions, typically a node's responder.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, request: Envelope) -> Envelope;
}

struct Route {
    party: Party,
    handler: Arc<dyn MessageHandler>,
}

/// A session opened by `from` towards `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub from: String,
    pub to: String,
    pub session_id: String,
    pub message: &'static str,
}

#[derive(Default)]
pub struct InMemoryNetwork {
    routes: RwLock<BTreeMap<String, Route>>,
    offline: RwLock<BTreeSet<String>>,
    sessions: Mutex<Vec<SessionRecord>>,
}

impl InMemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Put `party` on the network map, answering with `handler`.
    pub fn register(&self, party: Party, handler: Arc<dyn MessageHandler>) {
        tracing::debug!(party = %party, "registered on network map");
        if let Ok(mut routes) = self.routes.write() {
            routes.insert(party.name.clone(), Route { party, handler });
        }
    }

    /// Keep `name` on the map but drop every session towards it.
    pub fn set_offline(&self, name: &str, offline: bool) {
        if let Ok(mut set) = self.offline.write() {
            if offline {
                set.insert(name.to_string());
            } else {
                set.remove(name);
            }
        }
    }

    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.session_log().clone()
    }

    /// Sessions opened towards `name`.
    pub fn sessions_with(&self, name: &str) -> Vec<SessionRecord> {
        self.session_log()
            .iter()
            .filter(|s| s.to == name)
            .cloned()
            .collect()
    }

    fn session_log(&self) -> MutexGuard<'_, Vec<SessionRecord>> {
        // a poisoned log only means a handler thread panicked mid-push
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn handler_for(&self, peer: &Party) -> Result<Arc<dyn MessageHandler>, TransportError> {
        let routes = self
            .routes
            .read()
            .map_err(|_| TransportError::Disconnected(peer.name.clone()))?;
        match routes.get(&peer.name) {
            Some(route) if route.party == *peer => Ok(route.handler.clone()),
            _ => Err(TransportError::UnknownPeer(peer.name.clone())),
        }
    }

    fn is_offline(&self, peer: &Party) -> bool {
        self.offline
            .read()
            .map(|set| set.contains(&peer.name))
            .unwrap_or(false)
    }
}

impl Network for InMemoryNetwork {
    fn send_and_receive(
        &self,
        peer: &Party,
        request: Envelope,
    ) -> Result<Envelope, TransportError> {
        let handler = self.handler_for(peer)?;

        self.session_log().push(SessionRecord {
            from: request.sender.name.clone(),
            to: peer.name.clone(),
            session_id: request.session_id.clone(),
            message: request.body.name(),
        });
        tracing::debug!(
            session = %request.session_id,
            to = %peer,
            message = request.body.name(),
            "session opened"
        );

        if self.is_offline(peer) {
            return Err(TransportError::Disconnected(peer.name.clone()));
        }

        let bytes = request.to_bytes()?;
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let reply = Envelope::from_bytes(&bytes)
                .map(|request| handler.handle(request))
                .and_then(|reply| reply.to_bytes());
            // the caller may have given up; nothing to do then
            let _ = tx.send(reply);
        });

        let bytes = rx
            .recv()
            .map_err(|_| TransportError::Disconnected(peer.name.clone()))??;
        Envelope::from_bytes(&bytes)
    }
}

impl IdentityService for InMemoryNetwork {
    fn resolve_party(&self, name: &str) -> Option<Party> {
        self.routes
            .read()
            .ok()
            .and_then(|routes| routes.get(name).map(|r| r.party.clone()))
    }

    fn peers(&self) -> Vec<Party> {
        self.routes
            .read()
            .map(|routes| routes.values().map(|r| r.party.clone()).collect())
            .unwrap_or_default()
    }
}
