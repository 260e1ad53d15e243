//! Pairing-protocol session lifecycle.
//!
//! All session state lives inside one event loop: the active-session map and
//! the current verify context have a single writer, so no reader can observe
//! a half-applied transition. Approved signing requests leave the loop as
//! spawned tasks; everything else is handled inline.

use crate::{
    audit::AuditLog,
    envelope::{self, ResponseEnvelope},
    errors::{GatewayError, CODE_SESSION_GONE},
    orchestrator::SignRequest,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc};
use tokio::{sync::mpsc, task::JoinSet};
use tracing::{debug, info, warn};

/// Default lifetime for a freshly settled session.
const SESSION_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMetadata {
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
}

/// Peer trust metadata attached to proposals and requests. The UI always
/// shows the most recently received one (last-write-wins).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyContext {
    pub origin: String,
    #[serde(default)]
    pub validation: String,
    #[serde(default)]
    pub is_scam: bool,
}

/// One settled pairing with a remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub topic: String,
    /// Accounts this peer may request signatures for (possibly CAIP-10).
    pub accounts: Vec<String>,
    /// Chain identifiers the pairing covers.
    pub chains: Vec<String>,
    pub expiry: Option<DateTime<Utc>>,
    pub peer: PeerMetadata,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|e| e <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProposal {
    pub id: u64,
    pub proposer: PeerMetadata,
    #[serde(default)]
    pub chains: Vec<String>,
    #[serde(default)]
    pub verify: Option<VerifyContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingRequest {
    pub topic: String,
    pub id: u64,
    pub chain: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub verify: Option<VerifyContext>,
}

/// Non-EIP155 authentication challenge; never routed through signing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthChallenge {
    pub id: u64,
    pub topic: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub verify: Option<VerifyContext>,
}

/// Typed protocol events, as parsed from the transport.
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    Proposal(SessionProposal),
    Request(IncomingRequest),
    AuthRequest(AuthChallenge),
    Delete { topic: String },
    Ping { topic: String },
    /// The transport re-announced its open-session set; rebuild from it.
    Resync,
}

/// Operator verdicts for open decision points.
#[derive(Debug, Clone)]
pub enum Decision {
    ApproveProposal { id: u64, accounts: Vec<String> },
    RejectProposal { id: u64 },
    ApproveRequest { id: u64, mfa_code: Option<String> },
    RejectRequest { id: u64 },
    ApproveAuth { id: u64 },
    RejectAuth { id: u64 },
}

/// Everything the manager's loop consumes.
#[derive(Debug, Clone)]
pub enum Inbound {
    Event(ProtocolEvent),
    Decision(Decision),
}

/// Frames the manager emits: decision points for the operator and response
/// envelopes for the transport to deliver.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    ProposalPending {
        proposal: SessionProposal,
        #[serde(skip_serializing_if = "Option::is_none")]
        verify: Option<VerifyContext>,
    },
    RequestPending {
        topic: String,
        id: u64,
        chain: String,
        method: String,
        params: Value,
        peer: PeerMetadata,
        #[serde(skip_serializing_if = "Option::is_none")]
        verify: Option<VerifyContext>,
    },
    AuthPending {
        id: u64,
        topic: String,
        payload: Value,
    },
    Respond {
        topic: String,
        response: ResponseEnvelope,
    },
    ProposalRejected {
        id: u64,
    },
    SessionSettled {
        session: Session,
    },
    ActiveSessions {
        topics: Vec<String>,
    },
}

/// The transport's authoritative view of open sessions. The manager seeds
/// from it on activation and re-derives after every delete.
pub trait SessionSource: Send + Sync {
    fn active_sessions(&self) -> Vec<Session>;
}

/// The signing pipeline an approved request is handed to.
pub trait SignPipeline: Send + Sync + 'static {
    fn execute(
        &self,
        req: SignRequest,
    ) -> impl std::future::Future<Output = ResponseEnvelope> + Send;
    fn decline(&self, req: &SignRequest) -> ResponseEnvelope;
}

impl<D, M, K> SignPipeline for crate::orchestrator::Orchestrator<D, M, K>
where
    D: crate::directory::UserDirectory + 'static,
    M: crate::mfa::MfaGate + 'static,
    K: crate::kms::KmsClient + 'static,
{
    async fn execute(&self, req: SignRequest) -> ResponseEnvelope {
        self.approve(&req).await
    }

    fn decline(&self, req: &SignRequest) -> ResponseEnvelope {
        self.reject(req)
    }
}

/// Session map plus current verify context. Owned by the manager's loop,
/// passed in at construction so tests can pre-populate it.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<String, Session>,
    verify: Option<VerifyContext>,
}

impl SessionStore {
    /// Replace the session set wholesale with the transport's view.
    pub fn seed(&mut self, sessions: Vec<Session>) {
        self.sessions = sessions.into_iter().map(|s| (s.topic.clone(), s)).collect();
    }

    pub fn insert(&mut self, session: Session) {
        self.sessions.insert(session.topic.clone(), session);
    }

    pub fn remove(&mut self, topic: &str) -> Option<Session> {
        self.sessions.remove(topic)
    }

    /// Session for `topic` if it is settled and not expired.
    pub fn active(&self, topic: &str) -> Option<&Session> {
        self.sessions
            .get(topic)
            .filter(|s| !s.is_expired(Utc::now()))
    }

    /// Topics of settled, unexpired sessions. Expired sessions are hidden
    /// here for the same reason `active` refuses them.
    pub fn topics(&self) -> Vec<String> {
        let now = Utc::now();
        let mut t: Vec<String> = self
            .sessions
            .values()
            .filter(|s| !s.is_expired(now))
            .map(|s| s.topic.clone())
            .collect();
        t.sort_unstable();
        t
    }

    pub fn record_verify(&mut self, v: Option<&VerifyContext>) {
        if let Some(v) = v {
            self.verify = Some(v.clone());
        }
    }

    pub const fn current_verify(&self) -> Option<&VerifyContext> {
        self.verify.as_ref()
    }
}

struct PendingRequest {
    topic: String,
    chain: String,
    method: String,
    params: Value,
}

pub struct SessionManager<S, P> {
    store: SessionStore,
    source: S,
    pipeline: Arc<P>,
    outbound: mpsc::Sender<OutboundFrame>,
    audit: AuditLog,
    pending_proposals: HashMap<u64, SessionProposal>,
    pending_requests: HashMap<u64, PendingRequest>,
    pending_auth: HashMap<u64, AuthChallenge>,
    tasks: JoinSet<()>,
}

impl<S: SessionSource, P: SignPipeline> SessionManager<S, P> {
    pub fn new(
        store: SessionStore,
        source: S,
        pipeline: Arc<P>,
        outbound: mpsc::Sender<OutboundFrame>,
        audit: AuditLog,
    ) -> Self {
        Self {
            store,
            source,
            pipeline,
            outbound,
            audit,
            pending_proposals: HashMap::new(),
            pending_requests: HashMap::new(),
            pending_auth: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Consume inbound events and decisions until the channel closes, then
    /// wait for in-flight signing tasks to finish.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<Inbound>) {
        self.store.seed(self.source.active_sessions());
        info!(sessions = self.store.topics().len(), "session manager active");
        self.emit(OutboundFrame::ActiveSessions {
            topics: self.store.topics(),
        })
        .await;

        while let Some(msg) = inbound.recv().await {
            self.handle(msg).await;
        }

        while self.tasks.join_next().await.is_some() {}
        debug!("session manager stopped");
    }

    async fn handle(&mut self, msg: Inbound) {
        // Reap finished signing tasks so the set stays bounded over a
        // long-running serve loop.
        while self.tasks.try_join_next().is_some() {}

        match msg {
            Inbound::Event(e) => self.on_event(e).await,
            Inbound::Decision(d) => self.on_decision(d).await,
        }
    }

    async fn on_event(&mut self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::Proposal(p) => {
                self.store.record_verify(p.verify.as_ref());
                info!(proposal_id = p.id, proposer = %p.proposer.name, "session proposal");
                self.pending_proposals.insert(p.id, p.clone());
                let verify = self.store.current_verify().cloned();
                self.emit(OutboundFrame::ProposalPending {
                    proposal: p,
                    verify,
                })
                .await;
            }
            ProtocolEvent::Request(r) => {
                if r.topic.is_empty() {
                    warn!(request_id = r.id, "dropping request without topic");
                    return;
                }
                let Some(session) = self.store.active(&r.topic) else {
                    warn!(topic = %r.topic, request_id = r.id, "request for inactive session");
                    self.audit.record(json!({
                        "event": "request_refused",
                        "topic": r.topic,
                        "request_id": r.id,
                        "method": r.method,
                        "chain": r.chain,
                        "error_code": CODE_SESSION_GONE,
                    }));
                    self.emit(OutboundFrame::Respond {
                        topic: r.topic.clone(),
                        response: envelope::err(r.id, CODE_SESSION_GONE, "Session not found"),
                    })
                    .await;
                    return;
                };
                let peer = session.peer.clone();
                self.store.record_verify(r.verify.as_ref());
                info!(topic = %r.topic, request_id = r.id, method = %r.method, "session request");
                self.pending_requests.insert(
                    r.id,
                    PendingRequest {
                        topic: r.topic.clone(),
                        chain: r.chain.clone(),
                        method: r.method.clone(),
                        params: r.params.clone(),
                    },
                );
                let verify = self.store.current_verify().cloned();
                self.emit(OutboundFrame::RequestPending {
                    topic: r.topic,
                    id: r.id,
                    chain: r.chain,
                    method: r.method,
                    params: r.params,
                    peer,
                    verify,
                })
                .await;
            }
            ProtocolEvent::AuthRequest(a) => {
                self.store.record_verify(a.verify.as_ref());
                info!(topic = %a.topic, auth_id = a.id, "auth request");
                self.pending_auth.insert(a.id, a.clone());
                self.emit(OutboundFrame::AuthPending {
                    id: a.id,
                    topic: a.topic,
                    payload: a.payload,
                })
                .await;
            }
            ProtocolEvent::Delete { topic } => {
                if self.store.remove(&topic).is_none() {
                    warn!(topic = %topic, "delete for unknown session");
                }
                // The transport owns the truth; re-derive instead of trusting
                // our own bookkeeping after a removal.
                self.store.seed(self.source.active_sessions());
                info!(topic = %topic, remaining = self.store.topics().len(), "session deleted");
                self.audit.record(json!({
                    "event": "session_deleted",
                    "topic": topic,
                }));
                self.emit(OutboundFrame::ActiveSessions {
                    topics: self.store.topics(),
                })
                .await;
            }
            ProtocolEvent::Ping { topic } => {
                debug!(topic = %topic, "ping");
            }
            ProtocolEvent::Resync => {
                self.store.seed(self.source.active_sessions());
                info!(sessions = self.store.topics().len(), "session set resynced");
                self.emit(OutboundFrame::ActiveSessions {
                    topics: self.store.topics(),
                })
                .await;
            }
        }
    }

    async fn on_decision(&mut self, decision: Decision) {
        match decision {
            Decision::ApproveProposal { id, accounts } => {
                let Some(p) = self.pending_proposals.remove(&id) else {
                    warn!(proposal_id = id, "approval for unknown proposal");
                    return;
                };
                let session = Session {
                    topic: uuid::Uuid::new_v4().to_string(),
                    accounts,
                    chains: p.chains,
                    expiry: Some(Utc::now() + Duration::days(SESSION_TTL_DAYS)),
                    peer: p.proposer,
                };
                info!(proposal_id = id, topic = %session.topic, "session settled");
                self.audit.record(json!({
                    "event": "proposal_approved",
                    "topic": session.topic,
                    "request_id": id,
                }));
                self.store.insert(session.clone());
                self.emit(OutboundFrame::SessionSettled { session }).await;
                self.emit(OutboundFrame::ActiveSessions {
                    topics: self.store.topics(),
                })
                .await;
            }
            Decision::RejectProposal { id } => {
                if self.pending_proposals.remove(&id).is_none() {
                    warn!(proposal_id = id, "rejection for unknown proposal");
                    return;
                }
                info!(proposal_id = id, "proposal rejected");
                self.audit.record(json!({
                    "event": "proposal_rejected",
                    "request_id": id,
                }));
                self.emit(OutboundFrame::ProposalRejected { id }).await;
            }
            Decision::ApproveRequest { id, mfa_code } => {
                let Some(pending) = self.pending_requests.remove(&id) else {
                    warn!(request_id = id, "approval for unknown request");
                    return;
                };
                let Some(session) = self.store.active(&pending.topic) else {
                    // Session died between surfacing and approval; never
                    // reaches the signing pipeline.
                    warn!(topic = %pending.topic, request_id = id, "approved request for dead session");
                    self.audit.record(json!({
                        "event": "request_refused",
                        "topic": pending.topic,
                        "request_id": id,
                        "method": pending.method,
                        "error_code": CODE_SESSION_GONE,
                    }));
                    self.emit(OutboundFrame::Respond {
                        topic: pending.topic.clone(),
                        response: envelope::err(id, CODE_SESSION_GONE, "Session not found"),
                    })
                    .await;
                    return;
                };
                let req = SignRequest {
                    id,
                    topic: pending.topic,
                    chain: pending.chain,
                    method: pending.method,
                    params: pending.params,
                    accounts: session.accounts.clone(),
                    mfa_code,
                };
                let pipeline = Arc::clone(&self.pipeline);
                let outbound = self.outbound.clone();
                let audit = self.audit.clone();
                self.tasks.spawn(async move {
                    let topic = req.topic.clone();
                    let method = req.method.clone();
                    let chain = req.chain.clone();
                    let response = pipeline.execute(req).await;
                    audit.record(json!({
                        "event": "request_signed",
                        "topic": topic,
                        "request_id": response.id,
                        "method": method,
                        "chain": chain,
                        "decision": "approved",
                        "error_code": response.error.as_ref().map(|e| e.code),
                    }));
                    if outbound
                        .send(OutboundFrame::Respond { topic, response })
                        .await
                        .is_err()
                    {
                        warn!("outbound channel closed before response delivery");
                    }
                });
            }
            Decision::RejectRequest { id } => {
                let Some(pending) = self.pending_requests.remove(&id) else {
                    warn!(request_id = id, "rejection for unknown request");
                    return;
                };
                let req = SignRequest {
                    id,
                    topic: pending.topic.clone(),
                    chain: pending.chain,
                    method: pending.method,
                    params: pending.params,
                    accounts: vec![],
                    mfa_code: None,
                };
                let response = self.pipeline.decline(&req);
                self.audit.record(json!({
                    "event": "request_rejected",
                    "topic": pending.topic,
                    "request_id": id,
                    "method": req.method,
                    "decision": "rejected",
                    "error_code": response.error.as_ref().map(|e| e.code),
                }));
                self.emit(OutboundFrame::Respond {
                    topic: pending.topic,
                    response,
                })
                .await;
            }
            Decision::ApproveAuth { id } => {
                let Some(a) = self.pending_auth.remove(&id) else {
                    warn!(auth_id = id, "approval for unknown auth request");
                    return;
                };
                self.audit.record(json!({
                    "event": "auth_approved",
                    "topic": a.topic,
                    "request_id": id,
                }));
                self.emit(OutboundFrame::Respond {
                    topic: a.topic,
                    response: envelope::ok(id, Value::Null),
                })
                .await;
            }
            Decision::RejectAuth { id } => {
                let Some(a) = self.pending_auth.remove(&id) else {
                    warn!(auth_id = id, "rejection for unknown auth request");
                    return;
                };
                self.audit.record(json!({
                    "event": "auth_rejected",
                    "topic": a.topic,
                    "request_id": id,
                }));
                self.emit(OutboundFrame::Respond {
                    topic: a.topic,
                    response: envelope::from_error(id, &GatewayError::UserRejected),
                })
                .await;
            }
        }
    }

    async fn emit(&self, frame: OutboundFrame) {
        if self.outbound.send(frame).await.is_err() {
            warn!("outbound channel closed");
        }
    }
}
