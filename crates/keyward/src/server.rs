//! Stdio JSON-lines bridge between the pairing transport / operator UI and
//! the session manager.
//!
//! One frame per line in each direction. Inbound frames are protocol events
//! and operator decisions; outbound frames are decision points and response
//! envelopes. Malformed inbound frames are logged and dropped.

use crate::{
    audit::AuditLog,
    config::GatewayConfig,
    directory::{FileUserDirectory, KeyResolver},
    kms::HttpKmsClient,
    mfa::HttpMfaGate,
    orchestrator::Orchestrator,
    paths::GatewayPaths,
    registry::ChainRegistry,
    session::{
        AuthChallenge, Decision, Inbound, IncomingRequest, OutboundFrame, ProtocolEvent, Session,
        SessionManager, SessionProposal, SessionSource, SessionStore,
    },
    signer::SignerFactory,
};
use eyre::Context as _;
use fs2::FileExt as _;
use serde::Deserialize;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader},
    sync::mpsc,
};
use tracing::{info, warn};

pub const MAX_FRAME_BYTES: usize = 1_000_000;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundFrame {
    // Transport events.
    SessionProposal {
        #[serde(flatten)]
        proposal: SessionProposal,
    },
    SessionRequest {
        #[serde(flatten)]
        request: IncomingRequest,
    },
    AuthRequest {
        #[serde(flatten)]
        auth: AuthChallenge,
    },
    SessionDelete {
        topic: String,
    },
    SessionPing {
        topic: String,
    },
    /// The transport's current list of open sessions (startup and resume).
    Sessions {
        sessions: Vec<Session>,
    },
    // Operator decisions.
    ApproveProposal {
        id: u64,
        #[serde(default)]
        accounts: Vec<String>,
    },
    RejectProposal {
        id: u64,
    },
    ApproveRequest {
        id: u64,
        #[serde(default)]
        mfa_code: Option<String>,
    },
    RejectRequest {
        id: u64,
    },
    ApproveAuth {
        id: u64,
    },
    RejectAuth {
        id: u64,
    },
}

/// Holds the most recent session list the transport reported. The manager
/// treats this as the source of truth when it re-derives its active set.
#[derive(Debug, Default, Clone)]
pub struct BridgeSessions {
    inner: Arc<Mutex<Vec<Session>>>,
}

impl BridgeSessions {
    fn replace(&self, sessions: Vec<Session>) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = sessions;
        }
    }
}

impl SessionSource for BridgeSessions {
    fn active_sessions(&self) -> Vec<Session> {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

/// Parse one inbound line. Returns `None` for anything that should be
/// silently skipped after a log line.
fn parse_frame(line: &str) -> Option<InboundFrame> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<InboundFrame>(trimmed) {
        Ok(f) => Some(f),
        Err(e) => {
            warn!(error = %e, "dropping malformed frame");
            None
        }
    }
}

fn frame_to_inbound(frame: InboundFrame, sessions: &BridgeSessions) -> Inbound {
    match frame {
        InboundFrame::SessionProposal { proposal } => {
            Inbound::Event(ProtocolEvent::Proposal(proposal))
        }
        InboundFrame::SessionRequest { request } => Inbound::Event(ProtocolEvent::Request(request)),
        InboundFrame::AuthRequest { auth } => Inbound::Event(ProtocolEvent::AuthRequest(auth)),
        InboundFrame::SessionDelete { topic } => Inbound::Event(ProtocolEvent::Delete { topic }),
        InboundFrame::SessionPing { topic } => Inbound::Event(ProtocolEvent::Ping { topic }),
        InboundFrame::Sessions { sessions: list } => {
            sessions.replace(list);
            Inbound::Event(ProtocolEvent::Resync)
        }
        InboundFrame::ApproveProposal { id, accounts } => {
            Inbound::Decision(Decision::ApproveProposal { id, accounts })
        }
        InboundFrame::RejectProposal { id } => Inbound::Decision(Decision::RejectProposal { id }),
        InboundFrame::ApproveRequest { id, mfa_code } => {
            Inbound::Decision(Decision::ApproveRequest { id, mfa_code })
        }
        InboundFrame::RejectRequest { id } => Inbound::Decision(Decision::RejectRequest { id }),
        InboundFrame::ApproveAuth { id } => Inbound::Decision(Decision::ApproveAuth { id }),
        InboundFrame::RejectAuth { id } => Inbound::Decision(Decision::RejectAuth { id }),
    }
}

/// Read one newline-terminated frame, enforcing the size cap while buffering
/// so a single oversized line cannot grow memory without bound. Once a line
/// crosses the cap its bytes are discarded up to the next newline and the
/// reader moves on. Returns `None` at EOF (a trailing unterminated fragment
/// is dropped; it could never be a complete frame).
async fn next_frame<R>(reader: &mut R) -> eyre::Result<Option<String>>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    loop {
        let mut line: Vec<u8> = Vec::new();
        let mut oversized = false;
        loop {
            let chunk = reader.fill_buf().await?;
            if chunk.is_empty() {
                return Ok(None);
            }
            if let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
                if oversized || line.len() + pos > MAX_FRAME_BYTES {
                    oversized = true;
                } else if let Some(head) = chunk.get(..pos) {
                    line.extend_from_slice(head);
                }
                reader.consume(pos + 1);
                break;
            }
            if oversized || line.len() + chunk.len() > MAX_FRAME_BYTES {
                oversized = true;
                line.clear();
            } else {
                line.extend_from_slice(chunk);
            }
            let n = chunk.len();
            reader.consume(n);
        }
        if oversized {
            warn!("dropping oversized frame");
            continue;
        }
        match String::from_utf8(line) {
            Ok(s) => return Ok(Some(s)),
            Err(e) => {
                warn!(error = %e, "dropping non-utf8 frame");
            }
        }
    }
}

async fn write_frame<W, T>(out: &mut W, v: &T) -> eyre::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin + Send,
    T: serde::Serialize + Sync,
{
    out.write_all(format!("{}\n", serde_json::to_string(v)?).as_bytes())
        .await?;
    out.flush().await?;
    Ok(())
}

fn acquire_instance_lock(paths: &GatewayPaths) -> eyre::Result<std::fs::File> {
    crate::fsutil::ensure_private_dir(&paths.data_dir)?;
    let lock_path = paths.data_dir.join("keyward.lock");
    let lock_file = {
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt as _;
            std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .mode(0o600)
                .open(&lock_path)
                .with_context(|| format!("open lock file at {}", lock_path.display()))?
        }
        #[cfg(not(unix))]
        {
            std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&lock_path)
                .with_context(|| format!("open lock file at {}", lock_path.display()))?
        }
    };
    lock_file
        .try_lock_exclusive()
        .with_context(|| format!("lock already held at {}", lock_path.display()))?;
    Ok(lock_file)
}

/// Run the gateway over stdio until stdin closes.
pub async fn run(paths: &GatewayPaths, config: GatewayConfig) -> eyre::Result<()> {
    paths.ensure_private_dirs()?;
    // Single-instance lock: one gateway per data dir, held for process lifetime.
    let _lock_file = acquire_instance_lock(paths)?;

    let registry = ChainRegistry::from_entries(&config.chains);
    let resolver = KeyResolver::new(FileUserDirectory::new(paths.users_file()));
    let timeout = Duration::from_secs(config.http.rpc_timeout_seconds);
    let connect_timeout = Duration::from_secs(config.http.rpc_connect_timeout_seconds);
    let mfa = HttpMfaGate::new(&config.mfa.base_url, timeout)?;
    let kms = HttpKmsClient::new(&config.kms.base_url, timeout, connect_timeout)?;
    let orchestrator = Arc::new(Orchestrator::new(
        config.username.clone(),
        resolver,
        mfa,
        kms,
        SignerFactory::new(config.http.clone()),
        registry,
    ));
    let audit = AuditLog::new(paths.audit_file.clone());
    let sessions = BridgeSessions::default();

    let (in_tx, in_rx) = mpsc::channel::<Inbound>(64);
    let (out_tx, mut out_rx) = mpsc::channel::<OutboundFrame>(64);

    let manager = SessionManager::new(
        SessionStore::default(),
        sessions.clone(),
        orchestrator,
        out_tx,
        audit,
    );
    let manager_handle = tokio::spawn(manager.run(in_rx));

    let writer_handle = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = write_frame(&mut stdout, &frame).await {
                warn!(error = %e, "failed to write outbound frame");
                break;
            }
        }
    });

    info!(user = %config.username, "gateway serving on stdio");
    let mut reader = BufReader::new(tokio::io::stdin());
    while let Some(line) = next_frame(&mut reader).await? {
        let Some(frame) = parse_frame(&line) else {
            continue;
        };
        if in_tx.send(frame_to_inbound(frame, &sessions)).await.is_err() {
            break;
        }
    }

    // Stdin closed: let the manager drain in-flight work, then stop writing.
    drop(in_tx);
    manager_handle.await.context("session manager task")?;
    writer_handle.await.context("writer task")?;
    info!("gateway stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_request_frame_parses_flattened() -> eyre::Result<()> {
        let line = json!({
            "type": "session_request",
            "topic": "t1",
            "id": 7,
            "chain": "eip155:1",
            "method": "personal_sign",
            "params": ["0x68692e", "0xdead00000000000000000000000000000000beef"]
        })
        .to_string();
        let frame = parse_frame(&line).ok_or_else(|| eyre::eyre!("frame dropped"))?;
        match frame {
            InboundFrame::SessionRequest { request } => {
                assert_eq!(request.topic, "t1", "topic");
                assert_eq!(request.id, 7, "id");
                assert_eq!(request.method, "personal_sign", "method");
            }
            other => eyre::bail!("wrong variant: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn approve_request_code_is_optional() -> eyre::Result<()> {
        let with = parse_frame(r#"{"type":"approve_request","id":1,"mfa_code":"123456"}"#)
            .ok_or_else(|| eyre::eyre!("dropped"))?;
        let without = parse_frame(r#"{"type":"approve_request","id":2}"#)
            .ok_or_else(|| eyre::eyre!("dropped"))?;
        assert!(
            matches!(with, InboundFrame::ApproveRequest { mfa_code: Some(_), .. }),
            "explicit code kept"
        );
        assert!(
            matches!(without, InboundFrame::ApproveRequest { mfa_code: None, .. }),
            "missing code is None"
        );
        Ok(())
    }

    #[test]
    fn garbage_and_unknown_types_are_dropped() {
        assert!(parse_frame("not json").is_none(), "invalid json");
        assert!(
            parse_frame(r#"{"type":"mystery","id":1}"#).is_none(),
            "unknown frame type"
        );
        assert!(parse_frame("   ").is_none(), "blank line");
    }

    #[tokio::test]
    async fn oversized_line_is_discarded_while_buffering() -> eyre::Result<()> {
        let mut input = vec![b'a'; MAX_FRAME_BYTES + 10];
        input.push(b'\n');
        input.extend_from_slice(b"{\"type\":\"session_ping\",\"topic\":\"t1\"}\n");
        let mut reader = BufReader::new(input.as_slice());

        let first = next_frame(&mut reader).await?;
        assert_eq!(
            first.as_deref(),
            Some("{\"type\":\"session_ping\",\"topic\":\"t1\"}"),
            "oversized line skipped, next frame served"
        );
        assert!(next_frame(&mut reader).await?.is_none(), "eof after frames");
        Ok(())
    }

    #[tokio::test]
    async fn frame_at_the_cap_still_parses() -> eyre::Result<()> {
        let mut input = vec![b'b'; MAX_FRAME_BYTES];
        input.push(b'\n');
        let mut reader = BufReader::new(input.as_slice());
        let frame = next_frame(&mut reader)
            .await?
            .ok_or_else(|| eyre::eyre!("frame dropped"))?;
        assert_eq!(frame.len(), MAX_FRAME_BYTES, "cap is inclusive");
        Ok(())
    }

    #[test]
    fn sessions_frame_updates_the_bridge_source() -> eyre::Result<()> {
        let bridge = BridgeSessions::default();
        let line = json!({
            "type": "sessions",
            "sessions": [{
                "topic": "t1",
                "accounts": [],
                "chains": [],
                "expiry": null,
                "peer": { "name": "dapp" }
            }]
        })
        .to_string();
        let frame = parse_frame(&line).ok_or_else(|| eyre::eyre!("dropped"))?;
        let inbound = frame_to_inbound(frame, &bridge);
        assert!(
            matches!(inbound, Inbound::Event(ProtocolEvent::Resync)),
            "sessions frame becomes a resync event"
        );
        assert_eq!(bridge.active_sessions().len(), 1, "source updated");
        Ok(())
    }
}
