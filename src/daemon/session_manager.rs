//! Accepts inbound engine connections and owns the set of live sessions.
//!
//! Registration is deferred until the engine's `init` frame arrives, so
//! callers never observe a session without an init record. Newly attached
//! sessions get feature negotiation and a replay of pending breakpoints
//! before they become visible.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::dbgp::{Connection, ConnectionEvent, Session, SessionStatus, StreamKind};
use crate::{Error, Result};

use super::pending::PendingBreakpoints;

/// Fan-out events for external subscribers (tool layer, exporters).
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    SessionCreated {
        session_id: String,
    },
    SessionEnded {
        session_id: String,
    },
    StateChange {
        session_id: String,
        status: SessionStatus,
        filename: Option<String>,
        lineno: Option<u32>,
    },
    Output {
        session_id: String,
        kind: StreamKind,
        content: String,
    },
}

pub struct SessionManager {
    config: Config,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    active_id: RwLock<Option<String>>,
    next_seq: AtomicU64,
    pending: PendingBreakpoints,
    events: broadcast::Sender<ManagerEvent>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(config: Config) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            active_id: RwLock::new(None),
            next_seq: AtomicU64::new(0),
            pending: PendingBreakpoints::new(),
            events,
            accept_task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pending(&self) -> &PendingBreakpoints {
        &self.pending
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    /// Bind the DBGp listener and start accepting engines. Returns the
    /// bound address (useful with port 0). Bind failure is fatal to startup.
    pub async fn listen(self: Arc<Self>) -> Result<SocketAddr> {
        let listener =
            TcpListener::bind((self.config.listen_host.as_str(), self.config.listen_port)).await?;
        let addr = listener.local_addr()?;
        tracing::info!("listening for DBGp engines on {}", addr);

        let manager = Arc::clone(&self);
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let manager = Arc::clone(&manager);
                        tokio::spawn(async move {
                            manager.handle_engine(stream, peer).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!("accept error: {}", e);
                    }
                }
            }
        });
        *self.accept_task.lock().unwrap() = Some(task);

        Ok(addr)
    }

    async fn handle_engine(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        tracing::info!("engine connected from {}", peer);
        let timeout = Duration::from_millis(self.config.command_timeout_ms);
        let (conn, mut events) = Connection::spawn(stream, timeout);

        // The init frame must arrive before the session exists.
        let init = loop {
            match tokio::time::timeout(timeout, events.recv()).await {
                Ok(Some(ConnectionEvent::Init(init))) => break init,
                Ok(Some(ConnectionEvent::Closed)) | Ok(None) => {
                    tracing::warn!("engine {} disconnected before init", peer);
                    return;
                }
                Ok(Some(other)) => {
                    tracing::warn!("engine {} sent {:?} before init", peer, other);
                }
                Err(_) => {
                    tracing::warn!("engine {} sent no init in time, dropping", peer);
                    conn.close();
                    return;
                }
            }
        };

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("sess-{}", seq);
        let session = Arc::new(Session::new(id.clone(), seq, conn, init));

        session.negotiate_features(&self.config).await;

        let applied = self.pending.apply_to_session(&session).await;
        if !applied.is_empty() {
            tracing::info!(
                session = %id,
                "applied {} pending breakpoint(s) on attach",
                applied.len()
            );
        }

        self.sessions
            .write()
            .unwrap()
            .insert(id.clone(), Arc::clone(&session));
        let _ = self.events.send(ManagerEvent::SessionCreated {
            session_id: id.clone(),
        });
        tracing::info!(session = %id, file = %session.init().file_uri, "session registered");

        // Pump connection events into session state until the socket closes.
        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::Response(resp) => {
                    if session.apply_response(&resp) {
                        let snap = session.state_snapshot();
                        let _ = self.events.send(ManagerEvent::StateChange {
                            session_id: id.clone(),
                            status: snap.status,
                            filename: snap.current_file,
                            lineno: snap.current_line,
                        });
                    }
                }
                ConnectionEvent::Stream(s) => {
                    let _ = self.events.send(ManagerEvent::Output {
                        session_id: id.clone(),
                        kind: s.kind,
                        content: s.content,
                    });
                }
                ConnectionEvent::ProtocolError(msg) => {
                    tracing::warn!(session = %id, "protocol error: {}", msg);
                }
                ConnectionEvent::Init(_) => {
                    tracing::warn!(session = %id, "unexpected second init, ignoring");
                }
                ConnectionEvent::Closed => break,
            }
        }

        session.mark_stopped();
        self.remove_session(&id);
        let _ = self.events.send(ManagerEvent::SessionEnded {
            session_id: id.clone(),
        });
        tracing::info!(session = %id, "session ended");
    }

    fn remove_session(&self, id: &str) {
        self.sessions.write().unwrap().remove(id);
        self.pending.drop_session(id);

        let mut active = self.active_id.write().unwrap();
        if active.as_deref() == Some(id) {
            *active = None;
        }
        // Re-elect immediately so the hint stays warm.
        if active.is_none() {
            *active = self.elect();
        }
    }

    /// Election: prefer the earliest-created session sitting at a break,
    /// otherwise the earliest-created session.
    fn elect(&self) -> Option<String> {
        let sessions = self.sessions.read().unwrap();
        let mut live: Vec<&Arc<Session>> = sessions.values().collect();
        live.sort_by_key(|s| s.seq());
        live.iter()
            .find(|s| s.status() == SessionStatus::Break)
            .or_else(|| live.first())
            .map(|s| s.id().to_string())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().unwrap().get(id).cloned()
    }

    /// Live sessions in creation order.
    pub fn list(&self) -> Vec<Arc<Session>> {
        let mut list: Vec<Arc<Session>> =
            self.sessions.read().unwrap().values().cloned().collect();
        list.sort_by_key(|s| s.seq());
        list
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn active_id(&self) -> Option<String> {
        self.active_id.read().unwrap().clone()
    }

    /// The session implicitly addressed by tools that name none.
    pub fn active_session(&self) -> Option<Arc<Session>> {
        {
            let active = self.active_id.read().unwrap();
            if let Some(id) = active.as_deref() {
                if let Some(session) = self.sessions.read().unwrap().get(id) {
                    return Some(Arc::clone(session));
                }
            }
        }
        let elected = self.elect()?;
        *self.active_id.write().unwrap() = Some(elected.clone());
        self.get(&elected)
    }

    /// Explicit override; the id must be live.
    pub fn set_active(&self, id: &str) -> Result<()> {
        if self.get(id).is_none() {
            return Err(Error::SessionNotFound(id.to_string()));
        }
        *self.active_id.write().unwrap() = Some(id.to_string());
        Ok(())
    }

    /// Resolve a tool's optional session reference.
    pub fn resolve(&self, session_id: Option<&str>) -> Result<Arc<Session>> {
        match session_id {
            Some(id) => self
                .get(id)
                .ok_or_else(|| Error::SessionNotFound(id.to_string())),
            None => self.active_session().ok_or(Error::NoActiveSession),
        }
    }

    pub fn find_by_file(&self, needle: &str) -> Vec<Arc<Session>> {
        self.list()
            .into_iter()
            .filter(|s| s.matches_file(needle))
            .collect()
    }

    pub fn find_by_ide_key(&self, key: &str) -> Vec<Arc<Session>> {
        self.list()
            .into_iter()
            .filter(|s| s.init().ide_key == key)
            .collect()
    }

    /// Close one session; removal happens through its close event.
    pub fn close_session(&self, id: &str) -> Result<()> {
        let session = self
            .get(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        session.close();
        Ok(())
    }

    pub fn close_all(&self) {
        for session in self.list() {
            session.close();
        }
    }

    /// Shutdown order matters: sessions first, then the accept loop.
    pub async fn shutdown(&self) {
        self.close_all();
        // Give close events a moment to drain the session map.
        for _ in 0..50 {
            if self.session_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        if let Some(task) = self.accept_task.lock().unwrap().take() {
            task.abort();
        }
    }
}
