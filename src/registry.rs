//! SessionRegistry actor implementation
//!
//! Tracks every handshaken session and fans broadcast lines out to them.
//! A single actor task owns the membership map; handlers talk to it through
//! a cloneable [`SessionRegistry`] handle over an mpsc channel, so add,
//! remove and broadcast are serialized without any locks and a broadcast
//! always scans a consistent snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{AppError, SendError};
use crate::session::SessionHandle;
use crate::types::SessionId;

/// Commands sent from handles to the registry actor
#[derive(Debug)]
pub enum RegistryCommand {
    /// Register a handshaken session, optionally announcing it to the others
    Add {
        handle: SessionHandle,
        announce: Option<Arc<str>>,
        reply: oneshot::Sender<bool>,
    },
    /// Deregister a session
    Remove {
        id: SessionId,
        reply: oneshot::Sender<Option<SessionHandle>>,
    },
    /// Queue a line on every session except `exclude`
    Broadcast {
        line: Arc<str>,
        exclude: Option<SessionId>,
        reply: oneshot::Sender<usize>,
    },
    /// Number of registered sessions
    Count { reply: oneshot::Sender<usize> },
    /// Membership check
    Contains {
        id: SessionId,
        reply: oneshot::Sender<bool>,
    },
}

/// The registry actor
///
/// Owns all registered sessions and processes commands one at a time.
struct RegistryActor {
    /// All registered sessions: SessionId -> SessionHandle
    sessions: HashMap<SessionId, SessionHandle>,
    /// Command receiver channel
    receiver: mpsc::Receiver<RegistryCommand>,
}

impl RegistryActor {
    fn new(receiver: mpsc::Receiver<RegistryCommand>) -> Self {
        Self {
            sessions: HashMap::new(),
            receiver,
        }
    }

    /// Run until every [`SessionRegistry`] handle has been dropped
    async fn run(mut self) {
        debug!("Session registry started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        debug!("Session registry shutting down");
    }

    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Add {
                handle,
                announce,
                reply,
            } => {
                let _ = reply.send(self.handle_add(handle, announce));
            }
            RegistryCommand::Remove { id, reply } => {
                let _ = reply.send(self.handle_remove(id));
            }
            RegistryCommand::Broadcast {
                line,
                exclude,
                reply,
            } => {
                let _ = reply.send(self.handle_broadcast(line, exclude));
            }
            RegistryCommand::Count { reply } => {
                let _ = reply.send(self.sessions.len());
            }
            RegistryCommand::Contains { id, reply } => {
                let _ = reply.send(self.sessions.contains_key(&id));
            }
        }
    }

    fn handle_add(&mut self, handle: SessionHandle, announce: Option<Arc<str>>) -> bool {
        let id = handle.id;
        if self.sessions.contains_key(&id) {
            warn!(session = %id, "Session already registered");
            return false;
        }

        info!(session = %id, username = %handle.username, "Session registered");
        self.sessions.insert(id, handle);
        debug!("Total sessions: {}", self.sessions.len());

        if let Some(line) = announce {
            self.handle_broadcast(line, Some(id));
        }
        true
    }

    fn handle_remove(&mut self, id: SessionId) -> Option<SessionHandle> {
        let removed = self.sessions.remove(&id);
        match &removed {
            Some(handle) => {
                info!(session = %id, username = %handle.username, "Session deregistered");
                debug!("Total sessions: {}", self.sessions.len());
            }
            None => debug!(session = %id, "Remove for unregistered session ignored"),
        }
        removed
    }

    /// Queue `line` on every other session; returns how many accepted it
    fn handle_broadcast(&self, line: Arc<str>, exclude: Option<SessionId>) -> usize {
        let mut delivered = 0;

        for (id, handle) in &self.sessions {
            if Some(*id) == exclude {
                continue;
            }

            match handle.try_deliver(Arc::clone(&line)) {
                Ok(()) => delivered += 1,
                Err(SendError::QueueFull) => {
                    warn!(
                        session = %id,
                        username = %handle.username,
                        "Outbound queue full, dropping line"
                    );
                }
                Err(SendError::ChannelClosed) => {
                    debug!(session = %id, "Outbound queue closed, skipping");
                }
            }
        }

        delivered
    }
}

/// Handle to the shared session registry
///
/// Cheap to clone; every connection handler holds one. The actor task stops
/// once the last handle is dropped.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    sender: mpsc::Sender<RegistryCommand>,
}

impl SessionRegistry {
    /// Spawn the registry actor with a command channel of `buffer` slots
    pub fn spawn(buffer: usize) -> Self {
        let (sender, receiver) = mpsc::channel(buffer);
        tokio::spawn(RegistryActor::new(receiver).run());
        Self { sender }
    }

    /// Register a session
    ///
    /// Returns false (and keeps the existing entry) if the id is already present.
    pub async fn add(&self, handle: SessionHandle) -> Result<bool, AppError> {
        self.request(|reply| RegistryCommand::Add {
            handle,
            announce: None,
            reply,
        })
        .await
    }

    /// Register a session and broadcast `notice` to every other session
    ///
    /// Both happen in one actor step: the notice reaches exactly the sessions
    /// registered before this one, and the new session is visible to
    /// `session_count`/`contains` only once the notice has been queued.
    pub async fn join(
        &self,
        handle: SessionHandle,
        notice: impl Into<Arc<str>>,
    ) -> Result<bool, AppError> {
        let announce = Some(notice.into());
        self.request(|reply| RegistryCommand::Add {
            handle,
            announce,
            reply,
        })
        .await
    }

    /// Deregister a session
    ///
    /// Returns the removed entry the first time and `None` on every later
    /// call, so callers can tie one-shot side effects to a `Some`.
    pub async fn remove(&self, id: SessionId) -> Result<Option<SessionHandle>, AppError> {
        self.request(|reply| RegistryCommand::Remove { id, reply })
            .await
    }

    /// Deliver `line` to every registered session except `exclude`
    ///
    /// Per-peer failures are logged and skipped. Returns the number of
    /// sessions the line was queued for.
    pub async fn broadcast(
        &self,
        line: impl Into<Arc<str>>,
        exclude: Option<SessionId>,
    ) -> Result<usize, AppError> {
        let line = line.into();
        self.request(|reply| RegistryCommand::Broadcast {
            line,
            exclude,
            reply,
        })
        .await
    }

    /// Number of registered sessions
    pub async fn session_count(&self) -> Result<usize, AppError> {
        self.request(|reply| RegistryCommand::Count { reply }).await
    }

    /// Check whether a session is registered
    pub async fn contains(&self, id: SessionId) -> Result<bool, AppError> {
        self.request(|reply| RegistryCommand::Contains { id, reply })
            .await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, AppError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(make(reply))
            .await
            .map_err(|_| AppError::RegistryClosed)?;
        response.await.map_err(|_| AppError::RegistryClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    fn named_session(name: &str, capacity: usize) -> (Session, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let mut session = Session::new("test", tx);
        session.set_username(name.to_string()).unwrap();
        (session, rx)
    }

    #[tokio::test]
    async fn test_concurrent_adds_are_both_present_once() {
        let registry = SessionRegistry::spawn(16);
        let (alice, _rx_a) = named_session("alice", 8);
        let (bob, _rx_b) = named_session("bob", 8);

        let (a, b) = tokio::join!(
            registry.add(alice.handle().unwrap()),
            registry.add(bob.handle().unwrap())
        );
        assert!(a.unwrap());
        assert!(b.unwrap());

        assert_eq!(registry.session_count().await.unwrap(), 2);
        assert!(registry.contains(alice.id).await.unwrap());
        assert!(registry.contains(bob.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_add_is_rejected() {
        let registry = SessionRegistry::spawn(16);
        let (alice, _rx) = named_session("alice", 8);

        assert!(registry.add(alice.handle().unwrap()).await.unwrap());
        assert!(!registry.add(alice.handle().unwrap()).await.unwrap());
        assert_eq!(registry.session_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_join_announces_to_existing_sessions_only() {
        let registry = SessionRegistry::spawn(16);
        let (alice, mut rx_a) = named_session("alice", 8);
        let (bob, mut rx_b) = named_session("bob", 8);

        assert!(registry.join(alice.handle().unwrap(), "alice joined").await.unwrap());
        assert!(registry.join(bob.handle().unwrap(), "bob joined").await.unwrap());

        assert_eq!(rx_a.recv().await.as_deref(), Some("bob joined"));
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_duplicate_join_is_not_announced() {
        let registry = SessionRegistry::spawn(16);
        let (alice, _rx_a) = named_session("alice", 8);
        let (bob, mut rx_b) = named_session("bob", 8);
        registry.add(bob.handle().unwrap()).await.unwrap();

        assert!(registry.join(alice.handle().unwrap(), "first").await.unwrap());
        assert!(!registry.join(alice.handle().unwrap(), "second").await.unwrap());

        assert_eq!(rx_b.recv().await.as_deref(), Some("first"));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = SessionRegistry::spawn(16);
        let (alice, _rx) = named_session("alice", 8);
        registry.add(alice.handle().unwrap()).await.unwrap();

        let first = registry.remove(alice.id).await.unwrap();
        assert_eq!(first.map(|h| h.username), Some("alice".to_string()));

        assert!(registry.remove(alice.id).await.unwrap().is_none());
        assert_eq!(registry.session_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let registry = SessionRegistry::spawn(16);
        let (alice, mut rx_a) = named_session("alice", 8);
        let (bob, mut rx_b) = named_session("bob", 8);
        let (carol, mut rx_c) = named_session("carol", 8);
        for s in [&alice, &bob, &carol] {
            registry.add(s.handle().unwrap()).await.unwrap();
        }

        let delivered = registry.broadcast("hello", Some(alice.id)).await.unwrap();
        assert_eq!(delivered, 2);

        assert_eq!(rx_b.recv().await.as_deref(), Some("hello"));
        assert_eq!(rx_c.recv().await.as_deref(), Some("hello"));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_slow_peer_does_not_block_others() {
        let registry = SessionRegistry::spawn(16);
        let (sender, _rx_s) = named_session("sender", 8);
        let (slow, _rx_slow) = named_session("slow", 1);
        let (fast, mut rx_fast) = named_session("fast", 8);
        for s in [&sender, &slow, &fast] {
            registry.add(s.handle().unwrap()).await.unwrap();
        }

        // slow never drains, so its single slot fills on the first line
        assert_eq!(registry.broadcast("one", Some(sender.id)).await.unwrap(), 2);
        assert_eq!(registry.broadcast("two", Some(sender.id)).await.unwrap(), 1);

        assert_eq!(rx_fast.recv().await.as_deref(), Some("one"));
        assert_eq!(rx_fast.recv().await.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_closed_peer_is_skipped() {
        let registry = SessionRegistry::spawn(16);
        let (gone, rx_gone) = named_session("gone", 8);
        let (here, mut rx_here) = named_session("here", 8);
        registry.add(gone.handle().unwrap()).await.unwrap();
        registry.add(here.handle().unwrap()).await.unwrap();

        drop(rx_gone);
        assert_eq!(registry.broadcast("still here?", None).await.unwrap(), 1);
        assert_eq!(rx_here.recv().await.as_deref(), Some("still here?"));
    }
}
