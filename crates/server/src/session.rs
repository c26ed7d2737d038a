//! Session management for the HTTP transport.
//!
//! Every remote client gets its own [`McpServer`] handler, keyed by the session id the
//! handler assigns while processing `initialize`. Sessions move through three states:
//!
//! - `Pending`: the handler exists and is running the initialization, but nothing else
//!   can see it.
//! - `Active`: the handler assigned its id and the session was published to the table.
//! - `Closed`: the handler was closed and the table entry removed.
//!
//! A session is only published after initialization succeeded, and it is always removed
//! from the table when its handler closes, whoever triggered the close.

use chrono::{DateTime, Utc};
use orats_mcp::protocol::is_initialize_request;
use orats_mcp::{CallDispatcher, McpError, McpServer};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default idle time before a session is closed: 30 minutes
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Default maximum number of live sessions
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// Lower bound on how often idle sessions are swept
const MIN_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Active,
    Closed,
}

/// Client-facing session failures.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Stream or close request without a session id.
    #[error("Invalid or missing session ID")]
    MissingSessionId,

    /// The id does not name a live session.
    #[error("Invalid or missing session ID")]
    UnknownSession(String),

    /// Message without a session id that does not initialize one.
    #[error("Bad request: no valid session")]
    NotInitializing,

    /// The handler rejected the initialization; carries its JSON-RPC reply.
    #[error("Session initialization failed")]
    InitializationFailed(Option<Value>),

    /// Session limit reached.
    #[error("Server at capacity, try again later")]
    AtCapacity,

    /// Unexpected handler failure.
    #[error("Session handler failed: {0}")]
    Handler(#[from] McpError),
}

/// Limits applied by the [`SessionManager`].
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Idle time after which a session is closed. `None` keeps sessions until closed.
    pub idle_ttl: Option<Duration>,
    pub max_sessions: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            idle_ttl: Some(DEFAULT_SESSION_TTL),
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

/// A handler that has not finished initialization. Never visible in the table.
pub struct PendingSession {
    handler: Arc<McpServer>,
}

impl PendingSession {
    fn new(handler: McpServer) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::Pending
    }

    /// Run the initialization message through the handler.
    ///
    /// Succeeds only once the handler has assigned its session id.
    async fn initialize(self, message: Value) -> Result<(Session, Option<Value>), SessionError> {
        debug!(state = ?self.state(), "Initializing session");
        let reply = self.handler.handle_message(message).await?;

        match self.handler.session_id() {
            Some(id) => Ok((Session::new(id.to_string(), self.handler), reply)),
            None => {
                let _ = self.handler.close();
                Err(SessionError::InitializationFailed(reply))
            }
        }
    }
}

/// An initialized session bound to its handler.
pub struct Session {
    id: String,
    handler: Arc<McpServer>,
    created_at: DateTime<Utc>,
    last_active: Mutex<Instant>,
}

impl Session {
    fn new(id: String, handler: Arc<McpServer>) -> Self {
        Self {
            id,
            handler,
            created_at: Utc::now(),
            last_active: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handler(&self) -> &McpServer {
        &self.handler
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        if self.handler.is_closed() {
            SessionState::Closed
        } else {
            SessionState::Active
        }
    }

    fn touch(&self) {
        *self.last_active.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        let last = *self.last_active.lock().unwrap_or_else(PoisonError::into_inner);
        now.saturating_duration_since(last)
    }
}

/// Outcome of a POST routed through the manager.
#[derive(Debug)]
pub struct PostOutcome {
    /// Protocol reply, `None` when the message only carried notifications.
    pub reply: Option<Value>,
    /// Set when this request created the session.
    pub session_id: Option<String>,
}

#[derive(Default)]
struct SessionTable {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    /// Published sessions plus initializations in flight.
    slots: AtomicUsize,
}

impl SessionTable {
    /// Claim a slot for a new session, failing when `max` are taken.
    fn try_reserve(&self, max: usize) -> Option<SlotReservation<'_>> {
        self.slots
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |taken| {
                (taken < max).then_some(taken + 1)
            })
            .ok()
            .map(|_| SlotReservation {
                table: self,
                committed: false,
            })
    }

    fn release(&self) {
        let _ = self
            .slots
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |taken| taken.checked_sub(1));
    }

    fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn insert(&self, session: Arc<Session>) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(session.id.clone(), session);
        sessions.len()
    }

    fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let removed = sessions.remove(id);
        if removed.is_some() {
            self.release();
            debug!(session_id = %id, total = sessions.len(), "Removed session");
        }
        removed
    }

    fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

/// A slot held by an initialization in flight, returned on drop unless the session
/// was published.
struct SlotReservation<'a> {
    table: &'a SessionTable,
    committed: bool,
}

impl SlotReservation<'_> {
    /// Hand the slot over to the published table entry.
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.table.release();
        }
    }
}

/// Owns the session table and routes protocol traffic to session handlers.
pub struct SessionManager {
    table: Arc<SessionTable>,
    dispatcher: Arc<CallDispatcher>,
    options: SessionOptions,
}

impl SessionManager {
    pub fn new(dispatcher: Arc<CallDispatcher>, options: SessionOptions) -> Self {
        Self {
            table: Arc::new(SessionTable::default()),
            dispatcher,
            options,
        }
    }

    /// Look up a live session by id.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.table.get(id)
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Route a POSTed message (single or batch).
    ///
    /// With a session id the message goes to that session's handler. Without one it must
    /// initialize a new session, which is published only after the handler assigned its id.
    pub async fn handle_post(
        &self,
        session_id: Option<&str>,
        message: Value,
    ) -> Result<PostOutcome, SessionError> {
        match session_id {
            Some(id) => {
                let session = self.lookup(id)?;
                session.touch();
                let reply = match session.handler().handle_message(message).await {
                    Ok(reply) => reply,
                    // Closed between lookup and dispatch.
                    Err(McpError::Closed) => return Err(SessionError::UnknownSession(id.to_string())),
                    Err(e) => return Err(e.into()),
                };
                Ok(PostOutcome {
                    reply,
                    session_id: None,
                })
            }
            None if is_initialize_request(&message) => self.initialize(message).await,
            None => Err(SessionError::NotInitializing),
        }
    }

    /// Subscribe to server-initiated notifications of an active session.
    pub fn open_stream(&self, session_id: Option<&str>) -> Result<broadcast::Receiver<String>, SessionError> {
        let id = session_id.ok_or(SessionError::MissingSessionId)?;
        let session = self.lookup(id)?;
        session.touch();
        session
            .handler()
            .subscribe()
            .map_err(|_| SessionError::UnknownSession(id.to_string()))
    }

    /// Close a session on client request.
    ///
    /// The entry is removed even when the handler reports an error while closing.
    pub fn close(&self, session_id: Option<&str>) -> Result<(), SessionError> {
        let id = session_id.ok_or(SessionError::MissingSessionId)?;
        let session = self.lookup(id)?;

        if let Err(e) = session.handler().close() {
            warn!(session_id = %id, error = %e, "Handler reported an error while closing");
        }
        self.table.remove(id);

        let age = Utc::now() - session.created_at();
        info!(session_id = %id, state = ?session.state(), age_secs = age.num_seconds(), "Session terminated");
        Ok(())
    }

    /// Close every session idle for longer than the configured TTL.
    ///
    /// Sessions with an open notification stream are kept regardless of idle time.
    pub fn reap_idle(&self) -> usize {
        let Some(ttl) = self.options.idle_ttl else {
            return 0;
        };

        let now = Instant::now();
        let mut reaped = 0;
        for session in self.table.snapshot() {
            if session.idle_for(now) <= ttl || session.handler().subscriber_count() > 0 {
                continue;
            }
            debug!(session_id = %session.id(), "Closing idle session");
            // The close hook removes the entry; an already-closed handler has none left.
            if session.handler().close().is_err() {
                self.table.remove(session.id());
            }
            reaped += 1;
        }

        if reaped > 0 {
            info!(reaped, remaining = self.len(), "Cleaned up idle sessions");
        }
        reaped
    }

    /// Start the background task that closes idle sessions.
    ///
    /// The task stops once the manager is dropped.
    pub fn spawn_reaper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let ttl = self.options.idle_ttl?;
        let manager = Arc::downgrade(self);
        let period = (ttl / 2).max(MIN_REAP_INTERVAL);

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.reap_idle();
            }
        }))
    }

    fn lookup(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        self.table
            .get(id)
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))
    }

    fn new_handler(&self) -> McpServer {
        McpServer::new(self.dispatcher.clone()).with_session_ids(|| uuid::Uuid::new_v4().to_string())
    }

    async fn initialize(&self, message: Value) -> Result<PostOutcome, SessionError> {
        let Some(slot) = self.table.try_reserve(self.options.max_sessions) else {
            warn!(
                max = self.options.max_sessions,
                "Session limit reached, rejecting new session"
            );
            return Err(SessionError::AtCapacity);
        };

        let pending = PendingSession::new(self.new_handler());
        let (session, reply) = pending.initialize(message).await?;
        let session = self.publish(session);
        slot.commit();

        Ok(PostOutcome {
            reply,
            session_id: Some(session.id().to_string()),
        })
    }

    /// Make an initialized session visible, wiring the handler's close hook to the table.
    fn publish(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);

        let table: Weak<SessionTable> = Arc::downgrade(&self.table);
        let id = session.id().to_string();
        session.handler().on_close(move || {
            if let Some(table) = table.upgrade() {
                table.remove(&id);
            }
        });

        let total = self.table.insert(session.clone());
        info!(session_id = %session.id(), total, "Created new session");
        session
    }
}
