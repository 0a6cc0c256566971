//! Session registry
//!
//! Maps caller-supplied session identifiers to a bound database handle and
//! model pipeline. An identifier is reserved before the database connection
//! is attempted, so two concurrent `initialize` calls for the same id yield
//! exactly one success and one `SessionExists`.

use crate::config::{DatabaseConfig, PipelineConfig, PipelineSettings};
use crate::database::{Database, DatabaseConnector, QueryResult};
use crate::error::{Result, SpatialMindError};
use crate::geometry::{classify, ResultLayer};
use crate::image::ImageAttachment;
use crate::pipeline::{AskOutcome, Pipeline, Turn};
use crate::providers::ProviderFactory;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// A live session
///
/// Listing fields live outside the pipeline lock, which is held for the
/// whole of a model round trip.
struct Session {
    id: String,
    database: Arc<dyn Database>,
    pipeline: Mutex<Pipeline>,
    pipeline_tag: String,
    model: String,
    turns: AtomicUsize,
    created_at: DateTime<Utc>,
}

impl Session {
    fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            pipeline: self.pipeline_tag.clone(),
            model: self.model.clone(),
            database: self.database.target(),
            turns: self.turns.load(Ordering::SeqCst),
            created_at: self.created_at,
        }
    }

    fn record_turns(&self, pipeline: &Pipeline) {
        self.turns.store(pipeline.conversation().len(), Ordering::SeqCst);
    }
}

/// Summary of a live session for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub pipeline: String,
    pub model: String,
    pub database: String,
    pub turns: usize,
    pub created_at: DateTime<Utc>,
}

/// Work routed to a session
#[derive(Debug, Clone)]
pub enum SessionRequest {
    Ask {
        question: String,
        image: Option<ImageAttachment>,
    },
    Execute {
        sql: String,
    },
    /// Execute and classify the result for rendering
    Layer {
        sql: String,
    },
    History,
    ClearHistory,
}

/// Output of a dispatched request
#[derive(Debug, Clone)]
pub enum SessionResponse {
    Answer(AskOutcome),
    Executed(QueryResult),
    Layer {
        result: QueryResult,
        layer: ResultLayer,
    },
    History(Vec<Turn>),
    Cleared,
}

enum Slot {
    /// Id reserved while the connection is being established
    Initializing,
    Live(Arc<Session>),
}

type Slots = Arc<RwLock<HashMap<String, Slot>>>;

/// Holds an `Initializing` slot and frees it on drop unless disarmed
///
/// Covers the case where the `initialize` future is dropped mid-connect,
/// e.g. a client disconnecting from the HTTP handler.
struct Reservation {
    slots: Slots,
    session_id: String,
    armed: bool,
}

impl Reservation {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut slots) = self.slots.try_write() {
            free_reserved(&mut slots, &self.session_id);
            return;
        }
        // Lock is busy; finish the cleanup on the runtime
        let slots = Arc::clone(&self.slots);
        let session_id = std::mem::take(&mut self.session_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    free_reserved(&mut *slots.write().await, &session_id);
                });
            }
            Err(_) => {
                tracing::warn!(session_id = %session_id, "Runtime gone; reserved session id not freed");
            }
        }
    }
}

fn free_reserved(slots: &mut HashMap<String, Slot>, session_id: &str) {
    if matches!(slots.get(session_id), Some(Slot::Initializing)) {
        slots.remove(session_id);
    }
}

/// Concurrent map of session id to session
pub struct SessionRegistry {
    connector: Arc<dyn DatabaseConnector>,
    providers: Arc<dyn ProviderFactory>,
    settings: PipelineSettings,
    slots: Slots,
}

impl SessionRegistry {
    pub fn new(
        connector: Arc<dyn DatabaseConnector>,
        providers: Arc<dyn ProviderFactory>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            connector,
            providers,
            settings,
            slots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a session bound to a database and model pipeline
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for an empty id
    /// - `SessionExists` if the id is live or being initialized
    /// - `Config` for an unsupported database or provider setup
    /// - `Connection` if the database is unreachable
    ///
    /// On any error, or if the returned future is dropped before it
    /// completes, no session is registered.
    pub async fn initialize(
        &self,
        session_id: &str,
        database: DatabaseConfig,
        pipeline: PipelineConfig,
    ) -> Result<()> {
        if session_id.trim().is_empty() {
            return Err(
                SpatialMindError::InvalidRequest("session_id cannot be empty".to_string()).into(),
            );
        }

        let reservation = {
            let mut slots = self.slots.write().await;
            if slots.contains_key(session_id) {
                tracing::warn!(session_id, "Initialize rejected: session already exists");
                return Err(SpatialMindError::SessionExists(session_id.to_string()).into());
            }
            slots.insert(session_id.to_string(), Slot::Initializing);
            Reservation {
                slots: Arc::clone(&self.slots),
                session_id: session_id.to_string(),
                armed: true,
            }
        };

        match self.open(session_id, database, pipeline).await {
            Ok(session) => {
                let mut slots = self.slots.write().await;
                slots.insert(session_id.to_string(), Slot::Live(Arc::new(session)));
                reservation.disarm();
                tracing::info!(session_id, active = slots.len(), "Session initialized");
                Ok(())
            }
            Err(e) => {
                drop(reservation);
                tracing::warn!(session_id, "Session initialization failed: {:#}", e);
                Err(e)
            }
        }
    }

    async fn open(
        &self,
        session_id: &str,
        database: DatabaseConfig,
        pipeline: PipelineConfig,
    ) -> Result<Session> {
        database.validate()?;
        let provider = self.providers.create(&pipeline)?;

        tracing::info!(
            session_id,
            target_db = %database.redacted(),
            pipeline = pipeline.tag(),
            "Connecting session database"
        );
        let handle = self.connector.connect(&database).await?;

        let pipeline = Pipeline::new(pipeline, provider, &self.settings);
        Ok(Session {
            id: session_id.to_string(),
            database: handle,
            pipeline_tag: pipeline.config().tag().to_string(),
            model: pipeline.model(),
            turns: AtomicUsize::new(0),
            pipeline: Mutex::new(pipeline),
            created_at: Utc::now(),
        })
    }

    async fn get(&self, session_id: &str) -> Result<Arc<Session>> {
        match self.slots.read().await.get(session_id) {
            Some(Slot::Live(session)) => Ok(Arc::clone(session)),
            _ => Err(SpatialMindError::SessionNotFound(session_id.to_string()).into()),
        }
    }

    /// Route a request to a live session
    ///
    /// # Errors
    ///
    /// `SessionNotFound` for an unknown id; otherwise whatever the request
    /// itself fails with. Execution failures are not errors.
    pub async fn dispatch(
        &self,
        session_id: &str,
        request: SessionRequest,
    ) -> Result<SessionResponse> {
        let session = self.get(session_id).await?;

        match request {
            SessionRequest::Ask { question, image } => {
                let mut pipeline = session.pipeline.lock().await;
                let outcome = pipeline
                    .ask(session.database.as_ref(), &question, image)
                    .await?;
                session.record_turns(&pipeline);
                Ok(SessionResponse::Answer(outcome))
            }
            SessionRequest::Execute { sql } => {
                Ok(SessionResponse::Executed(run_sql(&session, &sql).await))
            }
            SessionRequest::Layer { sql } => {
                let result = run_sql(&session, &sql).await;
                let layer = classify(&result);
                tracing::info!(
                    session_id,
                    kind = layer.kind(),
                    skipped = layer.skipped(),
                    "Classified query result"
                );
                Ok(SessionResponse::Layer { result, layer })
            }
            SessionRequest::History => Ok(SessionResponse::History(
                session.pipeline.lock().await.conversation().turns(),
            )),
            SessionRequest::ClearHistory => {
                let mut pipeline = session.pipeline.lock().await;
                pipeline.clear_history();
                session.record_turns(&pipeline);
                Ok(SessionResponse::Cleared)
            }
        }
    }

    /// Ask a question in a session
    pub async fn ask(
        &self,
        session_id: &str,
        question: &str,
        image: Option<ImageAttachment>,
    ) -> Result<AskOutcome> {
        let request = SessionRequest::Ask {
            question: question.to_string(),
            image,
        };
        match self.dispatch(session_id, request).await? {
            SessionResponse::Answer(outcome) => Ok(outcome),
            other => Err(unexpected(other)),
        }
    }

    /// Execute SQL in a session; execution failures come back in the result
    pub async fn execute(&self, session_id: &str, sql: &str) -> Result<QueryResult> {
        let request = SessionRequest::Execute {
            sql: sql.to_string(),
        };
        match self.dispatch(session_id, request).await? {
            SessionResponse::Executed(result) => Ok(result),
            other => Err(unexpected(other)),
        }
    }

    pub async fn history(&self, session_id: &str) -> Result<Vec<Turn>> {
        match self.dispatch(session_id, SessionRequest::History).await? {
            SessionResponse::History(turns) => Ok(turns),
            other => Err(unexpected(other)),
        }
    }

    pub async fn clear_history(&self, session_id: &str) -> Result<()> {
        self.dispatch(session_id, SessionRequest::ClearHistory)
            .await
            .map(|_| ())
    }

    /// Close a session and release its database handle
    ///
    /// The session is unregistered even if releasing the connection fails;
    /// that failure is logged. Requests already running against the session
    /// finish with execution failures.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` for an unknown id
    pub async fn close(&self, session_id: &str) -> Result<()> {
        let session = {
            let mut slots = self.slots.write().await;
            let session = match slots.get(session_id) {
                Some(Slot::Live(session)) => Arc::clone(session),
                _ => return Err(SpatialMindError::SessionNotFound(session_id.to_string()).into()),
            };
            slots.remove(session_id);
            session
        };

        if let Err(e) = session.database.close().await {
            tracing::warn!(session_id, "Error releasing session database: {:#}", e);
        }
        tracing::info!(session_id, "Session closed");
        Ok(())
    }

    /// Identifiers of live sessions, sorted
    pub async fn list_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .slots
            .read()
            .await
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Live(_)))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Details of live sessions, sorted by id
    pub async fn sessions_info(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Arc<Session>> = self
            .slots
            .read()
            .await
            .values()
            .filter_map(|slot| match slot {
                Slot::Live(session) => Some(Arc::clone(session)),
                Slot::Initializing => None,
            })
            .collect();

        let mut infos: Vec<SessionInfo> = sessions.iter().map(|s| s.info()).collect();
        infos.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        infos
    }

    pub async fn active_count(&self) -> usize {
        self.slots
            .read()
            .await
            .values()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count()
    }

    /// Close every live session, best effort
    ///
    /// Each close runs independently; one failing session does not prevent
    /// the others from being released.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut slots = self.slots.write().await;
            let live: Vec<String> = slots
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Live(_)))
                .map(|(id, _)| id.clone())
                .collect();
            live.iter()
                .filter_map(|id| match slots.remove(id) {
                    Some(Slot::Live(session)) => Some(session),
                    _ => None,
                })
                .collect()
        };

        if sessions.is_empty() {
            return;
        }
        tracing::info!(count = sessions.len(), "Closing all sessions");

        let results = join_all(sessions.iter().map(|s| s.database.close())).await;
        for (session, result) in sessions.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(session_id = %session.id, "Error closing session: {:#}", e);
            }
        }
    }
}

async fn run_sql(session: &Session, sql: &str) -> QueryResult {
    let result = session.database.execute(sql).await;
    if result.success {
        tracing::info!(
            session_id = %session.id,
            rows = result.row_count(),
            columns = result.columns.len(),
            "Executed query"
        );
    } else {
        tracing::warn!(
            session_id = %session.id,
            error = result.error.as_deref().unwrap_or_default(),
            "Query execution failed"
        );
    }
    result
}

fn unexpected(response: SessionResponse) -> anyhow::Error {
    SpatialMindError::InvalidRequest(format!("unexpected session response: {:?}", response)).into()
}
