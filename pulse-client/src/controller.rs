//! Request lifecycle controller.
//!
//! Holds at most one active streaming session. Starting a new stream
//! supersedes the previous one inside the same critical section that installs
//! the new session, so there is never a moment where two sessions are
//! current.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use pulse_ndjson::{Frame, decode_stream};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::client::DiagnosisClient;
use crate::error::QueryError;
use crate::session::{SessionEnd, SessionId, SessionShared, StopReason, StreamSession, lock};

/// Current-session slot shared with the read loops.
struct Slot {
    current: Mutex<Option<Arc<SessionShared>>>,
    next_id: AtomicU64,
}

impl Slot {
    /// Clear the slot if it still belongs to `id`.
    fn release(&self, id: SessionId) {
        let mut current = lock(&self.current);
        if current.as_ref().is_some_and(|s| s.id() == id) {
            *current = None;
        }
    }
}

/// Issues queries and owns the lifecycle of streaming sessions.
///
/// Cloning yields another handle to the same controller; all clones share
/// the single current-session slot.
///
/// # Example
///
/// ```no_run
/// use pulse_client::{DiagnosisClient, SessionEvent, StreamController};
///
/// # async fn run() -> Result<(), pulse_client::QueryError> {
/// let controller = StreamController::new(DiagnosisClient::from_env()?);
/// let mut session = controller.start("患者腹痛腹泻，舌红苔白腻。");
/// while let Some(event) = session.next_event().await {
///     match event {
///         SessionEvent::Record(record) => println!("{}", record.value),
///         SessionEvent::End(end) => println!("{end:?}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct StreamController {
    client: DiagnosisClient,
    slot: Arc<Slot>,
}

impl StreamController {
    /// Create a controller with no active session.
    #[must_use]
    pub fn new(client: DiagnosisClient) -> Self {
        Self {
            client,
            slot: Arc::new(Slot {
                current: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// The underlying client.
    #[must_use]
    pub fn client(&self) -> &DiagnosisClient {
        &self.client
    }

    /// Synchronous mode: one request, one decoded answer.
    ///
    /// Independent of streaming sessions; does not supersede them.
    pub async fn ask(&self, question: &str) -> Result<Value, QueryError> {
        self.client.ask(question).await
    }

    /// Streaming mode: start a new session, superseding any active one.
    ///
    /// The previous session receives `SessionEnd::Stopped(StopReason::Superseded)`
    /// and delivers nothing after this call returns.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn start(&self, question: impl Into<String>) -> StreamSession {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (diagnostics_tx, diagnostics_rx) = mpsc::unbounded_channel();

        let session = {
            let mut current = lock(&self.slot.current);
            if let Some(previous) = current.take() {
                previous.cancel(StopReason::Superseded);
            }
            let id = SessionId(self.slot.next_id.fetch_add(1, Ordering::Relaxed));
            let session = Arc::new(SessionShared::new(id, events_tx, diagnostics_tx));
            *current = Some(Arc::clone(&session));
            session
        };

        tracing::debug!(session = %session.id(), "stream session started");
        tokio::spawn(run_session(
            self.client.clone(),
            Arc::clone(&self.slot),
            Arc::clone(&session),
            question.into(),
        ));

        StreamSession::new(session, events_rx, diagnostics_rx)
    }

    /// Cancel the active session, if any.
    pub fn cancel(&self) {
        let previous = lock(&self.slot.current).take();
        if let Some(previous) = previous {
            previous.cancel(StopReason::Cancelled);
        }
    }

    /// Id of the active session.
    #[must_use]
    pub fn current(&self) -> Option<SessionId> {
        lock(&self.slot.current).as_ref().map(|s| s.id())
    }
}

impl std::fmt::Debug for StreamController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamController")
            .field("config", self.client.config())
            .field("current", &self.current())
            .finish()
    }
}

/// Read loop of one session. Runs until the stream ends, fails, or the
/// session's token is cancelled.
async fn run_session(
    client: DiagnosisClient,
    slot: Arc<Slot>,
    session: Arc<SessionShared>,
    question: String,
) {
    let token = session.token().clone();
    let end = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        end = read_stream(&client, &session, &question) => Some(end),
    };

    if let Some(end) = end {
        match &end {
            SessionEnd::Completed { records } => {
                tracing::debug!(session = %session.id(), records, "stream session completed");
            }
            SessionEnd::Failed(e) => {
                tracing::warn!(session = %session.id(), error = %e, "stream session failed");
            }
            SessionEnd::Stopped(_) => {}
        }
        session.close(end);
    }
    slot.release(session.id());
}

async fn read_stream(
    client: &DiagnosisClient,
    session: &SessionShared,
    question: &str,
) -> SessionEnd {
    let response = match client.open_stream(question).await {
        Ok(response) => response,
        Err(e) => return SessionEnd::Failed(e),
    };

    let mut frames = std::pin::pin!(decode_stream(response.bytes_stream()));
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Frame::Record(record)) => {
                if !session.emit_record(record) {
                    // Closed or consumer gone; the terminal event is settled.
                    return SessionEnd::Stopped(StopReason::Cancelled);
                }
            }
            Ok(Frame::Malformed(line)) => session.report_malformed(line),
            Err(source) => {
                return SessionEnd::Failed(QueryError::Stream {
                    records_received: session.records(),
                    source,
                });
            }
        }
    }

    SessionEnd::Completed {
        records: session.records(),
    }
}
