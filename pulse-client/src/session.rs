//! Streaming sessions: the consumer handle and its emission gate.
//!
//! Every event a session delivers passes through a gate guarded by the
//! session's lock. Cancelling closes the gate and sends the stop signal in
//! the same critical section, so once [`cancel`](StreamSession::cancel)
//! returns no record of that session can reach the consumer, even if the
//! transport is still delivering chunks.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::Stream;
use pulse_ndjson::{MalformedLine, Record};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::QueryError;

/// Ownership token of one streaming session.
///
/// Ids increase monotonically per controller, so a newer session always
/// compares greater than the one it superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

impl SessionId {
    /// Numeric value of the id.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Why a session stopped before the stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A newer streaming request replaced this one.
    Superseded,
    /// The consumer cancelled explicitly.
    Cancelled,
}

/// How a session ended. Exactly one is delivered per session.
#[derive(Debug)]
pub enum SessionEnd {
    /// The server closed the stream normally.
    Completed {
        /// Records delivered in total.
        records: u64,
    },
    /// The connection failed. Records delivered before the failure stay
    /// valid.
    Failed(QueryError),
    /// Cancelled or superseded. Not an error.
    Stopped(StopReason),
}

/// One item delivered to the consumer of a [`StreamSession`].
#[derive(Debug)]
pub enum SessionEvent {
    /// A decoded record, in stream order.
    Record(Record),
    /// Terminal event; nothing follows it.
    End(SessionEnd),
}

/// Everything a session delivered, gathered by [`StreamSession::collect`].
#[derive(Debug)]
pub struct CollectedSession {
    /// Records in stream order.
    pub records: Vec<Record>,
    /// Lines that failed to decode.
    pub malformed: Vec<MalformedLine>,
    /// Terminal event, `None` if the read loop vanished without one.
    pub end: Option<SessionEnd>,
}

/// Senders that are only reachable while the session is open.
struct Gate {
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
    diagnostics: Option<mpsc::UnboundedSender<MalformedLine>>,
    records: u64,
}

/// State shared by the read loop, the controller and the consumer handle.
pub(crate) struct SessionShared {
    id: SessionId,
    token: CancellationToken,
    gate: Mutex<Gate>,
}

impl SessionShared {
    pub(crate) fn new(
        id: SessionId,
        events: mpsc::UnboundedSender<SessionEvent>,
        diagnostics: mpsc::UnboundedSender<MalformedLine>,
    ) -> Self {
        Self {
            id,
            token: CancellationToken::new(),
            gate: Mutex::new(Gate {
                events: Some(events),
                diagnostics: Some(diagnostics),
                records: 0,
            }),
        }
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Deliver a record. Returns `false` once the session is closed or the
    /// consumer is gone; the record is discarded in that case.
    pub(crate) fn emit_record(&self, record: Record) -> bool {
        let mut gate = lock(&self.gate);
        let Some(events) = &gate.events else {
            tracing::trace!(
                session = %self.id,
                index = record.index,
                "discarding record after close"
            );
            return false;
        };
        if events.send(SessionEvent::Record(record)).is_err() {
            return false;
        }
        gate.records += 1;
        true
    }

    /// Report a malformed line on the diagnostics channel.
    pub(crate) fn report_malformed(&self, line: MalformedLine) {
        let gate = lock(&self.gate);
        if let Some(diagnostics) = &gate.diagnostics {
            // The consumer may have dropped the diagnostics receiver.
            let _ = diagnostics.send(line);
        }
    }

    /// Records delivered so far.
    pub(crate) fn records(&self) -> u64 {
        lock(&self.gate).records
    }

    pub(crate) fn is_open(&self) -> bool {
        lock(&self.gate).events.is_some()
    }

    /// Deliver the terminal event and close the gate. No-op when already
    /// closed.
    pub(crate) fn close(&self, end: SessionEnd) -> bool {
        let mut gate = lock(&self.gate);
        gate.diagnostics = None;
        match gate.events.take() {
            Some(events) => {
                let _ = events.send(SessionEvent::End(end));
                true
            }
            None => false,
        }
    }

    /// Stop the session: close the gate with a stop signal and abort the
    /// read loop. No-op when already closed.
    pub(crate) fn cancel(&self, reason: StopReason) {
        if self.close(SessionEnd::Stopped(reason)) {
            tracing::debug!(session = %self.id, ?reason, "stream session stopped");
        }
        self.token.cancel();
    }
}

/// Lock ignoring poison: gate updates are single assignments that cannot be
/// observed half-done.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Consumer handle of one streaming request.
///
/// Records arrive through [`next_event`](Self::next_event) in stream order,
/// followed by exactly one [`SessionEvent::End`]. Lines that failed to
/// decode arrive separately through
/// [`next_diagnostic`](Self::next_diagnostic).
///
/// Dropping the handle cancels the session.
pub struct StreamSession {
    shared: Arc<SessionShared>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    diagnostics: mpsc::UnboundedReceiver<MalformedLine>,
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.shared.id)
            .field("open", &self.shared.is_open())
            .finish_non_exhaustive()
    }
}

impl StreamSession {
    pub(crate) fn new(
        shared: Arc<SessionShared>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        diagnostics: mpsc::UnboundedReceiver<MalformedLine>,
    ) -> Self {
        Self {
            shared,
            events,
            diagnostics,
        }
    }

    /// This session's ownership token.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    /// Whether the session can still deliver records.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Wait for the next event. Returns `None` after the terminal event.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Wait for the next malformed-line report. Returns `None` once the
    /// session has ended and all reports were taken.
    pub async fn next_diagnostic(&mut self) -> Option<MalformedLine> {
        self.diagnostics.recv().await
    }

    /// Take a malformed-line report if one is ready.
    pub fn try_next_diagnostic(&mut self) -> Option<MalformedLine> {
        self.diagnostics.try_recv().ok()
    }

    /// Cancel the session. The consumer receives
    /// `SessionEnd::Stopped(StopReason::Cancelled)` unless the session had
    /// already ended.
    pub fn cancel(&self) {
        self.shared.cancel(StopReason::Cancelled);
    }

    /// Turn the session into a [`Stream`] of events. Diagnostics are
    /// discarded.
    pub fn into_events(self) -> impl Stream<Item = SessionEvent> + Send {
        futures::stream::unfold(self, |mut session| async move {
            let event = session.next_event().await?;
            Some((event, session))
        })
    }

    /// Drain the session to its end.
    pub async fn collect(mut self) -> CollectedSession {
        let mut records = Vec::new();
        let mut end = None;
        while let Some(event) = self.next_event().await {
            match event {
                SessionEvent::Record(record) => records.push(record),
                SessionEvent::End(e) => {
                    end = Some(e);
                    break;
                }
            }
        }

        let mut malformed = Vec::new();
        while let Some(line) = self.try_next_diagnostic() {
            malformed.push(line);
        }

        CollectedSession {
            records,
            malformed,
            end,
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.shared.cancel(StopReason::Cancelled);
    }
}
