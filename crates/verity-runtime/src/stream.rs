//! # Streaming Protocol
//!
//! [`StreamEmitter`] is owned by the query task and is the only way events
//! reach the caller. It enforces the wire ordering by construction:
//!
//! - `token` events produced before `metadata` are buffered and flushed
//!   right after it;
//! - exactly one terminal event (`done` or `error`) is sent;
//! - everything after the terminal event is discarded.
//!
//! [`with_keepalive`] and [`Heartbeat`] race pending calls against an
//! interval timer so that long upstream calls still produce traffic.

use std::{future::Future, time::Duration};

use tokio::{
    sync::mpsc,
    time::{Instant, Interval, MissedTickBehavior},
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use verity_core::types::{
    AgentEventStream, PhaseStatus, PipelinePhase, ResponseMetadata, SessionId, StreamEvent,
};

/// Ordered, single-terminal event writer.
#[derive(Debug)]
pub struct StreamEmitter {
    tx: Option<mpsc::UnboundedSender<StreamEvent>>,
    pending_tokens: Vec<String>,
    metadata_sent: bool,
    closed: bool,
}

impl StreamEmitter {
    /// Emitter wired to a fresh event stream.
    #[must_use]
    pub fn channel() -> (Self, AgentEventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::with_sender(Some(tx)), Box::pin(UnboundedReceiverStream::new(rx)))
    }

    /// Emitter that discards everything; used by the non-streaming path.
    #[must_use]
    pub fn detached() -> Self {
        Self::with_sender(None)
    }

    fn with_sender(tx: Option<mpsc::UnboundedSender<StreamEvent>>) -> Self {
        Self { tx, pending_tokens: Vec::new(), metadata_sent: false, closed: false }
    }

    /// Whether a terminal event was sent or the receiver went away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn phase(&mut self, phase: PipelinePhase, status: PhaseStatus) {
        self.send(StreamEvent::Phase { phase, status });
    }

    pub fn keepalive(&mut self, stage: &str, elapsed_seconds: u64) {
        self.send(StreamEvent::Keepalive { phase: stage.to_string(), elapsed_seconds });
    }

    /// Sends `metadata` once, then flushes any buffered tokens.
    pub fn metadata(&mut self, metadata: ResponseMetadata) {
        if self.metadata_sent {
            tracing::warn!("duplicate metadata event dropped");
            return;
        }
        self.metadata_sent = true;
        self.send(StreamEvent::Metadata(metadata));
        for text in std::mem::take(&mut self.pending_tokens) {
            self.send(StreamEvent::Token { text });
        }
    }

    pub fn token(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        if self.metadata_sent {
            self.send(StreamEvent::Token { text });
        } else if !self.closed {
            self.pending_tokens.push(text);
        }
    }

    pub fn done(&mut self, session_id: SessionId, execution_time_ms: u64) {
        if !self.metadata_sent && !self.pending_tokens.is_empty() {
            tracing::warn!(
                dropped = self.pending_tokens.len(),
                "stream finished without metadata, dropping buffered tokens"
            );
        }
        self.send(StreamEvent::Done { session_id, execution_time_ms });
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.send(StreamEvent::Error { message: message.into() });
    }

    fn send(&mut self, event: StreamEvent) {
        if self.closed {
            return;
        }
        if event.is_terminal() {
            self.closed = true;
            self.pending_tokens.clear();
        }
        if let Some(tx) = &self.tx
            && tx.send(event).is_err()
        {
            tracing::debug!("stream receiver dropped");
            self.closed = true;
        }
    }
}

/// Keepalive timer scoped to one stage.
///
/// Each [`Heartbeat::guard`] races a pending call against the timer; elapsed
/// seconds are counted from the stage start, across calls. Stages that write
/// to the emitter between awaits (the synthesizer) guard each await instead of
/// wrapping the whole stage.
#[derive(Debug)]
pub struct Heartbeat {
    stage: &'static str,
    start: Instant,
    ticker: Option<Interval>,
}

impl Heartbeat {
    /// A zero `interval` disables keepalives.
    #[must_use]
    pub fn new(stage: &'static str, interval: Duration) -> Self {
        let start = Instant::now();
        let ticker = (!interval.is_zero()).then(|| {
            let mut ticker = tokio::time::interval_at(start + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        Self { stage, start, ticker }
    }

    /// Await `fut`, emitting a `keepalive` on every tick while it is pending.
    pub async fn guard<F>(&mut self, emitter: &mut StreamEmitter, fut: F) -> F::Output
    where
        F: Future,
    {
        let Some(ticker) = self.ticker.as_mut() else {
            return fut.await;
        };
        tokio::pin!(fut);

        loop {
            tokio::select! {
                biased;
                output = &mut fut => return output,
                _ = ticker.tick() => {
                    emitter.keepalive(self.stage, self.start.elapsed().as_secs());
                }
            }
        }
    }

    /// Push the next tick a full interval out; called when real traffic was sent.
    pub fn reset(&mut self) {
        if let Some(ticker) = self.ticker.as_mut() {
            ticker.reset();
        }
    }
}

/// Await `fut`, emitting a `keepalive` every `interval` while it is pending.
///
/// The timer lives only as long as this call, so no keepalive can follow the
/// stage's completion.
pub async fn with_keepalive<F>(
    emitter: &mut StreamEmitter,
    stage: &'static str,
    interval: Duration,
    fut: F,
) -> F::Output
where
    F: Future,
{
    Heartbeat::new(stage, interval).guard(emitter, fut).await
}

/// Render one event as a Server-Sent Events frame.
pub fn to_sse_frame(event: &StreamEvent) -> Result<String, serde_json::Error> {
    let data = serde_json::to_string(event)?;
    Ok(format!("event: {}\ndata: {data}\n\n", event.kind()))
}
