//! Cancellable Chat Request
//!
//! A [`ChatStream`] is the consumer side of one in-flight chat request: a
//! pull-based sequence of [`StreamEvent`]s fed by a background reader task.
//!
//! # Cancellation
//!
//! [`ChatStream::cancel`] and [`CancelHandle::cancel`] are synchronous and
//! idempotent. Once either returns, the stream yields no further events,
//! even ones the reader already decoded and queued. The reader task stops
//! mid-read and drops the response body, which aborts the transfer.
//!
//! # Reader
//!
//! ```text
//! body chunks ──► FrameAssembler ──► StreamParser ──► [cancel gate] ──► mpsc ──► ChatStream
//! ```
//!
//! The reader stops after the first terminal event. A body that ends
//! without one closes the stream with no synthetic event.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::frame::FrameAssembler;
use super::parser::{ChatProtocol, StreamParser};
use crate::domain::conversation::{AssistantReply, StreamEvent};
use crate::infrastructure::metrics::{self, ChatOutcome};

/// Events buffered between the reader and the consumer.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

// =============================================================================
// Cancel Handle
// =============================================================================

/// Cloneable cancellation handle for one chat request.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
    settled: Arc<AtomicBool>,
}

impl CancelHandle {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            settled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop delivery. No-op if already cancelled.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!(settled = self.is_settled(), "Cancelling chat request");
            self.token.cancel();
        }
    }

    /// Whether `cancel` has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the reader has finished, for any reason.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// Whether the request is still streaming and not cancelled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.is_settled() && !self.is_cancelled()
    }
}

// =============================================================================
// Chat Stream
// =============================================================================

/// Ordered, cancellable sequence of events for one chat request.
///
/// Dropping the stream cancels the request.
#[derive(Debug)]
pub struct ChatStream {
    id: Uuid,
    events: mpsc::Receiver<StreamEvent>,
    handle: CancelHandle,
    finished: bool,
}

impl ChatStream {
    /// Decode an already-open response body.
    ///
    /// Must be called within a Tokio runtime.
    pub fn from_body<S, B, E>(body: S, protocol: ChatProtocol) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        Self::spawn(protocol, DEFAULT_EVENT_CAPACITY, async move {
            Ok::<_, String>(body)
        })
    }

    /// Start a reader for the body `open` resolves to.
    ///
    /// If `open` fails, its message is delivered as a terminal error event.
    pub(crate) fn spawn<F, S, B, E>(protocol: ChatProtocol, capacity: usize, open: F) -> Self
    where
        F: Future<Output = Result<S, String>> + Send + 'static,
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let id = Uuid::new_v4();
        let handle = CancelHandle::new();
        let (tx, events) = mpsc::channel(capacity.max(1));

        let token = handle.token.clone();
        let settled = Arc::clone(&handle.settled);
        let span = tracing::info_span!("chat_stream", request_id = %id, protocol = ?protocol);

        tokio::spawn(
            async move {
                let outcome = tokio::select! {
                    biased;
                    () = token.cancelled() => ChatOutcome::Cancelled,
                    outcome = read_body(open, protocol, &tx, &token) => outcome,
                };
                settled.store(true, Ordering::Release);
                metrics::record_chat_outcome(protocol.metric_protocol(), outcome);
                tracing::debug!(?outcome, "Chat stream settled");
            }
            .instrument(span),
        );

        Self {
            id,
            events,
            handle,
            finished: false,
        }
    }

    /// Request identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Stop delivery. See [`CancelHandle::cancel`].
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Handle that can cancel this stream from elsewhere.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    /// Drain the stream into a reply.
    ///
    /// A cancelled stream yields a [`ReplyState::Cancelled`] reply unless a
    /// terminal event was consumed first.
    ///
    /// [`ReplyState::Cancelled`]: crate::domain::conversation::ReplyState::Cancelled
    pub async fn into_reply(mut self) -> AssistantReply {
        let mut reply = AssistantReply::new();
        while let Some(event) = self.next().await {
            reply.apply(&event);
        }
        if self.handle.is_cancelled() {
            reply.mark_cancelled();
        }
        reply
    }
}

impl Stream for ChatStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        if self.handle.is_cancelled() {
            self.finished = true;
            self.events.close();
            return Poll::Ready(None);
        }

        match self.events.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        self.handle.token.cancel();
    }
}

// =============================================================================
// Reader
// =============================================================================

async fn read_body<F, S, B, E>(
    open: F,
    protocol: ChatProtocol,
    tx: &mpsc::Sender<StreamEvent>,
    token: &CancellationToken,
) -> ChatOutcome
where
    F: Future<Output = Result<S, String>>,
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let body = match open.await {
        Ok(body) => body,
        Err(message) => {
            tracing::warn!(error = %message, "Chat request failed");
            deliver(tx, token, StreamEvent::Error(message)).await;
            return ChatOutcome::Failed;
        }
    };
    let mut body = std::pin::pin!(body);

    let mut assembler = FrameAssembler::new();
    let mut parser = StreamParser::new(protocol);

    while let Some(chunk) = body.next().await {
        let frames = match chunk {
            Ok(bytes) => assembler.push(bytes.as_ref()),
            Err(e) => {
                let message = format!("stream interrupted: {e}");
                tracing::warn!(error = %message, "Chat stream failed mid-read");
                deliver(tx, token, StreamEvent::Error(message)).await;
                return ChatOutcome::Failed;
            }
        };

        for frame in frames {
            let Some(event) = parser.accept(&frame) else {
                continue;
            };
            let outcome = match &event {
                StreamEvent::Done => Some(ChatOutcome::Completed),
                StreamEvent::Error(_) => Some(ChatOutcome::Failed),
                _ => None,
            };
            if !deliver(tx, token, event).await {
                return ChatOutcome::Cancelled;
            }
            if let Some(outcome) = outcome {
                return outcome;
            }
        }
    }

    let leftover = assembler.finish();
    if leftover > 0 {
        tracing::debug!(leftover_bytes = leftover, "Discarding partial frame at end of body");
    }
    tracing::debug!("Chat body ended without a terminal event");
    ChatOutcome::Truncated
}

/// Forward one event unless the request was cancelled. Returns `false` if
/// the consumer is gone.
async fn deliver(
    tx: &mpsc::Sender<StreamEvent>,
    token: &CancellationToken,
    event: StreamEvent,
) -> bool {
    if token.is_cancelled() {
        return false;
    }
    tx.send(event).await.is_ok()
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::time::Duration;

    use futures::channel::mpsc as chunk_channel;

    use super::*;
    use crate::domain::conversation::ReplyState;

    type Chunk = Result<Vec<u8>, io::Error>;

    fn text(content: &str) -> Vec<u8> {
        format!("data: {{\"type\":\"text\",\"content\":\"{content}\"}}\n\n").into_bytes()
    }

    fn done() -> Vec<u8> {
        b"data: {\"type\":\"done\"}\n\n".to_vec()
    }

    fn body_of(chunks: Vec<Chunk>) -> impl Stream<Item = Chunk> + Send + 'static {
        futures::stream::iter(chunks)
    }

    async fn settle(handle: &CancelHandle) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !handle.is_settled() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn delivers_events_in_order() {
        let stream = ChatStream::from_body(
            body_of(vec![
                Ok(b"data: {\"type\":\"status\",\"message\":\"Fetching prices...\"}\n\n".to_vec()),
                Ok(text("Hel")),
                Ok(text("lo")),
                Ok(done()),
            ]),
            ChatProtocol::Chat,
        );

        let events: Vec<StreamEvent> = stream.collect().await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Status("Fetching prices...".into()),
                StreamEvent::TextDelta("Hel".into()),
                StreamEvent::TextDelta("lo".into()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn cancel_suppresses_in_flight_events() {
        let (chunks, body) = chunk_channel::unbounded::<Chunk>();
        let mut stream = ChatStream::from_body(body, ChatProtocol::Chat);

        chunks.unbounded_send(Ok(text("Hel"))).unwrap();
        chunks.unbounded_send(Ok(text("lo"))).unwrap();

        let mut reply = AssistantReply::new();
        for _ in 0..2 {
            reply.apply(&stream.next().await.unwrap());
        }

        // Let the reader decode and queue "!" before cancelling
        chunks.unbounded_send(Ok(text("!"))).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        stream.cancel();
        assert!(stream.next().await.is_none());

        reply.mark_cancelled();
        assert_eq!(reply.render(), "Hello");
        assert_eq!(reply.state(), ReplyState::Cancelled);
    }

    #[tokio::test]
    async fn cancel_before_first_read_yields_nothing() {
        let stream = ChatStream::from_body(
            body_of(vec![Ok(text("a")), Ok(text("b")), Ok(done())]),
            ChatProtocol::Chat,
        );
        let handle = stream.cancel_handle();
        tokio::time::sleep(Duration::from_millis(20)).await;

        handle.cancel();
        handle.cancel();

        let reply = stream.into_reply().await;
        assert_eq!(reply.content(), "");
        assert_eq!(reply.state(), ReplyState::Cancelled);
    }

    #[tokio::test]
    async fn malformed_frame_between_valid_frames_is_skipped() {
        let stream = ChatStream::from_body(
            body_of(vec![
                Ok(text("a")),
                Ok(b"data: {not json\n\n".to_vec()),
                Ok(text("b")),
                Ok(done()),
            ]),
            ChatProtocol::Chat,
        );

        let reply = stream.into_reply().await;
        assert_eq!(reply.content(), "ab");
        assert_eq!(reply.state(), ReplyState::Complete);
    }

    #[tokio::test]
    async fn frames_after_terminal_event_are_not_delivered() {
        let mut body = text("a");
        body.extend(done());
        body.extend(text("late"));
        let stream = ChatStream::from_body(body_of(vec![Ok(body)]), ChatProtocol::Chat);

        let events: Vec<StreamEvent> = stream.collect().await;
        assert_eq!(
            events,
            vec![StreamEvent::TextDelta("a".into()), StreamEvent::Done]
        );
    }

    #[tokio::test]
    async fn network_failure_becomes_terminal_error() {
        let stream = ChatStream::from_body(
            body_of(vec![
                Ok(text("Partial")),
                Err(io::Error::other("connection reset")),
                Ok(text("never")),
            ]),
            ChatProtocol::Chat,
        );

        let reply = stream.into_reply().await;
        assert_eq!(reply.state(), ReplyState::Failed);
        assert_eq!(
            reply.render(),
            "Partial\n\n[Error: stream interrupted: connection reset]"
        );
    }

    #[tokio::test]
    async fn open_failure_becomes_terminal_error() {
        let stream = ChatStream::spawn(ChatProtocol::Chat, 4, async {
            Err::<futures::stream::Empty<Chunk>, _>("HTTP 500: boom".to_string())
        });

        let events: Vec<StreamEvent> = stream.collect().await;
        assert_eq!(events, vec![StreamEvent::Error("HTTP 500: boom".into())]);
    }

    #[tokio::test]
    async fn body_without_terminal_event_just_ends() {
        let stream = ChatStream::from_body(
            body_of(vec![Ok(text("a")), Ok(b"data: {\"type\":\"te".to_vec())]),
            ChatProtocol::Chat,
        );
        let handle = stream.cancel_handle();

        let reply = stream.into_reply().await;
        assert_eq!(reply.content(), "a");
        assert_eq!(reply.state(), ReplyState::Streaming);
        settle(&handle).await;
    }

    #[tokio::test]
    async fn legacy_stream_drops_data_events() {
        let stream = ChatStream::from_body(
            body_of(vec![
                Ok(b"data: {\"type\":\"data\",\"tool_calls\":[]}\n\n".to_vec()),
                Ok(text("hi")),
                Ok(done()),
            ]),
            ChatProtocol::Legacy,
        );

        let events: Vec<StreamEvent> = stream.collect().await;
        assert_eq!(
            events,
            vec![StreamEvent::TextDelta("hi".into()), StreamEvent::Done]
        );
    }

    #[tokio::test]
    async fn settled_request_is_inactive_and_cancel_is_noop() {
        let stream = ChatStream::from_body(body_of(vec![Ok(done())]), ChatProtocol::Chat);
        let handle = stream.cancel_handle();

        let reply = stream.into_reply().await;
        settle(&handle).await;

        assert!(!handle.is_active());
        handle.cancel();
        assert_eq!(reply.state(), ReplyState::Complete);
    }

    #[tokio::test]
    async fn pending_consumer_ends_once_cancelled() {
        let (_chunks, body) = chunk_channel::unbounded::<Chunk>();
        let stream = ChatStream::from_body(body, ChatProtocol::Chat);
        let handle = stream.cancel_handle();
        let mut stream = tokio_test::task::spawn(stream);

        tokio_test::assert_pending!(stream.poll_next());
        handle.cancel();
        tokio_test::assert_ready_eq!(stream.poll_next(), None);
    }

    #[tokio::test]
    async fn dropping_stream_cancels_reader() {
        let (_chunks, body) = chunk_channel::unbounded::<Chunk>();
        let stream = ChatStream::from_body(body, ChatProtocol::Chat);
        let handle = stream.cancel_handle();
        assert!(handle.is_active());

        drop(stream);
        assert!(handle.is_cancelled());
        settle(&handle).await;
    }
}
