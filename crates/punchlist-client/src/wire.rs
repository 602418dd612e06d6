//! Default wire transport: newline-delimited JSON frames over any async
//! byte stream.
//!
//! One stream carries both directions of traffic. The client writes
//! [`Request`] frames tagged with a sequence number; the server answers with
//! [`ServerFrame::Response`] carrying the same number, and may push
//! [`ServerFrame::Event`] frames at any time, including between a request
//! and its response. The server pushes events unconditionally for the life
//! of the connection — ordering across responses and events is preserved
//! because everything rides one stream.
//!
//! A single demux task owns the read half: it routes responses to their
//! waiting requesters and forwards events into the update queue that
//! [`Channel::subscribe_updates`] hands out. When the stream ends, every
//! in-flight request fails with a closed-channel error and the update
//! stream terminates.
//!
//! [`WireChannel::connect`] wraps a TCP stream; [`WireChannel::from_stream`]
//! accepts any `AsyncRead + AsyncWrite` (in-memory duplex pipes in tests).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use punchlist_types::{ChangeEvent, ItemId, TaskItem};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, trace, warn};

use crate::channel::{Channel, ChannelError, TransportError, UpdateStream};
use crate::constants::MAX_FRAME_LEN;

// ============================================================================
// Protocol frames
// ============================================================================

/// One request issued by the client. `seq` correlates the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub seq: u64,
    #[serde(flatten)]
    pub op: RequestOp,
}

/// The operations a client can ask of the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RequestOp {
    GetSnapshot,
    Create { description: String },
    SetCompleted { id: ItemId },
}

/// One frame sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Answer to the request with the matching `seq`.
    Response { seq: u64, body: ResponseBody },
    /// Server-push change notification; may arrive at any time.
    Event { event: ChangeEvent },
}

/// Response payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseBody {
    Snapshot { items: Vec<TaskItem> },
    Item { item: TaskItem },
    Ack,
    Error { code: ErrorCode, message: String },
}

/// Error discriminants the server can answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    Invalid,
    Internal,
}

// ============================================================================
// WireChannel
// ============================================================================

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Reply slots for in-flight requests, shared with the demux task.
///
/// `closed` and the map live under one lock so that a request registered
/// while the demux task is shutting down is either cleared by it or refused
/// up front — never left waiting forever.
struct Pending {
    state: Mutex<PendingState>,
}

struct PendingState {
    waiters: HashMap<u64, oneshot::Sender<ResponseBody>>,
    closed: bool,
}

impl Pending {
    fn register(&self, seq: u64, reply: oneshot::Sender<ResponseBody>) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::new("connection closed"));
        }
        state.waiters.insert(seq, reply);
        Ok(())
    }

    fn forget(&self, seq: u64) {
        self.state.lock().waiters.remove(&seq);
    }

    fn resolve(&self, seq: u64) -> Option<oneshot::Sender<ResponseBody>> {
        self.state.lock().waiters.remove(&seq)
    }

    /// Mark the connection dead and wake every in-flight request by
    /// dropping its reply slot.
    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.waiters.clear();
    }
}

/// A [`Channel`] over newline-delimited JSON frames.
pub struct WireChannel {
    pending: Arc<Pending>,
    writer: tokio::sync::Mutex<FramedWrite<BoxedWriter, LinesCodec>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<Result<ChangeEvent, TransportError>>>>,
    next_seq: AtomicU64,
    demux: JoinHandle<()>,
}

impl WireChannel {
    /// Open a wire channel over TCP.
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::new(format!("connect to {addr} failed: {e}")))?;
        let _ = stream.set_nodelay(true);
        debug!(%addr, "channel open");
        Ok(Self::from_stream(stream))
    }

    /// Build a wire channel from any byte stream.
    ///
    /// Useful for testing with in-memory duplex pipes.
    pub fn from_stream<S>(io: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        let reader: BoxedReader = Box::new(reader);
        let writer: BoxedWriter = Box::new(writer);

        let frames = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Pending {
            state: Mutex::new(PendingState {
                waiters: HashMap::new(),
                closed: false,
            }),
        });
        let demux = tokio::spawn(run_demux(frames, pending.clone(), event_tx));

        Self {
            pending,
            writer: tokio::sync::Mutex::new(FramedWrite::new(
                writer,
                LinesCodec::new_with_max_length(MAX_FRAME_LEN),
            )),
            events: Mutex::new(Some(event_rx)),
            next_seq: AtomicU64::new(1),
            demux,
        }
    }

    /// Send one request and wait for its correlated response.
    async fn request(&self, op: RequestOp) -> Result<ResponseBody, TransportError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.register(seq, reply_tx)?;

        let line = match serde_json::to_string(&Request { seq, op }) {
            Ok(line) => line,
            Err(e) => {
                self.pending.forget(seq);
                return Err(TransportError::new(format!("encode failed: {e}")));
            }
        };

        let sent = self.writer.lock().await.send(line).await;
        if let Err(e) = sent {
            self.pending.forget(seq);
            return Err(TransportError::new(format!("send failed: {e}")));
        }

        // The demux task drops the slot when the connection dies.
        reply_rx
            .await
            .map_err(|_| TransportError::new("connection closed before response"))
    }
}

impl Drop for WireChannel {
    fn drop(&mut self) {
        self.demux.abort();
    }
}

fn unexpected(expected: &str, got: &ResponseBody) -> TransportError {
    TransportError::new(format!("protocol error: expected {expected}, got {got:?}"))
}

#[async_trait]
impl Channel for WireChannel {
    async fn get_snapshot(&self) -> Result<Vec<TaskItem>, TransportError> {
        match self.request(RequestOp::GetSnapshot).await? {
            ResponseBody::Snapshot { items } => Ok(items),
            ResponseBody::Error { message, .. } => Err(TransportError::new(message)),
            other => Err(unexpected("snapshot", &other)),
        }
    }

    async fn create(&self, description: &str) -> Result<TaskItem, TransportError> {
        let op = RequestOp::Create {
            description: description.to_string(),
        };
        match self.request(op).await? {
            ResponseBody::Item { item } => Ok(item),
            ResponseBody::Error { message, .. } => Err(TransportError::new(message)),
            other => Err(unexpected("item", &other)),
        }
    }

    async fn set_completed(&self, id: ItemId) -> Result<(), ChannelError> {
        match self.request(RequestOp::SetCompleted { id }).await? {
            ResponseBody::Ack => Ok(()),
            ResponseBody::Error {
                code: ErrorCode::NotFound,
                ..
            } => Err(ChannelError::NotFound(id)),
            ResponseBody::Error { message, .. } => {
                Err(TransportError::new(message).into())
            }
            other => Err(unexpected("ack", &other).into()),
        }
    }

    async fn subscribe_updates(&self) -> Result<UpdateStream, TransportError> {
        let rx = self
            .events
            .lock()
            .take()
            .ok_or_else(|| TransportError::new("update stream already claimed"))?;
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

// ============================================================================
// Demux task
// ============================================================================

/// Read frames until the stream ends, routing responses to their waiters and
/// events to the update queue.
async fn run_demux(
    mut frames: FramedRead<BoxedReader, LinesCodec>,
    pending: Arc<Pending>,
    event_tx: mpsc::UnboundedSender<Result<ChangeEvent, TransportError>>,
) {
    loop {
        match frames.next().await {
            Some(Ok(line)) => match serde_json::from_str::<ServerFrame>(&line) {
                Ok(ServerFrame::Response { seq, body }) => match pending.resolve(seq) {
                    Some(tx) => {
                        let _ = tx.send(body);
                    }
                    None => warn!(seq, "response for unknown request"),
                },
                Ok(ServerFrame::Event { event }) => {
                    trace!(kind = event.kind(), id = %event.id(), "event frame");
                    if event_tx.send(Ok(event)).is_err() {
                        trace!("event receiver dropped, discarding");
                    }
                }
                Err(e) => {
                    // Frames are whole lines; one that fails to parse means
                    // the protocol is out of step, not a single bad event
                    // that can be skipped.
                    let _ = event_tx
                        .send(Err(TransportError::new(format!("malformed frame: {e}"))));
                    break;
                }
            },
            Some(Err(e)) => {
                let _ = event_tx.send(Err(TransportError::new(format!("read failed: {e}"))));
                break;
            }
            None => {
                debug!("server closed the connection");
                break;
            }
        }
    }

    pending.close();
}

#[cfg(test)]
mod tests {
    use super::*;

    // The exact frame shapes are the protocol contract a server implements
    // against; pin them down.

    #[test]
    fn request_frame_shape() {
        let req = Request {
            seq: 1,
            op: RequestOp::Create {
                description: "buy milk".into(),
            },
        };
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"seq":1,"op":"create","description":"buy milk"}"#
        );

        let req = Request {
            seq: 2,
            op: RequestOp::GetSnapshot,
        };
        assert_eq!(serde_json::to_string(&req).unwrap(), r#"{"seq":2,"op":"get_snapshot"}"#);
    }

    #[test]
    fn server_frame_shapes_parse() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"frame":"response","seq":3,"body":{"kind":"ack"}}"#).unwrap();
        assert!(matches!(
            frame,
            ServerFrame::Response {
                seq: 3,
                body: ResponseBody::Ack
            }
        ));

        let frame: ServerFrame = serde_json::from_str(
            r#"{"frame":"event","event":{"type":"added","item":{"id":1,"description":"buy milk","completed":false}}}"#,
        )
        .unwrap();
        match frame {
            ServerFrame::Event { event } => {
                assert_eq!(event.id(), ItemId::new(1));
                assert_eq!(event.kind(), "added");
            }
            other => panic!("expected event frame, got {other:?}"),
        }

        let frame: ServerFrame = serde_json::from_str(
            r#"{"frame":"response","seq":4,"body":{"kind":"error","code":"not_found","message":"no such item"}}"#,
        )
        .unwrap();
        assert!(matches!(
            frame,
            ServerFrame::Response {
                body: ResponseBody::Error {
                    code: ErrorCode::NotFound,
                    ..
                },
                ..
            }
        ));
    }
}
