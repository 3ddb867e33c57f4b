use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::hub::{HubHandle, Member};
use super::msg_patch_handler::handle_patch_message;
use crate::db::NoteStore;
use crate::models::{
    Payload, ReceivedMessage, SendMessage, ERR_INVALID_FORMAT, ERR_NOTE_MISMATCH, ERR_UNSUPPORTED,
};

// Time a finished session gives its writer to flush and send Close.
const WRITER_GRACE: Duration = Duration::from_secs(1);

/// One authenticated socket session bound to a single note.
pub struct Connection {
    pub id: Uuid,
    pub user_id: i64,
    pub note_id: i64,
    pub(crate) hub: HubHandle,
    pub(crate) notes: Arc<dyn NoteStore>,
    // Weak, so the hub's sender is the only thing keeping the queue open.
    outbound: mpsc::WeakSender<Payload>,
}

/// Session side of the channels shared with the hub's [`Member`].
pub struct Outbound {
    pub frames: mpsc::Receiver<Payload>,
    /// Resolves once the hub removes or drops the member.
    pub released: oneshot::Receiver<()>,
}

impl Connection {
    /// Create a connection with an outbound queue of `capacity` frames.
    ///
    /// Returns the connection (reader side), the member to register with the
    /// hub, and the receiving ends for the session.
    pub fn new(
        user_id: i64,
        note_id: i64,
        hub: HubHandle,
        notes: Arc<dyn NoteStore>,
        capacity: usize,
    ) -> (Self, Member, Outbound) {
        let (queue, frames) = mpsc::channel(capacity.max(1));
        let (released, on_release) = oneshot::channel();
        let id = Uuid::new_v4();
        let conn = Connection {
            id,
            user_id,
            note_id,
            hub,
            notes,
            outbound: queue.downgrade(),
        };
        let member = Member {
            conn_id: id,
            user_id,
            note_id,
            queue,
            released,
        };
        let outbound = Outbound {
            frames,
            released: on_release,
        };
        (conn, member, outbound)
    }

    /// Reader flow. Returns when the transport closes or fails; the connection
    /// is unregistered from the hub exactly once on the way out.
    pub async fn read_loop<S, E>(&self, mut stream: S)
    where
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let _registration = Registration {
            hub: &self.hub,
            note_id: self.note_id,
            conn_id: self.id,
        };

        while let Some(frame) = stream.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        self.reply_error(ERR_INVALID_FORMAT);
                        continue;
                    }
                },
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(Message::Close(_)) => {
                    debug!("Connection {} closed by peer", self.id);
                    break;
                }
                Err(e) => {
                    debug!("Read error on connection {}: {}", self.id, e);
                    break;
                }
            };
            self.handle_frame(&text).await;
        }
    }

    async fn handle_frame(&self, text: &str) {
        let msg: ReceivedMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(
                    "Failed to parse message on note {} from user {}: {}",
                    self.note_id, self.user_id, e
                );
                self.reply_error(ERR_INVALID_FORMAT);
                return;
            }
        };

        if let Some(note_id) = msg.note_id() {
            if note_id != self.note_id {
                warn!(
                    "User {} sent a frame for note {} on note {}",
                    self.user_id, note_id, self.note_id
                );
                self.reply_error(ERR_NOTE_MISMATCH);
                return;
            }
        }

        match msg {
            ReceivedMessage::Patch(patch_msg) => handle_patch_message(patch_msg, self).await,
            ReceivedMessage::Unsupported => self.reply_error(ERR_UNSUPPORTED),
        }
    }

    /// Queue an `error` frame for this connection only. Dropped when the
    /// queue is full or already closed.
    pub(crate) fn reply_error(&self, error: &str) {
        let payload = match SendMessage::error(self.note_id, error).encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode error frame: {}", e);
                return;
            }
        };
        let Some(queue) = self.outbound.upgrade() else {
            return;
        };
        if queue.try_send(payload).is_err() {
            debug!("Dropping error reply for connection {}", self.id);
        }
    }
}

/// Hub membership held by a running reader. Dropping it, on any exit path
/// including cancellation by the session, submits the single `Unregister`.
struct Registration<'a> {
    hub: &'a HubHandle,
    note_id: i64,
    conn_id: Uuid,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.hub.unregister(self.note_id, self.conn_id);
    }
}

/// Writer flow. Drains the queue in order until it is closed or a write
/// fails, then closes the transport.
pub async fn write_loop<W>(mut sink: W, mut outbound: mpsc::Receiver<Payload>, conn_id: Uuid)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    while let Some(payload) = outbound.recv().await {
        if let Err(e) = sink.send(Message::Text(payload.to_string())).await {
            debug!("Write error on connection {}: {}", conn_id, e);
            break;
        }
    }
    drop(outbound);
    let _ = sink.close().await;
}

/// Register the connection and run both flows until the session ends.
pub async fn serve_socket(socket: WebSocket, conn: Connection, member: Member, outbound: Outbound) {
    info!(
        "WebSocket connection {} established for note {} (user {})",
        conn.id, conn.note_id, conn.user_id
    );
    let (sink, stream) = socket.split();
    run_session(stream, sink, conn, member, outbound).await;
}

/// Run the reader and writer flows for a registered connection.
///
/// The session ends as soon as one of three things happens: the reader sees
/// the transport close, the writer stops, or the hub drops the member. The
/// reader is dropped at that point so nothing more is read or saved, and its
/// registration submits the single `Unregister`.
pub async fn run_session<S, E, W>(
    stream: S,
    sink: W,
    conn: Connection,
    member: Member,
    outbound: Outbound,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display + Send,
{
    let Outbound {
        frames,
        mut released,
    } = outbound;
    conn.hub.register(member);

    let mut writer = tokio::spawn(write_loop(sink, frames, conn.id));

    let writer_done = tokio::select! {
        biased;
        _ = &mut released => {
            debug!("Connection {} released by the hub", conn.id);
            false
        }
        result = &mut writer => {
            if let Err(e) = result {
                error!("Writer task for connection {} failed: {}", conn.id, e);
            }
            true
        }
        _ = conn.read_loop(stream) => false,
    };

    if !writer_done {
        match tokio::time::timeout(WRITER_GRACE, &mut writer).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Writer task for connection {} failed: {}", conn.id, e),
            Err(_) => {
                debug!("Writer for connection {} is stuck on the peer, aborting", conn.id);
                writer.abort();
            }
        }
    }
    info!("WebSocket connection {} terminated", conn.id);
}
