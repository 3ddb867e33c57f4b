use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{BroadcastMessage, Payload, PresenceMessage, SendMessage};

/// The hub's view of one connection.
///
/// `queue` is the only strong sender of the connection's outbound queue, so
/// dropping the member is what closes the queue and ends its writer.
/// `released` fires at the same moment (sent on removal, or dropped on
/// shutdown), which the session watches to stop a writer stuck on a slow peer.
pub struct Member {
    pub conn_id: Uuid,
    pub user_id: i64,
    pub note_id: i64,
    pub queue: mpsc::Sender<Payload>,
    pub released: oneshot::Sender<()>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub rooms: usize,
    pub connections: usize,
}

enum HubEvent {
    Register(Member),
    Unregister { note_id: i64, conn_id: Uuid },
    Broadcast(BroadcastMessage),
    Presence { note_id: i64, reply: oneshot::Sender<usize> },
    Stats(oneshot::Sender<HubStats>),
    Shutdown(oneshot::Sender<()>),
}

/// Cheap, cloneable entry point to the hub worker.
///
/// Every call enqueues an event; the worker applies them one at a time in
/// arrival order. Calls made after the worker stopped are dropped.
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::UnboundedSender<HubEvent>,
}

impl HubHandle {
    pub fn register(&self, member: Member) {
        self.submit(HubEvent::Register(member));
    }

    pub fn unregister(&self, note_id: i64, conn_id: Uuid) {
        self.submit(HubEvent::Unregister { note_id, conn_id });
    }

    pub fn broadcast(&self, note_id: i64, payload: Payload) {
        self.submit(HubEvent::Broadcast(BroadcastMessage { note_id, payload }));
    }

    /// Current member count of a room, 0 when absent or when the hub is stopped.
    pub async fn presence(&self, note_id: i64) -> usize {
        let (reply, rx) = oneshot::channel();
        self.submit(HubEvent::Presence { note_id, reply });
        rx.await.unwrap_or(0)
    }

    pub async fn stats(&self) -> HubStats {
        let (reply, rx) = oneshot::channel();
        self.submit(HubEvent::Stats(reply));
        rx.await.unwrap_or_default()
    }

    /// Stop the worker after it has applied everything enqueued so far, then
    /// close every member queue.
    pub async fn shutdown(&self) {
        let (ack, rx) = oneshot::channel();
        self.submit(HubEvent::Shutdown(ack));
        if rx.await.is_err() {
            debug!("Hub already stopped");
        }
    }

    fn submit(&self, event: HubEvent) {
        if self.events.send(event).is_err() {
            debug!("Hub is stopped, dropping event");
        }
    }
}

/// Sole owner of room membership. Runs on a single task; nothing else ever
/// touches `rooms`, so no lock is needed.
pub struct Hub {
    rooms: HashMap<i64, HashMap<Uuid, Member>>,
    events: mpsc::UnboundedReceiver<HubEvent>,
}

impl Hub {
    /// Spawn the worker and return a handle to it.
    pub fn start() -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Hub {
            rooms: HashMap::new(),
            events: rx,
        };
        let worker = tokio::spawn(hub.run());
        (HubHandle { events: tx }, worker)
    }

    async fn run(mut self) {
        info!("Hub worker started");

        while let Some(event) = self.events.recv().await {
            match event {
                HubEvent::Register(member) => self.register(member),
                HubEvent::Unregister { note_id, conn_id } => self.unregister(note_id, conn_id),
                HubEvent::Broadcast(msg) => self.broadcast(msg),
                HubEvent::Presence { note_id, reply } => {
                    let _ = reply.send(self.rooms.get(&note_id).map_or(0, |room| room.len()));
                }
                HubEvent::Stats(reply) => {
                    let _ = reply.send(self.stats());
                }
                HubEvent::Shutdown(ack) => {
                    self.events.close();
                    self.close_all();
                    let _ = ack.send(());
                    break;
                }
            }
        }

        self.close_all();
        info!("Hub worker stopped");
    }

    fn register(&mut self, member: Member) {
        let note_id = member.note_id;
        debug!(
            "Connection {} (user {}) joined note {}",
            member.conn_id, member.user_id, note_id
        );
        self.rooms.entry(note_id).or_default().insert(member.conn_id, member);
        self.broadcast_presence(note_id);
    }

    fn unregister(&mut self, note_id: i64, conn_id: Uuid) {
        if self.evict(note_id, conn_id) {
            debug!("Connection {} left note {}", conn_id, note_id);
            self.broadcast_presence(note_id);
        }
    }

    fn broadcast(&mut self, msg: BroadcastMessage) {
        if self.deliver(msg.note_id, &msg.payload) > 0 {
            self.broadcast_presence(msg.note_id);
        }
    }

    /// Send the room's member count to every member. Evictions during the
    /// delivery change the count, so repeat until a round evicts nobody.
    fn broadcast_presence(&mut self, note_id: i64) {
        loop {
            let Some(room) = self.rooms.get(&note_id) else {
                return;
            };
            let presence = SendMessage::Presence(PresenceMessage {
                note_id,
                active_user: room.len(),
            });
            let payload = match presence.encode() {
                Ok(payload) => payload,
                Err(e) => {
                    error!("Failed to encode presence for note {}: {}", note_id, e);
                    return;
                }
            };
            if self.deliver(note_id, &payload) == 0 {
                return;
            }
        }
    }

    /// Non-blocking enqueue to every member of the room. A member whose queue is
    /// full or closed is evicted. Returns how many were evicted.
    fn deliver(&mut self, note_id: i64, payload: &Payload) -> usize {
        let Some(room) = self.rooms.get(&note_id) else {
            return 0;
        };

        let failed: Vec<Uuid> = room
            .values()
            .filter_map(|member| match member.queue.try_send(payload.clone()) {
                Ok(()) => None,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Outbound queue full for connection {} on note {}, evicting",
                        member.conn_id, note_id
                    );
                    Some(member.conn_id)
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(
                        "Outbound queue closed for connection {} on note {}, evicting",
                        member.conn_id, note_id
                    );
                    Some(member.conn_id)
                }
            })
            .collect();

        for conn_id in &failed {
            self.evict(note_id, *conn_id);
        }
        failed.len()
    }

    /// The one removal path shared by explicit leaves and delivery failures.
    /// Dropping the member closes its queue; an emptied room is deleted.
    fn evict(&mut self, note_id: i64, conn_id: Uuid) -> bool {
        let Some(room) = self.rooms.get_mut(&note_id) else {
            return false;
        };
        let removed = match room.remove(&conn_id) {
            Some(member) => {
                let _ = member.released.send(());
                true
            }
            None => false,
        };
        if room.is_empty() {
            self.rooms.remove(&note_id);
            debug!("Room for note {} closed", note_id);
        }
        removed
    }

    fn close_all(&mut self) {
        let stats = self.stats();
        if stats.connections > 0 {
            info!("Closing {} connections across {} rooms", stats.connections, stats.rooms);
        }
        self.rooms.clear();
    }

    fn stats(&self) -> HubStats {
        HubStats {
            rooms: self.rooms.len(),
            connections: self.rooms.values().map(|room| room.len()).sum(),
        }
    }
}
