//! Broadcast hub for real-time subscribers
//!
//! A single task owns the subscriber set. Everything else talks to it
//! through [`HubHandle`], so the monitor loop can broadcast from its own task
//! without touching subscriber connections directly.
//!
//! Each subscriber has a small bounded queue. A broadcast that finds a queue
//! full or closed marks that subscriber, and marked subscribers are removed
//! once the pass over all subscribers is done.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Messages buffered per subscriber before it counts as too slow
pub const SUBSCRIBER_QUEUE: usize = 64;

pub type SubscriberId = Uuid;

/// Serialized JSON text shared by every recipient of one broadcast
pub type Frame = Arc<str>;

enum HubCommand {
    Subscribe {
        tx: mpsc::Sender<Frame>,
        reply: oneshot::Sender<SubscriberId>,
    },
    Unsubscribe(SubscriberId),
    Broadcast(Frame),
    Count(oneshot::Sender<usize>),
}

/// One subscriber's end of the hub
pub struct Subscription {
    pub id: SubscriberId,
    pub rx: mpsc::Receiver<Frame>,
}

/// Cloneable handle to the hub task
#[derive(Clone, Debug)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Start the hub task. It ends when every handle has been dropped.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(rx));
        (Self { tx }, task)
    }

    /// Register a new subscriber; `None` if the hub has stopped
    pub async fn subscribe(&self) -> Option<Subscription> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let (reply, id) = oneshot::channel();
        self.tx.send(HubCommand::Subscribe { tx, reply }).ok()?;
        let id = id.await.ok()?;
        Some(Subscription { id, rx })
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        let _ = self.tx.send(HubCommand::Unsubscribe(id));
    }

    /// Queue `message` for every current subscriber; never blocks
    pub fn broadcast<T: Serialize>(&self, message: &T) {
        match serde_json::to_string(message) {
            Ok(text) => self.broadcast_text(text),
            Err(e) => warn!("Dropping unserializable broadcast: {}", e),
        }
    }

    pub fn broadcast_text(&self, text: String) {
        let _ = self.tx.send(HubCommand::Broadcast(Frame::from(text)));
    }

    pub async fn subscriber_count(&self) -> usize {
        let (reply, count) = oneshot::channel();
        if self.tx.send(HubCommand::Count(reply)).is_err() {
            return 0;
        }
        count.await.unwrap_or(0)
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<HubCommand>) {
    let mut subscribers: HashMap<SubscriberId, mpsc::Sender<Frame>> = HashMap::new();

    while let Some(command) = rx.recv().await {
        match command {
            HubCommand::Subscribe { tx, reply } => {
                let id = Uuid::new_v4();
                subscribers.insert(id, tx);
                info!("Subscriber {} connected (total: {})", id, subscribers.len());
                let _ = reply.send(id);
            }
            HubCommand::Unsubscribe(id) => {
                if subscribers.remove(&id).is_some() {
                    info!("Subscriber {} disconnected (total: {})", id, subscribers.len());
                }
            }
            HubCommand::Broadcast(frame) => {
                let failed: Vec<SubscriberId> = subscribers
                    .iter()
                    .filter(|(_, tx)| tx.try_send(frame.clone()).is_err())
                    .map(|(id, _)| *id)
                    .collect();

                for id in failed {
                    subscribers.remove(&id);
                    warn!("Dropped subscriber {} after failed delivery", id);
                }
            }
            HubCommand::Count(reply) => {
                let _ = reply.send(subscribers.len());
            }
        }
    }

    debug!("Broadcast hub stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_broadcast_reaches_every_subscriber() {
        let (hub, _task) = HubHandle::spawn();
        let mut a = hub.subscribe().await.unwrap();
        let mut b = hub.subscribe().await.unwrap();

        hub.broadcast(&json!({"type": "button", "station": 23}));

        let got_a = a.rx.recv().await.unwrap();
        let got_b = b.rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&got_a).unwrap();
        assert_eq!(value["station"], 23);
        assert_eq!(got_a, got_b);
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_pruned() {
        let (hub, _task) = HubHandle::spawn();
        let keep = hub.subscribe().await.unwrap();
        let gone = hub.subscribe().await.unwrap();
        drop(gone.rx);
        assert_eq!(hub.subscriber_count().await, 2);

        hub.broadcast_text("{}".into());
        assert_eq!(hub.subscriber_count().await, 1);
        drop(keep);
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_dropped() {
        let (hub, _task) = HubHandle::spawn();
        let _slow = hub.subscribe().await.unwrap();

        for i in 0..=SUBSCRIBER_QUEUE {
            hub.broadcast(&json!({ "n": i }));
        }
        assert_eq!(hub.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let (hub, _task) = HubHandle::spawn();
        let sub = hub.subscribe().await.unwrap();
        hub.unsubscribe(sub.id);
        assert_eq!(hub.subscriber_count().await, 0);
    }
}
