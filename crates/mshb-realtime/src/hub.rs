//! Realtime hub with tokio mpsc command/notification pattern.
//!
//! The hub runs in a dedicated tokio task and owns every topic. Handles
//! talk to it through a typed command channel; each subscription receives
//! its events on its own bounded channel. Commands are processed one at a
//! time, so delivery within a topic is FIFO per sender.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{RealtimeError, Result};
use crate::presence::{PresenceDiff, PresenceTracker};

/// Identifies one subscription inside the hub.
pub type SubscriptionId = u64;

const COMMAND_CAPACITY: usize = 256;
const SUBSCRIPTION_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Command / event types
// ---------------------------------------------------------------------------

/// Commands sent *into* the hub task.
#[derive(Debug)]
pub enum HubCommand {
    Subscribe {
        topic: String,
        client_id: String,
        reply: oneshot::Sender<(SubscriptionId, mpsc::Receiver<RealtimeEvent>)>,
    },
    Unsubscribe {
        topic: String,
        subscription: SubscriptionId,
    },
    /// Deliver to every other subscription of the topic.
    Broadcast {
        topic: String,
        subscription: SubscriptionId,
        event: String,
        payload: Value,
    },
    Track {
        topic: String,
        subscription: SubscriptionId,
        key: String,
        meta: Value,
    },
    Untrack {
        topic: String,
        subscription: SubscriptionId,
    },
    PresenceState {
        topic: String,
        reply: oneshot::Sender<HashMap<String, Vec<Value>>>,
    },
    Shutdown,
}

/// Events delivered *from* the hub to a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Broadcast {
        event: String,
        payload: Value,
        /// Client id of the sending subscription.
        from: String,
    },
    PresenceJoin {
        key: String,
        meta: Value,
    },
    PresenceLeave {
        key: String,
    },
}

struct Subscriber {
    client_id: String,
    tx: mpsc::Sender<RealtimeEvent>,
}

#[derive(Default)]
struct Topic {
    subscribers: HashMap<SubscriptionId, Subscriber>,
    presence: PresenceTracker,
}

impl Topic {
    fn deliver(&self, topic: &str, event: &RealtimeEvent, skip: Option<SubscriptionId>) {
        for (id, sub) in &self.subscribers {
            if Some(*id) == skip {
                continue;
            }
            if let Err(e) = sub.tx.try_send(event.clone()) {
                warn!(
                    topic,
                    subscription = id,
                    client = %sub.client_id,
                    error = %e,
                    "dropping realtime event"
                );
            }
        }
    }

    fn apply_presence(&self, topic: &str, diffs: Vec<PresenceDiff>) {
        for diff in diffs {
            let event = match diff {
                PresenceDiff::Joined { key, meta } => RealtimeEvent::PresenceJoin { key, meta },
                PresenceDiff::Left { key } => RealtimeEvent::PresenceLeave { key },
                PresenceDiff::Unchanged => continue,
            };
            self.deliver(topic, &event, None);
        }
    }
}

// ---------------------------------------------------------------------------
// Hub handle
// ---------------------------------------------------------------------------

/// Cloneable handle to the hub task.
#[derive(Debug, Clone)]
pub struct RealtimeHub {
    cmd_tx: mpsc::Sender<HubCommand>,
}

/// Spawn the hub in a background tokio task.
pub fn spawn_hub() -> RealtimeHub {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HubCommand>(COMMAND_CAPACITY);

    tokio::spawn(async move {
        let mut topics: HashMap<String, Topic> = HashMap::new();
        let mut next_id: SubscriptionId = 1;

        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                HubCommand::Subscribe {
                    topic,
                    client_id,
                    reply,
                } => {
                    let id = next_id;
                    next_id += 1;
                    let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);

                    debug!(topic = %topic, client = %client_id, subscription = id, "subscribed");
                    topics
                        .entry(topic)
                        .or_default()
                        .subscribers
                        .insert(id, Subscriber { client_id, tx });
                    let _ = reply.send((id, rx));
                }

                HubCommand::Unsubscribe {
                    topic,
                    subscription,
                } => {
                    let Some(t) = topics.get_mut(&topic) else {
                        continue;
                    };
                    t.subscribers.remove(&subscription);
                    let diff = t.presence.on_untrack(subscription);
                    t.apply_presence(&topic, vec![diff]);

                    debug!(topic = %topic, subscription, "unsubscribed");
                    if t.subscribers.is_empty() {
                        topics.remove(&topic);
                    }
                }

                HubCommand::Broadcast {
                    topic,
                    subscription,
                    event,
                    payload,
                } => {
                    let Some(t) = topics.get(&topic) else {
                        warn!(topic = %topic, event = %event, "broadcast to unknown topic");
                        continue;
                    };
                    let from = t
                        .subscribers
                        .get(&subscription)
                        .map(|s| s.client_id.clone())
                        .unwrap_or_default();
                    debug!(topic = %topic, event = %event, from = %from, "broadcast");
                    t.deliver(
                        &topic,
                        &RealtimeEvent::Broadcast {
                            event,
                            payload,
                            from,
                        },
                        Some(subscription),
                    );
                }

                HubCommand::Track {
                    topic,
                    subscription,
                    key,
                    meta,
                } => {
                    if let Some(t) = topics.get_mut(&topic) {
                        let diffs = t.presence.on_track(subscription, &key, meta);
                        t.apply_presence(&topic, diffs);
                    }
                }

                HubCommand::Untrack {
                    topic,
                    subscription,
                } => {
                    if let Some(t) = topics.get_mut(&topic) {
                        let diff = t.presence.on_untrack(subscription);
                        t.apply_presence(&topic, vec![diff]);
                    }
                }

                HubCommand::PresenceState { topic, reply } => {
                    let state = topics
                        .get(&topic)
                        .map(|t| t.presence.state())
                        .unwrap_or_default();
                    let _ = reply.send(state);
                }

                HubCommand::Shutdown => {
                    info!("realtime hub shutdown requested");
                    break;
                }
            }
        }

        info!("realtime hub event loop terminated");
    });

    RealtimeHub { cmd_tx }
}

impl RealtimeHub {
    /// Join `topic` as `client_id`.
    pub async fn channel(&self, topic: &str, client_id: &str) -> Result<RealtimeChannel> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(HubCommand::Subscribe {
                topic: topic.to_string(),
                client_id: client_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| RealtimeError::HubClosed)?;
        let (subscription, events) = rx.await.map_err(|_| RealtimeError::HubClosed)?;

        Ok(RealtimeChannel {
            sender: ChannelSender {
                topic: topic.to_string(),
                client_id: client_id.to_string(),
                subscription,
                cmd_tx: self.cmd_tx.clone(),
            },
            events,
        })
    }

    pub async fn presence_state(&self, topic: &str) -> Result<HashMap<String, Vec<Value>>> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(HubCommand::PresenceState {
                topic: topic.to_string(),
                reply,
            })
            .await
            .map_err(|_| RealtimeError::HubClosed)?;
        rx.await.map_err(|_| RealtimeError::HubClosed)
    }

    /// Stop the hub task. Open channels see `recv()` return `None`.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(HubCommand::Shutdown).await;
    }
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// Sending half of a subscription. Cheap to clone; used by tasks that
/// publish while another task owns the receiving side.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    topic: String,
    client_id: String,
    subscription: SubscriptionId,
    cmd_tx: mpsc::Sender<HubCommand>,
}

impl ChannelSender {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Broadcast to every other subscriber of the topic.
    pub async fn send(&self, event: &str, payload: Value) -> Result<()> {
        self.command(HubCommand::Broadcast {
            topic: self.topic.clone(),
            subscription: self.subscription,
            event: event.to_string(),
            payload,
        })
        .await
    }

    pub async fn track(&self, key: &str, meta: Value) -> Result<()> {
        self.command(HubCommand::Track {
            topic: self.topic.clone(),
            subscription: self.subscription,
            key: key.to_string(),
            meta,
        })
        .await
    }

    pub async fn untrack(&self) -> Result<()> {
        self.command(HubCommand::Untrack {
            topic: self.topic.clone(),
            subscription: self.subscription,
        })
        .await
    }

    pub async fn presence_state(&self) -> Result<HashMap<String, Vec<Value>>> {
        let (reply, rx) = oneshot::channel();
        self.command(HubCommand::PresenceState {
            topic: self.topic.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| RealtimeError::HubClosed)
    }

    async fn command(&self, cmd: HubCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| RealtimeError::HubClosed)
    }
}

/// A joined topic: sending half plus this subscription's event queue.
#[derive(Debug)]
pub struct RealtimeChannel {
    sender: ChannelSender,
    events: mpsc::Receiver<RealtimeEvent>,
}

impl RealtimeChannel {
    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    pub fn topic(&self) -> &str {
        self.sender.topic()
    }

    pub async fn send(&self, event: &str, payload: Value) -> Result<()> {
        self.sender.send(event, payload).await
    }

    pub async fn track(&self, key: &str, meta: Value) -> Result<()> {
        self.sender.track(key, meta).await
    }

    pub async fn untrack(&self) -> Result<()> {
        self.sender.untrack().await
    }

    pub async fn presence_state(&self) -> Result<HashMap<String, Vec<Value>>> {
        self.sender.presence_state().await
    }

    /// Next event, or `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<RealtimeEvent> {
        self.events.recv().await
    }

    /// Leave the topic, untracking any presence.
    pub async fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        let cmd = HubCommand::Unsubscribe {
            topic: self.sender.topic.clone(),
            subscription: self.sender.subscription,
        };
        if let Err(e) = self.sender.cmd_tx.try_send(cmd) {
            debug!(topic = %self.sender.topic, error = %e, "unsubscribe on drop not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next(ch: &mut RealtimeChannel) -> RealtimeEvent {
        timeout(Duration::from_secs(1), ch.recv())
            .await
            .expect("event in time")
            .expect("hub alive")
    }

    async fn nothing(ch: &mut RealtimeChannel) {
        assert!(timeout(Duration::from_millis(50), ch.recv()).await.is_err());
    }

    #[tokio::test]
    async fn broadcast_reaches_others_but_not_sender() {
        let hub = spawn_hub();
        let mut a = hub.channel("voice:1", "alice").await.unwrap();
        let mut b = hub.channel("voice:1", "bob").await.unwrap();
        let mut other = hub.channel("voice:2", "carol").await.unwrap();

        a.send("offer", json!({"sdp": "x"})).await.unwrap();

        assert_eq!(
            next(&mut b).await,
            RealtimeEvent::Broadcast {
                event: "offer".into(),
                payload: json!({"sdp": "x"}),
                from: "alice".into(),
            }
        );
        nothing(&mut a).await;
        nothing(&mut other).await;
    }

    #[tokio::test]
    async fn per_sender_order_is_preserved() {
        let hub = spawn_hub();
        let a = hub.channel("t", "alice").await.unwrap();
        let mut b = hub.channel("t", "bob").await.unwrap();

        for i in 0..20 {
            a.send("n", json!(i)).await.unwrap();
        }
        for i in 0..20 {
            match next(&mut b).await {
                RealtimeEvent::Broadcast { payload, .. } => assert_eq!(payload, json!(i)),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn presence_join_leave_and_state() {
        let hub = spawn_hub();
        let mut watcher = hub.channel("online-users", "watcher").await.unwrap();
        let alice = hub.channel("online-users", "alice").await.unwrap();

        alice.track("alice", json!({"status": "online"})).await.unwrap();
        assert_eq!(
            next(&mut watcher).await,
            RealtimeEvent::PresenceJoin {
                key: "alice".into(),
                meta: json!({"status": "online"}),
            }
        );

        let state = hub.presence_state("online-users").await.unwrap();
        assert_eq!(state.len(), 1);
        assert!(state.contains_key("alice"));

        // Dropping the channel untracks.
        drop(alice);
        assert_eq!(
            next(&mut watcher).await,
            RealtimeEvent::PresenceLeave {
                key: "alice".into()
            }
        );
        assert!(watcher.presence_state().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn shutdown_closes_channels() {
        let hub = spawn_hub();
        let mut a = hub.channel("t", "alice").await.unwrap();
        hub.shutdown().await;

        let closed = timeout(Duration::from_secs(1), a.recv()).await.unwrap();
        assert!(closed.is_none());
        assert!(matches!(
            hub.channel("t", "bob").await,
            Err(RealtimeError::HubClosed)
        ));
    }
}
