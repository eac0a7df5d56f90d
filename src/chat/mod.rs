//! Inter-node chat broker.
//!
//! Process-wide fan-out for live sessions. Two maps live under a single
//! read-write lock: subscribers (node id -> bounded outbound buffer + current
//! room) and online presence (node id -> name + room, independent of
//! subscription: a logged-in caller shows as online even when not inside the
//! chat screen).
//!
//! Senders take the lock only long enough to snapshot their targets, then
//! enqueue without it. Enqueues never block: a full buffer drops the message
//! and the drop count is logged, so a slow consumer cannot stall producers.
//! Unsubscribe removes the lookup entry but never closes the buffer; senders
//! holding a snapshot may still be enqueueing, and the receiver simply drains
//! to end-of-stream once the last cloned sender is gone.

pub mod room;

use std::collections::HashMap;
use std::sync::RwLock;

use log::warn;
use thiserror::Error;
use tokio::sync::mpsc;

/// Outbound buffer capacity per subscriber.
pub const OUTBOX_CAPACITY: usize = 32;

/// Where a chat message is going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Node(u32),
    Broadcast,
    Room(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub from_node: u32,
    pub from_user: String,
    pub target: Target,
    pub text: String,
}

/// A connected user, whether or not they are inside the chat screen.
#[derive(Debug, Clone)]
pub struct OnlineUser {
    pub node_id: u32,
    pub user_name: String,
    pub room: String,
}

/// The session-held end of a subscription: the receiver for the node's
/// outbound buffer.
pub struct Subscription {
    pub node_id: u32,
    pub rx: mpsc::Receiver<ChatMessage>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("node {0} not found")]
    NodeNotFound(u32),

    #[error("node {0} message buffer full")]
    BufferFull(u32),
}

struct SubscriberEntry {
    user_name: String,
    room: String,
    tx: mpsc::Sender<ChatMessage>,
}

#[derive(Default)]
struct BrokerState {
    subscribers: HashMap<u32, SubscriberEntry>,
    online: HashMap<u32, OnlineUser>,
}

/// Routes messages between nodes.
#[derive(Default)]
pub struct Broker {
    state: RwLock<BrokerState>,
}

impl Broker {
    pub fn new() -> Self {
        Broker::default()
    }

    /// Mark a node as connected (presence only).
    pub fn register_online(&self, node_id: u32, user_name: &str) {
        let mut st = self.state.write().unwrap();
        st.online.insert(
            node_id,
            OnlineUser {
                node_id,
                user_name: user_name.to_string(),
                room: String::new(),
            },
        );
    }

    /// Update the displayed name for a connected node (e.g. after login).
    pub fn update_online_name(&self, node_id: u32, user_name: &str) {
        let mut st = self.state.write().unwrap();
        match st.online.get_mut(&node_id) {
            Some(u) => u.user_name = user_name.to_string(),
            None => {
                st.online.insert(
                    node_id,
                    OnlineUser {
                        node_id,
                        user_name: user_name.to_string(),
                        room: String::new(),
                    },
                );
            }
        }
        if let Some(sub) = st.subscribers.get_mut(&node_id) {
            sub.user_name = user_name.to_string();
        }
    }

    pub fn unregister_online(&self, node_id: u32) {
        self.state.write().unwrap().online.remove(&node_id);
    }

    /// Register a node to receive chat messages. Ensures the node is also
    /// visible in the online list.
    pub fn subscribe(&self, node_id: u32, user_name: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        let mut st = self.state.write().unwrap();
        st.subscribers.insert(
            node_id,
            SubscriberEntry {
                user_name: user_name.to_string(),
                room: String::new(),
                tx,
            },
        );
        st.online
            .entry(node_id)
            .and_modify(|u| u.user_name = user_name.to_string())
            .or_insert_with(|| OnlineUser {
                node_id,
                user_name: user_name.to_string(),
                room: String::new(),
            });
        Subscription { node_id, rx }
    }

    /// Remove a node from the chat system. The outbound buffer is not closed
    /// here: broadcasters may have already snapshotted this subscriber and
    /// will enqueue concurrently.
    pub fn unsubscribe(&self, node_id: u32) {
        self.state.write().unwrap().subscribers.remove(&node_id);
    }

    /// Send a message to a specific node. Non-blocking: a full buffer is an
    /// error for directed sends.
    pub fn send_to(
        &self,
        from_node: u32,
        from_user: &str,
        to_node: u32,
        text: &str,
    ) -> Result<(), ChatError> {
        let tx = {
            let st = self.state.read().unwrap();
            st.subscribers
                .get(&to_node)
                .map(|s| s.tx.clone())
                .ok_or(ChatError::NodeNotFound(to_node))?
        };

        let msg = ChatMessage {
            from_node,
            from_user: from_user.to_string(),
            target: Target::Node(to_node),
            text: text.to_string(),
        };

        tx.try_send(msg).map_err(|_| ChatError::BufferFull(to_node))
    }

    /// Send to every subscriber except the sender. Returns the number of
    /// messages dropped on full buffers; drops are logged, never blocking.
    pub fn broadcast(&self, from_node: u32, from_user: &str, text: &str) -> usize {
        let targets: Vec<mpsc::Sender<ChatMessage>> = {
            let st = self.state.read().unwrap();
            st.subscribers
                .iter()
                .filter(|(id, _)| **id != from_node)
                .map(|(_, s)| s.tx.clone())
                .collect()
        };

        let msg = ChatMessage {
            from_node,
            from_user: from_user.to_string(),
            target: Target::Broadcast,
            text: text.to_string(),
        };

        let mut dropped = 0;
        for tx in targets {
            if tx.try_send(msg.clone()).is_err() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            warn!("chat: dropped {} broadcast messages (slow subscribers)", dropped);
        }
        dropped
    }

    /// Send to every subscriber currently in `room`, except the sender.
    pub fn send_to_room(&self, from_node: u32, from_user: &str, room: &str, text: &str) -> usize {
        let targets: Vec<mpsc::Sender<ChatMessage>> = {
            let st = self.state.read().unwrap();
            st.subscribers
                .iter()
                .filter(|(id, s)| **id != from_node && s.room == room)
                .map(|(_, s)| s.tx.clone())
                .collect()
        };

        let msg = ChatMessage {
            from_node,
            from_user: from_user.to_string(),
            target: Target::Room(room.to_string()),
            text: text.to_string(),
        };

        let mut dropped = 0;
        for tx in targets {
            if tx.try_send(msg.clone()).is_err() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            warn!("chat: dropped {} room messages (room={:?})", dropped, room);
        }
        dropped
    }

    /// Put a subscriber in a chat room (updates presence too).
    pub fn join_room(&self, node_id: u32, room: &str) {
        let mut st = self.state.write().unwrap();
        if let Some(sub) = st.subscribers.get_mut(&node_id) {
            sub.room = room.to_string();
        }
        if let Some(u) = st.online.get_mut(&node_id) {
            u.room = room.to_string();
        }
    }

    /// Remove a subscriber from their current room.
    pub fn leave_room(&self, node_id: u32) {
        let mut st = self.state.write().unwrap();
        if let Some(sub) = st.subscribers.get_mut(&node_id) {
            sub.room.clear();
        }
        if let Some(u) = st.online.get_mut(&node_id) {
            u.room.clear();
        }
    }

    /// Names of all subscribers currently in `room`.
    pub fn room_members(&self, room: &str) -> Vec<String> {
        let st = self.state.read().unwrap();
        st.subscribers
            .values()
            .filter(|s| s.room == room)
            .map(|s| s.user_name.clone())
            .collect()
    }

    /// Snapshot of all connected users.
    pub fn list_online(&self) -> Vec<OnlineUser> {
        let st = self.state.read().unwrap();
        let mut users: Vec<OnlineUser> = st.online.values().cloned().collect();
        users.sort_by_key(|u| u.node_id);
        users
    }

    /// Current room of a node, if subscribed and in one.
    pub fn current_room(&self, node_id: u32) -> Option<String> {
        let st = self.state.read().unwrap();
        st.subscribers
            .get(&node_id)
            .filter(|s| !s.room.is_empty())
            .map(|s| s.room.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_is_independent_of_subscription() {
        let broker = Broker::new();
        broker.register_online(1, "alice");
        assert_eq!(broker.list_online().len(), 1);

        let _sub = broker.subscribe(2, "bob");
        assert_eq!(broker.list_online().len(), 2);

        broker.unsubscribe(2);
        // Bob is still online; only the subscription is gone.
        assert_eq!(broker.list_online().len(), 2);

        broker.unregister_online(2);
        assert_eq!(broker.list_online().len(), 1);
    }

    #[test]
    fn send_to_unknown_node_errors() {
        let broker = Broker::new();
        assert_eq!(
            broker.send_to(1, "alice", 42, "hi"),
            Err(ChatError::NodeNotFound(42))
        );
    }

    #[tokio::test]
    async fn directed_send_reports_full_buffer() {
        let broker = Broker::new();
        let _sub = broker.subscribe(2, "bob");
        for _ in 0..OUTBOX_CAPACITY {
            broker.send_to(1, "alice", 2, "spam").unwrap();
        }
        assert_eq!(
            broker.send_to(1, "alice", 2, "one too many"),
            Err(ChatError::BufferFull(2))
        );
    }

    #[tokio::test]
    async fn room_send_filters_by_room() {
        let broker = Broker::new();
        let mut in_room = broker.subscribe(1, "alice");
        let mut outside = broker.subscribe(2, "bob");
        broker.join_room(1, "main");

        let dropped = broker.send_to_room(3, "carol", "main", "hello room");
        assert_eq!(dropped, 0);

        let msg = in_room.rx.try_recv().unwrap();
        assert_eq!(msg.text, "hello room");
        assert!(outside.rx.try_recv().is_err());

        assert_eq!(broker.room_members("main"), vec!["alice".to_string()]);
    }
}
