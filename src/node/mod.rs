//! Node management.
//!
//! A node is one seat on the BBS: a small integer id bound to a live
//! connection. The manager enforces the configured capacity, hands out the
//! lowest free id (released ids are reused), and keeps enough per-node state
//! to answer "who is online" and to push operator broadcasts at every
//! terminal without holding its lock across I/O.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::terminal::TermWriter;

/// Summary information about a connected node.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub id: u32,
    pub user_name: String,
    pub remote: String,
    pub menu: String,
    pub connected_at: DateTime<Utc>,
}

struct NodeEntry {
    user_name: String,
    remote: String,
    menu: String,
    connected_at: DateTime<Utc>,
    writer: Option<TermWriter>,
}

/// Tracks all active nodes and enforces the max-nodes limit.
pub struct NodeManager {
    max_nodes: u32,
    nodes: RwLock<HashMap<u32, NodeEntry>>,
    pub bbs_name: String,
    pub sysop_name: String,
}

impl NodeManager {
    pub fn new(max_nodes: u32, bbs_name: &str, sysop_name: &str) -> Self {
        NodeManager {
            max_nodes,
            nodes: RwLock::new(HashMap::new()),
            bbs_name: bbs_name.to_string(),
            sysop_name: sysop_name.to_string(),
        }
    }

    /// Allocate the lowest free node id, or None when at capacity. The id is
    /// reserved immediately; pair every successful acquire with a
    /// [`NodeManager::release`] on all exit paths.
    pub fn acquire(&self) -> Option<u32> {
        let mut nodes = self.nodes.write().unwrap();
        if nodes.len() as u32 >= self.max_nodes {
            return None;
        }
        let id = (1..=self.max_nodes).find(|id| !nodes.contains_key(id))?;
        nodes.insert(
            id,
            NodeEntry {
                user_name: String::new(),
                remote: String::new(),
                menu: String::new(),
                connected_at: Utc::now(),
                writer: None,
            },
        );
        Some(id)
    }

    /// Attach connection details to a reserved node id.
    pub fn attach(&self, id: u32, remote: &str, writer: TermWriter) {
        let mut nodes = self.nodes.write().unwrap();
        if let Some(entry) = nodes.get_mut(&id) {
            entry.remote = remote.to_string();
            entry.writer = Some(writer);
        }
    }

    /// Release a node id back to the pool.
    pub fn release(&self, id: u32) {
        self.nodes.write().unwrap().remove(&id);
    }

    pub fn count(&self) -> u32 {
        self.nodes.read().unwrap().len() as u32
    }

    pub fn capacity(&self) -> u32 {
        self.max_nodes
    }

    pub fn set_user(&self, id: u32, user_name: &str) {
        if let Some(entry) = self.nodes.write().unwrap().get_mut(&id) {
            entry.user_name = user_name.to_string();
        }
    }

    pub fn set_menu(&self, id: u32, menu: &str) {
        if let Some(entry) = self.nodes.write().unwrap().get_mut(&id) {
            entry.menu = menu.to_string();
        }
    }

    /// Snapshot of all active nodes for who's-online listings.
    pub fn list_info(&self) -> Vec<NodeInfo> {
        let nodes = self.nodes.read().unwrap();
        let mut info: Vec<NodeInfo> = nodes
            .iter()
            .map(|(id, n)| NodeInfo {
                id: *id,
                user_name: if n.user_name.is_empty() {
                    "(logging in)".to_string()
                } else {
                    n.user_name.clone()
                },
                remote: n.remote.clone(),
                menu: n.menu.clone(),
                connected_at: n.connected_at,
            })
            .collect();
        info.sort_by_key(|n| n.id);
        info
    }

    fn writers(&self) -> Vec<TermWriter> {
        self.nodes
            .read()
            .unwrap()
            .values()
            .filter_map(|n| n.writer.clone())
            .collect()
    }

    /// Write `*** msg` at every live terminal. Writers are snapshotted first
    /// so the node lock is never held across I/O.
    pub async fn broadcast(&self, msg: &str) {
        for writer in self.writers() {
            let _ = writer.send_line(&format!("\r\n*** {}", msg)).await;
        }
    }

    /// Targeted operator message to one node.
    pub async fn send_to(&self, id: u32, msg: &str) -> anyhow::Result<()> {
        let writer = self
            .nodes
            .read()
            .unwrap()
            .get(&id)
            .and_then(|n| n.writer.clone())
            .ok_or_else(|| anyhow::anyhow!("node {} not found", id))?;
        writer.send_line(&format!("\r\n*** {}", msg)).await?;
        Ok(())
    }

    /// Close every live terminal (process shutdown).
    pub async fn close_all(&self) {
        for writer in self.writers() {
            writer.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_returns_lowest_available() {
        let mgr = NodeManager::new(3, "TestBBS", "Sysop");

        assert_eq!(mgr.acquire(), Some(1));
        assert_eq!(mgr.acquire(), Some(2));

        mgr.release(1);
        assert_eq!(mgr.acquire(), Some(1));
    }

    #[test]
    fn acquire_respects_capacity_and_reuse() {
        let mgr = NodeManager::new(2, "TestBBS", "Sysop");

        assert_eq!(mgr.acquire(), Some(1));
        assert_eq!(mgr.acquire(), Some(2));
        assert_eq!(mgr.acquire(), None);

        mgr.release(1);
        assert_eq!(mgr.acquire(), Some(1));
        assert_eq!(mgr.count(), 2);

        mgr.release(1);
        mgr.release(2);
        assert_eq!(mgr.count(), 0);
    }

    #[test]
    fn list_info_shows_logging_in_placeholder() {
        let mgr = NodeManager::new(4, "TestBBS", "Sysop");
        let id = mgr.acquire().unwrap();

        let info = mgr.list_info();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].user_name, "(logging in)");

        mgr.set_user(id, "alice");
        mgr.set_menu(id, "main_menu");
        let info = mgr.list_info();
        assert_eq!(info[0].user_name, "alice");
        assert_eq!(info[0].menu, "main_menu");
    }
}
