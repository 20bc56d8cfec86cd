//! Values handed to embedders: roster entries and change notifications.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::engine::Member;

/// A cluster member as seen at the moment of a roster query
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    /// Unique node name within the cluster
    pub id: String,
    /// Gossip address of the node
    pub address: String,
    /// Gossip port of the node
    pub port: u16,
}

impl fmt::Display for Node {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "id: {}, node: {}:{}", self.id, self.address, self.port)
    }
}

impl From<Member> for Node {
    fn from(member: Member) -> Self {
        Self {
            id: member.name,
            address: member.addr,
            port: member.port,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    Joined,
    Left,
}

impl fmt::Display for NodeStatus {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            NodeStatus::Joined => f.write_str("joined"),
            NodeStatus::Left => f.write_str("left"),
        }
    }
}

/// Emitted once per membership transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEvent {
    pub node: Node,
    pub status: NodeStatus,
}

impl fmt::Display for NodeEvent {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "node: {}, status: {}", self.node.id, self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyStatus {
    /// Key appeared
    Set,
    /// Existing key was written again
    Changed,
    /// Key disappeared
    Deleted,
}

impl fmt::Display for KeyStatus {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            KeyStatus::Set => f.write_str("set"),
            KeyStatus::Changed => f.write_str("changed"),
            KeyStatus::Deleted => f.write_str("deleted"),
        }
    }
}

/// Emitted once per detected key-space change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub key: String,
    pub status: KeyStatus,
}

impl fmt::Display for KeyEvent {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "key: {}, status: {}", self.key, self.status)
    }
}
