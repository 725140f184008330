use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Network identity of one node process.
///
/// Two `NodeInfo`s are the same node when they share address and port. The numeric id is
/// informational (`-1` when unknown) and takes no part in equality or hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: i32,
    pub address: String,
    pub port: u16,
}

impl NodeInfo {
    pub const UNKNOWN_ID: i32 = -1;

    pub fn new(id: i32, address: impl Into<String>, port: u16) -> Self {
        NodeInfo { id, address: address.into(), port }
    }
}

impl PartialEq for NodeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.port == other.port && self.address == other.address
    }
}

impl Eq for NodeInfo {}

impl Hash for NodeInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node {} ({}:{})", self.id, self.address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn identity_ignores_the_numeric_id() {
        let a = NodeInfo::new(3, "localhost", 4000);
        let b = NodeInfo::new(NodeInfo::UNKNOWN_ID, "localhost", 4000);
        let c = NodeInfo::new(3, "localhost", 4001);

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<NodeInfo> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }
}
