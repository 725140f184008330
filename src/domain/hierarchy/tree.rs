use slotmap::{SlotMap, new_key_type};
use std::collections::VecDeque;
use std::fmt;

use crate::api::hierarchy_dto::TreeNodeDto;
use crate::domain::model::NodeInfo;

new_key_type! {
    pub struct TreeNodeId;
}

/// One position in the tree. Internal positions are owned (coordinated) by their first child's node.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub node: NodeInfo,
    pub parent: Option<TreeNodeId>,
    pub children: Vec<TreeNodeId>,
}

/// A rooted tree of node positions stored in an arena.
///
/// A hierarchy received from another node is a detached subtree; `root_parent` then holds the node
/// its owner reports to.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    nodes: SlotMap<TreeNodeId, TreeNode>,
    root: TreeNodeId,
    root_parent: Option<NodeInfo>,
}

impl Hierarchy {
    pub fn with_root(node: NodeInfo) -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(TreeNode { node, parent: None, children: Vec::new() });
        Hierarchy { nodes, root, root_parent: None }
    }

    pub fn add_child(&mut self, parent: TreeNodeId, node: NodeInfo) -> TreeNodeId {
        let child = self.nodes.insert(TreeNode { node, parent: Some(parent), children: Vec::new() });
        if let Some(parent) = self.nodes.get_mut(parent) {
            parent.children.push(child);
        }
        child
    }

    //---------------------
    // --- Accessors ---
    //---------------------
    pub fn root(&self) -> TreeNodeId {
        self.root
    }

    pub fn node_info(&self, id: TreeNodeId) -> Option<&NodeInfo> {
        self.nodes.get(id).map(|n| &n.node)
    }

    pub fn children(&self, id: TreeNodeId) -> &[TreeNodeId] {
        self.nodes.get(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn is_leaf(&self, id: TreeNodeId) -> bool {
        self.children(id).is_empty()
    }

    /// Node one position above `id`. For the root this is `root_parent`.
    pub fn parent_of(&self, id: TreeNodeId) -> Option<&NodeInfo> {
        match self.nodes.get(id)?.parent {
            Some(parent) => self.node_info(parent),
            None => self.root_parent.as_ref(),
        }
    }

    /// The node in charge of this whole hierarchy.
    pub fn owner(&self) -> &NodeInfo {
        &self.nodes[self.root].node
    }

    /// The node the owner reports to, `None` for the top of the full tree.
    pub fn parent(&self) -> Option<&NodeInfo> {
        self.root_parent.as_ref()
    }

    /// Number of positions; at least one, the root.
    pub fn position_count(&self) -> usize {
        self.nodes.len()
    }

    /// Positions in breadth-first order.
    pub fn positions(&self) -> Vec<TreeNodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut queue = VecDeque::from([self.root]);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            queue.extend(self.children(id).iter().copied());
        }
        order
    }

    /// Detached copy of the subtree at `id`, remembering the node above it.
    pub fn subtree(&self, id: TreeNodeId) -> Option<Hierarchy> {
        let top = self.nodes.get(id)?;
        let mut sub = Hierarchy::with_root(top.node.clone());
        sub.root_parent = self.parent_of(id).cloned();

        let mut queue = VecDeque::from([(id, sub.root)]);
        while let Some((source, target)) = queue.pop_front() {
            for &child in self.children(source) {
                let copied = sub.add_child(target, self.nodes[child].node.clone());
                queue.push_back((child, copied));
            }
        }
        Some(sub)
    }

    /// Positions the owner coordinates, level by level.
    ///
    /// Level 0 holds the root's children. Each deeper level holds the children of the owner's own
    /// position on the level above, down to the owner's leaf position.
    pub fn owned_level_positions(&self) -> Vec<Vec<TreeNodeId>> {
        let owner = self.owner();
        let mut levels = Vec::new();
        let mut current = self.root;

        while !self.is_leaf(current) {
            let level = self.children(current).to_vec();
            current = level.iter().copied().find(|&c| &self.nodes[c].node == owner).unwrap_or(level[0]);
            levels.push(level);
        }
        levels
    }

    /// [`Hierarchy::owned_level_positions`] as node identities. Each level includes the owner itself.
    pub fn owned_levels(&self) -> Vec<Vec<NodeInfo>> {
        self.owned_level_positions().into_iter().map(|level| level.into_iter().map(|id| self.nodes[id].node.clone()).collect()).collect()
    }

    //---------------------
    // --- Conversion ---
    //---------------------
    pub fn to_dto(&self) -> TreeNodeDto {
        self.position_to_dto(self.root)
    }

    fn position_to_dto(&self, id: TreeNodeId) -> TreeNodeDto {
        let position = &self.nodes[id];
        TreeNodeDto {
            node: position.node.clone(),
            parent: self.parent_of(id).cloned(),
            children: position.children.iter().map(|&c| self.position_to_dto(c)).collect(),
        }
    }

    pub fn from_dto(dto: TreeNodeDto) -> Hierarchy {
        let mut hierarchy = Hierarchy::with_root(dto.node);
        hierarchy.root_parent = dto.parent;

        let root = hierarchy.root;
        let mut queue: VecDeque<(TreeNodeId, Vec<TreeNodeDto>)> = VecDeque::from([(root, dto.children)]);
        while let Some((parent, children)) = queue.pop_front() {
            for child in children {
                let id = hierarchy.add_child(parent, child.node);
                queue.push_back((id, child.children));
            }
        }
        hierarchy
    }

    fn fmt_position(&self, f: &mut fmt::Formatter<'_>, id: TreeNodeId, depth: usize) -> fmt::Result {
        let position = &self.nodes[id];
        writeln!(f, "{}{}", "  ".repeat(depth), position.node)?;
        for &child in &position.children {
            self.fmt_position(f, child, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for Hierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_position(f, self.root, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(i: u16) -> NodeInfo {
        NodeInfo::new(i as i32, "localhost", 9000 + i)
    }

    // N0 -> [N0 -> [N0, N2], N1]
    fn sample() -> (Hierarchy, TreeNodeId, TreeNodeId) {
        let mut h = Hierarchy::with_root(node(0));
        let root = h.root();
        let own = h.add_child(root, node(0));
        let n1 = h.add_child(root, node(1));
        h.add_child(own, node(0));
        h.add_child(own, node(2));
        (h, own, n1)
    }

    #[test]
    fn owned_levels_follow_the_owner_chain() {
        let (h, _, _) = sample();

        let levels = h.owned_levels();

        assert_eq!(levels, vec![vec![node(0), node(1)], vec![node(0), node(2)]]);
    }

    #[test]
    fn subtree_keeps_the_outer_parent() {
        let (h, _, n1) = sample();

        let sub = h.subtree(n1).unwrap();

        assert_eq!(sub.owner(), &node(1));
        assert_eq!(sub.parent(), Some(&node(0)));
        assert!(sub.is_leaf(sub.root()));
        assert!(sub.owned_levels().is_empty());
    }

    #[test]
    fn dto_conversion_preserves_shape() {
        let (h, own, _) = sample();
        let sub = h.subtree(own).unwrap();

        let restored = Hierarchy::from_dto(sub.to_dto());

        assert_eq!(restored.position_count(), 3);
        assert_eq!(restored.parent(), Some(&node(0)));
        assert_eq!(restored.owned_levels(), vec![vec![node(0), node(2)]]);
        assert_eq!(restored.to_string(), sub.to_string());
    }
}
