use std::collections::VecDeque;

use crate::domain::hierarchy::tree::Hierarchy;
use crate::domain::model::NodeInfo;
use crate::error::{Error, Result};

/// Arranges `nodes` into a tree where every internal position has at most `branching_factor`
/// children and is coordinated by its first child.
///
/// The first node becomes the root. Parents are filled in FIFO order: each gets a copy of its own
/// node as first child, followed by up to `branching_factor - 1` fresh nodes. The result only depends
/// on the input order.
pub fn build_hierarchy(nodes: &[NodeInfo], branching_factor: usize) -> Result<Hierarchy> {
    if branching_factor < 2 {
        return Err(Error::InvalidBranchingFactor(branching_factor));
    }

    let mut leaves: VecDeque<NodeInfo> = nodes.iter().cloned().collect();
    let root = leaves.pop_front().ok_or(Error::EmptyHierarchy)?;

    let mut hierarchy = Hierarchy::with_root(root);
    let mut parents = VecDeque::from([hierarchy.root()]);
    let extra_children = branching_factor - 1;

    while !leaves.is_empty() {
        let Some(parent) = parents.pop_front() else {
            break;
        };
        let Some(owner) = hierarchy.node_info(parent).cloned() else {
            continue;
        };

        let own_position = hierarchy.add_child(parent, owner);
        parents.push_back(own_position);

        for _ in 0..extra_children.min(leaves.len()) {
            if let Some(leaf) = leaves.pop_front() {
                let position = hierarchy.add_child(parent, leaf);
                parents.push_back(position);
            }
        }
    }

    log::debug!("Built hierarchy of {} positions over {} nodes", hierarchy.position_count(), nodes.len());
    Ok(hierarchy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn nodes(n: u16) -> Vec<NodeInfo> {
        (0..n).map(|i| NodeInfo::new(i as i32, "localhost", 7000 + i)).collect()
    }

    #[test]
    fn single_node_is_a_leaf_root() {
        let h = build_hierarchy(&nodes(1), 3).unwrap();

        assert_eq!(h.position_count(), 1);
        assert!(h.is_leaf(h.root()));
        assert!(h.owned_levels().is_empty());
    }

    #[test]
    fn every_node_appears_and_internal_positions_respect_the_branching_factor() {
        for b in 2..5 {
            for n in 1..20u16 {
                let input = nodes(n);
                let h = build_hierarchy(&input, b).unwrap();

                let owners: HashSet<NodeInfo> = h.positions().into_iter().filter_map(|id| h.node_info(id).cloned()).collect();
                assert_eq!(owners.len(), n as usize);

                for id in h.positions() {
                    let children = h.children(id);
                    assert!(children.len() <= b);
                    if let Some(&first) = children.first() {
                        assert_eq!(h.node_info(first), h.node_info(id), "coordinator must be the first child");
                    }
                }
            }
        }
    }

    #[test]
    fn build_is_deterministic() {
        let input = nodes(11);

        let a = build_hierarchy(&input, 3).unwrap();
        let b = build_hierarchy(&input, 3).unwrap();

        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(a.owned_levels(), b.owned_levels());
    }

    #[test]
    fn seven_nodes_binary_shape() {
        let input = nodes(7);
        let h = build_hierarchy(&input, 2).unwrap();

        let levels = h.owned_levels();

        assert_eq!(
            levels,
            vec![vec![input[0].clone(), input[1].clone()], vec![input[0].clone(), input[2].clone()], vec![input[0].clone(), input[4].clone()],]
        );
    }

    #[test]
    fn invalid_input_is_rejected() {
        assert!(matches!(build_hierarchy(&[], 2), Err(Error::EmptyHierarchy)));
        assert!(matches!(build_hierarchy(&nodes(3), 1), Err(Error::InvalidBranchingFactor(1))));
    }
}
