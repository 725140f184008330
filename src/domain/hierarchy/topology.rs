use std::collections::HashMap;

use crate::domain::hierarchy::tree::Hierarchy;
use crate::domain::model::NodeInfo;

/// A node's view of the hierarchy it is in charge of, plus the loads its children last reported.
#[derive(Debug, Clone)]
pub struct Topology {
    hierarchy: Hierarchy,
    levels: Vec<Vec<NodeInfo>>,
    node_levels: HashMap<NodeInfo, usize>,
    level_loads: Vec<HashMap<NodeInfo, f64>>,
}

impl Topology {
    pub fn new(hierarchy: Hierarchy) -> Self {
        let levels = hierarchy.owned_levels();
        let me = hierarchy.owner().clone();

        let mut node_levels = HashMap::new();
        let mut level_loads = Vec::with_capacity(levels.len());
        for (index, level) in levels.iter().enumerate() {
            let mut loads = HashMap::new();
            for node in level.iter().filter(|n| **n != me) {
                node_levels.insert(node.clone(), index);
                loads.insert(node.clone(), 0.0);
            }
            level_loads.push(loads);
        }

        Topology { hierarchy, levels, node_levels, level_loads }
    }

    /// Owned levels, shallowest first. Every level lists the owner itself too.
    pub fn levels(&self) -> &[Vec<NodeInfo>] {
        &self.levels
    }

    pub fn parent(&self) -> Option<&NodeInfo> {
        self.hierarchy.parent()
    }

    pub fn level_of(&self, node: &NodeInfo) -> Option<usize> {
        self.node_levels.get(node).copied()
    }

    /// Stores the aggregated load reported by `node`. Returns false for nodes this one does not own.
    pub fn record_load(&mut self, node: &NodeInfo, load: f64) -> bool {
        match self.node_levels.get(node) {
            Some(&level) => {
                self.level_loads[level].insert(node.clone(), load);
                true
            }
            None => false,
        }
    }

    /// Loads of the level-0 subtrees, with `own` standing in for this node's deepest position.
    ///
    /// Folds from the deepest level upwards: each level's reported loads plus the running average
    /// of the levels below it. The last entry is always this node's own subtree.
    pub fn highest_level_loads(&self, own: f64) -> Vec<f64> {
        let mut average = own;
        let mut loads = vec![own];

        for level in self.levels.iter().enumerate().rev() {
            let (index, nodes) = level;
            loads = nodes.iter().filter_map(|n| self.level_loads[index].get(n).copied()).collect();
            loads.push(average);
            average = loads.iter().sum::<f64>() / loads.len() as f64;
        }
        loads
    }
}
