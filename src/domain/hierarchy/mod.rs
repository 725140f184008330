pub mod builder;
pub mod topology;
pub mod tree;

pub use builder::build_hierarchy;
pub use topology::Topology;
pub use tree::{Hierarchy, TreeNode, TreeNodeId};
