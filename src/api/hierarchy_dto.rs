use serde::{Deserialize, Serialize};

use crate::domain::model::NodeInfo;

/// Wire form of a (sub)tree. Every position carries the node above it, so a detached subtree
/// still knows whom its owner reports to.
#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNodeDto {
    pub node: NodeInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeInfo>,
    #[serde(default)]
    pub children: Vec<TreeNodeDto>,
}
