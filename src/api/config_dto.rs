use serde::{Deserialize, Serialize};

/// Optional tuning file for the balancer. Missing fields keep their defaults.
#[derive(Debug, Deserialize, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BalancerConfigDto {
    pub imbalance_threshold: Option<f64>,
    pub cooldown_ms: Option<u64>,
    pub load_window_ms: Option<u64>,
    pub idle_wait_ms: Option<u64>,
    pub response_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
}
