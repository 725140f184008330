use std::path::PathBuf;
use std::time::Duration;

use crate::api::config_dto::BalancerConfigDto;
use crate::error::{Error, Result};
use crate::loader::parser::parse_json_file;

pub const DEFAULT_CONTROLLER_PORT: u16 = 35991;
pub const DEFAULT_LOG_SINK_PORT: u16 = 65439;

const CONTROLLER_PORT: &str = "CONTROLLER_PORT";
const NODE_ID: &str = "NODE_ID";
const NODE_ADDRESS: &str = "NODE_ADDRESS";
const LOG_SINK_PORT: &str = "LOG_SINK_PORT";
const STATS_FILE: &str = "STATS_FILE";
const BALANCER_CONFIG: &str = "BALANCER_CONFIG";

/// Tuning knobs of the balancing machinery.
#[derive(Debug, Clone, PartialEq)]
pub struct BalancerConfig {
    /// Maximum deviation of a subtree load from the mean before the root rebalances.
    pub imbalance_threshold: f64,
    /// Minimum time between two rebalances, and between start-up and the first one.
    pub cooldown: Duration,
    /// Trailing window the load is measured over.
    pub load_window: Duration,
    /// How long an idle worker sleeps before it re-evaluates its load.
    pub idle_wait: Duration,
    pub response_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        BalancerConfig {
            imbalance_threshold: 0.1,
            cooldown: Duration::from_secs(5),
            load_window: Duration::from_secs(2),
            idle_wait: Duration::from_millis(250),
            response_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl BalancerConfig {
    pub fn from_dto(dto: BalancerConfigDto) -> Self {
        let defaults = BalancerConfig::default();
        BalancerConfig {
            imbalance_threshold: dto.imbalance_threshold.unwrap_or(defaults.imbalance_threshold),
            cooldown: dto.cooldown_ms.map(Duration::from_millis).unwrap_or(defaults.cooldown),
            load_window: dto.load_window_ms.map(Duration::from_millis).unwrap_or(defaults.load_window),
            idle_wait: dto.idle_wait_ms.map(Duration::from_millis).unwrap_or(defaults.idle_wait),
            response_timeout: dto.response_timeout_ms.map(Duration::from_millis).unwrap_or(defaults.response_timeout),
            connect_timeout: dto.connect_timeout_ms.map(Duration::from_millis).unwrap_or(defaults.connect_timeout),
        }
    }

    pub fn from_file(file_path: &str) -> Result<Self> {
        let dto: BalancerConfigDto = parse_json_file(file_path)?;
        Ok(Self::from_dto(dto))
    }
}

/// Everything a node process needs to know at start-up.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: i32,
    /// Address the node advertises to its peers.
    pub address: String,
    /// `None` only for nodes started in-process, which do not announce themselves.
    pub controller_port: Option<u16>,
    pub log_sink_port: Option<u16>,
    pub stats_file: Option<PathBuf>,
    pub balancer: BalancerConfig,
}

impl NodeConfig {
    /// Config for a node that is not managed by a controller.
    pub fn standalone(node_id: i32, balancer: BalancerConfig) -> Self {
        NodeConfig { node_id, address: "localhost".to_string(), controller_port: None, log_sink_port: None, stats_file: None, balancer }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads the node environment through `lookup`.
    ///
    /// `CONTROLLER_PORT` is mandatory. `NODE_ID` defaults to -1 and `NODE_ADDRESS` to `localhost`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let controller_port = lookup(CONTROLLER_PORT).ok_or(Error::MissingEnvironment { var: CONTROLLER_PORT })?;
        let controller_port = parse_var::<u16>(CONTROLLER_PORT, controller_port)?;

        let node_id = match lookup(NODE_ID) {
            Some(value) => parse_var::<i32>(NODE_ID, value)?,
            None => -1,
        };

        let log_sink_port = match lookup(LOG_SINK_PORT) {
            Some(value) => Some(parse_var::<u16>(LOG_SINK_PORT, value)?),
            None => None,
        };

        let balancer = match lookup(BALANCER_CONFIG) {
            Some(path) => BalancerConfig::from_file(&path)?,
            None => BalancerConfig::default(),
        };

        Ok(NodeConfig {
            node_id,
            address: lookup(NODE_ADDRESS).unwrap_or_else(|| "localhost".to_string()),
            controller_port: Some(controller_port),
            log_sink_port,
            stats_file: lookup(STATS_FILE).map(PathBuf::from),
            balancer,
        })
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| Error::InvalidEnvironment { var, value })
}
