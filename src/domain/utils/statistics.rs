use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

/// `tracing` target for structured balancing events.
pub const ANALYTICS_TARGET: &str = "analytics";

/// Each event consists of a set of key-value-pairs with the measured data or some meta data of the event.
/// This enum specifies all allowed key values and thus the column in the output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StatParameter {
    /// Seconds since the collector was started.
    Time,

    /// Node that produced the event.
    NodeName,

    /// What happened, e.g. "RebalanceTriggered".
    Event,

    /// Rebalance operation the event belongs to.
    Operation,

    /// Propagation round, 0 being the shallowest level owned by the node.
    Round,

    /// Integer average container weight of a balancing pass.
    AverageWeight,

    NumberOfTransfers,

    NumberOfJobs,

    /// Load fraction of the node when the event was recorded.
    Load,
}

impl StatParameter {
    const ALL: [StatParameter; 9] = [
        StatParameter::Time,
        StatParameter::NodeName,
        StatParameter::Event,
        StatParameter::Operation,
        StatParameter::Round,
        StatParameter::AverageWeight,
        StatParameter::NumberOfTransfers,
        StatParameter::NumberOfJobs,
        StatParameter::Load,
    ];

    /// Returns the defined order of columns for the CSV header
    pub fn headers() -> Vec<&'static str> {
        Self::ALL.iter().map(|p| p.header()).collect()
    }

    fn header(&self) -> &'static str {
        match self {
            StatParameter::Time => "Time",
            StatParameter::NodeName => "NodeName",
            StatParameter::Event => "Event",
            StatParameter::Operation => "Operation",
            StatParameter::Round => "Round",
            StatParameter::AverageWeight => "AverageWeight",
            StatParameter::NumberOfTransfers => "NumberOfTransfers",
            StatParameter::NumberOfJobs => "NumberOfJobs",
            StatParameter::Load => "Load",
        }
    }
}

/// store values in their native format, only format them when writing to the CSV.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StatValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<i64> for StatValue {
    fn from(v: i64) -> Self {
        StatValue::Integer(v)
    }
}

impl From<u64> for StatValue {
    fn from(v: u64) -> Self {
        StatValue::Integer(v as i64)
    }
}

impl From<usize> for StatValue {
    fn from(v: usize) -> Self {
        StatValue::Integer(v as i64)
    }
}

impl From<f64> for StatValue {
    fn from(v: f64) -> Self {
        StatValue::Float(v)
    }
}

impl From<String> for StatValue {
    fn from(v: String) -> Self {
        StatValue::Text(v)
    }
}

impl From<&str> for StatValue {
    fn from(v: &str) -> Self {
        StatValue::Text(v.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatisticEvent {
    data: HashMap<StatParameter, StatValue>,
}

impl StatisticEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<V: Into<StatValue>>(&mut self, param: StatParameter, value: V) -> &mut Self {
        self.data.insert(param, value.into());
        self
    }

    pub fn get(&self, param: StatParameter) -> Option<&StatValue> {
        self.data.get(&param)
    }

    fn to_row(&self) -> Vec<String> {
        StatParameter::ALL
            .iter()
            .map(|param| match self.data.get(param) {
                Some(StatValue::Text(t)) => t.clone(),
                Some(StatValue::Integer(i)) => i.to_string(),
                Some(StatValue::Float(f)) => f.to_string(),
                None => "NA".to_string(),
            })
            .collect()
    }
}

/// Messages sent from the node tasks to the writer thread.
enum StatsMessage {
    Log(StatisticEvent),
    Flush,
    Shutdown,
}

/// Handle used by a node to record balancing events.
///
/// Cloning the handle shares the same writer thread. The handle is passed to the components
/// that need it; there is no process-wide instance.
#[derive(Debug, Clone)]
pub struct StatsCollector {
    sender: mpsc::Sender<StatsMessage>,
    start_time: u64,
}

impl std::fmt::Debug for StatsMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatsMessage::Log(_) => write!(f, "Log"),
            StatsMessage::Flush => write!(f, "Flush"),
            StatsMessage::Shutdown => write!(f, "Shutdown"),
        }
    }
}

impl StatsCollector {
    /// Spawns the background thread that owns the CSV writer. `None` writes to stdout.
    pub fn init(filename: Option<PathBuf>) -> Self {
        let (tx, rx) = mpsc::channel();
        let start_time = Self::now_s();

        thread::Builder::new()
            .name("stats-writer".to_string())
            .spawn(move || Self::worker_loop(rx, filename))
            .map_err(|e| log::error!("Failed to spawn statistics writer: {}", e))
            .ok();

        StatsCollector { sender: tx, start_time }
    }

    fn now_s() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
    }

    fn worker_loop(rx: mpsc::Receiver<StatsMessage>, filename: Option<PathBuf>) {
        let writer: Box<dyn Write> = match filename {
            Some(path) => match File::create(&path) {
                Ok(file) => Box::new(file),
                Err(e) => {
                    log::error!("Could not create statistics file {:?}: {}", path, e);
                    return;
                }
            },
            None => Box::new(io::stdout()),
        };

        let mut csv_wtr = csv::WriterBuilder::new().delimiter(b';').from_writer(writer);

        if let Err(e) = csv_wtr.write_record(StatParameter::headers()) {
            log::error!("Stats Error: Failed to write headers: {}", e);
        }

        for msg in rx {
            match msg {
                StatsMessage::Log(event) => {
                    if let Err(e) = csv_wtr.write_record(event.to_row()) {
                        log::error!("Stats Error: Failed to write record: {}", e);
                    }
                }
                StatsMessage::Flush => {
                    let _ = csv_wtr.flush();
                }
                StatsMessage::Shutdown => {
                    let _ = csv_wtr.flush();
                    break;
                }
            }
        }
    }

    /// Non-blocking; a dead writer thread only drops the event.
    pub fn add_event(&self, mut event: StatisticEvent) {
        if event.get(StatParameter::Time).is_none() {
            let relative = Self::now_s().saturating_sub(self.start_time);
            event.set(StatParameter::Time, relative);
        }

        let _ = self.sender.send(StatsMessage::Log(event));
    }

    pub fn flush(&self) {
        let _ = self.sender.send(StatsMessage::Flush);
    }

    pub fn shutdown(&self) {
        let _ = self.sender.send(StatsMessage::Shutdown);
    }
}
