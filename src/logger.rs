use chrono::Local;
use fern::Dispatch;
use log::{LevelFilter, Log, Metadata, Record};
use std::fs;
use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::time::{Duration, Instant};

use crate::api::message::Message;
use crate::domain::log_sink::REMOTE_TARGET;

// Define where to store logs
const LOG_DIR: &str = "logs";

/// How a process wants its log output.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// File under `logs/`, e.g. `node-3.log`.
    pub file_name: String,
    /// Port of a log sink on localhost to forward every line to.
    pub remote_sink: Option<u16>,
    /// Id stamped on forwarded lines.
    pub node_id: i32,
}

impl LoggerConfig {
    /// Console and file only, named after the process role.
    pub fn local(role: &str) -> Self {
        LoggerConfig { file_name: format!("{}.log", role), remote_sink: None, node_id: -1 }
    }

    pub fn for_node(node_id: i32, remote_sink: Option<u16>) -> Self {
        LoggerConfig { file_name: format!("node-{}.log", node_id), remote_sink, node_id }
    }
}

/// Initializes the global logger.
///
/// This function should be called once at the very beginning of the
/// application's `main` function.
///
/// Log level is controlled by the `RUST_LOG` environment variable.
/// Example: `RUST_LOG=debug hierarchical_lb node`
///
/// If `RUST_LOG` is not set, it defaults to `info`.
/// Logs will be written to `logs/<file_name>`, the console, and the log sink if one is configured.
pub fn init(config: LoggerConfig) {
    if let Err(e) = fs::create_dir_all(LOG_DIR) {
        eprintln!("Failed to create log directory at '{}': {}", LOG_DIR, e);
    }

    let log_file_path = format!("{}/{}", LOG_DIR, config.file_name);

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let log_level_filter = log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);

    let mut base_config = Dispatch::new()
        .level(log_level_filter)
        .level_for("serde", LevelFilter::Warn)
        .level_for("reqwest", LevelFilter::Warn)
        .level_for("hyper", LevelFilter::Warn)
        .level_for("mio", LevelFilter::Warn);

    let console_config = Dispatch::new()
        .format(|out, message, record| {
            let colors = fern::colors::ColoredLevelConfig::new()
                .error(fern::colors::Color::Red)
                .warn(fern::colors::Color::Yellow)
                .info(fern::colors::Color::Green)
                .debug(fern::colors::Color::Blue)
                .trace(fern::colors::Color::BrightBlack);

            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .chain(std::io::stderr());
    base_config = base_config.chain(console_config);

    match fern::log_file(&log_file_path) {
        Ok(file) => {
            let file_config = Dispatch::new()
                .format(|out, message, record| {
                    out.finish(format_args!("[{} {} {}] {}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"), record.level(), record.target(), message))
                })
                .chain(file);
            base_config = base_config.chain(file_config);
        }
        Err(e) => eprintln!("Failed to open log file '{}': {}", log_file_path, e),
    }

    if let Some(port) = config.remote_sink {
        let remote: Box<dyn Log> = Box::new(RemoteLog::spawn(port, config.node_id));
        base_config = base_config.chain(Dispatch::new().filter(|metadata| metadata.target() != REMOTE_TARGET).chain(remote));
    }

    base_config.apply().unwrap_or_else(|e| {
        eprintln!("Failed to apply logger configuration: {}", e);
    });

    log::info!("Logger initialized. Logging to console and '{}'.", log_file_path);
}

/// Lines a node may have queued for the log sink before new ones are dropped.
pub const FORWARD_BACKLOG: usize = 1024;

/// Pause before reconnecting to an unreachable log sink.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Forwards log records to a log sink as `LogMessage`s.
///
/// Records go through a bounded queue to a background thread that keeps one connection to the
/// sink. Logging never blocks: when the queue is full the line is dropped and counted, and the
/// count is reported to the sink once it catches up. The thread never logs through `log` itself.
pub struct RemoteLog {
    lines: SyncSender<Message>,
    dropped: Arc<AtomicU64>,
    node_id: i32,
}

impl RemoteLog {
    pub fn spawn(port: u16, node_id: i32) -> Self {
        let (sender, receiver) = mpsc::sync_channel::<Message>(FORWARD_BACKLOG);
        let dropped = Arc::new(AtomicU64::new(0));

        let mut forwarder = Forwarder { port, node_id, stream: None, retry_at: None, dropped: dropped.clone(), reported: false };
        let spawned = std::thread::Builder::new().name("log-forwarder".to_string()).spawn(move || {
            for message in receiver {
                forwarder.forward(&message);
            }
        });
        if let Err(e) = spawned {
            eprintln!("Failed to spawn the log forwarder: {}", e);
        }

        RemoteLog { lines: sender, dropped, node_id }
    }

    /// Lines dropped since the forwarder last caught up.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Owner of the connection to the log sink.
struct Forwarder {
    port: u16,
    node_id: i32,
    stream: Option<TcpStream>,
    retry_at: Option<Instant>,
    dropped: Arc<AtomicU64>,
    reported: bool,
}

impl Forwarder {
    fn forward(&mut self, message: &Message) {
        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            let note = Message::LogMessage { node: self.node_id, level: "WARN".to_string(), text: format!("{} log lines dropped", dropped) };
            self.write(&note);
        }
        self.write(message);
    }

    /// Writes one line, reconnecting at most once. A line that cannot be written is lost.
    fn write(&mut self, message: &Message) {
        let Ok(mut line) = serde_json::to_vec(message) else {
            return;
        };
        line.push(b'\n');

        for _ in 0..2 {
            let Some(stream) = self.connection() else {
                return;
            };
            match stream.write_all(&line) {
                Ok(()) => return,
                Err(_) => self.stream = None,
            }
        }
    }

    fn connection(&mut self) -> Option<&mut TcpStream> {
        if self.stream.is_none() {
            if self.retry_at.is_some_and(|at| Instant::now() < at) {
                return None;
            }
            match connect(self.port) {
                Ok(stream) => {
                    self.stream = Some(stream);
                    self.retry_at = None;
                }
                Err(e) => {
                    if !self.reported {
                        eprintln!("Log sink on port {} unreachable: {}", self.port, e);
                        self.reported = true;
                    }
                    self.retry_at = Some(Instant::now() + RECONNECT_DELAY);
                    return None;
                }
            }
        }
        self.stream.as_mut()
    }
}

fn connect(port: u16) -> std::io::Result<TcpStream> {
    let stream = TcpStream::connect(("localhost", port))?;
    stream.set_write_timeout(Some(Duration::from_secs(1)))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

impl Log for RemoteLog {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let message = Message::LogMessage { node: self.node_id, level: record.level().to_string(), text: format!("{}: {}", record.target(), record.args()) };
        if let Err(TrySendError::Full(_)) = self.lines.try_send(message) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn flush(&self) {}
}
