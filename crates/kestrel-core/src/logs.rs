use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Where a log entry originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Stdout,
    Stderr,
    Main,
    Renderer,
    Preload,
    Isolated,
    Worker,
    Network,
    Ipc,
    System,
    Screenshot,
    DomDump,
}

impl LogSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSource::Stdout => "stdout",
            LogSource::Stderr => "stderr",
            LogSource::Main => "main",
            LogSource::Renderer => "renderer",
            LogSource::Preload => "preload",
            LogSource::Isolated => "isolated",
            LogSource::Worker => "worker",
            LogSource::Network => "network",
            LogSource::Ipc => "ipc",
            LogSource::System => "system",
            LogSource::Screenshot => "screenshot",
            LogSource::DomDump => "domdump",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One normalized entry in the run's diagnostic stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: DateTime<Utc>,
    pub source: LogSource,
    pub level: LogLevel,
    pub message: String,
    /// Structured detail (IPC channel/duration, network status, world name).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn new(source: LogSource, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            source,
            level,
            message: message.into(),
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Append-only stream merging all diagnostic sources for one run.
///
/// Entries are kept in insertion order (arrival order across sources, not
/// re-sorted by timestamp). The pipeline keeps an in-memory buffer for
/// `flush`/`snapshot` retrieval, fans entries out to live subscribers, and
/// optionally tees them to a JSONL file.
pub struct LogPipeline {
    buffer: Mutex<Vec<LogEntry>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<LogEntry>>>,
    sink: Mutex<Option<std::io::BufWriter<std::fs::File>>>,
}

impl LogPipeline {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
        }
    }

    /// Tee every subsequent entry to a JSONL file at `path`.
    pub fn attach_file_sink(&self, path: &Path) -> crate::Result<()> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        *self.sink.lock().unwrap() = Some(std::io::BufWriter::new(file));
        Ok(())
    }

    /// Append one entry, fanning it out to subscribers and the file sink.
    pub fn push(&self, entry: LogEntry) {
        if let Some(sink) = self.sink.lock().unwrap().as_mut() {
            if let Ok(line) = serde_json::to_string(&entry) {
                let _ = writeln!(sink, "{}", line);
                let _ = sink.flush();
            }
        }

        // Drop subscribers whose receiver side has gone away.
        self.subscribers
            .lock()
            .unwrap()
            .retain(|tx| tx.send(entry.clone()).is_ok());

        self.buffer.lock().unwrap().push(entry);
    }

    /// Register a live subscriber; receives every entry pushed after this call.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<LogEntry> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Drain and return all buffered entries.
    pub fn flush(&self) -> Vec<LogEntry> {
        std::mem::take(&mut *self.buffer.lock().unwrap())
    }

    /// Copy of the buffered entries without draining them.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.buffer.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().unwrap().is_empty()
    }
}

impl Default for LogPipeline {
    fn default() -> Self {
        Self::new()
    }
}
