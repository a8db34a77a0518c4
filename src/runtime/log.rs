/// Execution log and real-time log relay
///
/// Every execution attempt keeps an ordered, durable log that is persisted with
/// its snapshot. Each entry is mirrored to `tracing` and, best effort, pushed to
/// a real-time sink. The sink is disabled for the rest of the run on its first
/// delivery failure.

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Messages longer than this are truncated
pub const MAX_MESSAGE_CHARS: usize = 4000;
/// Characters kept from a truncated message
pub const KEPT_MESSAGE_CHARS: usize = 1900;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    /// Mirror a message to the process log at the matching level
    pub fn trace(self, message: &str) {
        match self {
            LogLevel::Trace => tracing::trace!("{}", message),
            LogLevel::Debug => tracing::debug!("{}", message),
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warning => tracing::warn!("{}", message),
            LogLevel::Error | LogLevel::Fatal => tracing::error!("{}", message),
        }
    }
}

/// Shorten oversized messages to their head plus an elision notice
///
/// Counts characters, not bytes, so a code point is never split.
pub fn truncate_message(message: &str) -> Cow<'_, str> {
    let length = message.chars().count();
    if length <= MAX_MESSAGE_CHARS {
        return Cow::Borrowed(message);
    }

    let head: String = message.chars().take(KEPT_MESSAGE_CHARS).collect();
    Cow::Owned(format!(
        "{} ... {} characters cut due to excessive length.",
        head,
        length - KEPT_MESSAGE_CHARS
    ))
}

/// One durable log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Ordered durable log of one execution attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionLog {
    entries: Vec<LogEntry>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a (possibly truncated) entry and return the stored message
    pub fn push(&mut self, level: LogLevel, message: &str) -> &str {
        self.entries.push(LogEntry {
            level,
            message: truncate_message(message).into_owned(),
            timestamp: Utc::now(),
        });
        let last = self.entries.len() - 1;
        &self.entries[last].message
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Messages in order, mostly for assertions
    pub fn messages(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.message.as_str()).collect()
    }
}

/// Event pushed to the real-time sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
    pub instance_id: Option<Uuid>,
}

/// Best-effort real-time delivery of log events
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn send(&self, event: &LogEvent) -> anyhow::Result<()>;
}

/// Forwards events into a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelLogSink {
    sender: mpsc::UnboundedSender<LogEvent>,
}

impl ChannelLogSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LogEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl LogSink for ChannelLogSink {
    async fn send(&self, event: &LogEvent) -> anyhow::Result<()> {
        self.sender
            .send(event.clone())
            .map_err(|_| anyhow::anyhow!("log receiver has been dropped"))
    }
}

/// Relay holding the current sink of one run
///
/// Uses ArcSwapOption so the sink can be dropped without locking while other
/// tasks are still logging through the same relay.
pub struct LogRelay {
    sink: ArcSwapOption<Box<dyn LogSink>>,
    /// Disabling notice raised while no execution log was at hand
    pending: ArcSwapOption<String>,
    instance_id: Option<Uuid>,
}

impl std::fmt::Debug for LogRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogRelay")
            .field("streaming", &self.is_streaming())
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

impl Default for LogRelay {
    fn default() -> Self {
        Self::disabled()
    }
}

impl LogRelay {
    pub fn new(sink: Box<dyn LogSink>) -> Self {
        Self {
            sink: ArcSwapOption::new(Some(Arc::new(sink))),
            pending: ArcSwapOption::new(None),
            instance_id: None,
        }
    }

    /// A relay that only mirrors to the process log
    pub fn disabled() -> Self {
        Self {
            sink: ArcSwapOption::new(None),
            pending: ArcSwapOption::new(None),
            instance_id: None,
        }
    }

    /// Tag every event with the instance being run
    pub fn for_instance(mut self, instance_id: Uuid) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    pub fn instance_id(&self) -> Option<Uuid> {
        self.instance_id
    }

    pub fn is_streaming(&self) -> bool {
        self.sink.load().is_some()
    }

    /// Deliver one event, returning the disabling notice if delivery failed
    ///
    /// Only the call that actually swaps the sink out gets the notice, so it is
    /// recorded exactly once per run.
    pub async fn emit(&self, level: LogLevel, message: &str) -> Option<String> {
        let sink = self.sink.load_full()?;

        let event = LogEvent {
            level,
            message: truncate_message(message).into_owned(),
            instance_id: self.instance_id,
        };

        match sink.send(&event).await {
            Ok(()) => None,
            Err(e) => {
                let previous = self.sink.swap(None);
                if previous.is_none() {
                    return None;
                }
                let notice = format!(
                    "Realtime processing has failed:\n{:#}\nLog streaming has been disabled.",
                    e
                );
                tracing::warn!("📡 {}", notice);
                Some(notice)
            }
        }
    }

    /// Mirror to tracing and deliver, for messages that have no durable log
    ///
    /// A disabling notice raised here is kept until `take_notice` hands it to
    /// the next execution log.
    pub async fn log(&self, level: LogLevel, message: &str) {
        level.trace(&truncate_message(message));
        if let Some(notice) = self.emit(level, message).await {
            self.pending.store(Some(Arc::new(notice)));
        }
    }

    /// Take the disabling notice that is still waiting for an execution log
    pub fn take_notice(&self) -> Option<String> {
        self.pending.swap(None).map(|notice| notice.as_ref().clone())
    }
}
