//! Routes records to per-channel formatters and sinks.
//!
//! Producers enqueue onto an unbounded channel and return immediately. A single
//! dedicated thread drains the queue in FIFO order and performs all file I/O.

use std::collections::HashMap;
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};

use crate::config::{AuditConfig, ChannelConfig};
use crate::error::AuditError;
use crate::models::audit_event::{
    AuditEvent, LogRecord, API_CHANNEL, APP_CHANNEL, LOGIN_CHANNEL, MODEL_CHANNEL,
};
use crate::services::formatter::{FormatterKind, RecordFormatter};
use crate::services::sink::{RotatingFileSink, Sink};

const WRITER_THREAD_NAME: &str = "audit-log-writer";

enum Command {
    Record(Box<LogRecord>),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

struct Channel {
    formatter: RecordFormatter,
    sinks: Vec<Box<dyn Sink>>,
}

/// Channel table, assembled before the writer starts.
#[derive(Default)]
pub struct ChannelRouter {
    channels: HashMap<String, Channel>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to a formatter and its sinks, replacing any previous
    /// binding.
    pub fn channel(
        mut self,
        name: impl Into<String>,
        formatter: RecordFormatter,
        sinks: Vec<Box<dyn Sink>>,
    ) -> Self {
        self.channels
            .insert(name.into(), Channel { formatter, sinks });
        self
    }

    /// The four standard channels, each writing to one rotating file under
    /// the configured log directory.
    pub fn from_config(config: &AuditConfig) -> Self {
        let formatter = |kind| {
            RecordFormatter::new(kind)
                .with_timestamp(config.timestamp_format.clone(), config.time_zone)
        };
        let file = |channel: &ChannelConfig| -> Vec<Box<dyn Sink>> {
            vec![Box::new(RotatingFileSink::from_channel(config.path_for(channel), channel))]
        };

        let router = Self::new()
            .channel(API_CHANNEL, formatter(FormatterKind::Api), file(&config.api_log))
            .channel(MODEL_CHANNEL, formatter(FormatterKind::Model), file(&config.model_log))
            .channel(LOGIN_CHANNEL, formatter(FormatterKind::Login), file(&config.login_log));
        if config.app_log_enabled {
            router.channel(APP_CHANNEL, formatter(FormatterKind::Json), file(&config.app_log))
        } else {
            router
        }
    }

    pub fn channel_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.channels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Spawns the writer thread.
    pub fn start(self) -> Result<(AuditLogger, RouterHandle), AuditError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let channels = self.channels;
        let thread = thread::Builder::new()
            .name(WRITER_THREAD_NAME.to_string())
            .spawn(move || run_writer(receiver, channels))
            .map_err(AuditError::WorkerSpawn)?;

        tracing::debug!("Audit log writer started");
        Ok((
            AuditLogger {
                sender: sender.clone(),
            },
            RouterHandle {
                sender,
                thread: Some(thread),
            },
        ))
    }
}

/// Cheap, cloneable producer handle.
#[derive(Clone)]
pub struct AuditLogger {
    sender: mpsc::UnboundedSender<Command>,
}

impl AuditLogger {
    /// Enqueues a raw record. Never blocks.
    pub fn log(&self, record: LogRecord) -> Result<(), AuditError> {
        self.sender
            .send(Command::Record(Box::new(record)))
            .map_err(|_| AuditError::Closed)
    }

    pub fn emit(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.log(event.into())
    }

    /// Resolves once every record queued before this call has been written
    /// and all sinks flushed.
    pub async fn flush(&self) -> Result<(), AuditError> {
        let (done, wait) = oneshot::channel();
        self.sender
            .send(Command::Flush(done))
            .map_err(|_| AuditError::Closed)?;
        wait.await.map_err(|_| AuditError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Owns the writer thread. Dropping it drains the queue and joins the thread.
pub struct RouterHandle {
    sender: mpsc::UnboundedSender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl RouterHandle {
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.sender.send(Command::Shutdown);
        if thread.join().is_err() {
            tracing::error!(target: "audit.fallback", "Audit log writer panicked");
        }
    }
}

impl Drop for RouterHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_writer(
    mut receiver: mpsc::UnboundedReceiver<Command>,
    mut channels: HashMap<String, Channel>,
) {
    while let Some(command) = receiver.blocking_recv() {
        let mut next = Some(command);
        while let Some(command) = next.take() {
            match command {
                Command::Record(record) => dispatch(&mut channels, &record),
                Command::Flush(done) => {
                    flush_all(&mut channels);
                    let _ = done.send(());
                }
                Command::Shutdown => {
                    flush_all(&mut channels);
                    return;
                }
            }
            next = receiver.try_recv().ok();
        }
        flush_all(&mut channels);
    }
    flush_all(&mut channels);
}

fn dispatch(channels: &mut HashMap<String, Channel>, record: &LogRecord) {
    let Some(channel) = channels.get_mut(&record.channel) else {
        tracing::error!(
            target: "audit.fallback",
            channel = %record.channel,
            record_message = %record.message,
            "Dropping record for unknown audit channel"
        );
        return;
    };

    let line = channel.formatter.format(record);
    for sink in channel.sinks.iter_mut() {
        if let Err(err) = sink.write_line(&line) {
            tracing::error!(
                target: "audit.fallback",
                error = %err,
                sink = %sink.describe(),
                channel = %record.channel,
                "Failed to write audit record"
            );
        }
    }
}

fn flush_all(channels: &mut HashMap<String, Channel>) {
    for channel in channels.values_mut() {
        for sink in channel.sinks.iter_mut() {
            if let Err(err) = sink.flush() {
                tracing::error!(
                    target: "audit.fallback",
                    error = %err,
                    sink = %sink.describe(),
                    "Failed to flush audit sink"
                );
            }
        }
    }
}
