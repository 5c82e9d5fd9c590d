use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Category of a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum EventType {
    /// Emitted by a batch run
    Execution,
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventSubType {
    /// A file is about to be processed
    CurrentInput,
    /// Free-form status
    Progress,
    /// An output file was written
    OutputCreated,
}

/// Ephemeral notification from a running batch.
///
/// Events are delivered synchronously to the listeners registered at the time
/// of emission; nothing is buffered or replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Category
    #[serde(rename = "type")]
    pub kind: EventType,

    /// What happened
    pub sub_type: EventSubType,

    /// Input file concerned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,

    /// Output file concerned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_uri: Option<PathBuf>,

    /// Human-readable text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressEvent {
    /// A file is about to be processed.
    #[must_use]
    pub fn current_input(file_path: impl Into<PathBuf>, relative: &std::path::Path) -> Self {
        Self {
            kind: EventType::Execution,
            sub_type: EventSubType::CurrentInput,
            file_path: Some(file_path.into()),
            output_uri: None,
            message: Some(format!("Processing file: {}", relative.display())),
        }
    }

    /// Free-form status.
    #[must_use]
    pub fn progress(message: impl Into<String>) -> Self {
        Self {
            kind: EventType::Execution,
            sub_type: EventSubType::Progress,
            file_path: None,
            output_uri: None,
            message: Some(message.into()),
        }
    }

    /// An output file was written.
    #[must_use]
    pub fn output_created(output: impl Into<PathBuf>) -> Self {
        let output = output.into();
        let message = format!(
            "Created output file: {}",
            output
                .file_name()
                .map_or_else(|| output.display().to_string(), |n| n.to_string_lossy().into_owned())
        );
        Self {
            kind: EventType::Execution,
            sub_type: EventSubType::OutputCreated,
            file_path: None,
            output_uri: Some(output),
            message: Some(message),
        }
    }
}

/// Receives progress events.
///
/// Implemented for closures; channels are attached with
/// [`ProgressEmitter::subscribe_channel`].
pub trait ProgressListener: Send + Sync {
    /// Handles one event. Must not block for long; the run waits for it.
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressListener for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event);
    }
}

/// Fans events out to zero or more listeners.
#[derive(Clone, Default)]
pub struct ProgressEmitter {
    listeners: Vec<Arc<dyn ProgressListener>>,
}

impl ProgressEmitter {
    /// Creates an emitter without listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener.
    pub fn subscribe(&mut self, listener: impl ProgressListener + 'static) {
        self.listeners.push(Arc::new(listener));
    }

    /// Forwards every event into an unbounded channel.
    pub fn subscribe_channel(&mut self, sender: UnboundedSender<ProgressEvent>) {
        self.subscribe(move |event: &ProgressEvent| {
            // A dropped receiver just means nobody is watching anymore.
            let _ = sender.send(event.clone());
        });
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns true if nobody listens.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Delivers `event` to every listener in registration order.
    pub fn emit(&self, event: &ProgressEvent) {
        for listener in &self.listeners {
            listener.on_progress(event);
        }
    }
}

impl fmt::Debug for ProgressEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressEmitter")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
