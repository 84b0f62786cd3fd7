//! The unit of work threaded through the generate/test loop.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Provider strategy for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Try the local model first, degrading to the cloud chain per call.
    Local,
    /// Iterate the ordered cloud provider list.
    #[default]
    Cloud,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Mode::Local),
            "cloud" => Ok(Mode::Cloud),
            other => Err(Error::InvalidTask(format!(
                "unknown mode '{}', expected 'local' or 'cloud'",
                other
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Local => write!(f, "local"),
            Mode::Cloud => write!(f, "cloud"),
        }
    }
}

/// Outcome of the most recent cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// No test cycle has completed yet.
    #[default]
    Start,
    Success,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Start => write!(f, "start"),
            Status::Success => write!(f, "success"),
            Status::Error => write!(f, "error"),
        }
    }
}

/// An image attachment, already base64-encoded by the requesting layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    /// MIME type, e.g. `image/png`.
    pub mime_type: String,
    /// Base64 payload without any `data:` prefix.
    pub data: String,
}

impl ImageAttachment {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

/// Immutable inputs of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// The user's request.
    pub task: String,
    /// Pre-extracted textual material from attachments.
    #[serde(default)]
    pub context: Option<String>,
    /// Image attachments in submission order.
    #[serde(default)]
    pub images: Vec<ImageAttachment>,
    /// Provider strategy.
    #[serde(default)]
    pub mode: Mode,
}

impl TaskRequest {
    /// Creates a request, rejecting a blank task description.
    pub fn new(task: impl Into<String>) -> Result<Self> {
        let task = task.into();
        if task.trim().is_empty() {
            return Err(Error::InvalidTask("task description cannot be empty".into()));
        }
        Ok(Self {
            task,
            context: None,
            images: Vec::new(),
            mode: Mode::default(),
        })
    }

    /// Sets the textual context. Blank context is treated as absent.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        self.context = if context.trim().is_empty() {
            None
        } else {
            Some(context)
        };
        self
    }

    /// Sets the image attachments, validating each one.
    pub fn with_images(mut self, images: Vec<ImageAttachment>) -> Result<Self> {
        for (index, image) in images.iter().enumerate() {
            if !image.mime_type.starts_with("image/") {
                return Err(Error::InvalidTask(format!(
                    "attachment {} has non-image MIME type '{}'",
                    index, image.mime_type
                )));
            }
            if image.data.is_empty() {
                return Err(Error::InvalidTask(format!(
                    "attachment {} has an empty payload",
                    index
                )));
            }
        }
        self.images = images;
        Ok(self)
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }
}

/// Mutable state of one run.
///
/// `logs` is append-only and gains exactly one entry per completed cycle.
/// `attempts` is incremented exactly once per generation.
#[derive(Debug, Clone)]
pub struct TaskState {
    task_id: Uuid,
    request: TaskRequest,
    pub(crate) code: String,
    logs: Vec<String>,
    pub(crate) attempts: u32,
    pub(crate) status: Status,
}

impl TaskState {
    pub fn new(request: TaskRequest) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            request,
            code: String::new(),
            logs: Vec::new(),
            attempts: 0,
            status: Status::Start,
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn request(&self) -> &TaskRequest {
        &self.request
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// The most recent log entry, if any.
    pub fn last_log(&self) -> Option<&str> {
        self.logs.last().map(String::as_str)
    }

    /// The most recent log entry if it denotes a failure.
    pub fn last_failure(&self) -> Option<&str> {
        self.last_log().filter(|entry| entry.contains("Error"))
    }

    /// Records the outcome of a cycle.
    pub(crate) fn record(&mut self, status: Status, entry: impl Into<String>) {
        self.status = status;
        self.logs.push(entry.into());
    }

    pub fn into_result(self) -> TaskResult {
        TaskResult {
            task_id: self.task_id,
            code: self.code,
            logs: self.logs,
            status: self.status,
            attempts: self.attempts,
        }
    }
}

/// Result record produced for the requesting layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub code: String,
    pub logs: Vec<String>,
    pub status: Status,
    pub attempts: u32,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}
