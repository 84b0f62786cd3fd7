//! Sandbox capability traits and types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SandboxConfig;
use crate::error::Result;

/// Resource limits and execution settings for one session.
///
/// The memory ceiling, disabled networking and read-only root filesystem are
/// a security boundary for untrusted generated code and are not configurable
/// off. Only `work_dir` is writable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxSpec {
    /// Base execution image reference.
    pub base_image: String,
    /// Hard memory ceiling (e.g. `512m`).
    pub memory_limit: String,
    /// Directory the code is injected into and executed from.
    pub work_dir: String,
    /// Interpreter run against the injected script.
    pub interpreter: String,
    /// File name of the injected script.
    pub script_name: String,
    /// Idle process keeping the session alive.
    pub keep_alive: String,
}

impl Default for SandboxSpec {
    fn default() -> Self {
        Self::from(&SandboxConfig::default())
    }
}

impl From<&SandboxConfig> for SandboxSpec {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            base_image: config.image.clone(),
            memory_limit: config.memory_limit.clone(),
            work_dir: config.work_dir.clone(),
            interpreter: config.interpreter.clone(),
            script_name: config.script_name.clone(),
            keep_alive: config.keep_alive.clone(),
        }
    }
}

/// Lifecycle of a session. A handle exists only once provisioning succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Ready,
    Running,
    Stopped,
}

/// Captured result of running code inside a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    /// Interpreter exit status.
    pub exit_code: i64,
    /// Combined standard output and error, decoded as UTF-8.
    pub output: String,
}

impl ExecutionOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// A live, exclusively owned execution environment.
#[async_trait]
pub trait SandboxSession: Send {
    /// Returns the session identifier.
    fn id(&self) -> &str;

    /// Returns the current lifecycle state.
    fn state(&self) -> SessionState;

    /// Injects `code` into the working directory and executes it.
    async fn run(&mut self, code: &str) -> Result<ExecutionOutput>;

    /// Forcibly tears the session down. Idempotent.
    async fn stop(&mut self) -> Result<()>;
}

/// Provisions fresh sessions. Alternate isolation backends implement this.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// The type of session this provider creates.
    type Session: SandboxSession + 'static;

    /// Provisions a new session, pulling the base image if needed.
    async fn start(&self) -> Result<Self::Session>;

    /// Returns the spec sessions are provisioned with.
    fn spec(&self) -> &SandboxSpec;
}
