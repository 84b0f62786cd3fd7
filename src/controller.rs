//! The bounded retry state machine alternating generation and testing.
//!
//! A [`Controller`] holds no per-task state: every call to [`Controller::run`]
//! threads its own [`TaskState`] through the loop, so one controller can
//! serve concurrent tasks. Within a task, generation and testing never
//! overlap and at most one sandbox session is alive at a time.

use tracing::Instrument;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::generator::{GenerationOutcome, Generator};
use crate::provider::ProviderChain;
use crate::sandbox::{self, DockerSandbox, Provisioning, SandboxProvider, SandboxSpec};
use crate::state::{Status, TaskRequest, TaskResult, TaskState};

/// Log entry appended when code was generated but could not be verified.
pub const UNVERIFIED_LOG: &str = "Unverified: sandbox unavailable, code generated but not verified";

/// Log entry appended when generation produced no code.
pub const EMPTY_CODE_LOG: &str = "Error: Empty code generated";

/// Default attempt ceiling.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Position in the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    GeneratingCode,
    Testing,
    Done,
}

/// Decides where the loop goes after a test cycle.
pub fn next_phase(state: &TaskState, max_attempts: u32) -> Phase {
    if state.status() == Status::Success || state.attempts() >= max_attempts {
        Phase::Done
    } else {
        Phase::GeneratingCode
    }
}

/// Maps a sandbox outcome to the status and log entry of the cycle.
pub fn interpret(provisioning: &Provisioning) -> (Status, String) {
    match provisioning {
        Provisioning::Unavailable(_) => (Status::Success, UNVERIFIED_LOG.to_string()),
        Provisioning::Executed(execution) => {
            let output = execution.output.trim();
            if execution.succeeded() {
                (Status::Success, format!("Success: {}", output))
            } else {
                (Status::Error, format!("Error: {}", output))
            }
        }
    }
}

/// Runs the generate/execute/verify loop for one task at a time.
pub struct Controller<P: SandboxProvider> {
    generator: Generator,
    sandbox: P,
    max_attempts: u32,
}

impl Controller<DockerSandbox> {
    /// Builds a controller with HTTP providers and a container sandbox.
    pub fn from_config(config: &Config) -> Result<Self> {
        let chain = ProviderChain::from_config(&config.providers)
            .map_err(|e| Error::Config(e.to_string()))?;
        let generator = Generator::new(chain, config.sandbox.language());
        let sandbox = DockerSandbox::with_cli(
            config.sandbox.runtime_cli.clone(),
            SandboxSpec::from(&config.sandbox),
        );

        Ok(Self::new(generator, sandbox).with_max_attempts(config.controller.max_attempts))
    }
}

impl<P: SandboxProvider> Controller<P> {
    pub fn new(generator: Generator, sandbox: P) -> Self {
        Self {
            generator,
            sandbox,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets the attempt ceiling. Values below 1 are raised to 1.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn sandbox(&self) -> &P {
        &self.sandbox
    }

    /// Runs the loop to completion. Never fails: every error ends up in the logs.
    pub async fn run(&self, request: TaskRequest) -> TaskResult {
        let state = TaskState::new(request);
        let span = tracing::info_span!("task", task_id = %state.task_id());
        self.drive(state).instrument(span).await
    }

    async fn drive(&self, mut state: TaskState) -> TaskResult {
        let mut phase = Phase::GeneratingCode;
        let mut generation = GenerationOutcome::Failed;

        loop {
            phase = match phase {
                Phase::GeneratingCode => {
                    generation = self.generator.generate(&mut state).await;
                    Phase::Testing
                }
                Phase::Testing => {
                    self.test_code(&mut state, &generation).await;
                    next_phase(&state, self.max_attempts)
                }
                Phase::Done => break,
            };
        }

        if state.status() == Status::Error {
            tracing::warn!(
                attempts = state.attempts(),
                "attempt budget exhausted without a passing run"
            );
        } else {
            tracing::info!(attempts = state.attempts(), "task completed");
        }

        state.into_result()
    }

    /// Runs one test cycle, appending exactly one log entry unless generation
    /// already recorded this cycle's failure.
    async fn test_code(&self, state: &mut TaskState, generation: &GenerationOutcome) {
        if *generation == GenerationOutcome::Failed {
            return;
        }

        if state.code().is_empty() {
            tracing::warn!(attempt = state.attempts(), "empty code generated, skipping sandbox");
            state.record(Status::Error, EMPTY_CODE_LOG);
            return;
        }

        tracing::info!(attempt = state.attempts(), "spawning sandbox");
        let provisioning = sandbox::execute(&self.sandbox, state.code()).await;
        if let Provisioning::Unavailable(reason) = &provisioning {
            tracing::warn!(reason = %reason, "returning unverified code");
        }

        let (status, entry) = interpret(&provisioning);
        tracing::info!(attempt = state.attempts(), status = %status, "test cycle finished");
        state.record(status, entry);
    }
}
